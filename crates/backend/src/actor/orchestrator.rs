//! StrategyOrchestrator - owns the single active indexing strategy
//!
//! The orchestrator resolves a configured strategy name into a running
//! instance and switches between instances without losing queued work: the
//! outgoing strategy is flushed, then stopped, before its replacement starts.
//!
//! # Switch semantics
//!
//! The slot is emptied before the old strategy is flushed and stopped. If the
//! requested name is invalid or the new strategy fails to start, the call
//! returns an error and no strategy is current.

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::strategy::{IndexingStrategy, StrategyContext, StrategyError, create_strategy};
use crate::{
  db::FingerprintStore,
  domain::{
    config::IndexConfig,
    strategy::{StrategyEvent, StrategyKind, StrategyStats},
  },
  service::{index::IndexMutator, integrity::IntegrityEngine, policy::IndexingPolicy, writer::IndexWriter},
};

const EVENT_CAPACITY: usize = 256;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
  #[error("Unknown indexing strategy '{name}' (expected one of: realtime, lazy, git)")]
  Configuration { name: String },

  #[error("Strategy error: {0}")]
  Strategy(#[from] StrategyError),

  #[error("Orchestrator has been shut down")]
  State,
}

// ============================================================================
// Construction
// ============================================================================

/// Collaborators supplied once at construction
pub struct StrategyOrchestratorDeps {
  pub project_path: PathBuf,
  pub index_path: PathBuf,
  pub index: Arc<dyn IndexMutator>,
  pub docs_index: Option<Arc<dyn IndexMutator>>,
  pub integrity: Arc<IntegrityEngine>,
  pub policy: Arc<dyn IndexingPolicy>,
  pub fingerprints: Arc<FingerprintStore>,
  pub docs_fingerprints: Option<Arc<FingerprintStore>>,
}

pub struct StrategyOrchestrator {
  project_path: PathBuf,
  index_path: PathBuf,
  writer: Arc<IndexWriter>,
  policy: Arc<dyn IndexingPolicy>,
  integrity: Arc<IntegrityEngine>,
  events: broadcast::Sender<StrategyEvent>,
  current: Option<Arc<dyn IndexingStrategy>>,
  shut_down: bool,
}

impl StrategyOrchestrator {
  pub fn new(deps: StrategyOrchestratorDeps) -> Self {
    let writer = Arc::new(IndexWriter::new(
      deps.project_path.clone(),
      deps.index,
      deps.docs_index,
      deps.fingerprints,
      deps.docs_fingerprints,
    ));
    let (events, _) = broadcast::channel(EVENT_CAPACITY);

    Self {
      project_path: deps.project_path,
      index_path: deps.index_path,
      writer,
      policy: deps.policy,
      integrity: deps.integrity,
      events,
      current: None,
      shut_down: false,
    }
  }

  // ==========================================================================
  // Lifecycle
  // ==========================================================================

  /// Make the configured strategy current
  ///
  /// No-op if the current strategy is active and already has the requested
  /// name. On error no strategy is current.
  pub async fn set_strategy(&mut self, config: &IndexConfig) -> Result<(), OrchestratorError> {
    if self.shut_down {
      return Err(OrchestratorError::State);
    }

    let requested = config.indexing_strategy.trim().to_lowercase();
    if let Some(current) = &self.current
      && current.is_active()
      && current.kind().as_str() == requested
    {
      debug!(strategy = %requested, "Strategy already active");
      return Ok(());
    }

    if let Some(old) = self.current.take() {
      info!(from = %old.kind(), to = %requested, "Switching indexing strategy");
      if let Err(e) = old.flush().await {
        warn!(strategy = %old.kind(), error = %e, "Failed to flush outgoing strategy");
      }
      old.stop().await;
    }

    let kind: StrategyKind = requested.parse().map_err(|_| OrchestratorError::Configuration {
      name: config.indexing_strategy.clone(),
    })?;

    let strategy = create_strategy(kind, self.context(config));
    strategy.start().await?;
    self.current = Some(strategy);

    if self.integrity.config().verify_after_switch {
      debug!("Requesting drift check after strategy switch");
      let _ = self.integrity.trigger_check();
    }
    Ok(())
  }

  /// Flush the current strategy; failures are logged
  pub async fn flush(&mut self) {
    let Some(current) = &self.current else {
      return;
    };
    if let Err(e) = current.flush().await {
      warn!(strategy = %current.kind(), error = %e, "Flush failed");
    }
  }

  /// Flush and stop the current strategy, then persist fingerprints; idempotent
  pub async fn stop(&mut self) {
    if let Some(current) = self.current.take() {
      if let Err(e) = current.flush().await {
        warn!(strategy = %current.kind(), error = %e, "Flush before stop failed");
      }
      current.stop().await;
    }
    self.writer.persist().await;
  }

  /// Stop everything and close the index collaborators
  pub async fn shutdown(&mut self) {
    if self.shut_down {
      return;
    }
    self.stop().await;
    self.integrity.stop_periodic_check();
    if let Err(e) = self.writer.close().await {
      warn!(error = %e, "Failed to close index");
    }
    self.shut_down = true;
    info!(root = %self.project_path.display(), "Orchestrator shut down");
  }

  /// Forward explicit change hints to the current strategy
  pub async fn enqueue(&self, paths: Vec<PathBuf>) {
    if let Some(current) = &self.current {
      current.enqueue(paths).await;
    }
  }

  // ==========================================================================
  // Accessors
  // ==========================================================================

  pub fn current_strategy(&self) -> Option<Arc<dyn IndexingStrategy>> {
    self.current.clone()
  }

  pub fn stats(&self) -> Option<StrategyStats> {
    self.current.as_ref().map(|s| s.stats())
  }

  pub fn is_active(&self) -> bool {
    self.current.as_ref().is_some_and(|s| s.is_active())
  }

  pub fn project_path(&self) -> &Path {
    &self.project_path
  }

  pub fn index_path(&self) -> &Path {
    &self.index_path
  }

  pub fn integrity(&self) -> &Arc<IntegrityEngine> {
    &self.integrity
  }

  /// Lifecycle events of every strategy this orchestrator creates
  pub fn subscribe_events(&self) -> broadcast::Receiver<StrategyEvent> {
    self.events.subscribe()
  }

  fn context(&self, config: &IndexConfig) -> StrategyContext {
    StrategyContext {
      project_root: self.project_path.clone(),
      index_path: self.index_path.clone(),
      writer: self.writer.clone(),
      policy: self.policy.clone(),
      integrity: self.integrity.clone(),
      config: config.clone(),
      events: self.events.clone(),
    }
  }
}
