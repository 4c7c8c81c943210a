//! Indexing strategies - when index mutations run
//!
//! Every strategy shares one processing pass ([`StrategyCore::process`]) and
//! differs only in what triggers it:
//!
//! - [`RealtimeStrategy`] - settled filesystem events
//! - [`LazyStrategy`] - queued events, processed on flush or stop
//! - [`GitStrategy`] - files changed between the last indexed commit and HEAD
//!
//! Strategies that own a worker task follow the actor shape used throughout
//! this crate: commands over `mpsc`, flush replies over `oneshot`, shutdown
//! over a `CancellationToken`.

mod fs_events;
mod git;
mod lazy;
mod realtime;

use std::{
  path::{Path, PathBuf},
  sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
  },
};

use async_trait::async_trait;
pub use git::{GIT_STATE_FILE, GitState, GitStrategy};
pub use lazy::LazyStrategy;
pub use realtime::RealtimeStrategy;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, trace, warn};

use crate::{
  domain::{
    config::IndexConfig,
    strategy::{StrategyEvent, StrategyId, StrategyKind, StrategyStats},
  },
  service::{
    integrity::IntegrityEngine,
    policy::{IndexingPolicy, is_ignore_file},
    util::{is_internal, to_relative},
    writer::IndexWriter,
  },
};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StrategyError {
  /// The environment does not support this strategy
  #[error("Strategy precondition failed: {0}")]
  Precondition(String),

  #[error("File watcher error: {0}")]
  Watcher(#[from] notify::Error),

  /// Operation not valid in the current lifecycle state
  #[error("Invalid strategy state: {0}")]
  State(String),
}

// ============================================================================
// Trait
// ============================================================================

/// A triggering policy for index mutations
///
/// All methods take `&self` so shared handles can report status after the
/// orchestrator has switched away; such handles report `is_active() == false`.
#[async_trait]
pub trait IndexingStrategy: Send + Sync {
  fn id(&self) -> StrategyId;

  fn kind(&self) -> StrategyKind;

  fn is_active(&self) -> bool;

  /// Begin consuming triggers
  async fn start(&self) -> Result<(), StrategyError>;

  /// Stop consuming triggers and wait for in-flight work; idempotent
  async fn stop(&self);

  /// Process everything pending; no-op when not active
  async fn flush(&self) -> Result<(), StrategyError>;

  /// Explicit change hints (absolute or project-relative paths)
  async fn enqueue(&self, paths: Vec<PathBuf>);

  fn stats(&self) -> StrategyStats;
}

/// Construct a strategy of the given kind (not started)
pub fn create_strategy(kind: StrategyKind, ctx: StrategyContext) -> Arc<dyn IndexingStrategy> {
  match kind {
    StrategyKind::Realtime => Arc::new(RealtimeStrategy::new(ctx)),
    StrategyKind::Lazy => Arc::new(LazyStrategy::new(ctx)),
    StrategyKind::Git => Arc::new(GitStrategy::new(ctx)),
  }
}

// ============================================================================
// Shared State
// ============================================================================

/// Everything a strategy needs from its surroundings
#[derive(Clone)]
pub struct StrategyContext {
  pub project_root: PathBuf,
  pub index_path: PathBuf,
  pub writer: Arc<IndexWriter>,
  pub policy: Arc<dyn IndexingPolicy>,
  pub integrity: Arc<IntegrityEngine>,
  pub config: IndexConfig,
  pub events: broadcast::Sender<StrategyEvent>,
}

/// Commands for strategies with a worker task
#[derive(Debug)]
pub(crate) enum Command {
  Enqueue(Vec<String>),
  Flush(oneshot::Sender<()>),
}

/// Lifecycle slot guarded by each strategy's async mutex
pub(crate) enum Lifecycle<R> {
  Idle,
  Running(R),
  Stopped,
}

impl<R> Lifecycle<R> {
  pub(crate) fn running(&self) -> Option<&R> {
    match self {
      Lifecycle::Running(r) => Some(r),
      _ => None,
    }
  }

  /// Error for calling `start` outside `Idle`
  pub(crate) fn start_error(&self) -> Option<StrategyError> {
    match self {
      Lifecycle::Idle => None,
      Lifecycle::Running(_) => Some(StrategyError::State("already started".to_string())),
      Lifecycle::Stopped => Some(StrategyError::State("cannot restart a stopped strategy".to_string())),
    }
  }
}

/// Identity, counters and the shared processing pass
pub(crate) struct StrategyCore {
  id: StrategyId,
  kind: StrategyKind,
  pub(crate) ctx: StrategyContext,
  active: AtomicBool,
  pending: AtomicUsize,
  processed: AtomicUsize,
}

impl StrategyCore {
  pub(crate) fn new(kind: StrategyKind, ctx: StrategyContext) -> Self {
    Self {
      id: StrategyId::next(),
      kind,
      ctx,
      active: AtomicBool::new(false),
      pending: AtomicUsize::new(0),
      processed: AtomicUsize::new(0),
    }
  }

  pub(crate) fn id(&self) -> StrategyId {
    self.id
  }

  pub(crate) fn kind(&self) -> StrategyKind {
    self.kind
  }

  pub(crate) fn is_active(&self) -> bool {
    self.active.load(Ordering::Acquire)
  }

  pub(crate) fn set_active(&self, active: bool) {
    self.active.store(active, Ordering::Release);
  }

  pub(crate) fn stats(&self) -> StrategyStats {
    StrategyStats {
      name: self.kind,
      is_active: self.is_active(),
      pending_files: self.pending.load(Ordering::Acquire),
      processed_files: self.processed.load(Ordering::Acquire),
    }
  }

  pub(crate) fn add_pending(&self, n: usize) {
    self.pending.fetch_add(n, Ordering::AcqRel);
  }

  fn finish_one(&self) {
    let _ = self
      .pending
      .fetch_update(Ordering::AcqRel, Ordering::Acquire, |p| Some(p.saturating_sub(1)));
    self.processed.fetch_add(1, Ordering::AcqRel);
  }

  pub(crate) fn emit_started(&self) {
    let _ = self.ctx.events.send(StrategyEvent::Started {
      id: self.id,
      kind: self.kind,
    });
  }

  pub(crate) fn emit_flushed(&self) {
    let _ = self.ctx.events.send(StrategyEvent::Flushed {
      id: self.id,
      kind: self.kind,
    });
  }

  pub(crate) fn emit_stopped(&self) {
    let _ = self.ctx.events.send(StrategyEvent::Stopped {
      id: self.id,
      kind: self.kind,
    });
  }

  /// Project-relative key for a changed path, `None` for tooling paths
  pub(crate) fn normalize(&self, path: &Path) -> Option<String> {
    let relative = to_relative(&self.ctx.project_root, path)?;
    if is_internal(&self.ctx.project_root, &self.ctx.index_path, Path::new(&relative)) {
      return None;
    }
    Some(relative)
  }

  /// Run one processing pass over `paths`
  ///
  /// Every path leaves pending and counts as processed, whether it was
  /// indexed, removed, rejected or failed.
  pub(crate) async fn process(&self, paths: Vec<String>) {
    if paths.is_empty() {
      return;
    }

    let _indexing = self.ctx.integrity.indexing_guard();
    let writer = &self.ctx.writer;
    let total = paths.len();
    let mut failed = 0usize;

    if paths.iter().any(|p| is_ignore_file(p)) {
      debug!(strategy = %self.kind, "Ignore rules changed");
      self.ctx.policy.reload();
    }

    for relative in paths {
      let decision = self.ctx.policy.should_index(Path::new(&relative));
      if decision.should_index {
        match writer.apply(&relative).await {
          Ok(op) => trace!(strategy = %self.kind, path = %relative, op = ?op, "Applied"),
          Err(e) => {
            failed += 1;
            warn!(strategy = %self.kind, path = %relative, error = %e, "Failed to apply change");
          }
        }
      } else if writer.is_tracked(&relative) {
        if let Err(e) = writer.remove(&relative).await {
          failed += 1;
          warn!(strategy = %self.kind, path = %relative, error = %e, "Failed to remove rejected file");
        }
      } else {
        trace!(
          strategy = %self.kind,
          path = %relative,
          reason = decision.reason.as_deref().unwrap_or("rejected"),
          "Skipping file"
        );
      }
      self.finish_one();
    }

    writer.persist().await;
    debug!(strategy = %self.kind, id = %self.id, total, failed, "Batch processed");
  }
}
