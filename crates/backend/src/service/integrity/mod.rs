//! IntegrityEngine - detects and repairs drift between the index and disk
//!
//! The engine audits the fingerprint stores against the filesystem
//! ([`IntegrityEngine::check_drift`]) and replays the differences through the
//! shared [`IndexWriter`] ([`IntegrityEngine::reconcile`]).
//!
//! # Mutual exclusion
//!
//! Strategies raise the indexing flag (see [`IntegrityEngine::indexing_guard`])
//! while they mutate the index. A scheduled check looks at the flag before the
//! walk and again before reconciling, and skips when it is raised. A busy flag
//! coalesces overlapping checks.
//!
//! # Periodic checks
//!
//! One cancellable repeating task per engine. Each tick body runs in its own
//! task so a panic inside a check is logged and the timer keeps going.

mod reconcile;
mod scan;

use std::{
  path::{Path, PathBuf},
  sync::{
    Arc, Mutex, PoisonError, Weak,
    atomic::{AtomicBool, Ordering},
  },
  time::{Duration, Instant},
};

use tokio::{
  sync::watch,
  task::JoinHandle,
  time::{MissedTickBehavior, interval},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{index::IndexMutator, policy::IndexingPolicy, writer::IndexWriter};
use crate::{
  db::FingerprintStore,
  domain::{
    config::IntegrityConfig,
    drift::{DriftReport, ReconcileResult},
  },
};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum IntegrityError {
  #[error("Failed to walk {path}: {source}")]
  Walk {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("Drift scan task failed: {0}")]
  Task(#[from] tokio::task::JoinError),
}

// ============================================================================
// Public Types
// ============================================================================

/// Collaborators the engine is built from
pub struct IntegrityDeps {
  pub project_path: PathBuf,
  pub index_path: PathBuf,
  pub index: Arc<dyn IndexMutator>,
  pub docs_index: Option<Arc<dyn IndexMutator>>,
  pub policy: Arc<dyn IndexingPolicy>,
  pub fingerprints: Arc<FingerprintStore>,
  pub docs_fingerprints: Option<Arc<FingerprintStore>>,
}

/// What one scheduled check did
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
  /// Another check was still running
  SkippedBusy,
  /// A strategy held the indexing flag
  SkippedIndexing,
  Checked {
    report: DriftReport,
    /// Present when drift was found and auto-reconcile is on
    reconciled: Option<ReconcileResult>,
  },
  Failed(String),
}

/// Holds the indexing flag raised until dropped
pub struct IndexingGuard<'a> {
  flag: &'a AtomicBool,
}

impl Drop for IndexingGuard<'_> {
  fn drop(&mut self) {
    self.flag.store(false, Ordering::Release);
  }
}

struct ScanGuard<'a> {
  flag: &'a AtomicBool,
}

impl Drop for ScanGuard<'_> {
  fn drop(&mut self) {
    self.flag.store(false, Ordering::Release);
  }
}

struct PeriodicTask {
  cancel: CancellationToken,
  handle: JoinHandle<()>,
}

// ============================================================================
// IntegrityEngine
// ============================================================================

pub struct IntegrityEngine {
  project_path: PathBuf,
  index_path: PathBuf,
  policy: Arc<dyn IndexingPolicy>,
  writer: Arc<IndexWriter>,
  config: IntegrityConfig,
  indexing_active: AtomicBool,
  scan_in_progress: AtomicBool,
  periodic: Mutex<Option<PeriodicTask>>,
  reports: watch::Sender<Option<DriftReport>>,
}

impl IntegrityEngine {
  pub fn new(deps: IntegrityDeps, config: IntegrityConfig) -> Self {
    let writer = Arc::new(IndexWriter::new(
      deps.project_path.clone(),
      deps.index,
      deps.docs_index,
      deps.fingerprints,
      deps.docs_fingerprints,
    ));
    let (reports, _) = watch::channel(None);

    Self {
      project_path: deps.project_path,
      index_path: deps.index_path,
      policy: deps.policy,
      writer,
      config,
      indexing_active: AtomicBool::new(false),
      scan_in_progress: AtomicBool::new(false),
      periodic: Mutex::new(None),
      reports,
    }
  }

  pub fn project_path(&self) -> &Path {
    &self.project_path
  }

  pub fn config(&self) -> &IntegrityConfig {
    &self.config
  }

  // --------------------------------------------------------------------------
  // Audit and repair
  // --------------------------------------------------------------------------

  /// Compare every eligible file on disk with its recorded fingerprint
  ///
  /// Read-only apart from reloading the policy's ignore rules. Lists in the
  /// report are sorted.
  pub async fn check_drift(&self) -> Result<DriftReport, IntegrityError> {
    let started = Instant::now();
    self.policy.reload();
    let input = scan::ScanInput {
      root: self.project_path.clone(),
      index_path: self.index_path.clone(),
      policy: self.policy.clone(),
      writer: self.writer.clone(),
      trust_mtime: self.config.trust_mtime,
    };

    let report = tokio::task::spawn_blocking(move || scan::scan(&input)).await??;

    info!(
      root = %self.project_path.display(),
      added = report.added.len(),
      modified = report.modified.len(),
      removed = report.removed.len(),
      in_sync = report.in_sync,
      skipped = report.skipped.len(),
      elapsed_ms = started.elapsed().as_millis() as u64,
      "Drift check complete"
    );
    Ok(report)
  }

  /// Replay drift through the index
  ///
  /// Uses `report` when given, otherwise runs a fresh check. A failed single
  /// operation is counted in `failed` and does not stop the pass.
  pub async fn reconcile(&self, report: Option<DriftReport>) -> ReconcileResult {
    let started = Instant::now();

    if !self.writer.is_loaded() {
      warn!("Index not loaded, skipping reconcile");
      return reconcile::not_started(started);
    }

    let report = match report {
      Some(report) => report,
      None => match self.check_drift().await {
        Ok(report) => report,
        Err(e) => {
          error!(error = %e, "Drift check failed, cannot reconcile");
          return reconcile::not_started(started);
        }
      },
    };

    if !report.has_drift() {
      debug!("No drift to reconcile");
    }

    let mut result = reconcile::apply(&self.writer, &report).await;
    result.duration_ms = started.elapsed().as_millis() as u64;
    info!(
      added = result.files_added,
      modified = result.files_modified,
      removed = result.files_removed,
      failed = result.failed.len(),
      duration_ms = result.duration_ms,
      "Reconcile complete"
    );
    result
  }

  // --------------------------------------------------------------------------
  // Indexing flag
  // --------------------------------------------------------------------------

  pub fn set_indexing_active(&self, active: bool) {
    self.indexing_active.store(active, Ordering::Release);
  }

  pub fn is_indexing_active(&self) -> bool {
    self.indexing_active.load(Ordering::Acquire)
  }

  /// Raise the indexing flag for the guard's lifetime
  pub fn indexing_guard(&self) -> IndexingGuard<'_> {
    self.set_indexing_active(true);
    IndexingGuard {
      flag: &self.indexing_active,
    }
  }

  // --------------------------------------------------------------------------
  // Scheduled checks
  // --------------------------------------------------------------------------

  /// One periodic tick: check, then reconcile when configured and needed
  pub async fn run_scheduled_check(&self) -> CheckOutcome {
    if self.scan_in_progress.swap(true, Ordering::AcqRel) {
      debug!("Drift check already running, skipping");
      return CheckOutcome::SkippedBusy;
    }
    let _scan = ScanGuard {
      flag: &self.scan_in_progress,
    };

    if self.is_indexing_active() {
      debug!("Indexing in progress, skipping drift check");
      return CheckOutcome::SkippedIndexing;
    }

    let report = match self.check_drift().await {
      Ok(report) => report,
      Err(e) => {
        error!(error = %e, "Scheduled drift check failed");
        return CheckOutcome::Failed(e.to_string());
      }
    };
    self.reports.send_replace(Some(report.clone()));

    // A strategy may have started a pass while the walk ran
    if self.is_indexing_active() {
      debug!("Indexing started during drift check, not reconciling");
      return CheckOutcome::SkippedIndexing;
    }

    let reconciled = if self.config.auto_reconcile && report.has_drift() {
      Some(self.reconcile(Some(report.clone())).await)
    } else {
      None
    };

    CheckOutcome::Checked { report, reconciled }
  }

  /// Run one scheduled check in the background
  pub fn trigger_check(self: &Arc<Self>) -> JoinHandle<CheckOutcome> {
    let engine = self.clone();
    tokio::spawn(async move { engine.run_scheduled_check().await })
  }

  /// Start the repeating check; no-op when already running
  pub fn start_periodic_check(self: &Arc<Self>, period: Duration) {
    if period.is_zero() {
      warn!("Ignoring periodic drift check with zero interval");
      return;
    }

    let mut slot = self.periodic.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(task) = slot.as_ref()
      && !task.handle.is_finished()
    {
      debug!("Periodic drift check already running");
      return;
    }

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(run_periodic(Arc::downgrade(self), period, cancel.clone()));
    *slot = Some(PeriodicTask { cancel, handle });
    info!(interval_secs = period.as_secs(), "Periodic drift check started");
  }

  /// Start the repeating check if `periodic_check` is configured
  pub fn start_configured_check(self: &Arc<Self>) {
    if self.config.periodic_check {
      self.start_periodic_check(Duration::from_secs(self.config.check_interval_secs));
    }
  }

  /// Cancel the repeating check; idempotent
  pub fn stop_periodic_check(&self) {
    let task = self.periodic.lock().unwrap_or_else(PoisonError::into_inner).take();
    if let Some(task) = task {
      task.cancel.cancel();
      info!("Periodic drift check stopped");
    }
  }

  pub fn is_periodic_check_running(&self) -> bool {
    self
      .periodic
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .as_ref()
      .is_some_and(|task| !task.handle.is_finished())
  }

  /// Most recent report from a scheduled check
  pub fn last_report(&self) -> Option<DriftReport> {
    self.reports.borrow().clone()
  }

  pub fn subscribe_reports(&self) -> watch::Receiver<Option<DriftReport>> {
    self.reports.subscribe()
  }
}

impl Drop for IntegrityEngine {
  fn drop(&mut self) {
    self.stop_periodic_check();
  }
}

async fn run_periodic(engine: Weak<IntegrityEngine>, period: Duration, cancel: CancellationToken) {
  let mut timer = interval(period);
  timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

  // Skip the immediate tick
  timer.tick().await;

  loop {
    tokio::select! {
        biased;

        _ = cancel.cancelled() => {
            debug!("Periodic drift check cancelled");
            break;
        }

        _ = timer.tick() => {
            let Some(engine) = engine.upgrade() else {
                break;
            };
            let tick = tokio::spawn(async move { engine.run_scheduled_check().await });
            match tick.await {
                Ok(CheckOutcome::Checked { report, reconciled }) => {
                    debug!(
                        changes = report.change_count(),
                        reconciled = reconciled.is_some(),
                        "Periodic drift check finished"
                    );
                }
                Ok(CheckOutcome::Failed(e)) => warn!(error = %e, "Periodic drift check failed"),
                Ok(skipped) => debug!(outcome = ?skipped, "Periodic drift check skipped"),
                Err(e) => error!(error = %e, "Periodic drift check panicked"),
            }
        }
    }
  }
}
