use std::time::Instant;

use tracing::warn;

use crate::{
  domain::drift::{DriftReport, ReconcileResult},
  service::writer::IndexWriter,
};

/// Outcome of repairing one path
#[derive(Debug)]
enum FileOutcome {
  Added,
  Modified,
  Removed,
  Failed(String),
}

impl FileOutcome {
  fn from_write(path: &str, ok: FileOutcome, result: Result<(), crate::service::writer::WriteError>) -> Self {
    match result {
      Ok(()) => ok,
      Err(e) => {
        warn!(path = %path, error = %e, "Reconcile operation failed");
        FileOutcome::Failed(path.to_string())
      }
    }
  }
}

pub(super) async fn apply(writer: &IndexWriter, report: &DriftReport) -> ReconcileResult {
  let started = Instant::now();
  let mut outcomes = Vec::with_capacity(report.change_count());

  for path in &report.added {
    outcomes.push(FileOutcome::from_write(path, FileOutcome::Added, writer.update(path).await));
  }
  for path in &report.modified {
    outcomes.push(FileOutcome::from_write(path, FileOutcome::Modified, writer.update(path).await));
  }
  for path in &report.removed {
    outcomes.push(FileOutcome::from_write(path, FileOutcome::Removed, writer.remove(path).await));
  }

  writer.persist().await;

  let mut result = outcomes.into_iter().fold(
    ReconcileResult {
      success: true,
      files_added: 0,
      files_modified: 0,
      files_removed: 0,
      failed: Vec::new(),
      duration_ms: 0,
    },
    |mut acc, outcome| {
      match outcome {
        FileOutcome::Added => acc.files_added += 1,
        FileOutcome::Modified => acc.files_modified += 1,
        FileOutcome::Removed => acc.files_removed += 1,
        FileOutcome::Failed(path) => {
          acc.success = false;
          acc.failed.push(path);
        }
      }
      acc
    },
  );
  result.duration_ms = started.elapsed().as_millis() as u64;
  result
}

/// Result for a pass that could not start
pub(super) fn not_started(started: Instant) -> ReconcileResult {
  ReconcileResult {
    success: false,
    files_added: 0,
    files_modified: 0,
    files_removed: 0,
    failed: Vec::new(),
    duration_ms: started.elapsed().as_millis() as u64,
  }
}
