//! Drift audit and reconciliation read models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of comparing the fingerprint store against the filesystem
///
/// Every audited path lands in exactly one of `added`, `modified`, `removed`
/// or the `in_sync` count. Paths in `skipped` were on disk but could not be
/// read, so they are not part of the audited set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftReport {
  /// On disk, no fingerprint recorded
  pub added: Vec<String>,
  /// Recorded, but the content fingerprint differs
  pub modified: Vec<String>,
  /// Recorded, but no longer on disk (or no longer eligible)
  pub removed: Vec<String>,
  /// Recorded and unchanged
  pub in_sync: usize,
  /// Eligible files that could not be fingerprinted
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub skipped: Vec<String>,
  pub last_checked: DateTime<Utc>,
}

impl DriftReport {
  pub fn empty() -> Self {
    Self {
      added: Vec::new(),
      modified: Vec::new(),
      removed: Vec::new(),
      in_sync: 0,
      skipped: Vec::new(),
      last_checked: Utc::now(),
    }
  }

  /// Number of paths that need an index mutation
  pub fn change_count(&self) -> usize {
    self.added.len() + self.modified.len() + self.removed.len()
  }

  pub fn has_drift(&self) -> bool {
    self.change_count() > 0
  }

  /// Size of the audited set (all four buckets)
  pub fn audited_count(&self) -> usize {
    self.change_count() + self.in_sync
  }
}

/// Outcome of a reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileResult {
  /// False if any single operation failed
  pub success: bool,
  pub files_added: usize,
  pub files_modified: usize,
  pub files_removed: usize,
  /// Paths whose operation failed
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub failed: Vec<String>,
  pub duration_ms: u64,
}

impl ReconcileResult {
  pub fn applied_count(&self) -> usize {
    self.files_added + self.files_modified + self.files_removed
  }
}
