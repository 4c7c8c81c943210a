//! Drift scan: compare fingerprint stores with the files on disk.
//!
//! Runs entirely on the blocking pool. Each eligible file is classified
//! against the store that owns it:
//! - no record -> added
//! - record with matching size+mtime (when trusted) or matching hash -> in sync
//! - otherwise -> modified
//!
//! Records never seen during the walk are removed, whichever store holds
//! them. A record for an existing file kept in a store that does not own the
//! path is not reported; the file is classified against its owner only, so
//! the buckets stay disjoint. Files that cannot be read go to `skipped` and
//! keep their records.

use std::{
  collections::HashSet,
  path::{Path, PathBuf},
  sync::Arc,
};

use chrono::Utc;
use tracing::{trace, warn};

use super::IntegrityError;
use crate::{
  db::hash_bytes,
  domain::drift::DriftReport,
  service::{
    policy::IndexingPolicy,
    util::{is_internal, to_relative},
    writer::IndexWriter,
  },
};

pub(super) struct ScanInput {
  pub root: PathBuf,
  pub index_path: PathBuf,
  pub policy: Arc<dyn IndexingPolicy>,
  pub writer: Arc<IndexWriter>,
  pub trust_mtime: bool,
}

pub(super) fn scan(input: &ScanInput) -> Result<DriftReport, IntegrityError> {
  let root = input.root.as_path();
  match std::fs::metadata(root) {
    Ok(m) if m.is_dir() => {}
    Ok(_) => {
      return Err(IntegrityError::Walk {
        path: root.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::NotADirectory, "project root is not a directory"),
      });
    }
    Err(source) => {
      return Err(IntegrityError::Walk {
        path: root.to_path_buf(),
        source,
      });
    }
  }

  let mut report = DriftReport::empty();
  let mut seen: HashSet<String> = HashSet::new();

  let walker = walkdir::WalkDir::new(root)
    .follow_links(false)
    .sort_by_file_name()
    .into_iter()
    .filter_entry(|e| {
      if e.depth() == 0 {
        return true;
      }
      if is_internal(root, &input.index_path, e.path()) {
        return false;
      }
      !e.file_type().is_dir() || input.policy.should_descend(e.path())
    });

  for entry in walker {
    let entry = match entry {
      Ok(entry) => entry,
      Err(e) => {
        warn!(error = %e, "Skipping unreadable entry during drift scan");
        continue;
      }
    };
    if !entry.file_type().is_file() {
      continue;
    }

    let Some(relative) = to_relative(root, entry.path()) else {
      continue;
    };
    if !input.policy.should_index(entry.path()).should_index {
      continue;
    }
    seen.insert(relative.clone());
    classify(input, entry.path(), relative, &mut report);
  }

  for store in input.writer.stores() {
    for record in store.get_all() {
      if !seen.contains(&record.path) {
        trace!(path = %record.path, "Recorded file no longer on disk");
        report.removed.push(record.path);
      }
    }
  }

  report.added.sort();
  report.modified.sort();
  report.removed.sort();
  report.removed.dedup();
  report.skipped.sort();
  report.last_checked = Utc::now();
  Ok(report)
}

fn classify(input: &ScanInput, full: &Path, relative: String, report: &mut DriftReport) {
  let Some(record) = input.writer.store_for(&relative).get(&relative) else {
    trace!(path = %relative, "New file");
    report.added.push(relative);
    return;
  };

  if input.trust_mtime
    && let Ok(metadata) = std::fs::metadata(full)
    && record.metadata_matches(&metadata)
  {
    report.in_sync += 1;
    return;
  }

  match std::fs::read(full) {
    Ok(content) if hash_bytes(&content) == record.content_hash => report.in_sync += 1,
    Ok(_) => {
      trace!(path = %relative, "File modified (hash changed)");
      report.modified.push(relative);
    }
    Err(e) => {
      warn!(path = %relative, error = %e, "Could not read file during drift scan");
      report.skipped.push(relative);
    }
  }
}
