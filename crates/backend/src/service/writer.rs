//! IndexWriter - the single mutation path into the index collaborators
//!
//! Strategies and the integrity engine both go through here, so every update
//! or removal keeps the owning fingerprint store in step with the index.
//! Documentation files go to the docs index when one is configured; all
//! other files go to the code index.

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use tracing::{debug, trace, warn};

use super::{
  index::{IndexMutator, MutationError},
  util::to_absolute,
};
use crate::db::{FingerprintRecord, FingerprintStore, hash_bytes};

/// Extensions routed to the docs index
const DOC_EXTENSIONS: &[&str] = &["md", "mdx", "markdown", "txt", "rst", "adoc"];

pub fn is_document_path(relative: &str) -> bool {
  Path::new(relative)
    .extension()
    .and_then(|e| e.to_str())
    .is_some_and(|ext| DOC_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

fn stat_unchanged(before: &std::fs::Metadata, after: &std::fs::Metadata) -> bool {
  before.len() == after.len() && before.modified().ok() == after.modified().ok()
}

/// Per-file write failure
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
  #[error("IO error on {path}: {source}")]
  Io {
    path: String,
    #[source]
    source: std::io::Error,
  },
  #[error("Index mutation failed for {path}: {source}")]
  Mutation {
    path: String,
    #[source]
    source: MutationError,
  },
}

/// What `apply` ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppliedOp {
  Updated,
  Removed,
}

struct IndexTarget {
  index: Arc<dyn IndexMutator>,
  store: Arc<FingerprintStore>,
}

pub struct IndexWriter {
  root: PathBuf,
  code: IndexTarget,
  docs: Option<IndexTarget>,
}

impl IndexWriter {
  pub fn new(
    root: impl Into<PathBuf>,
    index: Arc<dyn IndexMutator>,
    docs_index: Option<Arc<dyn IndexMutator>>,
    fingerprints: Arc<FingerprintStore>,
    docs_fingerprints: Option<Arc<FingerprintStore>>,
  ) -> Self {
    let docs = match (docs_index, docs_fingerprints) {
      (Some(index), Some(store)) => Some(IndexTarget { index, store }),
      (Some(index), None) => {
        warn!("Docs index configured without a docs fingerprint store, sharing the code store");
        Some(IndexTarget {
          index,
          store: fingerprints.clone(),
        })
      }
      (None, _) => None,
    };

    Self {
      root: root.into(),
      code: IndexTarget {
        index,
        store: fingerprints,
      },
      docs,
    }
  }

  pub fn project_root(&self) -> &Path {
    &self.root
  }

  fn target_for(&self, relative: &str) -> &IndexTarget {
    match &self.docs {
      Some(docs) if is_document_path(relative) => docs,
      _ => &self.code,
    }
  }

  /// Fingerprint store that owns `relative`
  pub fn store_for(&self, relative: &str) -> &Arc<FingerprintStore> {
    &self.target_for(relative).store
  }

  /// Every distinct fingerprint store, code store first
  pub fn stores(&self) -> Vec<&Arc<FingerprintStore>> {
    let mut stores = vec![&self.code.store];
    if let Some(docs) = &self.docs
      && !Arc::ptr_eq(&docs.store, &self.code.store)
    {
      stores.push(&docs.store);
    }
    stores
  }

  pub fn is_tracked(&self, relative: &str) -> bool {
    self.store_for(relative).has(relative)
  }

  /// True when the code index is open
  pub fn is_loaded(&self) -> bool {
    self.code.index.is_loaded()
  }

  /// Update if the file exists on disk, remove it otherwise
  pub async fn apply(&self, relative: &str) -> Result<AppliedOp, WriteError> {
    let full = to_absolute(&self.root, relative);
    match tokio::fs::metadata(&full).await {
      Ok(metadata) if metadata.is_file() => self.update(relative).await.map(|_| AppliedOp::Updated),
      Ok(_) => self.remove(relative).await.map(|_| AppliedOp::Removed),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => self.remove(relative).await.map(|_| AppliedOp::Removed),
      Err(source) => Err(WriteError::Io {
        path: relative.to_string(),
        source,
      }),
    }
  }

  /// Re-index a file and record its new fingerprint
  #[tracing::instrument(level = "trace", skip(self))]
  pub async fn update(&self, relative: &str) -> Result<(), WriteError> {
    let full = to_absolute(&self.root, relative);
    let io_err = |source| WriteError::Io {
      path: relative.to_string(),
      source,
    };

    let before = tokio::fs::metadata(&full).await.map_err(io_err)?;
    let content = tokio::fs::read(&full).await.map_err(io_err)?;
    let after = tokio::fs::metadata(&full).await.map_err(io_err)?;

    let target = self.target_for(relative);
    target
      .index
      .update_file(Path::new(relative))
      .await
      .map_err(|source| WriteError::Mutation {
        path: relative.to_string(),
        source,
      })?;

    let mut record = FingerprintRecord::new(relative, hash_bytes(&content));
    if stat_unchanged(&before, &after) {
      record = record.with_metadata(&after);
    } else {
      // Hash-only record; the next drift check compares content
      debug!(path = %relative, "File changed while reading, not recording size and mtime");
    }
    target.store.set(record);
    trace!(path = %relative, "File indexed");
    Ok(())
  }

  /// Drop a file from its index and forget its fingerprint in every store
  ///
  /// Clearing all stores also drops a record left in a store that no longer
  /// owns the path, so a missing file is not reported as removed again.
  #[tracing::instrument(level = "trace", skip(self))]
  pub async fn remove(&self, relative: &str) -> Result<(), WriteError> {
    let target = self.target_for(relative);
    target
      .index
      .remove_file(Path::new(relative))
      .await
      .map_err(|source| WriteError::Mutation {
        path: relative.to_string(),
        source,
      })?;

    for store in self.stores() {
      store.delete(relative);
    }
    trace!(path = %relative, "File removed from index");
    Ok(())
  }

  /// Save every store with unsaved changes; failures are logged
  pub async fn persist(&self) {
    for store in self.stores() {
      match store.save_if_dirty().await {
        Ok(true) => debug!(path = %store.path().display(), "Fingerprints persisted"),
        Ok(false) => {}
        Err(e) => warn!(path = %store.path().display(), error = %e, "Failed to persist fingerprints"),
      }
    }
  }

  /// Close the index collaborators, reporting the first failure
  pub async fn close(&self) -> Result<(), MutationError> {
    let mut first_err = None;

    let targets = std::iter::once(&self.code).chain(self.docs.iter());
    for target in targets {
      if let Err(e) = target.index.close().await {
        warn!(error = %e, "Failed to close index");
        first_err.get_or_insert(e);
      }
    }

    match first_err {
      Some(e) => Err(e),
      None => Ok(()),
    }
  }
}
