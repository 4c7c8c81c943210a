// Fingerprint store for tracking what the index believes about file contents
//
// Holds one record per indexed file (project-relative path -> content hash, plus
// size and mtime when known). The integrity engine compares these records with
// the filesystem to detect:
// - Added files (on disk but not recorded)
// - Modified files (recorded hash differs from the content on disk)
// - Removed files (recorded but gone from disk)
//
// Mutations only touch memory and raise a dirty flag; callers decide when to
// `save()` so that bursts of changes cost one write.

use std::{
  path::{Path, PathBuf},
  sync::atomic::{AtomicBool, Ordering},
  time::UNIX_EPOCH,
};

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, trace};

const STORE_FORMAT_VERSION: u32 = 1;

/// Errors from loading or saving the store
#[derive(Debug, thiserror::Error)]
pub enum FingerprintError {
  #[error("IO error on {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("Corrupt fingerprint store {path}: {source}")]
  Json {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
  #[error("Unsupported fingerprint store version {0}")]
  Version(u32),
}

pub type Result<T> = std::result::Result<T, FingerprintError>;

/// Fingerprint of one indexed file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintRecord {
  /// Relative path from project root, `/` separated
  pub path: String,
  /// SHA-256 of file content (hex)
  pub content_hash: String,
  /// File size in bytes
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub size: Option<u64>,
  /// File modification time (Unix timestamp in seconds)
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub mtime: Option<i64>,
  /// Sub-second part of `mtime`
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub mtime_nanos: Option<u32>,
  /// When size and mtime were captured (Unix timestamp in seconds)
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub indexed_at: Option<i64>,
}

impl FingerprintRecord {
  pub fn new(path: impl Into<String>, content_hash: impl Into<String>) -> Self {
    Self {
      path: path.into(),
      content_hash: content_hash.into(),
      size: None,
      mtime: None,
      mtime_nanos: None,
      indexed_at: None,
    }
  }

  pub fn with_metadata(mut self, metadata: &std::fs::Metadata) -> Self {
    let mtime = mtime_parts(metadata);
    self.size = Some(metadata.len());
    self.mtime = mtime.map(|(secs, _)| secs);
    self.mtime_nanos = mtime.map(|(_, nanos)| nanos);
    self.indexed_at = Some(Utc::now().timestamp());
    self
  }

  /// True when the recorded size and mtime still describe `metadata`
  ///
  /// A stat captured within the file's own mtime second is never trusted: a
  /// same-size rewrite later in that second can leave the stat unchanged.
  pub fn metadata_matches(&self, metadata: &std::fs::Metadata) -> bool {
    let (Some(size), Some(mtime)) = (self.size, self.mtime) else {
      return false;
    };
    let Some((secs, nanos)) = mtime_parts(metadata) else {
      return false;
    };
    if size != metadata.len() || mtime != secs || self.mtime_nanos.is_some_and(|n| n != nanos) {
      return false;
    }
    !self.indexed_at.is_some_and(|at| at <= mtime)
  }
}

#[derive(Serialize, Deserialize)]
struct PersistedStore {
  version: u32,
  files: Vec<FingerprintRecord>,
}

/// Persisted mapping from project-relative path to content fingerprint
#[derive(Debug)]
pub struct FingerprintStore {
  path: PathBuf,
  records: DashMap<String, FingerprintRecord>,
  dirty: AtomicBool,
  save_lock: Mutex<()>,
}

impl FingerprintStore {
  /// Create an empty store backed by `path` (nothing is read until `load()`)
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      records: DashMap::new(),
      dirty: AtomicBool::new(false),
      save_lock: Mutex::new(()),
    }
  }

  /// Create a store and load whatever is persisted at `path`
  pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
    let store = Self::new(path);
    store.load().await?;
    Ok(store)
  }

  /// Backing file
  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn get(&self, path: &str) -> Option<FingerprintRecord> {
    self.records.get(path).map(|r| r.value().clone())
  }

  pub fn set(&self, record: FingerprintRecord) {
    trace!(path = %record.path, "Recording fingerprint");
    self.records.insert(record.path.clone(), record);
    self.dirty.store(true, Ordering::Release);
  }

  /// Remove a record, returning it if it existed
  pub fn delete(&self, path: &str) -> Option<FingerprintRecord> {
    let removed = self.records.remove(path).map(|(_, record)| record);
    if removed.is_some() {
      self.dirty.store(true, Ordering::Release);
    }
    removed
  }

  pub fn has(&self, path: &str) -> bool {
    self.records.contains_key(path)
  }

  pub fn count(&self) -> usize {
    self.records.len()
  }

  pub fn clear(&self) {
    if !self.records.is_empty() {
      self.records.clear();
      self.dirty.store(true, Ordering::Release);
    }
  }

  /// Snapshot of all records, sorted by path
  pub fn get_all(&self) -> Vec<FingerprintRecord> {
    let mut all: Vec<FingerprintRecord> = self.records.iter().map(|r| r.value().clone()).collect();
    all.sort_by(|a, b| a.path.cmp(&b.path));
    all
  }

  /// True when memory holds mutations that were not saved yet
  pub fn has_unsaved_changes(&self) -> bool {
    self.dirty.load(Ordering::Acquire)
  }

  /// Replace the in-memory records with the persisted ones
  ///
  /// A missing file is an empty store. After loading the store is clean.
  pub async fn load(&self) -> Result<()> {
    let bytes = match tokio::fs::read(&self.path).await {
      Ok(bytes) => bytes,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        debug!(path = %self.path.display(), "No fingerprint store on disk, starting empty");
        self.records.clear();
        self.dirty.store(false, Ordering::Release);
        return Ok(());
      }
      Err(source) => {
        return Err(FingerprintError::Io {
          path: self.path.clone(),
          source,
        });
      }
    };

    let persisted: PersistedStore = serde_json::from_slice(&bytes).map_err(|source| FingerprintError::Json {
      path: self.path.clone(),
      source,
    })?;
    if persisted.version != STORE_FORMAT_VERSION {
      return Err(FingerprintError::Version(persisted.version));
    }

    self.records.clear();
    for record in persisted.files {
      self.records.insert(record.path.clone(), record);
    }
    self.dirty.store(false, Ordering::Release);

    debug!(path = %self.path.display(), count = self.records.len(), "Fingerprint store loaded");
    Ok(())
  }

  /// Write all records to disk (temp file + rename)
  ///
  /// Mutations that race with the write mark the store dirty again.
  pub async fn save(&self) -> Result<()> {
    let _guard = self.save_lock.lock().await;

    self.dirty.store(false, Ordering::Release);
    let persisted = PersistedStore {
      version: STORE_FORMAT_VERSION,
      files: self.get_all(),
    };

    if let Err(e) = self.write(&persisted).await {
      self.dirty.store(true, Ordering::Release);
      return Err(e);
    }

    debug!(path = %self.path.display(), count = persisted.files.len(), "Fingerprint store saved");
    Ok(())
  }

  /// Save only if there are unsaved changes; returns whether a write happened
  pub async fn save_if_dirty(&self) -> Result<bool> {
    if !self.has_unsaved_changes() {
      return Ok(false);
    }
    self.save().await?;
    Ok(true)
  }

  async fn write(&self, persisted: &PersistedStore) -> Result<()> {
    let io_err = |source| FingerprintError::Io {
      path: self.path.clone(),
      source,
    };

    if let Some(parent) = self.path.parent() {
      tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }

    let bytes = serde_json::to_vec_pretty(persisted).map_err(|source| FingerprintError::Json {
      path: self.path.clone(),
      source,
    })?;
    let tmp = self.path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await.map_err(io_err)?;
    tokio::fs::rename(&tmp, &self.path).await.map_err(io_err)?;
    Ok(())
  }
}

// ============================================================================
// Hashing
// ============================================================================

/// SHA-256 of content as lowercase hex
pub fn hash_bytes(content: &[u8]) -> String {
  hex::encode(Sha256::digest(content))
}

/// SHA-256 of a file's content as lowercase hex
pub async fn hash_file(path: &Path) -> std::io::Result<String> {
  let content = tokio::fs::read(path).await?;
  Ok(hash_bytes(&content))
}

/// File mtime as Unix seconds plus nanoseconds
fn mtime_parts(metadata: &std::fs::Metadata) -> Option<(i64, u32)> {
  metadata
    .modified()
    .ok()
    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
    .map(|d| (d.as_secs() as i64, d.subsec_nanos()))
}
