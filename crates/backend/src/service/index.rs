//! Seam to the semantic index collaborator.
//!
//! Chunking, embedding and storage belong to whatever sits behind
//! [`IndexMutator`]. The sync core only decides when a path is updated or
//! removed. Paths handed across this seam are project-relative and `/`
//! separated.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Errors reported by an index collaborator
#[derive(Debug, thiserror::Error)]
pub enum MutationError {
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("Index rejected the file: {0}")]
  Rejected(String),
  #[error("Index is not available")]
  Unavailable,
}

/// Size of an index, as reported by the collaborator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
  pub files: usize,
  pub chunks: usize,
}

/// Mutating side of a semantic index
#[async_trait]
pub trait IndexMutator: Send + Sync {
  /// (Re-)index the file at a project-relative path
  async fn update_file(&self, path: &Path) -> Result<(), MutationError>;

  /// Drop everything indexed for a project-relative path
  async fn remove_file(&self, path: &Path) -> Result<(), MutationError>;

  async fn stats(&self) -> IndexStats;

  /// False until the index has been opened
  fn is_loaded(&self) -> bool;

  /// Flush and release the index
  async fn close(&self) -> Result<(), MutationError>;
}
