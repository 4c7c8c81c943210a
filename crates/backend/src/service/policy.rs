//! Eligibility decisions: which paths belong in the index.
//!
//! [`IgnorePolicy`] layers, in order:
//! - tooling paths (`.git/`, the index directory)
//! - always-ignored patterns (VCS, dependencies, build output, lock files)
//! - the project's `.gitignore` and `.driftwatchignore`
//! - `index.ignore_patterns` from config
//! - binary extensions and `index.max_file_size`
//!
//! Paths that no longer exist are judged by path rules only, so a removal of a
//! previously indexed file is still accepted.
//!
//! Ignore files are read when the policy is built and again on
//! [`IndexingPolicy::reload`]. Strategies reload whenever a batch touches one of
//! the root [`IGNORE_FILES`].

use std::{
  path::{Path, PathBuf},
  sync::{PoisonError, RwLock},
};

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use tracing::{debug, trace, warn};

use super::util::{is_internal, to_relative};
use crate::domain::config::IndexConfig;

/// Project-local ignore file, same syntax as `.gitignore`
pub const IGNORE_FILE: &str = ".driftwatchignore";

/// Root-level files whose edits change the ignore rules
pub const IGNORE_FILES: &[&str] = &[".gitignore", IGNORE_FILE];

const GLOBAL_PATTERNS: &[&str] = &[
  // Version control
  ".git/",
  ".hg/",
  ".svn/",
  // Dependencies
  "node_modules/",
  "vendor/",
  ".venv/",
  "venv/",
  // Build outputs
  "target/",
  "dist/",
  "build/",
  ".next/",
  // Caches
  ".cache/",
  "__pycache__/",
  ".pytest_cache/",
  ".mypy_cache/",
  // Minified and generated
  "*.min.js",
  "*.min.css",
  "*.map",
  // Lock files
  "package-lock.json",
  "yarn.lock",
  "pnpm-lock.yaml",
  "bun.lock",
  "Cargo.lock",
  "poetry.lock",
  "Gemfile.lock",
];

const BINARY_EXTENSIONS: &[&str] = &[
  "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "pdf", "zip", "gz", "tgz", "bz2", "xz", "7z", "tar", "jar",
  "exe", "dll", "so", "dylib", "a", "o", "obj", "class", "wasm", "bin", "dat", "db", "sqlite", "woff", "woff2", "ttf",
  "otf", "eot", "mp3", "mp4", "mov", "avi", "wav", "flac", "ogg", "lance",
];

/// Outcome of a policy check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDecision {
  pub should_index: bool,
  /// Why the path was rejected
  pub reason: Option<String>,
}

impl PolicyDecision {
  pub fn accept() -> Self {
    Self {
      should_index: true,
      reason: None,
    }
  }

  pub fn reject(reason: impl Into<String>) -> Self {
    Self {
      should_index: false,
      reason: Some(reason.into()),
    }
  }
}

/// Decides whether a path is eligible for indexing
///
/// Decisions must be deterministic for a given filesystem state and free of
/// side effects. Only `reload` may change what later decisions return.
pub trait IndexingPolicy: Send + Sync {
  fn should_index(&self, path: &Path) -> PolicyDecision;

  /// Whether a directory walk should enter `dir`
  fn should_descend(&self, _dir: &Path) -> bool {
    true
  }

  /// Re-read any on-disk rules
  fn reload(&self) {}
}

/// True for the project-relative keys of the root ignore files
pub fn is_ignore_file(relative: &str) -> bool {
  IGNORE_FILES.contains(&relative)
}

/// Default policy: ignore files plus size and binary checks
///
/// Only the root `.gitignore` and `.driftwatchignore` are consulted; nested
/// ignore files are not.
pub struct IgnorePolicy {
  root: PathBuf,
  index_path: PathBuf,
  extra_patterns: Vec<String>,
  matcher: RwLock<Gitignore>,
  max_file_size: u64,
}

impl IgnorePolicy {
  pub fn new(root: impl Into<PathBuf>, index_path: impl Into<PathBuf>, config: &IndexConfig) -> Self {
    let root = root.into();
    let index_path = index_path.into();
    let matcher = build_matcher(&root, &index_path, &config.ignore_patterns);
    Self {
      root,
      index_path,
      extra_patterns: config.ignore_patterns.clone(),
      matcher: RwLock::new(matcher),
      max_file_size: config.max_file_size,
    }
  }

  fn is_ignored(&self, relative: &str, is_dir: bool) -> bool {
    self
      .matcher
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .matched_path_or_any_parents(Path::new(relative), is_dir)
      .is_ignore()
  }
}

impl IndexingPolicy for IgnorePolicy {
  fn should_index(&self, path: &Path) -> PolicyDecision {
    let Some(relative) = to_relative(&self.root, path) else {
      return PolicyDecision::reject("outside project root");
    };
    let full = self.root.join(&relative);

    if is_internal(&self.root, &self.index_path, &full) {
      return PolicyDecision::reject("tooling directory");
    }

    let metadata = std::fs::metadata(&full).ok();
    let is_dir = metadata.as_ref().is_some_and(|m| m.is_dir());
    if is_dir {
      return PolicyDecision::reject("directory");
    }

    if self.is_ignored(&relative, false) {
      trace!(path = %relative, "Ignored by pattern");
      return PolicyDecision::reject("matched ignore pattern");
    }

    if let Some(ext) = full.extension().and_then(|e| e.to_str())
      && BINARY_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
    {
      return PolicyDecision::reject(format!("binary file type .{}", ext));
    }

    if let Some(metadata) = metadata
      && metadata.len() > self.max_file_size
    {
      return PolicyDecision::reject(format!(
        "file too large ({} bytes, max {})",
        metadata.len(),
        self.max_file_size
      ));
    }

    PolicyDecision::accept()
  }

  fn should_descend(&self, dir: &Path) -> bool {
    let Some(relative) = to_relative(&self.root, dir) else {
      return true;
    };
    if is_internal(&self.root, &self.index_path, &self.root.join(&relative)) {
      return false;
    }
    !self.is_ignored(&relative, true)
  }

  fn reload(&self) {
    let matcher = build_matcher(&self.root, &self.index_path, &self.extra_patterns);
    *self.matcher.write().unwrap_or_else(PoisonError::into_inner) = matcher;
    debug!(root = %self.root.display(), "Ignore rules reloaded");
  }
}

fn build_matcher(root: &Path, index_path: &Path, extra: &[String]) -> Gitignore {
  let mut builder = GitignoreBuilder::new(root);

  for name in IGNORE_FILES {
    let file = root.join(name);
    if file.exists()
      && let Some(err) = builder.add(&file)
    {
      warn!(file = %file.display(), error = %err, "Error parsing ignore file");
    }
  }

  for pattern in GLOBAL_PATTERNS {
    let _ = builder.add_line(None, pattern);
  }

  for pattern in extra {
    if let Err(e) = builder.add_line(None, pattern) {
      warn!(pattern = %pattern, error = %e, "Invalid ignore pattern");
    }
  }

  if let Some(rel) = to_relative(root, index_path) {
    let _ = builder.add_line(None, &format!("/{}/", rel));
  }

  match builder.build() {
    Ok(matcher) => matcher,
    Err(e) => {
      warn!(error = %e, "Failed to build ignore matcher, using empty rules");
      Gitignore::empty()
    }
  }
}

/// Accepts every path; for callers that filter upstream
pub struct AllowAll;

impl IndexingPolicy for AllowAll {
  fn should_index(&self, _path: &Path) -> PolicyDecision {
    PolicyDecision::accept()
  }
}
