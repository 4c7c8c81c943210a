//! Configuration for driftwatch with per-project overrides.
//!
//! Config priority: project-relative (.driftwatch.toml) > user (~/.config/driftwatch/config.toml) > defaults

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

/// File name of the project-relative configuration
pub const PROJECT_CONFIG_FILE: &str = ".driftwatch.toml";

// ============================================================================
// Indexing Configuration
// ============================================================================

/// Indexing strategy and file selection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
  /// Strategy that decides when files are re-indexed: "realtime", "lazy" or "git" (default: realtime)
  ///
  /// Kept as a string so an unknown value surfaces as a configuration error
  /// when the strategy is applied rather than as a parse failure of the file.
  pub indexing_strategy: String,

  /// File watcher debounce in milliseconds (default: 500)
  pub watcher_debounce_ms: u64,

  /// Poll interval for platforms without native notifications, in seconds (default: 2)
  pub watcher_poll_secs: u64,

  /// How often the git strategy checks the reflog for a moved HEAD, in milliseconds (default: 1000)
  pub git_poll_interval_ms: u64,

  /// Maximum file size to index in bytes (default: 1MB)
  pub max_file_size: u64,

  /// Index directory, relative to the project root unless absolute (default: .driftwatch)
  pub index_dir: String,

  /// Extra gitignore-style patterns that are never indexed
  pub ignore_patterns: Vec<String>,
}

impl Default for IndexConfig {
  fn default() -> Self {
    Self {
      indexing_strategy: "realtime".to_string(),
      watcher_debounce_ms: 500,
      watcher_poll_secs: 2,
      git_poll_interval_ms: 1000,
      max_file_size: 1024 * 1024, // 1MB
      index_dir: ".driftwatch".to_string(),
      ignore_patterns: Vec::new(),
    }
  }
}

impl IndexConfig {
  /// Config that selects the given strategy, everything else default
  pub fn with_strategy(name: impl Into<String>) -> Self {
    Self {
      indexing_strategy: name.into(),
      ..Default::default()
    }
  }

  /// Resolve the index directory against a project root
  pub fn index_path(&self, project_root: &Path) -> PathBuf {
    let dir = Path::new(&self.index_dir);
    if dir.is_absolute() {
      dir.to_path_buf()
    } else {
      project_root.join(dir)
    }
  }
}

// ============================================================================
// Integrity Configuration
// ============================================================================

/// Drift detection and reconciliation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrityConfig {
  /// Run drift checks on a timer (default: true)
  pub periodic_check: bool,

  /// Seconds between scheduled drift checks (default: 300)
  pub check_interval_secs: u64,

  /// Reconcile automatically when a scheduled check finds drift (default: true)
  pub auto_reconcile: bool,

  /// Treat a file as unchanged when its size and mtime match the record, skipping the hash (default: true)
  pub trust_mtime: bool,

  /// Request a background drift check after every strategy switch (default: false)
  /// Covers events missed between the old strategy's stop and the new one's start.
  pub verify_after_switch: bool,
}

impl Default for IntegrityConfig {
  fn default() -> Self {
    Self {
      periodic_check: true,
      check_interval_secs: 300,
      auto_reconcile: true,
      trust_mtime: true,
      verify_after_switch: false,
    }
  }
}

// ============================================================================
// Main Configuration
// ============================================================================

/// driftwatch configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Indexing strategy settings
  #[serde(default)]
  pub index: IndexConfig,

  /// Drift detection settings
  #[serde(default)]
  pub integrity: IntegrityConfig,
}

impl Config {
  /// Load config for a project, with fallback to user config
  pub fn load_for_project(project_path: &Path) -> Self {
    // Try project-relative first
    let project_config = Self::project_config_path(project_path);
    if let Some(config) = Self::read(&project_config) {
      return config;
    }

    // Fall back to user config
    if let Some(user_config_path) = Self::user_config_path()
      && let Some(config) = Self::read(&user_config_path)
    {
      return config;
    }

    Self::default()
  }

  /// Get the user-level config path
  pub fn user_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("CONFIG_DIR") {
      return Some(PathBuf::from(path).join("config.toml"));
    }

    if let Ok(path) = std::env::var("XDG_CONFIG_HOME") {
      return Some(PathBuf::from(path).join("driftwatch").join("config.toml"));
    }

    dirs::config_dir().map(|p: PathBuf| p.join("driftwatch").join("config.toml"))
  }

  /// Get the project-relative config path
  pub fn project_config_path(project_path: &Path) -> PathBuf {
    project_path.join(PROJECT_CONFIG_FILE)
  }

  fn read(path: &Path) -> Option<Self> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
      Ok(config) => Some(config),
      Err(e) => {
        warn!(path = %path.display(), error = %e, "Ignoring unparseable config file");
        None
      }
    }
  }
}
