//! Strategy identity, stats and lifecycle events

use std::{
  fmt,
  str::FromStr,
  sync::atomic::{AtomicU64, Ordering},
};

use serde::{Deserialize, Serialize};

/// The triggering policy of an indexing strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
  /// Re-index on every settled filesystem change
  Realtime,
  /// Queue changes, re-index on flush
  Lazy,
  /// Re-index what changed between commits
  Git,
}

impl StrategyKind {
  pub const ALL: [StrategyKind; 3] = [StrategyKind::Realtime, StrategyKind::Lazy, StrategyKind::Git];

  pub fn as_str(&self) -> &'static str {
    match self {
      StrategyKind::Realtime => "realtime",
      StrategyKind::Lazy => "lazy",
      StrategyKind::Git => "git",
    }
  }
}

impl fmt::Display for StrategyKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for StrategyKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "realtime" => Ok(StrategyKind::Realtime),
      "lazy" => Ok(StrategyKind::Lazy),
      "git" => Ok(StrategyKind::Git),
      _ => Err(format!("Invalid indexing strategy: {}", s)),
    }
  }
}

/// Process-unique identity of a strategy instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StrategyId(u64);

impl StrategyId {
  pub(crate) fn next() -> Self {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    Self(NEXT.fetch_add(1, Ordering::Relaxed))
  }
}

impl fmt::Display for StrategyId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{}", self.0)
  }
}

/// Read projection of the active strategy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyStats {
  pub name: StrategyKind,
  pub is_active: bool,
  /// Paths seen but not yet processed
  pub pending_files: usize,
  /// Paths processed since start
  pub processed_files: usize,
}

/// Lifecycle journal entry broadcast by strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyEvent {
  Started { id: StrategyId, kind: StrategyKind },
  Flushed { id: StrategyId, kind: StrategyKind },
  /// Emitted once per instance
  Stopped { id: StrategyId, kind: StrategyKind },
}

impl StrategyEvent {
  pub fn id(&self) -> StrategyId {
    match self {
      Self::Started { id, .. } | Self::Flushed { id, .. } | Self::Stopped { id, .. } => *id,
    }
  }
}
