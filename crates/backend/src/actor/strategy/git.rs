//! Git strategy - index what changed between commits
//!
//! The worker polls `.git/logs/HEAD` (the reflog). When the head moved past
//! the last indexed reference it asks `git diff --name-only -z` for the
//! changed paths, processes them and records the new reference in
//! `<index_path>/git-state.json`.
//!
//! With no recorded reference the current head is adopted as-is; the drift
//! check covers whatever the index is missing.

use std::{
  path::{Path, PathBuf},
  sync::Arc,
  time::{Duration, SystemTime},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::{
  sync::{Mutex, mpsc, oneshot},
  task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{Command, IndexingStrategy, Lifecycle, StrategyContext, StrategyCore, StrategyError};
use crate::domain::strategy::{StrategyId, StrategyKind, StrategyStats};

pub const GIT_STATE_FILE: &str = "git-state.json";

const MIN_POLL: Duration = Duration::from_millis(10);

// ============================================================================
// Persisted State
// ============================================================================

/// Last commit the index was brought up to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitState {
  pub last_indexed_ref: Option<String>,
  pub updated_at: Option<DateTime<Utc>>,
}

impl GitState {
  pub async fn load(path: &Path) -> Self {
    match tokio::fs::read(path).await {
      Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "Corrupt git state, starting fresh");
        Self::default()
      }),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
      Err(e) => {
        warn!(path = %path.display(), error = %e, "Failed to read git state");
        Self::default()
      }
    }
  }

  pub async fn save(&self, path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
      tokio::fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec_pretty(self).map_err(std::io::Error::other)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
  }
}

#[derive(Debug, thiserror::Error)]
enum GitError {
  #[error("Failed to run git: {0}")]
  Spawn(#[from] std::io::Error),
  #[error("git diff exited with {status}: {stderr}")]
  Failed {
    status: std::process::ExitStatus,
    stderr: String,
  },
}

// ============================================================================
// Reflog and diff
// ============================================================================

fn reflog_path(root: &Path) -> PathBuf {
  root.join(".git").join("logs").join("HEAD")
}

/// New-commit field of the last reflog entry
pub fn parse_reflog_head(contents: &str) -> Option<String> {
  let line = contents.lines().rev().find(|l| !l.trim().is_empty())?;
  let head = line.split_whitespace().nth(1)?;
  let is_hash = head.len() >= 7 && head.chars().all(|c| c.is_ascii_hexdigit());
  is_hash.then(|| head.to_string())
}

async fn read_head(reflog: &Path) -> Option<String> {
  match tokio::fs::read_to_string(reflog).await {
    Ok(contents) => parse_reflog_head(&contents),
    Err(e) => {
      warn!(path = %reflog.display(), error = %e, "Failed to read reflog");
      None
    }
  }
}

async fn reflog_stamp(reflog: &Path) -> Option<(SystemTime, u64)> {
  let metadata = tokio::fs::metadata(reflog).await.ok()?;
  Some((metadata.modified().ok()?, metadata.len()))
}

async fn diff_names(root: &Path, from: &str, to: &str) -> Result<Vec<String>, GitError> {
  let output = tokio::process::Command::new("git")
    .arg("-C")
    .arg(root)
    .args(["diff", "--name-only", "-z", from, to])
    .output()
    .await?;

  if !output.status.success() {
    return Err(GitError::Failed {
      status: output.status,
      stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    });
  }

  Ok(
    output
      .stdout
      .split(|b| *b == 0)
      .filter(|name| !name.is_empty())
      .map(|name| String::from_utf8_lossy(name).into_owned())
      .collect(),
  )
}

// ============================================================================
// GitStrategy
// ============================================================================

struct Runtime {
  commands: mpsc::Sender<Command>,
  cancel: CancellationToken,
  handle: JoinHandle<()>,
}

pub struct GitStrategy {
  core: Arc<StrategyCore>,
  runtime: Mutex<Lifecycle<Runtime>>,
}

impl GitStrategy {
  pub fn new(ctx: StrategyContext) -> Self {
    Self {
      core: Arc::new(StrategyCore::new(StrategyKind::Git, ctx)),
      runtime: Mutex::new(Lifecycle::Idle),
    }
  }

  pub fn state_path(&self) -> PathBuf {
    self.core.ctx.index_path.join(GIT_STATE_FILE)
  }

  async fn commands(&self) -> Option<mpsc::Sender<Command>> {
    self.runtime.lock().await.running().map(|rt| rt.commands.clone())
  }
}

#[async_trait]
impl IndexingStrategy for GitStrategy {
  fn id(&self) -> StrategyId {
    self.core.id()
  }

  fn kind(&self) -> StrategyKind {
    StrategyKind::Git
  }

  fn is_active(&self) -> bool {
    self.core.is_active()
  }

  async fn start(&self) -> Result<(), StrategyError> {
    let mut lifecycle = self.runtime.lock().await;
    if let Some(err) = lifecycle.start_error() {
      return Err(err);
    }

    let reflog = reflog_path(&self.core.ctx.project_root);
    if !tokio::fs::try_exists(&reflog).await.unwrap_or(false) {
      return Err(StrategyError::Precondition(format!(
        "{} not found; the git strategy needs a repository with history",
        reflog.display()
      )));
    }

    let state_path = self.state_path();
    let state = GitState::load(&state_path).await;
    debug!(last_ref = ?state.last_indexed_ref, "Loaded git state");

    let (commands, command_rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let worker = GitWorker {
      core: self.core.clone(),
      commands: command_rx,
      cancel: cancel.clone(),
      reflog,
      state_path,
      state,
      last_stamp: None,
      poll: Duration::from_millis(self.core.ctx.config.git_poll_interval_ms).max(MIN_POLL),
    };
    let handle = tokio::spawn(worker.run());

    *lifecycle = Lifecycle::Running(Runtime {
      commands,
      cancel,
      handle,
    });
    self.core.set_active(true);
    self.core.emit_started();
    info!(strategy = %self.kind(), id = %self.id(), "Strategy started");
    Ok(())
  }

  async fn stop(&self) {
    let mut lifecycle = self.runtime.lock().await;
    let Lifecycle::Running(rt) = std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) else {
      return;
    };

    self.core.set_active(false);
    rt.cancel.cancel();
    if let Err(e) = rt.handle.await {
      error!(strategy = %self.kind(), error = %e, "Git worker panicked");
    }
    self.core.emit_stopped();
    info!(strategy = %self.kind(), id = %self.id(), "Strategy stopped");
  }

  async fn flush(&self) -> Result<(), StrategyError> {
    if !self.is_active() {
      return Ok(());
    }
    let Some(commands) = self.commands().await else {
      return Ok(());
    };

    let (tx, rx) = oneshot::channel();
    if commands.send(Command::Flush(tx)).await.is_err() {
      if !self.is_active() {
        return Ok(());
      }
      return Err(StrategyError::State("git worker is gone".to_string()));
    }
    if rx.await.is_err() {
      // The worker exited on a concurrent stop
      if !self.is_active() {
        return Ok(());
      }
      return Err(StrategyError::State("git worker dropped flush".to_string()));
    }

    self.core.emit_flushed();
    Ok(())
  }

  async fn enqueue(&self, paths: Vec<PathBuf>) {
    let relative: Vec<String> = paths.iter().filter_map(|p| self.core.normalize(p)).collect();
    if relative.is_empty() {
      return;
    }
    match self.commands().await {
      Some(commands) => {
        if commands.send(Command::Enqueue(relative)).await.is_err() {
          warn!(strategy = %self.kind(), "Git worker closed, dropping hints");
        }
      }
      None => debug!(strategy = %self.kind(), "Strategy not running, dropping hints"),
    }
  }

  fn stats(&self) -> StrategyStats {
    self.core.stats()
  }
}

// ============================================================================
// Worker
// ============================================================================

struct GitWorker {
  core: Arc<StrategyCore>,
  commands: mpsc::Receiver<Command>,
  cancel: CancellationToken,
  reflog: PathBuf,
  state_path: PathBuf,
  state: GitState,
  // Reflog (mtime, len) at the last successful head check
  last_stamp: Option<(SystemTime, u64)>,
  poll: Duration,
}

impl GitWorker {
  async fn run(mut self) {
    debug!(id = %self.core.id(), "Git worker started");
    let mut poll = tokio::time::interval(self.poll);

    loop {
      tokio::select! {
          biased;

          _ = self.cancel.cancelled() => {
              debug!("Git worker shutting down (cancelled)");
              self.drain_commands().await;
              break;
          }

          command = self.commands.recv() => {
              match command {
                  Some(Command::Enqueue(paths)) => {
                      self.core.add_pending(paths.len());
                      self.core.process(paths).await;
                  }
                  Some(Command::Flush(reply)) => {
                      self.sync_head().await;
                      let _ = reply.send(());
                  }
                  None => break,
              }
          }

          _ = poll.tick() => {
              let stamp = reflog_stamp(&self.reflog).await;
              if stamp != self.last_stamp {
                  self.last_stamp = stamp;
                  self.sync_head().await;
              }
          }
      }
    }
  }

  /// Process hints queued before the cancellation was seen
  async fn drain_commands(&mut self) {
    let mut paths = Vec::new();
    let mut replies = Vec::new();
    while let Ok(command) = self.commands.try_recv() {
      match command {
        Command::Enqueue(hinted) => paths.extend(hinted),
        Command::Flush(reply) => replies.push(reply),
      }
    }
    if !paths.is_empty() {
      debug!(count = paths.len(), "Processing queued hints on shutdown");
      self.core.add_pending(paths.len());
      self.core.process(paths).await;
    }
    for reply in replies {
      let _ = reply.send(());
    }
  }

  /// Bring the index up to the current head
  async fn sync_head(&mut self) {
    let Some(current) = read_head(&self.reflog).await else {
      debug!("No head in reflog yet");
      return;
    };

    let last = match self.state.last_indexed_ref.clone() {
      None => {
        info!(head = %current, "No indexed reference recorded, adopting current head");
        self.record(current).await;
        return;
      }
      Some(last) if last == current => return,
      Some(last) => last,
    };

    let root = self.core.ctx.project_root.clone();
    match diff_names(&root, &last, &current).await {
      Ok(names) => {
        let paths: Vec<String> = names
          .iter()
          .filter_map(|name| self.core.normalize(Path::new(name)))
          .collect();
        info!(from = %last, to = %current, changed = paths.len(), "Head moved");
        self.core.add_pending(paths.len());
        self.core.process(paths).await;
        self.record(current).await;
      }
      Err(e) => {
        warn!(from = %last, to = %current, error = %e, "git diff failed, keeping last indexed reference");
        // Retry on the next poll
        self.last_stamp = None;
      }
    }
  }

  async fn record(&mut self, head: String) {
    self.state.last_indexed_ref = Some(head);
    self.state.updated_at = Some(Utc::now());
    if let Err(e) = self.state.save(&self.state_path).await {
      warn!(path = %self.state_path.display(), error = %e, "Failed to save git state");
    }
  }
}
