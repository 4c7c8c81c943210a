//! Realtime strategy - re-index files as soon as their changes settle
//!
//! A worker task owns the notify bridge and a debounce map keyed by
//! project-relative path. Repeated events on a path coalesce while it is
//! pending; once a path has been quiet for `watcher_debounce_ms` it is
//! processed. Explicit hints join the same map.
//!
//! # Lifecycle
//!
//! The worker runs until its `CancellationToken` is triggered. It then takes
//! in the commands and events already queued, processes everything pending
//! and answers outstanding flushes before exiting.

use std::{
  collections::HashMap,
  path::PathBuf,
  sync::Arc,
  time::{Duration, Instant},
};

use async_trait::async_trait;
use tokio::{
  sync::{Mutex, mpsc, oneshot},
  task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
  Command, IndexingStrategy, Lifecycle, StrategyContext, StrategyCore, StrategyError,
  fs_events::{FsEvents, changed_paths},
};
use crate::domain::strategy::{StrategyId, StrategyKind, StrategyStats};

const MIN_TICK: Duration = Duration::from_millis(10);

struct Runtime {
  commands: mpsc::Sender<Command>,
  cancel: CancellationToken,
  handle: JoinHandle<()>,
}

pub struct RealtimeStrategy {
  core: Arc<StrategyCore>,
  runtime: Mutex<Lifecycle<Runtime>>,
}

impl RealtimeStrategy {
  pub fn new(ctx: StrategyContext) -> Self {
    Self {
      core: Arc::new(StrategyCore::new(StrategyKind::Realtime, ctx)),
      runtime: Mutex::new(Lifecycle::Idle),
    }
  }

  async fn commands(&self) -> Option<mpsc::Sender<Command>> {
    self.runtime.lock().await.running().map(|rt| rt.commands.clone())
  }
}

#[async_trait]
impl IndexingStrategy for RealtimeStrategy {
  fn id(&self) -> StrategyId {
    self.core.id()
  }

  fn kind(&self) -> StrategyKind {
    StrategyKind::Realtime
  }

  fn is_active(&self) -> bool {
    self.core.is_active()
  }

  async fn start(&self) -> Result<(), StrategyError> {
    let mut lifecycle = self.runtime.lock().await;
    if let Some(err) = lifecycle.start_error() {
      return Err(err);
    }

    let config = &self.core.ctx.config;
    let events = FsEvents::watch(
      &self.core.ctx.project_root,
      Duration::from_secs(config.watcher_poll_secs),
    )?;

    let (commands, command_rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let worker = RealtimeWorker {
      core: self.core.clone(),
      events,
      commands: command_rx,
      cancel: cancel.clone(),
      pending: HashMap::new(),
      debounce: Duration::from_millis(config.watcher_debounce_ms),
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
      error!(strategy = %self.kind(), error = %e, "Realtime worker panicked");
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
      return Err(StrategyError::State("realtime worker is gone".to_string()));
    }
    if rx.await.is_err() {
      // The worker exited on a concurrent stop, which drained everything
      if !self.is_active() {
        return Ok(());
      }
      return Err(StrategyError::State("realtime worker dropped flush".to_string()));
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
          warn!(strategy = %self.kind(), "Realtime worker closed, dropping hints");
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

struct RealtimeWorker {
  core: Arc<StrategyCore>,
  events: FsEvents,
  commands: mpsc::Receiver<Command>,
  cancel: CancellationToken,
  // path -> last event
  pending: HashMap<String, Instant>,
  debounce: Duration,
}

impl RealtimeWorker {
  async fn run(mut self) {
    debug!(id = %self.core.id(), "Realtime worker started");
    let mut debounce_interval = tokio::time::interval(self.debounce.max(MIN_TICK));

    loop {
      tokio::select! {
          biased;

          _ = self.cancel.cancelled() => {
              debug!("Realtime worker shutting down (cancelled)");
              break;
          }

          command = self.commands.recv() => {
              match command {
                  Some(Command::Enqueue(paths)) => {
                      for path in paths {
                          self.track(path);
                      }
                  }
                  Some(Command::Flush(reply)) => {
                      self.drain_events();
                      self.process_all().await;
                      let _ = reply.send(());
                  }
                  None => break,
              }
          }

          event = self.events.rx.recv() => {
              match event {
                  Some(Ok(event)) => {
                      for path in changed_paths(&self.core, &event) {
                          self.track(path);
                      }
                  }
                  Some(Err(e)) => warn!(error = %e, "Watcher error"),
                  None => {
                      debug!("Realtime worker shutting down (channel closed)");
                      break;
                  }
              }
          }

          _ = debounce_interval.tick() => {
              self.process_settled().await;
          }
      }
    }

    // Hints and flushes queued before the cancellation was seen
    let mut replies = Vec::new();
    while let Ok(command) = self.commands.try_recv() {
      match command {
        Command::Enqueue(paths) => {
          for path in paths {
            self.track(path);
          }
        }
        Command::Flush(reply) => replies.push(reply),
      }
    }
    self.drain_events();

    if !self.pending.is_empty() {
      debug!(pending = self.pending.len(), "Draining pending changes on shutdown");
      self.process_all().await;
    }
    for reply in replies {
      let _ = reply.send(());
    }
  }

  fn track(&mut self, path: String) {
    if self.pending.insert(path, Instant::now()).is_none() {
      self.core.add_pending(1);
    }
  }

  /// Pull in events notify already delivered
  fn drain_events(&mut self) {
    while let Ok(event) = self.events.rx.try_recv() {
      if let Ok(event) = event {
        for path in changed_paths(&self.core, &event) {
          self.track(path);
        }
      }
    }
  }

  async fn process_settled(&mut self) {
    let settled: Vec<String> = self
      .pending
      .iter()
      .filter(|(_, last)| last.elapsed() >= self.debounce)
      .map(|(path, _)| path.clone())
      .collect();
    if settled.is_empty() {
      return;
    }
    for path in &settled {
      self.pending.remove(path);
    }
    self.core.process(settled).await;
  }

  async fn process_all(&mut self) {
    let mut paths: Vec<String> = self.pending.drain().map(|(path, _)| path).collect();
    paths.sort();
    self.core.process(paths).await;
  }
}
