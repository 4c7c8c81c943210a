//! Lazy strategy - collect changes, process them only on demand
//!
//! A collector task turns filesystem events into entries of a deduplicated
//! queue. Nothing reaches the index until `flush()` or `stop()`.

use std::{
  collections::BTreeSet,
  path::PathBuf,
  sync::{Arc, Mutex as StdMutex, PoisonError},
  time::Duration,
};

use async_trait::async_trait;
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
  IndexingStrategy, Lifecycle, StrategyContext, StrategyCore, StrategyError,
  fs_events::{FsEvents, changed_paths},
};
use crate::domain::strategy::{StrategyId, StrategyKind, StrategyStats};

type Queue = Arc<StdMutex<BTreeSet<String>>>;

struct Collector {
  cancel: CancellationToken,
  handle: JoinHandle<()>,
}

pub struct LazyStrategy {
  core: Arc<StrategyCore>,
  queue: Queue,
  // Serializes processing passes
  batch_lock: Mutex<()>,
  runtime: Mutex<Lifecycle<Collector>>,
}

impl LazyStrategy {
  pub fn new(ctx: StrategyContext) -> Self {
    Self {
      core: Arc::new(StrategyCore::new(StrategyKind::Lazy, ctx)),
      queue: Arc::new(StdMutex::new(BTreeSet::new())),
      batch_lock: Mutex::new(()),
      runtime: Mutex::new(Lifecycle::Idle),
    }
  }

  /// Paths waiting for the next flush
  pub fn queued(&self) -> Vec<String> {
    self
      .queue
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .iter()
      .cloned()
      .collect()
  }

  async fn drain(&self) {
    let _batch = self.batch_lock.lock().await;
    let paths: Vec<String> = std::mem::take(&mut *self.queue.lock().unwrap_or_else(PoisonError::into_inner))
      .into_iter()
      .collect();
    if paths.is_empty() {
      return;
    }
    debug!(strategy = %self.kind(), count = paths.len(), "Flushing queued changes");
    self.core.process(paths).await;
  }
}

fn push(core: &StrategyCore, queue: &Queue, paths: impl IntoIterator<Item = String>) {
  let mut queue = queue.lock().unwrap_or_else(PoisonError::into_inner);
  for path in paths {
    if queue.insert(path) {
      core.add_pending(1);
    }
  }
}

#[async_trait]
impl IndexingStrategy for LazyStrategy {
  fn id(&self) -> StrategyId {
    self.core.id()
  }

  fn kind(&self) -> StrategyKind {
    StrategyKind::Lazy
  }

  fn is_active(&self) -> bool {
    self.core.is_active()
  }

  async fn start(&self) -> Result<(), StrategyError> {
    let mut lifecycle = self.runtime.lock().await;
    if let Some(err) = lifecycle.start_error() {
      return Err(err);
    }

    let mut events = FsEvents::watch(
      &self.core.ctx.project_root,
      Duration::from_secs(self.core.ctx.config.watcher_poll_secs),
    )?;
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let core = self.core.clone();
    let queue = self.queue.clone();

    let handle = tokio::spawn(async move {
      loop {
        tokio::select! {
            biased;

            _ = token.cancelled() => break,

            event = events.rx.recv() => {
                match event {
                    Some(Ok(event)) => push(&core, &queue, changed_paths(&core, &event)),
                    Some(Err(e)) => warn!(error = %e, "Watcher error"),
                    None => break,
                }
            }
        }
      }
      debug!(id = %core.id(), "Lazy collector stopped");
    });

    *lifecycle = Lifecycle::Running(Collector { cancel, handle });
    self.core.set_active(true);
    self.core.emit_started();
    info!(strategy = %self.kind(), id = %self.id(), "Strategy started");
    Ok(())
  }

  async fn stop(&self) {
    let mut lifecycle = self.runtime.lock().await;
    let Lifecycle::Running(collector) = std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) else {
      return;
    };

    self.core.set_active(false);
    collector.cancel.cancel();
    if let Err(e) = collector.handle.await {
      error!(strategy = %self.kind(), error = %e, "Lazy collector panicked");
    }
    self.drain().await;

    self.core.emit_stopped();
    info!(strategy = %self.kind(), id = %self.id(), "Strategy stopped");
  }

  async fn flush(&self) -> Result<(), StrategyError> {
    if !self.is_active() {
      return Ok(());
    }
    self.drain().await;
    self.core.emit_flushed();
    Ok(())
  }

  async fn enqueue(&self, paths: Vec<PathBuf>) {
    if !self.is_active() {
      debug!(strategy = %self.kind(), "Strategy not running, dropping hints");
      return;
    }
    let relative: Vec<String> = paths.iter().filter_map(|p| self.core.normalize(p)).collect();
    push(&self.core, &self.queue, relative);
  }

  fn stats(&self) -> StrategyStats {
    self.core.stats()
  }
}
