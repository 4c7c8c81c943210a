//! Bridge from notify's sync callback into an async channel.
//!
//! The callback runs on notify's thread and forwards with `blocking_send`;
//! if the channel is full or closed the event is dropped.

use std::{path::Path, time::Duration};

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{info, trace};

use super::StrategyCore;

pub(super) struct FsEvents {
  // Dropping the watcher stops event delivery
  _watcher: RecommendedWatcher,
  pub rx: mpsc::Receiver<notify::Result<Event>>,
}

impl FsEvents {
  pub fn watch(root: &Path, poll_interval: Duration) -> Result<Self, notify::Error> {
    let (tx, rx) = mpsc::channel::<notify::Result<Event>>(256);

    let mut watcher = RecommendedWatcher::new(
      move |res| {
        let _ = tx.blocking_send(res);
      },
      Config::default().with_poll_interval(poll_interval),
    )?;
    watcher.watch(root, RecursiveMode::Recursive)?;

    info!(root = %root.display(), "File watcher initialized");
    Ok(Self { _watcher: watcher, rx })
  }
}

/// Project-relative paths touched by `event`, minus tooling paths and directories
pub(super) fn changed_paths(core: &StrategyCore, event: &Event) -> Vec<String> {
  match event.kind {
    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {}
    EventKind::Access(_) | EventKind::Any | EventKind::Other => {
      trace!(kind = ?event.kind, "Ignoring event");
      return Vec::new();
    }
  }

  event
    .paths
    .iter()
    .filter(|path| !path.is_dir())
    .filter_map(|path| core.normalize(path))
    .collect()
}
