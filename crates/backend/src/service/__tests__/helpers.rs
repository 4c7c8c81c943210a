//! Shared test helpers for service-level integration tests.
//!
//! Provides `RecordingIndex`, an index collaborator that records every
//! mutation and can be told to fail for chosen paths, and `TestContext`, a
//! temp project wired to a fingerprint store and the default ignore policy.

use std::{
  collections::HashSet,
  path::{Path, PathBuf},
  sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
  },
};

use async_trait::async_trait;
use tempfile::TempDir;

use crate::{
  db::{FingerprintRecord, FingerprintStore, hash_bytes},
  domain::config::Config,
  service::{
    index::{IndexMutator, IndexStats, MutationError},
    integrity::{IntegrityDeps, IntegrityEngine},
    policy::{IgnorePolicy, IndexingPolicy, PolicyDecision},
    writer::IndexWriter,
  },
};

// ============================================================================
// RecordingIndex
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexCall {
  Update(String),
  Remove(String),
}

/// Index collaborator that records calls instead of indexing
pub struct RecordingIndex {
  calls: Mutex<Vec<IndexCall>>,
  failing: Mutex<HashSet<String>>,
  loaded: AtomicBool,
  closed: AtomicBool,
}

impl RecordingIndex {
  pub fn new() -> Arc<Self> {
    Arc::new(Self {
      calls: Mutex::new(Vec::new()),
      failing: Mutex::new(HashSet::new()),
      loaded: AtomicBool::new(true),
      closed: AtomicBool::new(false),
    })
  }

  /// Make every mutation of `path` fail
  pub fn fail_on(&self, path: &str) {
    self.failing.lock().unwrap().insert(path.to_string());
  }

  pub fn set_loaded(&self, loaded: bool) {
    self.loaded.store(loaded, Ordering::SeqCst);
  }

  pub fn is_closed(&self) -> bool {
    self.closed.load(Ordering::SeqCst)
  }

  pub fn calls(&self) -> Vec<IndexCall> {
    self.calls.lock().unwrap().clone()
  }

  pub fn updated(&self) -> Vec<String> {
    self
      .calls()
      .into_iter()
      .filter_map(|c| match c {
        IndexCall::Update(p) => Some(p),
        IndexCall::Remove(_) => None,
      })
      .collect()
  }

  pub fn removed(&self) -> Vec<String> {
    self
      .calls()
      .into_iter()
      .filter_map(|c| match c {
        IndexCall::Remove(p) => Some(p),
        IndexCall::Update(_) => None,
      })
      .collect()
  }

  pub fn clear_calls(&self) {
    self.calls.lock().unwrap().clear();
  }

  fn record(&self, call: IndexCall, path: &Path) -> Result<(), MutationError> {
    let key = path.to_string_lossy().replace('\\', "/");
    if self.failing.lock().unwrap().contains(&key) {
      return Err(MutationError::Rejected(format!("injected failure for {}", key)));
    }
    self.calls.lock().unwrap().push(call);
    Ok(())
  }
}

#[async_trait]
impl IndexMutator for RecordingIndex {
  async fn update_file(&self, path: &Path) -> Result<(), MutationError> {
    self.record(IndexCall::Update(path.to_string_lossy().into_owned()), path)
  }

  async fn remove_file(&self, path: &Path) -> Result<(), MutationError> {
    self.record(IndexCall::Remove(path.to_string_lossy().into_owned()), path)
  }

  async fn stats(&self) -> IndexStats {
    IndexStats {
      files: self.updated().len(),
      chunks: 0,
    }
  }

  fn is_loaded(&self) -> bool {
    self.loaded.load(Ordering::SeqCst)
  }

  async fn close(&self) -> Result<(), MutationError> {
    self.closed.store(true, Ordering::SeqCst);
    Ok(())
  }
}

// ============================================================================
// TestContext
// ============================================================================

/// Temp project with a recording index and a fingerprint store
///
/// The temp directory is removed when the context is dropped.
pub struct TestContext {
  pub project_dir: TempDir,
  pub index: Arc<RecordingIndex>,
  pub fingerprints: Arc<FingerprintStore>,
  pub config: Config,
}

impl TestContext {
  pub fn new() -> Self {
    let project_dir = TempDir::new().expect("create project temp dir");

    let mut config = Config::default();
    config.index.watcher_debounce_ms = 50;
    config.index.git_poll_interval_ms = 50;
    config.integrity.periodic_check = false;

    let index_path = config.index.index_path(project_dir.path());
    let fingerprints = Arc::new(FingerprintStore::new(index_path.join("fingerprints.json")));

    Self {
      project_dir,
      index: RecordingIndex::new(),
      fingerprints,
      config,
    }
  }

  pub fn root(&self) -> &Path {
    self.project_dir.path()
  }

  pub fn index_path(&self) -> PathBuf {
    self.config.index.index_path(self.root())
  }

  pub fn write_file(&self, path: &str, content: &str) {
    let full_path = self.root().join(path);
    if let Some(parent) = full_path.parent() {
      std::fs::create_dir_all(parent).expect("create parent dirs");
    }
    std::fs::write(&full_path, content).expect("write file");
  }

  pub fn delete_file(&self, path: &str) {
    let _ = std::fs::remove_file(self.root().join(path));
  }

  /// Record a fingerprint as if `content` had been indexed at `path`
  pub fn track(&self, path: &str, content: &str) {
    self.fingerprints.set(FingerprintRecord::new(path, hash_bytes(content.as_bytes())));
  }

  pub fn policy(&self) -> Arc<dyn IndexingPolicy> {
    Arc::new(IgnorePolicy::new(self.root(), self.index_path(), &self.config.index))
  }

  pub fn writer(&self) -> IndexWriter {
    IndexWriter::new(self.root(), self.index.clone(), None, self.fingerprints.clone(), None)
  }

  pub fn integrity(&self) -> Arc<IntegrityEngine> {
    self.integrity_with_policy(self.policy())
  }

  pub fn integrity_with_policy(&self, policy: Arc<dyn IndexingPolicy>) -> Arc<IntegrityEngine> {
    Arc::new(IntegrityEngine::new(
      IntegrityDeps {
        project_path: self.root().to_path_buf(),
        index_path: self.index_path(),
        index: self.index.clone(),
        docs_index: None,
        policy,
        fingerprints: self.fingerprints.clone(),
        docs_fingerprints: None,
      },
      self.config.integrity.clone(),
    ))
  }
}

// ============================================================================
// HookPolicy
// ============================================================================

/// Default policy that runs `hook` on its first decision
pub struct HookPolicy {
  inner: IgnorePolicy,
  fired: AtomicBool,
  hook: Box<dyn Fn() + Send + Sync>,
}

impl HookPolicy {
  pub fn new(ctx: &TestContext, hook: impl Fn() + Send + Sync + 'static) -> Arc<Self> {
    Arc::new(Self {
      inner: IgnorePolicy::new(ctx.root(), ctx.index_path(), &ctx.config.index),
      fired: AtomicBool::new(false),
      hook: Box::new(hook),
    })
  }
}

impl IndexingPolicy for HookPolicy {
  fn should_index(&self, path: &Path) -> PolicyDecision {
    if !self.fired.swap(true, Ordering::SeqCst) {
      (self.hook)();
    }
    self.inner.should_index(path)
  }

  fn should_descend(&self, dir: &Path) -> bool {
    self.inner.should_descend(dir)
  }

  fn reload(&self) {
    self.inner.reload();
  }
}

/// Poll `check` until it returns true or `timeout` elapses
pub async fn wait_for<F, Fut>(timeout: std::time::Duration, mut check: F) -> bool
where
  F: FnMut() -> Fut,
  Fut: std::future::Future<Output = bool>,
{
  let start = std::time::Instant::now();
  let poll_interval = std::time::Duration::from_millis(25);

  while start.elapsed() < timeout {
    if check().await {
      return true;
    }
    tokio::time::sleep(poll_interval).await;
  }

  false
}
