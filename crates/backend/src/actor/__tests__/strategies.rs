//! Strategy tests: triggering, counters and lifecycle of each variant.

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use pretty_assertions::assert_eq;

  use crate::{
    actor::{
      __tests__::helpers::{
        IndexCall, TestContext, drain_events, git, git_available, read_git_state, strategy_context, wait_for,
        write_reflog,
      },
      strategy::{
        GIT_STATE_FILE, GitState, GitStrategy, IndexingStrategy, LazyStrategy, RealtimeStrategy, StrategyError,
      },
    },
    domain::strategy::{StrategyEvent, StrategyKind},
  };

  const HEAD_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
  const HEAD_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

  // ==========================================================================
  // Lazy
  // ==========================================================================

  #[tokio::test]
  async fn test_lazy_accumulates_until_flush() {
    let ctx = TestContext::new();
    ctx.write_file("a.ts", "a");
    ctx.write_file("b.ts", "b");
    let (strategy_ctx, _events) = strategy_context(&ctx);
    let lazy = LazyStrategy::new(strategy_ctx);
    lazy.start().await.unwrap();

    lazy
      .enqueue(vec!["a.ts".into(), ctx.root().join("b.ts"), "a.ts".into()])
      .await;
    assert_eq!(lazy.queued(), vec!["a.ts".to_string(), "b.ts".to_string()]);

    let stats = lazy.stats();
    assert_eq!(stats.name, StrategyKind::Lazy);
    assert_eq!(stats.pending_files, 2);
    assert_eq!(stats.processed_files, 0);
    assert!(ctx.index.calls().is_empty());

    lazy.flush().await.unwrap();
    assert_eq!(ctx.index.updated(), vec!["a.ts".to_string(), "b.ts".to_string()]);
    let stats = lazy.stats();
    assert_eq!(stats.pending_files, 0);
    assert_eq!(stats.processed_files, 2);
    assert!(!ctx.fingerprints.has_unsaved_changes());

    lazy.stop().await;
  }

  #[tokio::test]
  async fn test_lazy_stop_drains_queue() {
    let ctx = TestContext::new();
    ctx.write_file("a.ts", "a");
    let (strategy_ctx, mut events) = strategy_context(&ctx);
    let lazy = LazyStrategy::new(strategy_ctx);
    lazy.start().await.unwrap();

    lazy.enqueue(vec!["a.ts".into()]).await;
    lazy.stop().await;

    assert!(!lazy.is_active());
    assert_eq!(ctx.index.updated(), vec!["a.ts".to_string()]);
    assert_eq!(lazy.stats().pending_files, 0);

    let kinds: Vec<_> = drain_events(&mut events)
      .into_iter()
      .map(|e| matches!(e, StrategyEvent::Stopped { .. }))
      .collect();
    assert_eq!(kinds, vec![false, true]);
  }

  #[tokio::test]
  async fn test_lazy_collects_filesystem_events() {
    let ctx = TestContext::new();
    let (strategy_ctx, _events) = strategy_context(&ctx);
    let lazy = LazyStrategy::new(strategy_ctx);
    lazy.start().await.unwrap();

    ctx.write_file("src/watched.ts", "export const w = 1;");
    let lazy_ref = &lazy;
    let queued = wait_for(Duration::from_secs(5), || async move {
      lazy_ref.queued().contains(&"src/watched.ts".to_string())
    })
    .await;
    assert!(queued, "lazy strategy should queue the watched file");
    assert!(ctx.index.calls().is_empty());

    lazy.flush().await.unwrap();
    assert!(ctx.index.updated().contains(&"src/watched.ts".to_string()));
    lazy.stop().await;
  }

  #[tokio::test]
  async fn test_flush_when_inactive_is_noop() {
    let ctx = TestContext::new();
    let (strategy_ctx, mut events) = strategy_context(&ctx);
    let lazy = LazyStrategy::new(strategy_ctx);

    lazy.flush().await.unwrap();
    lazy.enqueue(vec!["a.ts".into()]).await;
    assert!(lazy.queued().is_empty());
    assert!(drain_events(&mut events).is_empty());
  }

  // ==========================================================================
  // Realtime
  // ==========================================================================

  #[tokio::test]
  async fn test_realtime_indexes_settled_write() {
    let ctx = TestContext::new();
    let (strategy_ctx, _events) = strategy_context(&ctx);
    let realtime = RealtimeStrategy::new(strategy_ctx);
    realtime.start().await.unwrap();

    ctx.write_file("src/live.rs", "pub fn live() {}");
    let index = ctx.index.clone();
    let indexed = wait_for(Duration::from_secs(5), || {
      let index = index.clone();
      async move { index.updated().contains(&"src/live.rs".to_string()) }
    })
    .await;
    assert!(indexed, "realtime strategy should index without an explicit flush");
    assert!(ctx.fingerprints.has("src/live.rs"));

    realtime.stop().await;
  }

  #[tokio::test]
  async fn test_realtime_counts_rejected_paths_as_processed() {
    let ctx = TestContext::new();
    ctx.write_file("a.ts", "a");
    ctx.write_file("node_modules/dep/index.js", "dep");
    let (strategy_ctx, _events) = strategy_context(&ctx);
    let realtime = RealtimeStrategy::new(strategy_ctx);
    realtime.start().await.unwrap();

    realtime
      .enqueue(vec!["a.ts".into(), "node_modules/dep/index.js".into()])
      .await;
    realtime.flush().await.unwrap();

    let stats = realtime.stats();
    assert_eq!(stats.pending_files, 0);
    assert_eq!(stats.processed_files, 2);
    assert_eq!(ctx.index.calls(), vec![IndexCall::Update("a.ts".to_string())]);

    realtime.stop().await;
  }

  #[tokio::test]
  async fn test_rejected_tracked_file_is_removed() {
    let ctx = TestContext::new();
    ctx.write_file("dist/bundle.js", "built");
    ctx.track("dist/bundle.js", "built");
    let (strategy_ctx, _events) = strategy_context(&ctx);
    let realtime = RealtimeStrategy::new(strategy_ctx);
    realtime.start().await.unwrap();

    realtime.enqueue(vec!["dist/bundle.js".into()]).await;
    realtime.flush().await.unwrap();

    assert_eq!(ctx.index.removed(), vec!["dist/bundle.js".to_string()]);
    assert!(!ctx.fingerprints.has("dist/bundle.js"));
    realtime.stop().await;
  }

  #[tokio::test]
  async fn test_deleted_file_is_removed() {
    let ctx = TestContext::new();
    ctx.track("old.ts", "old");
    let (strategy_ctx, _events) = strategy_context(&ctx);
    let realtime = RealtimeStrategy::new(strategy_ctx);
    realtime.start().await.unwrap();

    realtime.enqueue(vec!["old.ts".into()]).await;
    realtime.flush().await.unwrap();
    assert_eq!(ctx.index.removed(), vec!["old.ts".to_string()]);
    assert!(!ctx.fingerprints.has("old.ts"));
    realtime.stop().await;
  }

  #[tokio::test]
  async fn test_tooling_paths_are_never_counted() {
    let ctx = TestContext::new();
    let (strategy_ctx, _events) = strategy_context(&ctx);
    let realtime = RealtimeStrategy::new(strategy_ctx);
    realtime.start().await.unwrap();

    realtime
      .enqueue(vec![".git/index".into(), ".driftwatch/fingerprints.json".into()])
      .await;
    realtime.flush().await.unwrap();

    let stats = realtime.stats();
    assert_eq!(stats.pending_files, 0);
    assert_eq!(stats.processed_files, 0);
    realtime.stop().await;
  }

  #[tokio::test]
  async fn test_stop_is_idempotent_and_emits_once() {
    let ctx = TestContext::new();
    let (strategy_ctx, mut events) = strategy_context(&ctx);
    let realtime = RealtimeStrategy::new(strategy_ctx);
    realtime.start().await.unwrap();
    let id = realtime.id();

    tokio::join!(realtime.stop(), realtime.stop());
    realtime.stop().await;

    assert!(!realtime.is_active());
    assert_eq!(
      drain_events(&mut events),
      vec![
        StrategyEvent::Started {
          id,
          kind: StrategyKind::Realtime
        },
        StrategyEvent::Stopped {
          id,
          kind: StrategyKind::Realtime
        },
      ]
    );

    let err = realtime.start().await.unwrap_err();
    assert!(matches!(err, StrategyError::State(_)));
    assert!(!realtime.is_active());
  }

  #[tokio::test]
  async fn test_stop_processes_queued_hints() {
    let ctx = TestContext::new();
    ctx.write_file("a.ts", "a");
    let (strategy_ctx, _events) = strategy_context(&ctx);
    let realtime = RealtimeStrategy::new(strategy_ctx);
    realtime.start().await.unwrap();

    realtime.enqueue(vec!["a.ts".into()]).await;
    realtime.stop().await;

    assert_eq!(ctx.index.updated(), vec!["a.ts".to_string()]);
    assert_eq!(realtime.stats().pending_files, 0);
    assert_eq!(realtime.stats().processed_files, 1);
  }

  #[tokio::test]
  async fn test_flush_racing_stop_succeeds() {
    let ctx = TestContext::new();
    ctx.write_file("a.ts", "a");
    let (strategy_ctx, _events) = strategy_context(&ctx);
    let realtime = RealtimeStrategy::new(strategy_ctx);
    realtime.start().await.unwrap();
    realtime.enqueue(vec!["a.ts".into()]).await;

    let (flushed, ()) = tokio::join!(realtime.flush(), realtime.stop());
    assert!(flushed.is_ok(), "flush during stop should not fail: {:?}", flushed);
    assert_eq!(ctx.index.updated(), vec!["a.ts".to_string()]);
    assert!(realtime.flush().await.is_ok());
  }

  #[tokio::test]
  async fn test_edited_gitignore_applies_to_same_batch() {
    let ctx = TestContext::new();
    // Policy is built before the ignore file exists
    let (strategy_ctx, _events) = strategy_context(&ctx);
    ctx.write_file(".gitignore", "gen.ts\n");
    ctx.write_file("gen.ts", "generated");
    ctx.write_file("src/a.ts", "a");

    let realtime = RealtimeStrategy::new(strategy_ctx);
    realtime.start().await.unwrap();
    realtime
      .enqueue(vec![".gitignore".into(), "gen.ts".into(), "src/a.ts".into()])
      .await;
    realtime.flush().await.unwrap();

    let mut updated = ctx.index.updated();
    updated.sort();
    assert_eq!(updated, vec![".gitignore".to_string(), "src/a.ts".to_string()]);
    assert_eq!(realtime.stats().processed_files, 3);
    realtime.stop().await;
  }

  #[tokio::test]
  async fn test_processing_raises_indexing_flag() {
    let ctx = TestContext::new();
    ctx.write_file("a.ts", "a");
    let (strategy_ctx, _events) = strategy_context(&ctx);
    let integrity = strategy_ctx.integrity.clone();
    let lazy = LazyStrategy::new(strategy_ctx);
    lazy.start().await.unwrap();

    assert!(!integrity.is_indexing_active());
    lazy.enqueue(vec!["a.ts".into()]).await;
    lazy.flush().await.unwrap();
    assert!(!integrity.is_indexing_active(), "guard is released after the pass");
    lazy.stop().await;
  }

  // ==========================================================================
  // Git
  // ==========================================================================

  #[tokio::test]
  async fn test_git_requires_reflog() {
    let ctx = TestContext::new();
    let (strategy_ctx, mut events) = strategy_context(&ctx);
    let strategy = GitStrategy::new(strategy_ctx);

    let err = strategy.start().await.unwrap_err();
    assert!(matches!(err, StrategyError::Precondition(_)));
    assert!(!strategy.is_active());
    assert!(drain_events(&mut events).is_empty());
  }

  #[tokio::test]
  async fn test_git_adopts_head_without_state() {
    let ctx = TestContext::new();
    write_reflog(&ctx, HEAD_A);
    let (strategy_ctx, _events) = strategy_context(&ctx);
    let strategy = GitStrategy::new(strategy_ctx);
    strategy.start().await.unwrap();

    strategy.flush().await.unwrap();
    let state = read_git_state(&ctx).await;
    assert_eq!(state.last_indexed_ref.as_deref(), Some(HEAD_A));
    assert!(state.updated_at.is_some());
    assert!(ctx.index.calls().is_empty());
    assert_eq!(strategy.stats().processed_files, 0);

    strategy.stop().await;
  }

  #[tokio::test]
  async fn test_git_failed_diff_keeps_last_reference() {
    let ctx = TestContext::new();
    // Not a real repository, so `git diff` cannot succeed
    write_reflog(&ctx, HEAD_B);
    let previous = GitState {
      last_indexed_ref: Some(HEAD_A.to_string()),
      updated_at: None,
    };
    previous.save(&ctx.index_path().join(GIT_STATE_FILE)).await.unwrap();

    let (strategy_ctx, _events) = strategy_context(&ctx);
    let strategy = GitStrategy::new(strategy_ctx);
    strategy.start().await.unwrap();
    strategy.flush().await.unwrap();

    let state = read_git_state(&ctx).await;
    assert_eq!(state.last_indexed_ref.as_deref(), Some(HEAD_A));
    assert!(ctx.index.calls().is_empty());
    strategy.stop().await;
  }

  #[tokio::test]
  async fn test_git_enqueue_processes_immediately() {
    let ctx = TestContext::new();
    write_reflog(&ctx, HEAD_A);
    ctx.write_file("hint.ts", "hinted");
    let (strategy_ctx, _events) = strategy_context(&ctx);
    let strategy = GitStrategy::new(strategy_ctx);
    strategy.start().await.unwrap();

    strategy.enqueue(vec!["hint.ts".into()]).await;
    let index = ctx.index.clone();
    let processed = wait_for(Duration::from_secs(5), || {
      let index = index.clone();
      async move { index.updated().contains(&"hint.ts".to_string()) }
    })
    .await;
    assert!(processed);
    strategy.stop().await;
  }

  #[tokio::test]
  async fn test_git_stop_processes_queued_hints() {
    let ctx = TestContext::new();
    write_reflog(&ctx, HEAD_A);
    ctx.write_file("hint.ts", "hinted");
    let (strategy_ctx, _events) = strategy_context(&ctx);
    let strategy = GitStrategy::new(strategy_ctx);
    strategy.start().await.unwrap();

    strategy.enqueue(vec!["hint.ts".into()]).await;
    let (flushed, ()) = tokio::join!(strategy.flush(), strategy.stop());
    assert!(flushed.is_ok());
    assert_eq!(ctx.index.updated(), vec!["hint.ts".to_string()]);
    assert_eq!(strategy.stats().pending_files, 0);
  }

  #[tokio::test]
  async fn test_git_indexes_committed_changes() {
    if !git_available() {
      eprintln!("git not available, skipping");
      return;
    }

    let ctx = TestContext::new();
    let root = ctx.root().to_path_buf();
    git(&root, &["init", "-q"]);
    ctx.write_file(".gitignore", ".driftwatch/\n");
    ctx.write_file("a.ts", "const a = 1;");
    ctx.write_file("gone.ts", "const gone = 1;");
    git(&root, &["add", "-A"]);
    git(&root, &["commit", "-q", "-m", "initial"]);

    let (strategy_ctx, _events) = strategy_context(&ctx);
    let strategy = GitStrategy::new(strategy_ctx);
    strategy.start().await.unwrap();
    strategy.flush().await.unwrap();
    assert!(ctx.index.calls().is_empty(), "initial head is adopted, not diffed");

    ctx.write_file("a.ts", "const a = 2;");
    ctx.write_file("b.ts", "const b = 1;");
    ctx.delete_file("gone.ts");
    git(&root, &["add", "-A"]);
    git(&root, &["commit", "-q", "-m", "second"]);

    strategy.flush().await.unwrap();
    let mut updated = ctx.index.updated();
    updated.sort();
    assert_eq!(updated, vec!["a.ts".to_string(), "b.ts".to_string()]);
    assert_eq!(ctx.index.removed(), vec!["gone.ts".to_string()]);
    assert_eq!(strategy.stats().processed_files, 3);
    assert_eq!(strategy.stats().pending_files, 0);

    let state = read_git_state(&ctx).await;
    assert_ne!(state.last_indexed_ref, None);
    strategy.stop().await;
  }
}
