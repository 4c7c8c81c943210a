mod actor;
mod db;
mod service;

mod domain;
pub use domain::{
  config,
  drift::{DriftReport, ReconcileResult},
  strategy::{StrategyEvent, StrategyId, StrategyKind, StrategyStats},
};

pub use actor::{
  OrchestratorError, StrategyOrchestrator, StrategyOrchestratorDeps,
  strategy::{
    GitState, GitStrategy, IndexingStrategy, LazyStrategy, RealtimeStrategy, StrategyContext, StrategyError,
    create_strategy,
  },
};
pub use db::{FingerprintError, FingerprintRecord, FingerprintStore, hash_bytes, hash_file};
pub use service::{
  index::{IndexMutator, IndexStats, MutationError},
  integrity::{CheckOutcome, IndexingGuard, IntegrityDeps, IntegrityEngine, IntegrityError},
  policy::{AllowAll, IgnorePolicy, IndexingPolicy, PolicyDecision},
  writer::{AppliedOp, IndexWriter, WriteError},
};
