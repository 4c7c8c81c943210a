//! Task-based concurrency for index synchronization
//!
//! # Architecture
//!
//! - Each running strategy owns a long-lived worker task with its own event loop
//! - Callers reach workers through `mpsc` commands; flushes reply over `oneshot`
//! - Shutdown goes through a `CancellationToken`, after which workers drain
//! - Status lives in atomics so handles can be read without locking
//!
//! # Components
//!
//! - [`StrategyOrchestrator`]: Owns the current strategy and switches between them
//! - [`strategy::RealtimeStrategy`]: Watches the filesystem and indexes settled changes
//! - [`strategy::LazyStrategy`]: Queues changes until flushed
//! - [`strategy::GitStrategy`]: Indexes what changed between commits

mod orchestrator;
pub mod strategy;


pub use orchestrator::{OrchestratorError, StrategyOrchestrator, StrategyOrchestratorDeps};
