//! Shared configuration types for driftwatch.

pub mod config;

pub use config::{Config, IndexConfig, IntegrityConfig};
