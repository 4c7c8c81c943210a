//! Domain types - core business entities
//!
//! These types describe strategies, drift and reconciliation independently
//! of how the index stores its data.

pub use driftwatch_core::config;

pub mod drift;
pub mod strategy;
