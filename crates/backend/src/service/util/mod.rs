//! Shared utilities for the service layer.
//!
//! - `paths` - Project-relative path keys and tooling-owned path detection

mod paths;

pub use paths::{is_internal, to_absolute, to_relative};
