//! Business logic services.
//!
//! This module contains the sync core beneath the strategies: deciding which
//! files are eligible, mutating the index, and keeping it consistent with disk.
//!
//! ## Available Services
//!
//! - [`index`] - The index collaborator seam (`IndexMutator`)
//! - [`policy`] - Eligibility decisions (`IndexingPolicy`, `IgnorePolicy`)
//! - [`writer`] - Shared mutation path with fingerprint bookkeeping
//! - [`integrity`] - Drift detection, reconciliation and periodic checks

pub mod index;
pub mod integrity;
pub mod policy;
pub mod util;
pub mod writer;
