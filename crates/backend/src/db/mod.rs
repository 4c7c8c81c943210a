//! Persistence owned by the sync core
//!
//! The semantic index itself lives behind `IndexMutator`; the only state this
//! crate persists is the fingerprint store.

mod fingerprints;

pub use fingerprints::{FingerprintError, FingerprintRecord, FingerprintStore, hash_bytes, hash_file};
