//! Sigbuild: deterministic builds for signal-driven vehicle apps.
//!
//! BLAKE3 change detection. Staged pipeline with a persisted cache.
//! Verified artifacts, launched under a bounded runner.

pub mod cli;
pub mod core;
pub mod provenance;
pub mod transport;
