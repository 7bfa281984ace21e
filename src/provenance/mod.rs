//! Provenance: BLAKE3 fingerprints and the append-only event log.

pub mod eventlog;
pub mod hasher;
