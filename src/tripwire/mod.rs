//! Tripwire: BLAKE3 hashing, provenance event log and drift detection.

pub mod drift;
pub mod eventlog;
pub mod hasher;
