//! Idempotent WildFly installer.
//!
//! Marker-gated deploys of a versioned release tarball, systemd service
//! management, BLAKE3 state locks and a JSONL provenance log.

pub mod cli;
pub mod core;
pub mod resources;
pub mod transport;
pub mod tripwire;
