//! Error taxonomy for provisioning runs.
//!
//! Input errors abort before any mutation. Integrity errors abort before
//! the installation root is touched. Filesystem errors carry the path
//! that failed. Unsupported platforms and unreadable markers are not
//! errors; they are handled inside the pipeline.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error type for provisioning operations
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Invalid mode, missing version/url/checksum, bad names
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Configuration document could not be read or parsed
    #[error("config error: {0}")]
    Config(String),

    /// Downloaded artifact does not match the expected checksum
    #[error("checksum mismatch for {}: expected {expected}, got {actual}", path.display())]
    Integrity {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// Filesystem operation failed
    #[error("cannot {op} {}: {source}", path.display())]
    Filesystem {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Artifact download failed
    #[error("fetch {url} failed: {reason}")]
    Fetch { url: String, reason: String },

    /// Artifact could not be unpacked
    #[error("archive {}: {reason}", path.display())]
    Archive { path: PathBuf, reason: String },

    /// Host command exited non-zero or could not be spawned
    #[error("{step} failed: {detail}")]
    Command { step: String, detail: String },

    /// Lock file or event log could not be persisted
    #[error("state error: {0}")]
    State(String),
}

impl ProvisionError {
    /// Build a closure that wraps an `io::Error` with operation and path.
    pub fn fs<'a>(op: &'static str, path: &'a Path) -> impl FnOnce(std::io::Error) -> Self + 'a {
        move |source| Self::Filesystem {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    /// True for errors raised before any host mutation.
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::InvalidInput(_) | Self::Config(_))
    }
}

/// Result type for provisioning operations
pub type Result<T> = std::result::Result<T, ProvisionError>;
