//! Deploy-once marker at `<base_dir>/.chef_deployed`.
//!
//! The marker holds the deployed version string. Only an exact match
//! with the target version counts as deployed; anything else, including
//! a marker that cannot be read, forces the payload to be redeployed.

use super::error::{ProvisionError, Result};
use std::io::Write;
use std::path::Path;

/// What the marker says about the installed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerState {
    Absent,
    Current,
    /// Marker holds another version
    Stale(String),
    /// Marker exists but could not be read as text
    Unreadable(String),
}

impl MarkerState {
    pub fn is_deployed(&self) -> bool {
        matches!(self, Self::Current)
    }
}

/// Read the marker and compare it with `version`.
pub fn read_marker(marker: &Path, version: &str) -> MarkerState {
    match std::fs::read(marker) {
        Ok(bytes) => match String::from_utf8(bytes) {
            Ok(content) if content == version => MarkerState::Current,
            Ok(content) => MarkerState::Stale(content),
            Err(e) => MarkerState::Unreadable(e.to_string()),
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => MarkerState::Absent,
        Err(e) => MarkerState::Unreadable(e.to_string()),
    }
}

/// Create the marker with `version` unless a regular file already holds
/// it. Never overwrites. Returns whether the file was created. Anything
/// else in the marker's place is an error; callers remove it first.
pub fn write_marker_if_missing(marker: &Path, version: &str) -> Result<bool> {
    let mut file = match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(marker)
    {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            return match std::fs::symlink_metadata(marker) {
                Ok(meta) if meta.is_file() => Ok(false),
                Ok(_) => Err(ProvisionError::fs("create", marker)(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "marker path is not a regular file",
                ))),
                Err(e) => Err(ProvisionError::fs("stat", marker)(e)),
            };
        }
        Err(e) => return Err(ProvisionError::fs("create", marker)(e)),
    };
    file.write_all(version.as_bytes())
        .map_err(ProvisionError::fs("write", marker))?;
    Ok(true)
}

/// Remove whatever sits at the marker path, including a directory.
/// Returns whether anything was removed.
pub fn remove_marker(marker: &Path) -> Result<bool> {
    let meta = match std::fs::symlink_metadata(marker) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(ProvisionError::fs("stat", marker)(e)),
    };
    if meta.is_dir() {
        std::fs::remove_dir_all(marker).map_err(ProvisionError::fs("remove", marker))?;
    } else {
        std::fs::remove_file(marker).map_err(ProvisionError::fs("remove", marker))?;
    }
    Ok(true)
}
