//! File and directory convergence on the local filesystem.

use super::ManagedFile;
use crate::core::error::{ProvisionError, Result};
use crate::tripwire::hasher;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// Result of converging one managed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub changed: bool,
    /// BLAKE3 of the desired content
    pub hash: String,
}

/// Bring `file` to its desired content and mode. Content is only
/// rewritten when its hash differs from what is on disk.
pub fn converge_file(file: &ManagedFile) -> Result<FileChange> {
    let desired = hasher::hash_string(&file.content);
    let current = hasher::hash_file_if_exists(&file.path)?;

    if current.as_deref() == Some(desired.as_str()) {
        let changed = set_mode(&file.path, file.mode)?;
        return Ok(FileChange {
            changed,
            hash: desired,
        });
    }

    if let Some(parent) = file.path.parent() {
        fs::create_dir_all(parent).map_err(ProvisionError::fs("create", parent))?;
    }
    write_atomic(&file.path, file.content.as_bytes(), file.mode)?;
    Ok(FileChange {
        changed: true,
        hash: desired,
    })
}

/// Write via temp file + rename; permissions are set before the rename
/// so the final path never carries looser bits.
pub fn write_atomic(path: &Path, content: &[u8], mode: u32) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));
    fs::write(&tmp, content).map_err(ProvisionError::fs("write", &tmp))?;
    fs::set_permissions(&tmp, fs::Permissions::from_mode(mode))
        .map_err(ProvisionError::fs("chmod", &tmp))?;
    fs::rename(&tmp, path).map_err(ProvisionError::fs("rename", &tmp))?;
    Ok(())
}

/// Create `path` (recursively) and set its mode. Returns whether
/// anything changed.
pub fn converge_directory(path: &Path, mode: u32) -> Result<bool> {
    let created = if path.is_dir() {
        false
    } else {
        fs::create_dir_all(path).map_err(ProvisionError::fs("create", path))?;
        true
    };
    let chmod = set_mode(path, mode)?;
    Ok(created || chmod)
}

fn set_mode(path: &Path, mode: u32) -> Result<bool> {
    let meta = fs::metadata(path).map_err(ProvisionError::fs("stat", path))?;
    if meta.permissions().mode() & 0o7777 == mode {
        return Ok(false);
    }
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(ProvisionError::fs("chmod", path))?;
    Ok(true)
}
