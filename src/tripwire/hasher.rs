//! BLAKE3 content hashing for managed files, artifacts and install trees.

use crate::core::error::{ProvisionError, Result};
use std::io::Read;
use std::path::Path;

const STREAM_BUF_SIZE: usize = 65536;

/// Hash a file's contents. Returns `"blake3:{hex}"`.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path).map_err(ProvisionError::fs("open", path))?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = [0u8; STREAM_BUF_SIZE];
    loop {
        let n = file.read(&mut buf).map_err(ProvisionError::fs("read", path))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("blake3:{}", hasher.finalize().to_hex()))
}

/// Hash a string. Returns `"blake3:{hex}"`.
pub fn hash_string(s: &str) -> String {
    format!("blake3:{}", blake3::hash(s.as_bytes()).to_hex())
}

/// Hash a file if present; `None` when it does not exist.
pub fn hash_file_if_exists(path: &Path) -> Result<Option<String>> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_file() => hash_file(path).map(Some),
        Ok(_) => Ok(None),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ProvisionError::fs("stat", path)(e)),
    }
}

/// Hash a directory tree (sorted walk, relative paths included).
/// Skips symlinks. `skip` names top-level entries to leave out.
pub fn hash_directory(path: &Path, skip: &[&str]) -> Result<String> {
    let mut entries: Vec<(String, String)> = Vec::new();

    fn walk(
        base: &Path,
        current: &Path,
        skip: &[&str],
        entries: &mut Vec<(String, String)>,
    ) -> Result<()> {
        let read_dir = std::fs::read_dir(current).map_err(ProvisionError::fs("read dir", current))?;
        let mut children: Vec<std::fs::DirEntry> = read_dir.filter_map(|e| e.ok()).collect();
        children.sort_by_key(|e| e.file_name());

        for entry in children {
            let path = entry.path();
            let ft = entry.file_type().map_err(ProvisionError::fs("stat", &path))?;
            if ft.is_symlink() {
                continue;
            }
            let rel = path
                .strip_prefix(base)
                .map_err(|e| ProvisionError::State(format!("path prefix error: {}", e)))?
                .to_string_lossy()
                .to_string();
            if current == base && skip.contains(&rel.as_str()) {
                continue;
            }
            if ft.is_file() {
                let hash = hash_file(&path)?;
                entries.push((rel, hash));
            } else if ft.is_dir() {
                walk(base, &path, skip, entries)?;
            }
        }
        Ok(())
    }

    walk(path, path, skip, &mut entries)?;

    let mut hasher = blake3::Hasher::new();
    for (rel, hash) in &entries {
        hasher.update(rel.as_bytes());
        hasher.update(b"\0");
        hasher.update(hash.as_bytes());
        hasher.update(b"\n");
    }
    Ok(format!("blake3:{}", hasher.finalize().to_hex()))
}
