//! Instance lock management: load, save (atomic), path derivation.

use super::error::{ProvisionError, Result};
use super::types::InstanceLock;
use std::path::{Path, PathBuf};

/// Lock file path for an instance within the state directory.
pub fn lock_file_path(state_dir: &Path, service: &str) -> PathBuf {
    state_dir.join(service).join("state.lock.yaml")
}

/// Load an instance lock. Returns None if the file doesn't exist.
pub fn load_lock(state_dir: &Path, service: &str) -> Result<Option<InstanceLock>> {
    let path = lock_file_path(state_dir, service);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path).map_err(ProvisionError::fs("read", &path))?;
    let lock: InstanceLock = serde_yaml_ng::from_str(&content)
        .map_err(|e| ProvisionError::State(format!("invalid lock file {}: {}", path.display(), e)))?;
    Ok(Some(lock))
}

/// Save a lock atomically (write to temp, then rename).
pub fn save_lock(state_dir: &Path, lock: &InstanceLock) -> Result<()> {
    let path = lock_file_path(state_dir, &lock.service_name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(ProvisionError::fs("create", parent))?;
    }

    let yaml = serde_yaml_ng::to_string(lock)
        .map_err(|e| ProvisionError::State(format!("serialize error: {}", e)))?;

    let tmp_path = path.with_extension("lock.yaml.tmp");
    std::fs::write(&tmp_path, &yaml).map_err(ProvisionError::fs("write", &tmp_path))?;
    std::fs::rename(&tmp_path, &path).map_err(ProvisionError::fs("rename", &tmp_path))?;

    Ok(())
}

/// Fresh lock for an instance.
pub fn new_lock(service: &str, hostname: &str) -> InstanceLock {
    use crate::tripwire::eventlog::now_iso8601;
    InstanceLock {
        schema: "1.0".to_string(),
        service_name: service.to_string(),
        hostname: hostname.to_string(),
        generated_at: now_iso8601(),
        generator: format!("wildfly-provisioner {}", env!("CARGO_PKG_VERSION")),
        blake3_version: "1.8".to_string(),
        deployment: None,
        steps: indexmap::IndexMap::new(),
    }
}

/// Local hostname, or "localhost" when it cannot be determined.
pub fn local_hostname() -> String {
    std::fs::read_to_string("/etc/hostname")
        .map(|s| s.trim().to_string())
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}
