//! Resource handlers: managed files rendered from a target, and the shell
//! scripts `SystemHost` runs for users, packages and systemd.
//!
//! Script generators print [`CHANGED_TOKEN`](crate::transport::CHANGED_TOKEN)
//! when they mutate the host so callers can report convergence.

pub mod file;
pub mod mode;
pub mod package;
pub mod service;
pub mod user;

use crate::core::error::Result;
use crate::core::types::{DeploymentTarget, HostConfig, Step};
use std::path::PathBuf;

/// A file whose full content is derived from the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedFile {
    pub step: Step,
    pub path: PathBuf,
    pub content: String,
    /// Unix permission bits
    pub mode: u32,
    /// chown to the service identity after writing
    pub owned: bool,
    /// A content change flags the deferred restart
    pub notifies_restart: bool,
}

/// Server properties passed to the launcher with `-P`.
pub fn properties_file(target: &DeploymentTarget, host: &HostConfig) -> ManagedFile {
    ManagedFile {
        step: Step::Properties,
        path: target.properties_path(host),
        content: target.server_properties.join("\n"),
        mode: 0o644,
        owned: false,
        notifies_restart: true,
    }
}

/// Every managed file in pipeline order: properties, unit, then the
/// mode configuration files.
pub fn managed_files(target: &DeploymentTarget, host: &HostConfig) -> Result<Vec<ManagedFile>> {
    let mut files = vec![
        properties_file(target, host),
        service::ServiceUnit::for_target(target, host).managed_file(target, host),
    ];
    files.extend(mode::credential_files(target));
    files.extend(mode::jvm_options_file(target)?);
    Ok(files)
}

/// Single-quote a value for bash.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
