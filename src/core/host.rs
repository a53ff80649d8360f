//! Host collaborators: identity, packages, ownership, fetch and systemd.
//!
//! The pipeline only talks to the host through [`Host`]. [`SystemHost`]
//! runs the generated resource scripts via the local transport.

use super::artifact;
use super::error::{ProvisionError, Result};
use super::types::{HostConfig, Ownership, PlatformFamily};
use crate::resources::shell_quote;
use crate::resources::{package, service, user};
use crate::transport::local::exec_checked;
use std::path::Path;

/// What `enable_and_start` had to do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceChange {
    pub enabled: bool,
    pub started: bool,
}

/// Operations delegated to the operating system. Methods returning
/// `bool` report whether the host was changed.
pub trait Host {
    fn platform_family(&self) -> PlatformFamily;

    fn ensure_user(&mut self, user: &user::SystemUser) -> Result<bool>;

    fn ensure_group(&mut self, group: &str, members: &[String]) -> Result<bool>;

    fn ensure_package(&mut self, family: PlatformFamily, name: &str) -> Result<bool>;

    fn fetch(&mut self, url: &str, dest: &Path) -> Result<()>;

    fn chown(&mut self, path: &Path, owner: &Ownership, recursive: bool) -> Result<()>;

    fn reload_units(&mut self) -> Result<()>;

    fn enable_and_start(&mut self, service: &str) -> Result<ServiceChange>;

    fn restart(&mut self, service: &str) -> Result<()>;
}

/// The real host, driven through bash.
#[derive(Debug, Clone)]
pub struct SystemHost {
    family: PlatformFamily,
}

impl SystemHost {
    /// Detect the platform family unless the config forces one.
    pub fn detect(config: &HostConfig) -> Self {
        let family = config.platform_family.unwrap_or_else(|| {
            std::fs::read_to_string("/etc/os-release")
                .map(|s| PlatformFamily::from_os_release(&s))
                .unwrap_or(PlatformFamily::Unsupported)
        });
        Self { family }
    }
}

impl Host for SystemHost {
    fn platform_family(&self) -> PlatformFamily {
        self.family
    }

    fn ensure_user(&mut self, u: &user::SystemUser) -> Result<bool> {
        Ok(exec_checked("identity", &user::ensure_user_script(u))?.changed())
    }

    fn ensure_group(&mut self, group: &str, members: &[String]) -> Result<bool> {
        Ok(exec_checked("identity", &user::ensure_group_script(group, members))?.changed())
    }

    fn ensure_package(&mut self, family: PlatformFamily, name: &str) -> Result<bool> {
        Ok(exec_checked("prerequisite", &package::install_script(family, name))?.changed())
    }

    fn fetch(&mut self, url: &str, dest: &Path) -> Result<()> {
        artifact::download(url, dest)
    }

    fn chown(&mut self, path: &Path, owner: &Ownership, recursive: bool) -> Result<()> {
        let flag = if recursive { "-R " } else { "" };
        let script = format!(
            "set -euo pipefail\nchown {}{} {}",
            flag,
            shell_quote(&owner.to_string()),
            shell_quote(&path.to_string_lossy())
        );
        exec_checked("chown", &script).map(|_| ()).map_err(|e| match e {
            ProvisionError::Command { detail, .. } => ProvisionError::Filesystem {
                op: "chown",
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, detail),
            },
            other => other,
        })
    }

    fn reload_units(&mut self) -> Result<()> {
        exec_checked("daemon-reload", &service::daemon_reload_script()).map(|_| ())
    }

    fn enable_and_start(&mut self, name: &str) -> Result<ServiceChange> {
        let out = exec_checked("service", &service::enable_start_script(name))?;
        let has = |token: &str| out.stdout.lines().any(|l| l.trim() == token);
        Ok(ServiceChange {
            enabled: has("CONVERGED:enabled"),
            started: has("CONVERGED:started"),
        })
    }

    fn restart(&mut self, name: &str) -> Result<()> {
        exec_checked("restart", &service::restart_script(name)).map(|_| ())
    }
}

/// Recording host double for pipeline tests. Users, groups, packages and
/// services are tracked in memory; fetch performs a real download.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingHost {
    pub family: Option<PlatformFamily>,
    pub calls: Vec<String>,
    pub users: std::collections::HashSet<String>,
    pub groups: std::collections::HashMap<String, Vec<String>>,
    pub packages: std::collections::HashSet<String>,
    pub enabled: std::collections::HashSet<String>,
    pub running: std::collections::HashSet<String>,
    pub fetches: u32,
    pub restarts: u32,
    pub chowns: Vec<(std::path::PathBuf, String, bool)>,
}

#[cfg(test)]
impl RecordingHost {
    pub fn new(family: PlatformFamily) -> Self {
        Self {
            family: Some(family),
            ..Self::default()
        }
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls.iter().filter(|c| c.starts_with(prefix)).count()
    }
}

#[cfg(test)]
impl Host for RecordingHost {
    fn platform_family(&self) -> PlatformFamily {
        self.family.unwrap_or(PlatformFamily::Unsupported)
    }

    fn ensure_user(&mut self, u: &user::SystemUser) -> Result<bool> {
        self.calls.push(format!("user {}", u.name));
        Ok(self.users.insert(u.name.clone()))
    }

    fn ensure_group(&mut self, group: &str, members: &[String]) -> Result<bool> {
        self.calls.push(format!("group {}", group));
        let entry = self.groups.entry(group.to_string());
        let created = matches!(entry, std::collections::hash_map::Entry::Vacant(_));
        let list = entry.or_default();
        let mut changed = created;
        for m in members {
            if !list.contains(m) {
                list.push(m.clone());
                changed = true;
            }
        }
        Ok(changed)
    }

    fn ensure_package(&mut self, _family: PlatformFamily, name: &str) -> Result<bool> {
        self.calls.push(format!("package {}", name));
        Ok(self.packages.insert(name.to_string()))
    }

    fn fetch(&mut self, url: &str, dest: &Path) -> Result<()> {
        self.calls.push(format!("fetch {}", url));
        self.fetches += 1;
        artifact::download(url, dest)
    }

    fn chown(&mut self, path: &Path, owner: &Ownership, recursive: bool) -> Result<()> {
        self.calls.push(format!("chown {}", path.display()));
        self.chowns
            .push((path.to_path_buf(), owner.to_string(), recursive));
        Ok(())
    }

    fn reload_units(&mut self) -> Result<()> {
        self.calls.push("reload".to_string());
        Ok(())
    }

    fn enable_and_start(&mut self, name: &str) -> Result<ServiceChange> {
        self.calls.push(format!("enable_start {}", name));
        Ok(ServiceChange {
            enabled: self.enabled.insert(name.to_string()),
            started: self.running.insert(name.to_string()),
        })
    }

    fn restart(&mut self, name: &str) -> Result<()> {
        self.calls.push(format!("restart {}", name));
        self.restarts += 1;
        Ok(())
    }
}
