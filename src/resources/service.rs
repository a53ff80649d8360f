//! systemd unit rendering and service lifecycle scripts.

use super::{shell_quote, ManagedFile};
use crate::core::types::{DeploymentTarget, HostConfig, Step};
use std::fmt::Write as _;

/// Unit derived from the target on every run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceUnit {
    pub description: String,
    pub before: Vec<String>,
    pub after: Vec<String>,
    pub wanted_by: String,
    pub pid_file: String,
    pub environment: Vec<(String, String)>,
    pub user: String,
    pub group: String,
    pub exec_start: String,
    pub nice: i32,
    pub private_tmp: bool,
}

impl ServiceUnit {
    pub fn for_target(target: &DeploymentTarget, host: &HostConfig) -> Self {
        Self {
            description: "The WildFly Application Server".to_string(),
            before: vec!["httpd.service".to_string()],
            after: ["syslog.target", "network.target", "remote-fs.target", "nss-lookup.target"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            wanted_by: "multi-user.target".to_string(),
            pid_file: target.pid_path(host).to_string_lossy().to_string(),
            environment: vec![("LAUNCH_JBOSS_IN_BACKGROUND".to_string(), "1".to_string())],
            user: target.service_user.clone(),
            group: target.service_group.clone(),
            exec_start: exec_start(target, host),
            nice: -5,
            private_tmp: true,
        }
    }

    /// Render as a unit file.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "[Unit]");
        let _ = writeln!(out, "Description={}", self.description);
        if !self.before.is_empty() {
            let _ = writeln!(out, "Before={}", self.before.join(" "));
        }
        if !self.after.is_empty() {
            let _ = writeln!(out, "After={}", self.after.join(" "));
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "[Service]");
        let _ = writeln!(out, "PIDFile={}", self.pid_file);
        for (key, value) in &self.environment {
            let _ = writeln!(out, "Environment=\"{}={}\"", key, value);
        }
        let _ = writeln!(out, "User={}", self.user);
        let _ = writeln!(out, "Group={}", self.group);
        let _ = writeln!(out, "ExecStart={}", self.exec_start);
        let _ = writeln!(out, "Nice={}", self.nice);
        let _ = writeln!(out, "PrivateTmp={}", self.private_tmp);
        let _ = writeln!(out);
        let _ = writeln!(out, "[Install]");
        let _ = writeln!(out, "WantedBy={}", self.wanted_by);
        out
    }

    pub fn managed_file(&self, target: &DeploymentTarget, host: &HostConfig) -> ManagedFile {
        ManagedFile {
            step: Step::ServiceUnit,
            path: target.unit_path(host),
            content: self.render(),
            mode: 0o644,
            owned: false,
            notifies_restart: true,
        }
    }
}

/// `<base_dir>/bin/<mode>.sh -c=<config> -b=<bind> -P=<properties> [args...]`
pub fn exec_start(target: &DeploymentTarget, host: &HostConfig) -> String {
    let mut parts = vec![
        target
            .bin_dir()
            .join(target.mode.launch_script())
            .to_string_lossy()
            .to_string(),
        format!("-c={}", target.config),
        format!("-b={}", target.bind),
        format!("-P={}", target.properties_path(host).display()),
    ];
    if !target.launch_arguments.is_empty() {
        parts.push(target.launch_arguments.join(" "));
    }
    parts.join(" ")
}

pub fn daemon_reload_script() -> String {
    "set -euo pipefail\nsystemctl daemon-reload".to_string()
}

/// Enable and start idempotently. Prints `CONVERGED:enabled` and
/// `CONVERGED:started` for the actions it took.
pub fn enable_start_script(name: &str) -> String {
    let n = shell_quote(name);
    format!(
        "set -euo pipefail\n\
         if ! systemctl is-enabled --quiet {n}; then\n  systemctl enable {n}\n  echo 'CONVERGED:enabled'\nfi\n\
         if ! systemctl is-active --quiet {n}; then\n  systemctl start {n}\n  echo 'CONVERGED:started'\nfi"
    )
}

pub fn restart_script(name: &str) -> String {
    format!("set -euo pipefail\nsystemctl restart {}", shell_quote(name))
}

/// Generate shell to query service state (for status).
pub fn state_query_script(name: &str) -> String {
    let n = shell_quote(name);
    format!(
        "echo \"active=$(systemctl is-active {n} 2>/dev/null || true)\"\n\
         echo \"enabled=$(systemctl is-enabled {n} 2>/dev/null || true)\""
    )
}
