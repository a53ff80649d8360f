//! Local execution via `bash` on stdin.

use super::ExecOutput;
use crate::core::error::{ProvisionError, Result};
use std::io::Write;
use std::process::{Command, Stdio};

/// Execute a shell script locally via `bash`.
/// Uses bash (not sh/dash) because generated scripts use `set -o pipefail`.
pub fn exec_local(script: &str) -> Result<ExecOutput> {
    let spawn_err = |detail: String| ProvisionError::Command {
        step: "bash".to_string(),
        detail,
    };

    let mut child = Command::new("bash")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| spawn_err(format!("failed to spawn bash: {}", e)))?;

    if let Some(ref mut stdin) = child.stdin {
        stdin
            .write_all(script.as_bytes())
            .map_err(|e| spawn_err(format!("stdin write error: {}", e)))?;
    }

    let output = child
        .wait_with_output()
        .map_err(|e| spawn_err(format!("wait error: {}", e)))?;

    Ok(ExecOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// Run a script and turn a non-zero exit into a `Command` error for `step`.
pub fn exec_checked(step: &str, script: &str) -> Result<ExecOutput> {
    tracing::debug!(step, "exec script");
    let out = exec_local(script)?;
    if !out.success() {
        return Err(ProvisionError::Command {
            step: step.to_string(),
            detail: format!("exit {}: {}", out.exit_code, out.stderr.trim()),
        });
    }
    Ok(out)
}
