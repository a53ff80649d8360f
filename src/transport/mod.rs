//! Script execution on the local host.

pub mod local;

/// Output from executing a script.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// True when the script reported a mutation via the change token.
    pub fn changed(&self) -> bool {
        self.stdout.lines().any(|l| l.trim() == CHANGED_TOKEN)
    }
}

/// Printed by resource scripts when they modified the host.
pub const CHANGED_TOKEN: &str = "CONVERGED:changed";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_output_success() {
        let ok = ExecOutput { exit_code: 0, stdout: "ok".into(), stderr: "".into() };
        assert!(ok.success());
        let fail = ExecOutput { exit_code: 1, stdout: "".into(), stderr: "err".into() };
        assert!(!fail.success());
        let sig = ExecOutput { exit_code: 137, stdout: "".into(), stderr: "killed".into() };
        assert!(!sig.success());
    }

    #[test]
    fn test_exec_output_changed() {
        let out = ExecOutput {
            exit_code: 0,
            stdout: "useradd ok\nCONVERGED:changed\n".into(),
            stderr: "".into(),
        };
        assert!(out.changed());
        let quiet = ExecOutput { exit_code: 0, stdout: "noop\n".into(), stderr: "".into() };
        assert!(!quiet.changed());
    }
}
