//! System user and group scripts (useradd/usermod/groupadd).

use super::shell_quote;
use crate::transport::CHANGED_TOKEN;
use std::path::PathBuf;

/// Locked system account with no login shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemUser {
    pub name: String,
    pub home: PathBuf,
    pub shell: String,
    pub comment: String,
}

impl SystemUser {
    pub fn service_account(name: &str, home: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            home,
            shell: "/sbin/nologin".to_string(),
            comment: "WildFly System User".to_string(),
        }
    }
}

/// Create the user if missing, then lock it.
pub fn ensure_user_script(user: &SystemUser) -> String {
    let name = shell_quote(&user.name);
    format!(
        "set -euo pipefail\n\
         if ! id -u {name} >/dev/null 2>&1; then\n\
           useradd --system --no-create-home --home-dir {home} --shell {shell} --comment {comment} {name}\n\
           echo '{CHANGED_TOKEN}'\n\
         fi\n\
         if ! passwd -S {name} 2>/dev/null | awk '{{print $2}}' | grep -q '^L'; then\n\
           usermod -L {name}\n\
           echo '{CHANGED_TOKEN}'\n\
         fi",
        home = shell_quote(&user.home.to_string_lossy()),
        shell = shell_quote(&user.shell),
        comment = shell_quote(&user.comment),
    )
}

/// Create the group if missing and append `members` to it.
pub fn ensure_group_script(group: &str, members: &[String]) -> String {
    let g = shell_quote(group);
    let mut lines = vec![
        "set -euo pipefail".to_string(),
        format!(
            "if ! getent group {g} >/dev/null 2>&1; then\n  groupadd --system {g}\n  echo '{CHANGED_TOKEN}'\nfi"
        ),
    ];
    for member in members {
        let m = shell_quote(member);
        lines.push(format!(
            "if ! id -nG {m} | tr ' ' '\\n' | grep -qx {g}; then\n  usermod -a -G {g} {m}\n  echo '{CHANGED_TOKEN}'\nfi"
        ));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_script() {
        let u = SystemUser::service_account("wf1", PathBuf::from("/opt/wf1"));
        let script = ensure_user_script(&u);
        assert!(script.starts_with("set -euo pipefail"));
        assert!(script.contains("id -u 'wf1'"));
        assert!(script.contains("--home-dir '/opt/wf1'"));
        assert!(script.contains("--shell '/sbin/nologin'"));
        assert!(script.contains("--comment 'WildFly System User'"));
        assert!(script.contains("usermod -L 'wf1'"));
        assert!(script.contains(CHANGED_TOKEN));
    }

    #[test]
    fn test_group_script_appends_members() {
        let script = ensure_group_script("jboss", &["wf1".to_string()]);
        assert!(script.contains("getent group 'jboss'"));
        assert!(script.contains("groupadd --system 'jboss'"));
        assert!(script.contains("usermod -a -G 'jboss' 'wf1'"));
    }

    #[test]
    fn test_group_script_no_members() {
        let script = ensure_group_script("jboss", &[]);
        assert!(!script.contains("usermod"));
    }
}
