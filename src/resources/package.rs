//! Prerequisite package handler (dnf/yum + apt).
//!
//! The async-I/O library used by the server's journal has a different
//! package name per platform family. Unknown families map to `None`
//! and the step is skipped.

use super::shell_quote;
use crate::core::types::PlatformFamily;
use crate::transport::CHANGED_TOKEN;

/// Platform family → prerequisite package.
pub const PREREQUISITES: &[(PlatformFamily, Option<&str>)] = &[
    (PlatformFamily::Rhel, Some("libaio")),
    (PlatformFamily::Debian, Some("libaio1")),
    (PlatformFamily::Unsupported, None),
];

/// Look up the prerequisite for a platform family.
pub fn prerequisite_for(family: PlatformFamily) -> Option<&'static str> {
    PREREQUISITES
        .iter()
        .find(|(f, _)| *f == family)
        .and_then(|(_, pkg)| *pkg)
}

/// Generate shell to install `package` if it is missing.
pub fn install_script(family: PlatformFamily, package: &str) -> String {
    let pkg = shell_quote(package);
    match family {
        PlatformFamily::Rhel => format!(
            "set -euo pipefail\n\
             if ! rpm -q {pkg} >/dev/null 2>&1; then\n\
               if command -v dnf >/dev/null 2>&1; then\n\
                 dnf install -y -q {pkg}\n\
               else\n\
                 yum install -y -q {pkg}\n\
               fi\n\
               echo '{CHANGED_TOKEN}'\n\
             fi\n\
             rpm -q {pkg} >/dev/null"
        ),
        PlatformFamily::Debian => format!(
            "set -euo pipefail\n\
             if ! dpkg -s {pkg} >/dev/null 2>&1; then\n\
               apt-get update -qq\n\
               DEBIAN_FRONTEND=noninteractive apt-get install -y -qq {pkg}\n\
               echo '{CHANGED_TOKEN}'\n\
             fi\n\
             dpkg -s {pkg} >/dev/null"
        ),
        PlatformFamily::Unsupported => format!("echo 'unsupported platform for {}'", package),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prerequisite_table() {
        assert_eq!(prerequisite_for(PlatformFamily::Rhel), Some("libaio"));
        assert_eq!(prerequisite_for(PlatformFamily::Debian), Some("libaio1"));
        assert_eq!(prerequisite_for(PlatformFamily::Unsupported), None);
    }

    #[test]
    fn test_install_rhel() {
        let script = install_script(PlatformFamily::Rhel, "libaio");
        assert!(script.contains("rpm -q 'libaio'"));
        assert!(script.contains("dnf install -y -q 'libaio'"));
        assert!(script.contains("yum install -y -q 'libaio'"));
        assert!(script.contains(CHANGED_TOKEN));
    }

    #[test]
    fn test_install_debian() {
        let script = install_script(PlatformFamily::Debian, "libaio1");
        assert!(script.contains("set -euo pipefail"));
        assert!(script.contains("apt-get install -y -qq 'libaio1'"));
        assert!(script.contains("DEBIAN_FRONTEND=noninteractive"));
    }

    #[test]
    fn test_quoted_package() {
        let script = install_script(PlatformFamily::Debian, "lib; rm -rf /");
        assert!(script.contains("'lib; rm -rf /'"));
    }
}
