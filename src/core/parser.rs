//! YAML parsing and validation.
//!
//! Parses wildfly.yaml and validates structural constraints:
//! - Version must be "1.0"
//! - At least one instance
//! - Service, user and group names are plain identifiers
//! - Modes are `standalone` or `domain`
//! - Every instance resolves to a complete target

use super::error::{ProvisionError, Result};
use super::resolver;
use super::types::*;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.@-]{0,63}$").expect("static regex"))
}

/// Service, user and group names: no whitespace, quotes or path separators.
pub fn is_valid_identifier(name: &str) -> bool {
    identifier_re().is_match(name)
}

/// Parse a wildfly.yaml file from disk.
pub fn parse_config_file(path: &Path) -> Result<ProvisionConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ProvisionError::Config(format!("failed to read {}: {}", path.display(), e)))?;
    parse_config(&content)
}

/// Parse a wildfly.yaml from a string.
pub fn parse_config(yaml: &str) -> Result<ProvisionConfig> {
    serde_yaml_ng::from_str(yaml).map_err(|e| ProvisionError::Config(format!("YAML parse error: {}", e)))
}

/// Validate a parsed config. Returns a list of errors (empty = valid).
pub fn validate_config(config: &ProvisionConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(ValidationError {
            message: format!("version must be \"1.0\", got \"{}\"", config.version),
        });
    }

    if config.instances.is_empty() {
        errors.push(ValidationError {
            message: "no instances declared".to_string(),
        });
    }

    for (name, path) in [
        ("host.file_cache_path", &config.host.file_cache_path),
        ("host.config_dir", &config.host.config_dir),
        ("host.unit_dir", &config.host.unit_dir),
        ("host.pid_dir", &config.host.pid_dir),
    ] {
        if !path.is_absolute() {
            errors.push(ValidationError {
                message: format!("{} must be absolute, got {}", name, path.display()),
            });
        }
    }

    for (service_name, spec) in &config.instances {
        if !is_valid_identifier(service_name) {
            errors.push(ValidationError {
                message: format!("instance name '{}' is not a valid service name", service_name),
            });
            continue;
        }

        if let Some(ref base_dir) = spec.base_dir {
            if !base_dir.is_absolute() {
                errors.push(ValidationError {
                    message: format!(
                        "instance '{}' base_dir must be absolute, got {}",
                        service_name,
                        base_dir.display()
                    ),
                });
            }
        }

        if let Some(ref port) = spec.jpda_port {
            if port.parse::<u16>().is_err() {
                errors.push(ValidationError {
                    message: format!("instance '{}' jpda_port '{}' is not a port", service_name, port),
                });
            }
        }

        // Resolution covers mode and required fields; validate() covers
        // names and values that must stay on one line
        match resolver::resolve_target(config, service_name) {
            Ok(target) => {
                if let Err(e) = target.validate() {
                    errors.push(ValidationError {
                        message: format!("instance '{}': {}", service_name, e),
                    });
                }
            }
            Err(e) => errors.push(ValidationError {
                message: format!("instance '{}': {}", service_name, e),
            }),
        }
    }

    errors
}
