//! Attribute merging, target resolution and template rendering.
//!
//! Node attributes live under `wildfly:`; a key named after an instance
//! holds overrides for that instance and is deep-merged over the node
//! attributes before defaults are applied. Templates use `{{name}}`
//! placeholders resolved from a flat variable map.

use super::error::{ProvisionError, Result};
use super::types::*;
use serde_yaml_ng::{Mapping, Value};
use std::collections::HashMap;
use std::path::PathBuf;

/// Recursively merge `overlay` into `base`. Mappings merge key by key;
/// scalars and sequences from the overlay replace the base value.
pub fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

/// Node attributes with the per-service subtree merged on top.
pub fn merged_attributes(wildfly: &Mapping, service_name: &str) -> Result<WildflyAttributes> {
    let mut merged = Value::Mapping(wildfly.clone());
    if let Some(overrides) = wildfly.get(service_name) {
        deep_merge(&mut merged, overrides);
    }
    serde_yaml_ng::from_value(merged).map_err(|e| {
        ProvisionError::Config(format!("invalid wildfly attributes for {}: {}", service_name, e))
    })
}

/// Resolve one instance into a deployment target. Mode strings are
/// parsed here, so an unknown mode never reaches the pipeline.
pub fn resolve_target(config: &ProvisionConfig, service_name: &str) -> Result<DeploymentTarget> {
    let spec = config.instances.get(service_name).ok_or_else(|| {
        ProvisionError::InvalidInput(format!("unknown instance '{}'", service_name))
    })?;
    let attrs = merged_attributes(&config.wildfly, service_name)?;

    let configured_mode: Mode = attrs.mode.as_deref().unwrap_or("standalone").parse()?;
    let mode: Mode = match spec.mode.as_deref() {
        Some(m) => m.parse()?,
        None => configured_mode,
    };

    let base_dir = spec
        .base_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("/opt").join(service_name));
    let log_dir = spec
        .log_dir
        .clone()
        .unwrap_or_else(|| base_dir.join(mode.as_str()).join("log"));
    let service_user = spec
        .service_user
        .clone()
        .unwrap_or_else(|| service_name.to_string());
    let service_group = spec
        .service_group
        .clone()
        .unwrap_or_else(|| service_name.to_string());

    Ok(DeploymentTarget {
        service_name: service_name.to_string(),
        base_dir,
        provision_user: spec.provision_user.unwrap_or(true),
        service_user,
        service_group,
        version: spec.version.clone().or(attrs.version).unwrap_or_default(),
        url: spec.url.clone().or(attrs.url).unwrap_or_default(),
        checksum: spec.checksum.clone().or(attrs.checksum).unwrap_or_default(),
        mode,
        config: spec
            .config
            .clone()
            .unwrap_or_else(|| "standalone-full.xml".to_string()),
        log_dir,
        launch_arguments: spec.launch_arguments.clone(),
        server_properties: spec.server_properties.clone(),
        bind: spec.bind.clone().unwrap_or_else(|| "0.0.0.0".to_string()),
        bind_management_http: spec
            .bind_management_http
            .clone()
            .unwrap_or_else(|| "9990".to_string()),
        jpda_port: spec.jpda_port.clone(),
        runtime: RuntimeSettings {
            configured_mode,
            java_opts: attrs.java_opts,
            mgmt_users: attrs.users.mgmt,
            app_users: attrs.users.app,
            app_roles: attrs.roles.app,
        },
    })
}

/// Resolve every instance (or only `filter`) in declaration order.
pub fn resolve_all(config: &ProvisionConfig, filter: Option<&str>) -> Result<Vec<DeploymentTarget>> {
    if let Some(name) = filter {
        if !config.instances.contains_key(name) {
            return Err(ProvisionError::InvalidInput(format!("unknown instance '{}'", name)));
        }
    }
    config
        .instances
        .keys()
        .filter(|name| filter.is_none_or(|f| f == name.as_str()))
        .map(|name| resolve_target(config, name))
        .collect()
}

/// Replace `{{name}}` placeholders with values from `vars`.
pub fn render_template(template: &str, vars: &HashMap<&str, String>) -> Result<String> {
    let mut result = template.to_string();
    let mut start = 0;

    while let Some(open) = result[start..].find("{{") {
        let open = start + open;
        let close = result[open..].find("}}").ok_or_else(|| {
            ProvisionError::InvalidInput(format!("unclosed template at position {}", open))
        })?;
        let close = open + close + 2;
        let key = result[open + 2..close - 2].trim();

        let value = vars
            .get(key)
            .cloned()
            .ok_or_else(|| ProvisionError::InvalidInput(format!("unknown template variable: {}", key)))?;

        result.replace_range(open..close, &value);
        start = open + value.len();
    }

    Ok(result)
}
