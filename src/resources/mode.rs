//! Mode configuration: realm credential files and the JVM options file.

use super::ManagedFile;
use crate::core::error::Result;
use crate::core::resolver::render_template;
use crate::core::types::{DeploymentTarget, Mode, Step};
use indexmap::IndexMap;
use std::collections::HashMap;

const STANDALONE_CONF: &str = r#"## JVM configuration for WildFly standalone mode
## Managed by wildfly-provisioner; local edits are overwritten.

if [ "x$JBOSS_MODULES_SYSTEM_PKGS" = "x" ]; then
   JBOSS_MODULES_SYSTEM_PKGS="org.jboss.byteman"
fi

if [ "x$JAVA_OPTS" = "x" ]; then
   JAVA_OPTS="-Xms{{xms}} -Xmx{{xmx}} -XX:MaxPermSize={{maxpermsize}} -Djava.net.preferIPv4Stack={{preferipv4}}"
   JAVA_OPTS="$JAVA_OPTS -Djboss.modules.system.pkgs=$JBOSS_MODULES_SYSTEM_PKGS -Djava.awt.headless={{headless}}"
   JAVA_OPTS="$JAVA_OPTS -Djboss.management.http.port={{mgmt_port}}"
   JAVA_OPTS="$JAVA_OPTS -Djboss.server.log.dir={{log_dir}}"
fi
{{jpda}}"#;

const DOMAIN_CONF: &str = r#"## JVM configuration for WildFly domain mode
## Managed by wildfly-provisioner; local edits are overwritten.

if [ "x$JBOSS_MODULES_SYSTEM_PKGS" = "x" ]; then
   JBOSS_MODULES_SYSTEM_PKGS="org.jboss.byteman"
fi

if [ "x$JAVA_OPTS" = "x" ]; then
   JAVA_OPTS="-Xms{{xms}} -Xmx{{xmx}} -XX:MaxPermSize={{maxpermsize}} -Djava.net.preferIPv4Stack={{preferipv4}}"
   JAVA_OPTS="$JAVA_OPTS -Djboss.modules.system.pkgs=$JBOSS_MODULES_SYSTEM_PKGS -Djava.awt.headless={{headless}}"
fi

PROCESS_CONTROLLER_JAVA_OPTS="$JAVA_OPTS"
HOST_CONTROLLER_JAVA_OPTS="$JAVA_OPTS -Djboss.management.http.port={{mgmt_port}}"
{{jpda}}"#;

/// `user=credential` lines under a realm header.
pub fn render_users(realm: &str, users: &IndexMap<String, String>) -> String {
    let mut out = format!(
        "# Users for the {realm}, managed by wildfly-provisioner\n\
         #$REALM_NAME={realm}$ This line is used by the add-user utility to identify the realm name already used in this file.\n"
    );
    for (user, credential) in users {
        out.push_str(&format!("{}={}\n", user, credential));
    }
    out
}

/// `user=role1,role2` lines.
pub fn render_roles(roles: &IndexMap<String, Vec<String>>) -> String {
    let mut out = String::from("# Roles for the ApplicationRealm, managed by wildfly-provisioner\n");
    for (user, list) in roles {
        out.push_str(&format!("{}={}\n", user, list.join(",")));
    }
    out
}

/// JVM options file content for the target's mode.
pub fn render_conf(target: &DeploymentTarget) -> Result<String> {
    match target.mode {
        Mode::Standalone => render_conf_template(STANDALONE_CONF, "JAVA_OPTS", target),
        Mode::Domain => render_conf_template(DOMAIN_CONF, "HOST_CONTROLLER_JAVA_OPTS", target),
    }
}

fn render_conf_template(template: &str, opts_var: &str, target: &DeploymentTarget) -> Result<String> {
    let opts = &target.runtime.java_opts;
    let mut vars: HashMap<&str, String> = HashMap::new();
    vars.insert("xms", opts.xms.clone());
    vars.insert("xmx", opts.xmx.clone());
    vars.insert("maxpermsize", opts.xx_maxpermsize.clone());
    vars.insert("preferipv4", opts.preferipv4.to_string());
    vars.insert("headless", opts.headless.to_string());
    vars.insert("mgmt_port", target.bind_management_http.clone());
    vars.insert("log_dir", target.log_dir.to_string_lossy().to_string());
    let jpda = match &target.jpda_port {
        Some(port) => format!(
            "{opts_var}=\"${opts_var} -agentlib:jdwp=transport=dt_socket,address={port},server=y,suspend=n\"\n"
        ),
        None => String::new(),
    };
    vars.insert("jpda", jpda);

    render_template(template, &vars)
}

/// The three realm files under `<base_dir>/<mode>/configuration/`.
pub fn credential_files(target: &DeploymentTarget) -> Vec<ManagedFile> {
    let dir = target.configuration_dir();
    let rt = &target.runtime;
    [
        (
            Step::MgmtUsers,
            "mgmt-users.properties",
            render_users("ManagementRealm", &rt.mgmt_users),
        ),
        (
            Step::AppUsers,
            "application-users.properties",
            render_users("ApplicationRealm", &rt.app_users),
        ),
        (
            Step::AppRoles,
            "application-roles.properties",
            render_roles(&rt.app_roles),
        ),
    ]
    .into_iter()
    .map(|(step, name, content)| ManagedFile {
        step,
        path: dir.join(name),
        content,
        mode: 0o600,
        owned: true,
        notifies_restart: false,
    })
    .collect()
}

/// `<base_dir>/bin/<mode>.conf`. Domain mode writes it only when the
/// node-level configured mode is also domain.
pub fn jvm_options_file(target: &DeploymentTarget) -> Result<Option<ManagedFile>> {
    if target.mode == Mode::Domain && target.runtime.configured_mode != Mode::Domain {
        return Ok(None);
    }
    Ok(Some(ManagedFile {
        step: Step::JvmOptions,
        path: target.bin_dir().join(target.mode.conf_file()),
        content: render_conf(target)?,
        mode: 0o644,
        owned: true,
        notifies_restart: true,
    }))
}
