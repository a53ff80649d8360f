//! Configuration schema, deployment target, lock and provenance types.
//!
//! The YAML document (`wildfly.yaml`) deserializes into [`ProvisionConfig`];
//! the resolver turns each instance into a [`DeploymentTarget`]. Lock and
//! event types derive Serialize/Deserialize for roundtripping.

use super::error::ProvisionError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Name of the deploy-once marker inside the installation root.
pub const MARKER_FILE: &str = ".chef_deployed";

// ============================================================================
// Top-level wildfly.yaml
// ============================================================================

/// Root configuration: node attributes plus the instances to converge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionConfig {
    /// Schema version (must be "1.0")
    pub version: String,

    /// Host filesystem layout
    #[serde(default)]
    pub host: HostConfig,

    /// Node-level WildFly attributes. Keys named after an instance hold
    /// per-service overrides that are deep-merged over the rest.
    #[serde(default)]
    pub wildfly: serde_yaml_ng::Mapping,

    /// Instances keyed by service name (order-preserving)
    #[serde(default)]
    pub instances: IndexMap<String, InstanceSpec>,

    /// Execution policy
    #[serde(default)]
    pub policy: Policy,
}

/// Where the host keeps caches, configuration and service units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default = "default_file_cache_path")]
    pub file_cache_path: PathBuf,

    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,

    #[serde(default = "default_unit_dir")]
    pub unit_dir: PathBuf,

    #[serde(default = "default_pid_dir")]
    pub pid_dir: PathBuf,

    /// Force a platform family instead of reading /etc/os-release
    #[serde(default)]
    pub platform_family: Option<PlatformFamily>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            file_cache_path: default_file_cache_path(),
            config_dir: default_config_dir(),
            unit_dir: default_unit_dir(),
            pid_dir: default_pid_dir(),
            platform_family: None,
        }
    }
}

fn default_file_cache_path() -> PathBuf {
    PathBuf::from("/var/cache/wildfly-provisioner")
}

fn default_config_dir() -> PathBuf {
    PathBuf::from("/etc/wildfly")
}

fn default_unit_dir() -> PathBuf {
    PathBuf::from("/etc/systemd/system")
}

fn default_pid_dir() -> PathBuf {
    PathBuf::from("/var/run/wildfly")
}

/// Execution policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Append provenance events on every apply
    #[serde(default = "default_true")]
    pub tripwire: bool,

    /// Persist the instance lock after apply
    #[serde(default = "default_true")]
    pub lock_file: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            tripwire: true,
            lock_file: true,
        }
    }
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Attributes and instances (raw input)
// ============================================================================

/// Node attributes after the per-service deep merge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WildflyAttributes {
    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub checksum: Option<String>,

    #[serde(default)]
    pub mode: Option<String>,

    #[serde(default)]
    pub java_opts: JavaOpts,

    #[serde(default)]
    pub users: UserTables,

    #[serde(default)]
    pub roles: RoleTables,
}

/// JVM sizing and flags rendered into `<mode>.conf`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JavaOpts {
    #[serde(default = "default_xms")]
    pub xms: String,

    #[serde(default = "default_xmx")]
    pub xmx: String,

    #[serde(default = "default_maxpermsize")]
    pub xx_maxpermsize: String,

    #[serde(default = "default_true")]
    pub preferipv4: bool,

    #[serde(default = "default_true")]
    pub headless: bool,
}

impl Default for JavaOpts {
    fn default() -> Self {
        Self {
            xms: default_xms(),
            xmx: default_xmx(),
            xx_maxpermsize: default_maxpermsize(),
            preferipv4: true,
            headless: true,
        }
    }
}

fn default_xms() -> String {
    "64m".to_string()
}

fn default_xmx() -> String {
    "512m".to_string()
}

fn default_maxpermsize() -> String {
    "256m".to_string()
}

/// Management and application user credentials (user → hashed secret).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTables {
    #[serde(default)]
    pub mgmt: IndexMap<String, String>,

    #[serde(default)]
    pub app: IndexMap<String, String>,
}

/// Application role mappings (user → roles).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleTables {
    #[serde(default)]
    pub app: IndexMap<String, Vec<String>>,
}

/// A single instance as written in the config. Unset fields fall back to
/// attribute values or derived defaults during resolution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceSpec {
    #[serde(default)]
    pub base_dir: Option<PathBuf>,

    #[serde(default)]
    pub provision_user: Option<bool>,

    #[serde(default)]
    pub service_user: Option<String>,

    #[serde(default)]
    pub service_group: Option<String>,

    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub checksum: Option<String>,

    #[serde(default)]
    pub mode: Option<String>,

    #[serde(default)]
    pub config: Option<String>,

    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    #[serde(default)]
    pub launch_arguments: Vec<String>,

    #[serde(default)]
    pub server_properties: Vec<String>,

    #[serde(default)]
    pub bind: Option<String>,

    #[serde(default)]
    pub bind_management_http: Option<String>,

    #[serde(default)]
    pub jpda_port: Option<String>,
}

// ============================================================================
// Resolved target
// ============================================================================

/// WildFly operating topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Standalone,
    Domain,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standalone => "standalone",
            Self::Domain => "domain",
        }
    }

    /// Launch script under `<base_dir>/bin`.
    pub fn launch_script(&self) -> String {
        format!("{}.sh", self.as_str())
    }

    /// JVM options file under `<base_dir>/bin`.
    pub fn conf_file(&self) -> String {
        format!("{}.conf", self.as_str())
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standalone" => Ok(Self::Standalone),
            "domain" => Ok(Self::Domain),
            other => Err(ProvisionError::InvalidInput(format!(
                "mode must be one of standalone, domain; got \"{}\"",
                other
            ))),
        }
    }
}

/// Host packaging ecosystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformFamily {
    Rhel,
    Debian,
    Unsupported,
}

impl PlatformFamily {
    /// Classify from the contents of `/etc/os-release`.
    pub fn from_os_release(content: &str) -> Self {
        let mut ids = Vec::new();
        for line in content.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            if key == "ID" || key == "ID_LIKE" {
                let value = value.trim_matches('"');
                ids.extend(value.split_whitespace().map(str::to_string));
            }
        }
        for id in &ids {
            match id.as_str() {
                "rhel" | "centos" | "fedora" | "rocky" | "almalinux" | "amzn" | "ol" => {
                    return Self::Rhel
                }
                "debian" | "ubuntu" => return Self::Debian,
                _ => {}
            }
        }
        Self::Unsupported
    }
}

impl fmt::Display for PlatformFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rhel => write!(f, "rhel"),
            Self::Debian => write!(f, "debian"),
            Self::Unsupported => write!(f, "unsupported"),
        }
    }
}

/// Node-level settings consumed by the mode configuration step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSettings {
    /// Mode as configured on the node (may differ from the instance mode)
    pub configured_mode: Mode,
    pub java_opts: JavaOpts,
    pub mgmt_users: IndexMap<String, String>,
    pub app_users: IndexMap<String, String>,
    pub app_roles: IndexMap<String, Vec<String>>,
}

/// Fully resolved description of one WildFly installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentTarget {
    pub service_name: String,
    pub base_dir: PathBuf,
    pub provision_user: bool,
    pub service_user: String,
    pub service_group: String,
    pub version: String,
    pub url: String,
    pub checksum: String,
    pub mode: Mode,
    pub config: String,
    pub log_dir: PathBuf,
    pub launch_arguments: Vec<String>,
    pub server_properties: Vec<String>,
    pub bind: String,
    pub bind_management_http: String,
    pub jpda_port: Option<String>,
    pub runtime: RuntimeSettings,
}

impl DeploymentTarget {
    pub fn marker_path(&self) -> PathBuf {
        self.base_dir.join(MARKER_FILE)
    }

    /// Server properties file passed to the launcher with `-P`.
    pub fn properties_path(&self, host: &HostConfig) -> PathBuf {
        host.config_dir
            .join(format!("{}.properties", self.service_name))
    }

    pub fn unit_path(&self, host: &HostConfig) -> PathBuf {
        host.unit_dir.join(format!("{}.service", self.service_name))
    }

    pub fn pid_path(&self, host: &HostConfig) -> PathBuf {
        host.pid_dir.join(format!("{}.pid", self.service_name))
    }

    /// Cached download location for this version.
    pub fn cache_path(&self, host: &HostConfig) -> PathBuf {
        host.file_cache_path
            .join(format!("{}.tar.gz", self.version))
    }

    /// `<base_dir>/<mode>/configuration`
    pub fn configuration_dir(&self) -> PathBuf {
        self.base_dir.join(self.mode.as_str()).join("configuration")
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.base_dir.join("bin")
    }

    /// Owner spec for chown.
    pub fn ownership(&self) -> Ownership {
        Ownership {
            user: self.service_user.clone(),
            group: self.service_group.clone(),
        }
    }

    /// Reject targets that must never reach the pipeline.
    pub fn validate(&self) -> Result<(), ProvisionError> {
        for (field, value) in [
            ("version", &self.version),
            ("url", &self.url),
            ("checksum", &self.checksum),
        ] {
            if value.trim().is_empty() {
                return Err(ProvisionError::InvalidInput(format!(
                    "{}: {} is required",
                    self.service_name, field
                )));
            }
        }
        if !self.base_dir.is_absolute() {
            return Err(ProvisionError::InvalidInput(format!(
                "{}: base_dir must be absolute, got {}",
                self.service_name,
                self.base_dir.display()
            )));
        }
        if self.version.contains('/') || self.version.contains("..") {
            return Err(ProvisionError::InvalidInput(format!(
                "{}: version must not contain path separators",
                self.service_name
            )));
        }
        // these land in the unit file and properties file one per line
        let single_line = [
            ("config", &self.config),
            ("bind", &self.bind),
            ("bind_management_http", &self.bind_management_http),
        ]
        .into_iter()
        .chain(self.launch_arguments.iter().map(|a| ("launch_arguments", a)))
        .chain(self.server_properties.iter().map(|p| ("server_properties", p)));
        for (field, value) in single_line {
            if value.contains(['\n', '\r']) {
                return Err(ProvisionError::InvalidInput(format!(
                    "{}: {} must be a single line, got {:?}",
                    self.service_name, field, value
                )));
            }
        }
        for (field, value) in [
            ("service_name", &self.service_name),
            ("service_user", &self.service_user),
            ("service_group", &self.service_group),
        ] {
            if !super::parser::is_valid_identifier(value) {
                return Err(ProvisionError::InvalidInput(format!(
                    "{} \"{}\" contains invalid characters",
                    field, value
                )));
            }
        }
        Ok(())
    }
}

/// `user:group` pair applied to managed paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ownership {
    pub user: String,
    pub group: String,
}

impl fmt::Display for Ownership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.user, self.group)
    }
}

// ============================================================================
// Pipeline steps
// ============================================================================

/// Converge steps in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Identity,
    Prerequisite,
    Artifact,
    BaseDir,
    Extract,
    LogDir,
    Properties,
    ServiceUnit,
    Marker,
    MgmtUsers,
    AppUsers,
    AppRoles,
    JvmOptions,
    Service,
    Restart,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Prerequisite => "prerequisite",
            Self::Artifact => "artifact",
            Self::BaseDir => "base_dir",
            Self::Extract => "extract",
            Self::LogDir => "log_dir",
            Self::Properties => "properties",
            Self::ServiceUnit => "service_unit",
            Self::Marker => "marker",
            Self::MgmtUsers => "mgmt_users",
            Self::AppUsers => "app_users",
            Self::AppRoles => "app_roles",
            Self::JvmOptions => "jvm_options",
            Self::Service => "service",
            Self::Restart => "restart",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Step convergence status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Changed,
    Unchanged,
    Skipped,
    Failed,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Changed => write!(f, "CHANGED"),
            Self::Unchanged => write!(f, "UNCHANGED"),
            Self::Skipped => write!(f, "SKIPPED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Outcome of a single step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub step: Step,
    pub status: StepStatus,
    pub duration_seconds: f64,
    /// Managed path and BLAKE3 content hash for file steps
    pub path: Option<PathBuf>,
    pub hash: Option<String>,
    pub detail: Option<String>,
}

/// Result of one `ensure_installed` run.
#[derive(Debug, Clone)]
pub struct ProvisionReport {
    pub service_name: String,
    pub run_id: String,
    pub steps: Vec<StepOutcome>,
    pub fetched: bool,
    pub extracted: bool,
    /// Steps that asked for the deferred restart
    pub restart_triggers: Vec<Step>,
    pub restarted: bool,
    pub total_duration: std::time::Duration,
}

impl ProvisionReport {
    pub fn outcome(&self, step: Step) -> Option<&StepOutcome> {
        self.steps.iter().find(|o| o.step == step)
    }

    pub fn changed(&self) -> u32 {
        self.count(StepStatus::Changed)
    }

    pub fn unchanged(&self) -> u32 {
        self.count(StepStatus::Unchanged)
    }

    pub fn skipped(&self) -> u32 {
        self.count(StepStatus::Skipped)
    }

    fn count(&self, status: StepStatus) -> u32 {
        self.steps.iter().filter(|o| o.status == status).count() as u32
    }
}

// ============================================================================
// State / Lock file
// ============================================================================

/// Per-instance state lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceLock {
    pub schema: String,
    pub service_name: String,
    pub hostname: String,
    pub generated_at: String,
    pub generator: String,
    pub blake3_version: String,

    /// Last successful payload deployment
    #[serde(default)]
    pub deployment: Option<DeploymentRecord>,

    /// Per-step state (pipeline order)
    #[serde(default)]
    pub steps: IndexMap<String, StepLock>,
}

/// Version and checksum of the deployed payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub version: String,
    pub checksum: String,
    /// BLAKE3 of the tarball that was extracted
    pub artifact_hash: String,
    pub deployed_at: String,
}

/// Per-step lock entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepLock {
    pub status: StepStatus,

    #[serde(default)]
    pub applied_at: Option<String>,

    #[serde(default)]
    pub duration_seconds: Option<f64>,

    /// BLAKE3 of the managed content (empty for non-file steps)
    #[serde(default)]
    pub hash: String,

    #[serde(default)]
    pub details: HashMap<String, serde_yaml_ng::Value>,
}

// ============================================================================
// Plan
// ============================================================================

/// Action a step would take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanAction {
    Create,
    Update,
    Skip,
    NoOp,
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "CREATE"),
            Self::Update => write!(f, "UPDATE"),
            Self::Skip => write!(f, "SKIP"),
            Self::NoOp => write!(f, "NO-OP"),
        }
    }
}

/// A single planned change.
#[derive(Debug, Clone)]
pub struct PlannedChange {
    pub step: Step,
    pub action: PlanAction,
    pub description: String,
}

/// Read-only plan for one instance.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub service_name: String,
    pub changes: Vec<PlannedChange>,
    pub to_create: u32,
    pub to_update: u32,
    pub unchanged: u32,
}

impl ExecutionPlan {
    pub fn action(&self, step: Step) -> Option<&PlanAction> {
        self.changes
            .iter()
            .find(|c| c.step == step)
            .map(|c| &c.action)
    }
}

// ============================================================================
// Provenance events
// ============================================================================

/// Provenance event for the JSONL event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProvenanceEvent {
    ApplyStarted {
        service: String,
        run_id: String,
        version: String,
        provisioner_version: String,
    },
    StepConverged {
        service: String,
        step: String,
        changed: bool,
        duration_seconds: f64,
    },
    StepSkipped {
        service: String,
        step: String,
        reason: String,
    },
    StepFailed {
        service: String,
        step: String,
        error: String,
    },
    RestartIssued {
        service: String,
        triggers: Vec<String>,
    },
    ApplyCompleted {
        service: String,
        run_id: String,
        steps_changed: u32,
        steps_unchanged: u32,
        steps_skipped: u32,
        total_seconds: f64,
    },
    DriftDetected {
        service: String,
        step: String,
        expected_hash: String,
        actual_hash: String,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: ProvenanceEvent,
}
