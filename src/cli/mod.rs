//! CLI subcommands: init, validate, plan, apply, drift, status, completions.

use crate::core::host::{Host, SystemHost};
use crate::core::{executor, parser, planner, resolver, state, types};
use crate::resources::service;
use crate::transport::local::exec_local;
use crate::tripwire::drift;
use clap::{CommandFactory, Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(
    name = "wildfly-provisioner",
    version,
    about = "Idempotent WildFly installer with marker-gated deploys, BLAKE3 state and provenance tracing"
)]
pub struct Cli {
    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a starter wildfly.yaml and state directory
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate wildfly.yaml without touching the host
    Validate {
        /// Path to wildfly.yaml
        #[arg(short, long, default_value = "wildfly.yaml")]
        file: PathBuf,
    },

    /// Show what apply would change
    Plan {
        /// Path to wildfly.yaml
        #[arg(short, long, default_value = "wildfly.yaml")]
        file: PathBuf,

        /// Target a single instance
        #[arg(short, long)]
        service: Option<String>,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },

    /// Converge instances to the desired state
    Apply {
        /// Path to wildfly.yaml
        #[arg(short, long, default_value = "wildfly.yaml")]
        file: PathBuf,

        /// Target a single instance
        #[arg(short, long)]
        service: Option<String>,

        /// Redeploy even when the marker is current
        #[arg(long)]
        force: bool,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },

    /// Detect out-of-band edits to managed files (tripwire)
    Drift {
        /// Target a single instance
        #[arg(short, long)]
        service: Option<String>,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        /// Exit non-zero on any drift (for CI/cron)
        #[arg(long)]
        tripwire: bool,
    },

    /// Show current state from lock files
    Status {
        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        /// Target a single instance
        #[arg(short, long)]
        service: Option<String>,

        /// Also query systemd for the live unit state
        #[arg(long)]
        live: bool,
    },

    /// Print shell completions to stdout
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Plan {
            file,
            service,
            state_dir,
        } => cmd_plan(&file, &state_dir, service.as_deref()),
        Commands::Apply {
            file,
            service,
            force,
            state_dir,
        } => cmd_apply(&file, &state_dir, service.as_deref(), force),
        Commands::Drift {
            service,
            state_dir,
            tripwire,
        } => cmd_drift(&state_dir, service.as_deref(), tripwire),
        Commands::Status {
            state_dir,
            service,
            live,
        } => cmd_status(&state_dir, service.as_deref(), live),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "wildfly-provisioner", &mut std::io::stdout());
            Ok(())
        }
    }
}

const INIT_TEMPLATE: &str = r#"version: "1.0"

host:
  file_cache_path: /var/cache/wildfly-provisioner
  config_dir: /etc/wildfly
  unit_dir: /etc/systemd/system
  pid_dir: /var/run/wildfly

wildfly:
  version: "18.0.0"
  url: https://download.jboss.org/wildfly/18.0.0.Final/wildfly-18.0.0.Final.tar.gz
  checksum: "<sha256 of the tarball>"
  mode: standalone
  java_opts:
    xms: 64m
    xmx: 512m
  users:
    mgmt: {}
    app: {}
  roles:
    app: {}

instances:
  wildfly:
    base_dir: /opt/wildfly

policy:
  tripwire: true
  lock_file: true
"#;

fn cmd_init(path: &Path) -> Result<(), String> {
    let config_path = path.join("wildfly.yaml");
    if config_path.exists() {
        return Err(format!("{} already exists", config_path.display()));
    }

    let state_dir = path.join("state");
    std::fs::create_dir_all(&state_dir).map_err(|e| format!("cannot create state dir: {}", e))?;

    std::fs::write(&config_path, INIT_TEMPLATE)
        .map_err(|e| format!("cannot write {}: {}", config_path.display(), e))?;

    println!("Initialized wildfly-provisioner project at {}", path.display());
    println!("  Created: {}", config_path.display());
    println!("  Created: {}/", state_dir.display());
    Ok(())
}

fn cmd_validate(file: &Path) -> Result<(), String> {
    let config = parse_and_validate(file)?;
    println!(
        "OK: {} ({} instance(s))",
        file.display(),
        config.instances.len()
    );
    Ok(())
}

/// Parse and validate a wildfly.yaml, printing every error found.
fn parse_and_validate(file: &Path) -> Result<types::ProvisionConfig, String> {
    let config = parser::parse_config_file(file).map_err(|e| e.to_string())?;
    let errors = parser::validate_config(&config);
    if errors.is_empty() {
        return Ok(config);
    }
    for e in &errors {
        eprintln!("  ERROR: {}", e);
    }
    Err(format!("{} validation error(s)", errors.len()))
}

fn cmd_plan(file: &Path, state_dir: &Path, service: Option<&str>) -> Result<(), String> {
    let config = parse_and_validate(file)?;
    let targets = resolver::resolve_all(&config, service).map_err(|e| e.to_string())?;

    let (mut create, mut update, mut unchanged) = (0, 0, 0);
    for target in &targets {
        let lock = load_lock_if_present(state_dir, &target.service_name)?;
        let plan = planner::plan(target, &config.host, lock.as_ref(), false)
            .map_err(|e| e.to_string())?;
        print_plan(&plan);
        create += plan.to_create;
        update += plan.to_update;
        unchanged += plan.unchanged;
    }

    println!(
        "Plan: {} to create, {} to update, {} unchanged.",
        create, update, unchanged
    );
    Ok(())
}

/// A missing state dir simply means nothing was applied yet.
fn load_lock_if_present(state_dir: &Path, service: &str) -> Result<Option<types::InstanceLock>, String> {
    if !state_dir.exists() {
        return Ok(None);
    }
    state::load_lock(state_dir, service).map_err(|e| e.to_string())
}

fn print_plan(plan: &types::ExecutionPlan) {
    println!("{}:", plan.service_name);
    for change in &plan.changes {
        let symbol = match change.action {
            types::PlanAction::Create => "+",
            types::PlanAction::Update => "~",
            types::PlanAction::Skip => "-",
            types::PlanAction::NoOp => " ",
        };
        println!("  {} {:<14} {}", symbol, change.step.as_str(), change.description);
    }
    println!();
}

fn cmd_apply(
    file: &Path,
    state_dir: &Path,
    service: Option<&str>,
    force: bool,
) -> Result<(), String> {
    let config = parse_and_validate(file)?;
    let mut host = SystemHost::detect(&config.host);
    run_apply(&config, state_dir, service, force, &mut host)
}

fn run_apply(
    config: &types::ProvisionConfig,
    state_dir: &Path,
    service: Option<&str>,
    force: bool,
    host: &mut dyn Host,
) -> Result<(), String> {
    let reports = executor::apply_instances(config, service, Some(state_dir), force, host)
        .map_err(|e| e.to_string())?;

    let mut total_changed = 0;
    let mut total_unchanged = 0;
    for report in &reports {
        let restart = if report.restarted {
            ", restarted"
        } else {
            ""
        };
        println!(
            "{}: {} changed, {} unchanged, {} skipped{} ({:.1}s)",
            report.service_name,
            report.changed(),
            report.unchanged(),
            report.skipped(),
            restart,
            report.total_duration.as_secs_f64()
        );
        total_changed += report.changed();
        total_unchanged += report.unchanged();
    }

    println!();
    println!(
        "Apply complete: {} changed, {} unchanged.",
        total_changed, total_unchanged
    );
    Ok(())
}

/// Services with a lock under `state_dir`, sorted.
fn locked_services(state_dir: &Path, filter: Option<&str>) -> Result<Vec<String>, String> {
    let entries = std::fs::read_dir(state_dir)
        .map_err(|e| format!("cannot read state dir {}: {}", state_dir.display(), e))?;
    let mut names: Vec<String> = entries
        .flatten()
        .filter(|e| e.path().is_dir())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|n| filter.is_none_or(|f| n == f))
        .filter(|n| state::lock_file_path(state_dir, n).is_file())
        .collect();
    names.sort();
    Ok(names)
}

fn cmd_drift(state_dir: &Path, service: Option<&str>, tripwire_mode: bool) -> Result<(), String> {
    let mut total_drift = 0;

    for name in locked_services(state_dir, service)? {
        let Some(lock) = state::load_lock(state_dir, &name).map_err(|e| e.to_string())? else {
            continue;
        };
        println!("Checking {} ({} steps)...", name, lock.steps.len());
        let findings = drift::detect_drift(&lock);

        if findings.is_empty() {
            println!("  No drift detected.");
            continue;
        }
        for f in &findings {
            println!("  DRIFTED: {} ({})", f.step, f.detail);
            println!("    Expected: {}", f.expected_hash);
            println!("    Actual:   {}", f.actual_hash);
        }
        drift::record_drift(state_dir, &name, &findings).map_err(|e| e.to_string())?;
        total_drift += findings.len();
    }

    if total_drift > 0 {
        println!();
        println!("Drift detected: {} finding(s)", total_drift);
        if tripwire_mode {
            return Err(format!("{} drift finding(s)", total_drift));
        }
    } else {
        println!("No drift detected.");
    }

    Ok(())
}

fn cmd_status(state_dir: &Path, service: Option<&str>, live: bool) -> Result<(), String> {
    let mut found = false;

    for name in locked_services(state_dir, service)? {
        let Some(lock) = state::load_lock(state_dir, &name).map_err(|e| e.to_string())? else {
            continue;
        };
        found = true;
        println!("Service: {} ({})", lock.service_name, lock.hostname);
        println!("  Generated: {}", lock.generated_at);
        println!("  Generator: {}", lock.generator);
        match &lock.deployment {
            Some(d) => println!("  Deployed:  {} at {}", d.version, d.deployed_at),
            None => println!("  Deployed:  -"),
        }
        println!("  Steps: {}", lock.steps.len());

        for (step, sl) in &lock.steps {
            let duration = sl
                .duration_seconds
                .map(|d| format!(" ({:.2}s)", d))
                .unwrap_or_default();
            println!("    {}: {}{}", step, sl.status, duration);
        }
        if live {
            print_live_state(&name);
        }
        println!();
    }

    if !found {
        println!("No state found. Run `wildfly-provisioner apply` first.");
    }

    Ok(())
}

/// Query systemd for the unit. Failures are reported, not fatal.
fn print_live_state(name: &str) {
    match exec_local(&service::state_query_script(name)) {
        Ok(out) => {
            for line in out.stdout.lines().filter(|l| !l.is_empty()) {
                println!("  Live: {}", line);
            }
        }
        Err(e) => println!("  Live: unavailable ({})", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::artifact::fixtures::{release_tarball, sha256_of};
    use crate::core::host::RecordingHost;
    use crate::core::types::PlatformFamily;

    /// A config rooted in `root`, installing from a local release tarball.
    fn write_config(root: &Path) -> PathBuf {
        let tarball = root.join("wildfly-18.0.0.tar.gz");
        release_tarball(&tarball, "18.0.0");
        let yaml = format!(
            r#"
version: "1.0"
host:
  file_cache_path: {root}/cache
  config_dir: {root}/etc/wildfly
  unit_dir: {root}/etc/systemd/system
  pid_dir: {root}/run/wildfly
wildfly:
  version: "18.0.0"
  url: file://{tarball}
  checksum: "{checksum}"
  users:
    mgmt:
      admin: 2a0923285184943425d1f53ddd58ec7a
instances:
  wf1:
    base_dir: {root}/opt/wf1
  wf2:
    base_dir: {root}/opt/wf2
"#,
            root = root.display(),
            tarball = tarball.display(),
            checksum = sha256_of(&tarball),
        );
        let path = root.join("wildfly.yaml");
        std::fs::write(&path, yaml).unwrap();
        path
    }

    fn apply(file: &Path, state: &Path, service: Option<&str>) {
        let config = parse_and_validate(file).unwrap();
        let mut host = RecordingHost::new(PlatformFamily::Rhel);
        run_apply(&config, state, service, false, &mut host).unwrap();
    }

    #[test]
    fn test_init() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("project");
        std::fs::create_dir_all(&sub).unwrap();
        cmd_init(&sub).unwrap();
        assert!(sub.join("state").is_dir());
        // the template itself validates
        cmd_validate(&sub.join("wildfly.yaml")).unwrap();
    }

    #[test]
    fn test_init_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("wildfly.yaml"), "exists").unwrap();
        assert!(cmd_init(dir.path()).is_err());
    }

    #[test]
    fn test_validate_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("wildfly.yaml");
        std::fs::write(
            &config,
            r#"
version: "2.0"
instances:
  wf1:
    mode: cluster
"#,
        )
        .unwrap();
        let err = cmd_validate(&config).unwrap_err();
        assert!(err.contains("validation error"));
    }

    #[test]
    fn test_validate_missing_file() {
        let err = cmd_validate(Path::new("/nonexistent/wildfly.yaml")).unwrap_err();
        assert!(err.contains("failed to read"));
    }

    #[test]
    fn test_plan_without_state() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_config(dir.path());
        cmd_plan(&config, &dir.path().join("state"), None).unwrap();
        assert!(!dir.path().join("opt").exists());
    }

    #[test]
    fn test_plan_unknown_service() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_config(dir.path());
        assert!(cmd_plan(&config, &dir.path().join("state"), Some("nope")).is_err());
    }

    #[test]
    fn test_apply_then_status_and_drift() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_config(dir.path());
        let state = dir.path().join("state");
        apply(&config, &state, Some("wf1"));

        assert_eq!(locked_services(&state, None).unwrap(), vec!["wf1".to_string()]);
        cmd_status(&state, None, true).unwrap();
        cmd_plan(&config, &state, Some("wf1")).unwrap();
        cmd_drift(&state, None, true).unwrap();

        std::fs::write(dir.path().join("etc/wildfly/wf1.properties"), "edited").unwrap();
        assert!(cmd_drift(&state, Some("wf1"), true).is_err());
        cmd_drift(&state, Some("wf1"), false).unwrap();

        let events = crate::tripwire::eventlog::read_events(&state, "wf1").unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(e.event, types::ProvenanceEvent::DriftDetected { .. })));
    }

    #[test]
    fn test_apply_all_instances() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_config(dir.path());
        let state = dir.path().join("state");
        apply(&config, &state, None);
        assert_eq!(locked_services(&state, None).unwrap().len(), 2);
        assert!(dir.path().join("opt/wf2/.chef_deployed").is_file());
    }

    #[test]
    fn test_status_and_drift_missing_state_dir() {
        assert!(cmd_status(Path::new("/nonexistent/state"), None, false).is_err());
        assert!(cmd_drift(Path::new("/nonexistent/state"), None, false).is_err());
    }

    #[test]
    fn test_status_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("stray-file"), "x").unwrap();
        cmd_status(dir.path(), None, false).unwrap();
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "wildfly-provisioner",
            "-v",
            "apply",
            "--service",
            "wf1",
            "--force",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert!(matches!(
            cli.command,
            Commands::Apply { force: true, ref service, .. } if service.as_deref() == Some("wf1")
        ));
        Cli::command().debug_assert();
    }
}
