//! Provisioning pipeline for one instance.
//!
//! validate → marker → identity → prerequisite → artifact → base dir →
//! extract → log dir → properties → unit → marker → mode config →
//! enable/start → deferred restart → lock + events
//!
//! Steps report whether they changed the host. Steps that need a restart
//! flag the [`PendingRestart`] accumulator; the restart is issued once at
//! the end, and not at all when the service was started in this run.

use super::artifact;
use super::error::{ProvisionError, Result};
use super::host::Host;
use super::marker::{self, MarkerState};
use super::resolver;
use super::state;
use super::types::*;
use crate::resources::{self, file, mode, package, service::ServiceUnit, user::SystemUser};
use crate::tripwire::{eventlog, hasher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Configuration for one `ensure_installed` run.
pub struct ApplyConfig<'a> {
    pub target: &'a DeploymentTarget,
    pub host_config: &'a HostConfig,
    /// Where locks and event logs live; `None` disables both
    pub state_dir: Option<&'a Path>,
    pub policy: &'a Policy,
    /// Treat the marker as stale
    pub force: bool,
}

/// Dirty-flag accumulator for the deferred restart.
#[derive(Debug, Default)]
pub struct PendingRestart {
    triggers: Vec<Step>,
}

impl PendingRestart {
    pub fn flag(&mut self, step: Step) {
        if !self.triggers.contains(&step) {
            self.triggers.push(step);
        }
    }

    pub fn is_set(&self) -> bool {
        !self.triggers.is_empty()
    }

    pub fn triggers(&self) -> &[Step] {
        &self.triggers
    }
}

/// Result of a single converge step.
struct Converge {
    status: StepStatus,
    path: Option<PathBuf>,
    hash: Option<String>,
    detail: Option<String>,
    notify: bool,
}

impl Converge {
    fn from_changed(changed: bool) -> Self {
        Self {
            status: if changed {
                StepStatus::Changed
            } else {
                StepStatus::Unchanged
            },
            path: None,
            hash: None,
            detail: None,
            notify: false,
        }
    }

    fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Skipped,
            detail: Some(reason.into()),
            ..Self::from_changed(false)
        }
    }

    fn with_path(mut self, path: PathBuf) -> Self {
        self.path = Some(path);
        self
    }

    fn with_hash(mut self, hash: String) -> Self {
        self.hash = Some(hash);
        self
    }

    fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    fn notifying(mut self, notify: bool) -> Self {
        self.notify = notify;
        self
    }
}

struct Run<'a, 'h> {
    cfg: &'a ApplyConfig<'a>,
    host: &'h mut dyn Host,
    run_id: String,
    lock: InstanceLock,
    steps: Vec<StepOutcome>,
    pending: PendingRestart,
    fetched: bool,
    extracted: bool,
    started: bool,
    restarted: bool,
    artifact_hash: Option<String>,
}

/// Converge one instance. Input errors are returned before the host is
/// touched; an integrity failure leaves the installation root untouched.
pub fn ensure_installed(cfg: &ApplyConfig, host: &mut dyn Host) -> Result<ProvisionReport> {
    let start = Instant::now();
    let target = cfg.target;
    target.validate()?;

    let previous = match cfg.state_dir {
        Some(dir) => state::load_lock(dir, &target.service_name).unwrap_or_else(|e| {
            tracing::warn!(service = %target.service_name, error = %e, "ignoring unreadable lock");
            None
        }),
        None => None,
    };
    let deployed = payload_deployed(target, cfg.force, previous.as_ref());

    let mut lock = state::new_lock(&target.service_name, &state::local_hostname());
    lock.deployment = previous.and_then(|p| p.deployment);

    let mut run = Run {
        cfg,
        host,
        run_id: eventlog::generate_run_id(),
        lock,
        steps: Vec::new(),
        pending: PendingRestart::default(),
        fetched: false,
        extracted: false,
        started: false,
        restarted: false,
        artifact_hash: None,
    };

    tracing::info!(
        service = %target.service_name,
        version = %target.version,
        mode = %target.mode,
        deployed,
        "provisioning"
    );
    run.event(ProvenanceEvent::ApplyStarted {
        service: target.service_name.clone(),
        run_id: run.run_id.clone(),
        version: target.version.clone(),
        provisioner_version: env!("CARGO_PKG_VERSION").to_string(),
    });

    run.step(Step::Identity, Run::ensure_identity)?;
    run.step(Step::Prerequisite, Run::ensure_prerequisite)?;
    run.step(Step::Artifact, |r| r.fetch_artifact(deployed))?;
    run.step(Step::BaseDir, |r| r.ensure_dir(&target.base_dir))?;
    run.step(Step::Extract, |r| r.extract(deployed))?;
    run.step(Step::LogDir, |r| r.ensure_dir(&target.log_dir))?;

    let props = resources::properties_file(target, cfg.host_config);
    run.step(Step::Properties, |r| r.converge_managed(&props))?;

    let unit = ServiceUnit::for_target(target, cfg.host_config).managed_file(target, cfg.host_config);
    run.step(Step::ServiceUnit, |r| {
        let c = r.converge_managed(&unit)?;
        if c.status == StepStatus::Changed {
            r.host.reload_units()?;
        }
        Ok(c)
    })?;

    run.step(Step::Marker, Run::write_marker)?;

    for f in mode::credential_files(target) {
        run.step(f.step, |r| r.converge_managed(&f))?;
    }
    match mode::jvm_options_file(target)? {
        Some(conf) => run.step(Step::JvmOptions, |r| r.converge_managed(&conf))?,
        None => run.step(Step::JvmOptions, |_| {
            Ok(Converge::skipped("configured mode is not domain"))
        })?,
    }

    run.step(Step::Service, |r| {
        let change = r.host.enable_and_start(&r.cfg.target.service_name)?;
        r.started = change.started;
        Ok(Converge::from_changed(change.enabled || change.started))
    })?;
    run.step(Step::Restart, Run::deferred_restart)?;

    run.finish(start.elapsed())
}

/// Resolve and converge every instance (or only `filter`) in order.
pub fn apply_instances(
    config: &ProvisionConfig,
    filter: Option<&str>,
    state_dir: Option<&Path>,
    force: bool,
    host: &mut dyn Host,
) -> Result<Vec<ProvisionReport>> {
    let targets = resolver::resolve_all(config, filter)?;
    // reject the whole batch before any instance is touched
    for target in &targets {
        target.validate()?;
    }
    let mut reports = Vec::new();
    for target in &targets {
        let cfg = ApplyConfig {
            target,
            host_config: &config.host,
            state_dir,
            policy: &config.policy,
            force,
        };
        reports.push(ensure_installed(&cfg, host)?);
    }
    Ok(reports)
}

/// Marker says current, not forced, and the recorded checksum (if any)
/// still matches the configured one.
pub(crate) fn payload_deployed(
    target: &DeploymentTarget,
    force: bool,
    previous: Option<&InstanceLock>,
) -> bool {
    if force {
        return false;
    }
    match marker::read_marker(&target.marker_path(), &target.version) {
        MarkerState::Current => {}
        MarkerState::Unreadable(reason) => {
            tracing::warn!(service = %target.service_name, %reason, "marker unreadable, redeploying");
            return false;
        }
        _ => return false,
    }
    let record = previous.and_then(|l| l.deployment.as_ref());
    match record {
        Some(rec) if rec.version == target.version => {
            let same = rec.checksum.trim().eq_ignore_ascii_case(target.checksum.trim());
            if !same {
                tracing::info!(service = %target.service_name, "checksum changed, redeploying");
            }
            same
        }
        _ => true,
    }
}

impl Run<'_, '_> {
    fn step(&mut self, step: Step, f: impl FnOnce(&mut Self) -> Result<Converge>) -> Result<()> {
        let started = Instant::now();
        let result = f(self);
        let secs = started.elapsed().as_secs_f64();
        match result {
            Ok(c) => {
                self.record(step, c, secs);
                Ok(())
            }
            Err(e) => {
                self.record_failure(step, &e, secs);
                Err(e)
            }
        }
    }

    fn ensure_identity(&mut self) -> Result<Converge> {
        let t = self.cfg.target;
        if !t.provision_user {
            return Ok(Converge::skipped("provision_user disabled"));
        }
        let user = SystemUser::service_account(&t.service_user, t.base_dir.clone());
        let mut changed = self.host.ensure_user(&user)?;
        if t.service_group != t.service_user {
            changed |= self
                .host
                .ensure_group(&t.service_group, std::slice::from_ref(&t.service_user))?;
        }
        Ok(Converge::from_changed(changed).with_detail(t.ownership().to_string()))
    }

    fn ensure_prerequisite(&mut self) -> Result<Converge> {
        let family = self.host.platform_family();
        match package::prerequisite_for(family) {
            Some(pkg) => {
                let changed = self.host.ensure_package(family, pkg)?;
                Ok(Converge::from_changed(changed).with_detail(pkg))
            }
            None => {
                tracing::warn!(
                    service = %self.cfg.target.service_name,
                    %family,
                    "no prerequisite package for platform family, skipping"
                );
                Ok(Converge::skipped(format!("unsupported platform family {}", family)))
            }
        }
    }

    fn fetch_artifact(&mut self, deployed: bool) -> Result<Converge> {
        if deployed {
            return Ok(Converge::skipped("version already deployed"));
        }
        let t = self.cfg.target;
        let cache = t.cache_path(self.cfg.host_config);

        let reusable = cache.is_file() && artifact::verify(&cache, &t.checksum).is_ok();
        if !reusable {
            self.host.fetch(&t.url, &cache)?;
            self.fetched = true;
            artifact::verify(&cache, &t.checksum)?;
        }

        let hash = hasher::hash_file(&cache)?;
        self.artifact_hash = Some(hash.clone());
        Ok(Converge::from_changed(self.fetched)
            .with_path(cache)
            .with_hash(hash)
            .with_detail(if reusable { "cached" } else { "downloaded" }))
    }

    fn ensure_dir(&mut self, dir: &Path) -> Result<Converge> {
        let changed = file::converge_directory(dir, 0o755)?;
        self.host.chown(dir, &self.cfg.target.ownership(), false)?;
        Ok(Converge::from_changed(changed).with_path(dir.to_path_buf()))
    }

    fn extract(&mut self, deployed: bool) -> Result<Converge> {
        if deployed && !self.fetched {
            return Ok(Converge::skipped("payload current"));
        }
        let t = self.cfg.target;
        let cache = t.cache_path(self.cfg.host_config);
        let entries = artifact::extract_tar_gz(&cache, &t.base_dir, 1)?;
        self.host.chown(&t.base_dir, &t.ownership(), true)?;
        marker::remove_marker(&t.marker_path())?;
        self.extracted = true;

        self.lock.deployment = Some(DeploymentRecord {
            version: t.version.clone(),
            checksum: t.checksum.clone(),
            artifact_hash: self.artifact_hash.clone().unwrap_or_default(),
            deployed_at: eventlog::now_iso8601(),
        });
        Ok(Converge::from_changed(true)
            .with_path(t.base_dir.clone())
            .with_detail(format!("{} entries", entries))
            .notifying(true))
    }

    fn converge_managed(&mut self, f: &resources::ManagedFile) -> Result<Converge> {
        let change = file::converge_file(f)?;
        if f.owned {
            self.host.chown(&f.path, &self.cfg.target.ownership(), false)?;
        }
        Ok(Converge::from_changed(change.changed)
            .with_path(f.path.clone())
            .with_hash(change.hash)
            .notifying(f.notifies_restart))
    }

    fn write_marker(&mut self) -> Result<Converge> {
        let t = self.cfg.target;
        let path = t.marker_path();
        let created = marker::write_marker_if_missing(&path, &t.version)?;
        if created {
            self.host.chown(&path, &t.ownership(), false)?;
        }
        Ok(Converge::from_changed(created)
            .with_path(path)
            .with_detail(t.version.clone()))
    }

    fn deferred_restart(&mut self) -> Result<Converge> {
        if !self.pending.is_set() {
            return Ok(Converge::from_changed(false).with_detail("nothing pending"));
        }
        let triggers: Vec<String> = self
            .pending
            .triggers()
            .iter()
            .map(|s| s.to_string())
            .collect();
        if self.started {
            return Ok(Converge::skipped(format!(
                "service started in this run ({})",
                triggers.join(", ")
            )));
        }
        let service = self.cfg.target.service_name.clone();
        self.host.restart(&service)?;
        self.restarted = true;
        tracing::info!(service = %service, triggers = %triggers.join(","), "restarted");
        self.event(ProvenanceEvent::RestartIssued {
            service,
            triggers: triggers.clone(),
        });
        Ok(Converge::from_changed(true).with_detail(triggers.join(", ")))
    }

    fn record(&mut self, step: Step, c: Converge, secs: f64) {
        let service = self.cfg.target.service_name.clone();
        match c.status {
            StepStatus::Changed => {
                tracing::info!(service = %service, step = %step, "changed");
                if c.notify {
                    self.pending.flag(step);
                }
            }
            StepStatus::Skipped => {
                tracing::debug!(service = %service, step = %step, reason = ?c.detail, "skipped")
            }
            _ => tracing::debug!(service = %service, step = %step, "unchanged"),
        }

        let event = match c.status {
            StepStatus::Skipped => ProvenanceEvent::StepSkipped {
                service: service.clone(),
                step: step.to_string(),
                reason: c.detail.clone().unwrap_or_default(),
            },
            status => ProvenanceEvent::StepConverged {
                service: service.clone(),
                step: step.to_string(),
                changed: status == StepStatus::Changed,
                duration_seconds: secs,
            },
        };
        self.event(event);

        let mut details = HashMap::new();
        if let Some(ref p) = c.path {
            details.insert(
                "path".to_string(),
                serde_yaml_ng::Value::String(p.to_string_lossy().to_string()),
            );
        }
        if let Some(ref d) = c.detail {
            details.insert("detail".to_string(), serde_yaml_ng::Value::String(d.clone()));
        }
        self.lock.steps.insert(
            step.to_string(),
            StepLock {
                status: c.status,
                applied_at: Some(eventlog::now_iso8601()),
                duration_seconds: Some(secs),
                hash: c.hash.clone().unwrap_or_default(),
                details,
            },
        );

        self.steps.push(StepOutcome {
            step,
            status: c.status,
            duration_seconds: secs,
            path: c.path,
            hash: c.hash,
            detail: c.detail,
        });
    }

    fn record_failure(&mut self, step: Step, err: &ProvisionError, secs: f64) {
        let service = self.cfg.target.service_name.clone();
        tracing::error!(service = %service, step = %step, error = %err, "step failed");
        self.event(ProvenanceEvent::StepFailed {
            service,
            step: step.to_string(),
            error: err.to_string(),
        });
        self.lock.steps.insert(
            step.to_string(),
            StepLock {
                status: StepStatus::Failed,
                applied_at: Some(eventlog::now_iso8601()),
                duration_seconds: Some(secs),
                hash: String::new(),
                details: HashMap::new(),
            },
        );
        self.steps.push(StepOutcome {
            step,
            status: StepStatus::Failed,
            duration_seconds: secs,
            path: None,
            hash: None,
            detail: Some(err.to_string()),
        });
        if let Err(e) = self.persist() {
            tracing::warn!(error = %e, "cannot persist lock after failure");
        }
    }

    fn event(&self, event: ProvenanceEvent) {
        let Some(dir) = self.cfg.state_dir else {
            return;
        };
        if !self.cfg.policy.tripwire {
            return;
        }
        if let Err(e) = eventlog::append_event(dir, &self.cfg.target.service_name, event) {
            tracing::warn!(error = %e, "cannot append provenance event");
        }
    }

    fn persist(&self) -> Result<()> {
        match self.cfg.state_dir {
            Some(dir) if self.cfg.policy.lock_file => state::save_lock(dir, &self.lock),
            _ => Ok(()),
        }
    }

    fn finish(self, total: std::time::Duration) -> Result<ProvisionReport> {
        self.persist()?;
        let report = ProvisionReport {
            service_name: self.cfg.target.service_name.clone(),
            run_id: self.run_id.clone(),
            steps: self.steps.clone(),
            fetched: self.fetched,
            extracted: self.extracted,
            restart_triggers: self.pending.triggers().to_vec(),
            restarted: self.restarted,
            total_duration: total,
        };
        self.event(ProvenanceEvent::ApplyCompleted {
            service: report.service_name.clone(),
            run_id: report.run_id.clone(),
            steps_changed: report.changed(),
            steps_unchanged: report.unchanged(),
            steps_skipped: report.skipped(),
            total_seconds: total.as_secs_f64(),
        });
        tracing::info!(
            service = %report.service_name,
            changed = report.changed(),
            unchanged = report.unchanged(),
            skipped = report.skipped(),
            "provisioned"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::artifact::fixtures::{release_tarball, sha256_of};
    use crate::core::host::RecordingHost;
    use crate::resources::test_support::{host_under, wf1};

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
        target: DeploymentTarget,
        host_config: HostConfig,
        policy: Policy,
    }

    impl Fixture {
        fn new(version: &str) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path().to_path_buf();
            let mut target = wf1();
            target.base_dir = root.join("opt/wf1");
            target.log_dir = target.base_dir.join("standalone/log");
            let mut fx = Fixture {
                _dir: dir,
                host_config: host_under(&root),
                root,
                target,
                policy: Policy::default(),
            };
            fx.release(version);
            fx
        }

        /// Publish a release tarball and point the target at it.
        fn release(&mut self, version: &str) {
            let src = self.root.join("mirror");
            std::fs::create_dir_all(&src).unwrap();
            let tarball = src.join(format!("wildfly-{}.tar.gz", version));
            release_tarball(&tarball, version);
            self.target.version = version.to_string();
            self.target.url = format!("file://{}", tarball.display());
            self.target.checksum = sha256_of(&tarball);
        }

        fn state_dir(&self) -> PathBuf {
            self.root.join("state")
        }

        fn apply(&self, host: &mut RecordingHost, force: bool) -> Result<ProvisionReport> {
            let state_dir = self.state_dir();
            let cfg = ApplyConfig {
                target: &self.target,
                host_config: &self.host_config,
                state_dir: Some(&state_dir),
                policy: &self.policy,
                force,
            };
            ensure_installed(&cfg, host)
        }

        fn marker(&self) -> String {
            std::fs::read_to_string(self.target.marker_path()).unwrap()
        }

        fn status(report: &ProvisionReport, step: Step) -> StepStatus {
            report.outcome(step).unwrap().status
        }
    }

    fn recursive_chowns(host: &RecordingHost) -> usize {
        host.chowns.iter().filter(|(_, _, r)| *r).count()
    }

    #[test]
    fn test_first_run() {
        let fx = Fixture::new("18.0.0");
        let mut host = RecordingHost::new(PlatformFamily::Rhel);
        let report = fx.apply(&mut host, false).unwrap();

        assert_eq!(fx.marker(), "18.0.0");
        assert!(report.fetched);
        assert!(report.extracted);
        assert!(fx.target.base_dir.join("bin/standalone.sh").is_file());

        let unit = std::fs::read_to_string(fx.target.unit_path(&fx.host_config)).unwrap();
        let expected = format!(
            "ExecStart={}/bin/standalone.sh -c=standalone-full.xml -b=0.0.0.0 -P={}/wf1.properties\n",
            fx.target.base_dir.display(),
            fx.host_config.config_dir.display()
        );
        assert!(unit.contains(&expected), "unit was:\n{}", unit);

        assert!(host.enabled.contains("wf1"));
        assert!(host.running.contains("wf1"));
        assert!(host.packages.contains("libaio"));
        assert!(host.users.contains("wf1"));
        assert_eq!(host.count("reload"), 1);

        // restart requested but coalesced into the initial start
        assert!(!report.restart_triggers.is_empty());
        assert!(!report.restarted);
        assert_eq!(host.restarts, 0);
        assert_eq!(Fixture::status(&report, Step::Restart), StepStatus::Skipped);
    }

    #[test]
    fn test_second_run_is_noop() {
        let fx = Fixture::new("18.0.0");
        let mut host = RecordingHost::new(PlatformFamily::Rhel);
        fx.apply(&mut host, false).unwrap();
        let unit_path = fx.target.unit_path(&fx.host_config);
        let unit_before = std::fs::read_to_string(&unit_path).unwrap();

        let report = fx.apply(&mut host, false).unwrap();
        assert!(!report.fetched);
        assert!(!report.extracted);
        assert_eq!(host.fetches, 1);
        assert_eq!(recursive_chowns(&host), 1);
        assert_eq!(fx.marker(), "18.0.0");
        assert_eq!(std::fs::read_to_string(&unit_path).unwrap(), unit_before);
        assert_eq!(Fixture::status(&report, Step::Artifact), StepStatus::Skipped);
        assert_eq!(Fixture::status(&report, Step::Extract), StepStatus::Skipped);
        assert_eq!(Fixture::status(&report, Step::ServiceUnit), StepStatus::Unchanged);
        assert!(report.restart_triggers.is_empty());
        assert!(!report.restarted);
        assert_eq!(host.restarts, 0);
        assert_eq!(report.changed(), 0);
    }

    #[test]
    fn test_properties_change_restarts_once() {
        let mut fx = Fixture::new("18.0.0");
        let mut host = RecordingHost::new(PlatformFamily::Rhel);
        fx.apply(&mut host, false).unwrap();
        let unit_path = fx.target.unit_path(&fx.host_config);
        let unit_before = std::fs::read_to_string(&unit_path).unwrap();

        fx.target.server_properties = vec!["jboss.node.name=wf1-a".to_string()];
        let report = fx.apply(&mut host, false).unwrap();

        assert_eq!(Fixture::status(&report, Step::Properties), StepStatus::Changed);
        assert_eq!(Fixture::status(&report, Step::ServiceUnit), StepStatus::Unchanged);
        assert_eq!(report.restart_triggers, vec![Step::Properties]);
        assert!(report.restarted);
        assert_eq!(host.restarts, 1);
        assert_eq!(std::fs::read_to_string(&unit_path).unwrap(), unit_before);
        assert_eq!(
            std::fs::read_to_string(fx.target.properties_path(&fx.host_config)).unwrap(),
            "jboss.node.name=wf1-a"
        );
        assert_eq!(report.changed(), 2); // properties + restart
    }

    #[test]
    fn test_version_bump_redeploys() {
        let mut fx = Fixture::new("18.0.0");
        let mut host = RecordingHost::new(PlatformFamily::Debian);
        fx.apply(&mut host, false).unwrap();

        fx.release("19.0.0");
        let report = fx.apply(&mut host, false).unwrap();
        assert!(report.fetched);
        assert!(report.extracted);
        assert_eq!(fx.marker(), "19.0.0");
        assert_eq!(
            std::fs::read_to_string(fx.target.base_dir.join("version.txt")).unwrap(),
            "19.0.0"
        );
        assert_eq!(recursive_chowns(&host), 2);
        assert!(report.restart_triggers.contains(&Step::Extract));
        assert_eq!(host.restarts, 1);
        assert!(host.packages.contains("libaio1"));

        let lock = state::load_lock(&fx.state_dir(), "wf1").unwrap().unwrap();
        assert_eq!(lock.deployment.unwrap().version, "19.0.0");
    }

    #[test]
    fn test_checksum_mismatch_leaves_base_dir_untouched() {
        let mut fx = Fixture::new("18.0.0");
        fx.target.checksum = "deadbeef".to_string();
        let mut host = RecordingHost::new(PlatformFamily::Rhel);

        let err = fx.apply(&mut host, false).unwrap_err();
        assert!(matches!(err, ProvisionError::Integrity { .. }));
        assert!(!fx.target.base_dir.exists());
        assert!(fx.target.cache_path(&fx.host_config).exists());
        assert!(host.running.is_empty());

        let lock = state::load_lock(&fx.state_dir(), "wf1").unwrap().unwrap();
        assert_eq!(lock.steps["artifact"].status, StepStatus::Failed);
        let events = eventlog::read_events(&fx.state_dir(), "wf1").unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(e.event, ProvenanceEvent::StepFailed { ref step, .. } if step == "artifact")));
    }

    #[test]
    fn test_checksum_mismatch_on_upgrade_keeps_existing_tree() {
        let mut fx = Fixture::new("18.0.0");
        let mut host = RecordingHost::new(PlatformFamily::Rhel);
        fx.apply(&mut host, false).unwrap();
        let before = hasher::hash_directory(&fx.target.base_dir, &[]).unwrap();

        fx.release("19.0.0");
        fx.target.checksum = "0000".to_string();
        assert!(fx.apply(&mut host, false).is_err());
        assert_eq!(hasher::hash_directory(&fx.target.base_dir, &[]).unwrap(), before);
        assert_eq!(fx.marker(), "18.0.0");
    }

    #[test]
    fn test_invalid_input_before_side_effects() {
        let mut fx = Fixture::new("18.0.0");
        fx.target.url = String::new();
        let mut host = RecordingHost::new(PlatformFamily::Rhel);
        let err = fx.apply(&mut host, false).unwrap_err();
        assert!(err.is_input_error());
        assert!(host.calls.is_empty());
        assert!(!fx.state_dir().exists());
    }

    #[test]
    fn test_invalid_mode_rejected_by_apply_instances() {
        let yaml = crate::resources::test_support::CONFIG.replace("mode: standalone", "mode: invalid");
        let config = crate::core::parser::parse_config(&yaml).unwrap();
        let mut host = RecordingHost::new(PlatformFamily::Rhel);
        let err = apply_instances(&config, None, None, false, &mut host).unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidInput(_)));
        assert!(host.calls.is_empty());
    }

    #[test]
    fn test_unreadable_marker_forces_redeploy() {
        let fx = Fixture::new("18.0.0");
        let mut host = RecordingHost::new(PlatformFamily::Rhel);
        fx.apply(&mut host, false).unwrap();
        std::fs::write(fx.target.marker_path(), [0xff, 0xfe]).unwrap();

        let report = fx.apply(&mut host, false).unwrap();
        assert!(report.extracted);
        // cached tarball still verifies, so nothing is downloaded again
        assert!(!report.fetched);
        assert_eq!(host.fetches, 1);
        assert_eq!(fx.marker(), "18.0.0");
    }

    #[test]
    fn test_directory_marker_redeploys() {
        let fx = Fixture::new("18.0.0");
        let mut host = RecordingHost::new(PlatformFamily::Rhel);
        fx.apply(&mut host, false).unwrap();
        let m = fx.target.marker_path();
        std::fs::remove_file(&m).unwrap();
        std::fs::create_dir_all(m.join("leftover")).unwrap();

        let report = fx.apply(&mut host, false).unwrap();
        assert!(report.extracted);
        assert!(m.is_file());
        assert_eq!(fx.marker(), "18.0.0");
    }

    #[test]
    fn test_apply_instances_validates_every_target_first() {
        let yaml = format!(
            "{}  wf2:\n    base_dir: /opt/wf2\n    url: \"\"\n",
            crate::resources::test_support::CONFIG
        );
        let config = crate::core::parser::parse_config(&yaml).unwrap();
        let mut host = RecordingHost::new(PlatformFamily::Rhel);
        let err = apply_instances(&config, None, None, false, &mut host).unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidInput(ref m) if m.contains("wf2: url is required")));
        // wf1 is valid but must not have been started
        assert!(host.calls.is_empty());
        assert_eq!(host.fetches, 0);
    }

    #[test]
    fn test_force_redeploys_current_version() {
        let fx = Fixture::new("18.0.0");
        let mut host = RecordingHost::new(PlatformFamily::Rhel);
        fx.apply(&mut host, false).unwrap();
        let report = fx.apply(&mut host, true).unwrap();
        assert!(report.extracted);
        assert_eq!(fx.marker(), "18.0.0");
        assert_eq!(host.restarts, 1);
    }

    #[test]
    fn test_checksum_change_in_record_redeploys() {
        let mut fx = Fixture::new("18.0.0");
        let mut host = RecordingHost::new(PlatformFamily::Rhel);
        fx.apply(&mut host, false).unwrap();

        // same artifact, abbreviated digest: still valid, but differs from the record
        fx.target.checksum = fx.target.checksum[..16].to_string();
        let report = fx.apply(&mut host, false).unwrap();
        assert!(report.extracted);
        assert!(!report.fetched);

        let report = fx.apply(&mut host, false).unwrap();
        assert!(!report.extracted);
    }

    #[test]
    fn test_identity_variants() {
        let mut fx = Fixture::new("18.0.0");
        fx.target.service_group = "jboss".to_string();
        let mut host = RecordingHost::new(PlatformFamily::Rhel);
        fx.apply(&mut host, false).unwrap();
        assert_eq!(host.groups["jboss"], vec!["wf1".to_string()]);

        let mut fx = Fixture::new("18.0.0");
        fx.target.provision_user = false;
        let mut host = RecordingHost::new(PlatformFamily::Rhel);
        let report = fx.apply(&mut host, false).unwrap();
        assert_eq!(Fixture::status(&report, Step::Identity), StepStatus::Skipped);
        assert_eq!(host.count("user"), 0);
        assert_eq!(host.count("group"), 0);
    }

    #[test]
    fn test_same_user_and_group_skips_group() {
        let fx = Fixture::new("18.0.0");
        let mut host = RecordingHost::new(PlatformFamily::Rhel);
        fx.apply(&mut host, false).unwrap();
        assert_eq!(host.count("group"), 0);
    }

    #[test]
    fn test_unsupported_platform_skips_prerequisite() {
        let fx = Fixture::new("18.0.0");
        let mut host = RecordingHost::new(PlatformFamily::Unsupported);
        let report = fx.apply(&mut host, false).unwrap();
        assert_eq!(Fixture::status(&report, Step::Prerequisite), StepStatus::Skipped);
        assert_eq!(host.count("package"), 0);
    }

    #[test]
    fn test_mode_files_written() {
        let fx = Fixture::new("18.0.0");
        let mut host = RecordingHost::new(PlatformFamily::Rhel);
        fx.apply(&mut host, false).unwrap();

        use std::os::unix::fs::PermissionsExt;
        let mgmt = fx.target.configuration_dir().join("mgmt-users.properties");
        let meta = std::fs::metadata(&mgmt).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
        assert!(std::fs::read_to_string(&mgmt).unwrap().contains("admin=2a09"));
        assert!(fx.target.bin_dir().join("standalone.conf").is_file());
        assert!(host.chowns.iter().any(|(p, o, r)| p == &mgmt && o == "wf1:wf1" && !r));
    }

    #[test]
    fn test_domain_conf_guard() {
        let mut fx = Fixture::new("18.0.0");
        fx.target.mode = Mode::Domain;
        fx.target.runtime.configured_mode = Mode::Standalone;
        let mut host = RecordingHost::new(PlatformFamily::Rhel);
        let report = fx.apply(&mut host, false).unwrap();
        assert_eq!(Fixture::status(&report, Step::JvmOptions), StepStatus::Skipped);
        assert!(!fx.target.bin_dir().join("domain.conf").exists());
        assert!(fx
            .target
            .base_dir
            .join("domain/configuration/mgmt-users.properties")
            .is_file());
    }

    #[test]
    fn test_lock_and_events_persisted() {
        let fx = Fixture::new("18.0.0");
        let mut host = RecordingHost::new(PlatformFamily::Rhel);
        let report = fx.apply(&mut host, false).unwrap();

        let lock = state::load_lock(&fx.state_dir(), "wf1").unwrap().unwrap();
        let record = lock.deployment.unwrap();
        assert_eq!(record.version, "18.0.0");
        assert_eq!(record.checksum, fx.target.checksum);
        assert!(record.artifact_hash.starts_with("blake3:"));
        let props = &lock.steps["properties"];
        assert!(props.hash.starts_with("blake3:"));
        assert!(props.details.contains_key("path"));
        assert_eq!(lock.steps.len(), report.steps.len());

        let events = eventlog::read_events(&fx.state_dir(), "wf1").unwrap();
        assert!(matches!(events[0].event, ProvenanceEvent::ApplyStarted { .. }));
        assert!(matches!(
            events.last().unwrap().event,
            ProvenanceEvent::ApplyCompleted { .. }
        ));
    }

    #[test]
    fn test_no_state_dir_writes_nothing() {
        let fx = Fixture::new("18.0.0");
        let mut host = RecordingHost::new(PlatformFamily::Rhel);
        let cfg = ApplyConfig {
            target: &fx.target,
            host_config: &fx.host_config,
            state_dir: None,
            policy: &fx.policy,
            force: false,
        };
        ensure_installed(&cfg, &mut host).unwrap();
        assert!(!fx.state_dir().exists());
        assert_eq!(fx.marker(), "18.0.0");
    }

    #[test]
    fn test_pending_restart_dedup() {
        let mut p = PendingRestart::default();
        assert!(!p.is_set());
        p.flag(Step::Properties);
        p.flag(Step::Properties);
        p.flag(Step::ServiceUnit);
        assert_eq!(p.triggers(), &[Step::Properties, Step::ServiceUnit]);
    }
}
