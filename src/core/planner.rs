//! Plan generation: diff desired files and payload against the host.
//!
//! Read-only. Managed files are compared by BLAKE3 hash of the rendered
//! content against what is on disk; the payload is judged by the marker
//! and the deployment record in the lock.

use super::artifact;
use super::error::Result;
use super::executor::payload_deployed;
use super::marker::{self, MarkerState};
use super::types::*;
use crate::resources::{self, ManagedFile};
use crate::tripwire::hasher;
use std::path::Path;

/// Generate the plan for one instance.
pub fn plan(
    target: &DeploymentTarget,
    host: &HostConfig,
    previous: Option<&InstanceLock>,
    force: bool,
) -> Result<ExecutionPlan> {
    let mut changes = Vec::new();
    let deployed = payload_deployed(target, force, previous);

    if target.provision_user {
        changes.push(change(
            Step::Identity,
            PlanAction::NoOp,
            format!("ensure {} (delegated to host)", target.ownership()),
        ));
    } else {
        changes.push(change(Step::Identity, PlanAction::Skip, "provision_user disabled"));
    }

    let cache = target.cache_path(host);
    let artifact = if deployed {
        change(Step::Artifact, PlanAction::NoOp, "version already deployed")
    } else if cache.is_file() && artifact::verify(&cache, &target.checksum).is_ok() {
        change(Step::Artifact, PlanAction::NoOp, format!("reuse {}", cache.display()))
    } else {
        change(
            Step::Artifact,
            PlanAction::Create,
            format!("download {} → {}", target.url, cache.display()),
        )
    };
    changes.push(artifact);

    changes.push(dir_change(Step::BaseDir, &target.base_dir));

    let extract = if deployed {
        change(Step::Extract, PlanAction::NoOp, format!("{} deployed", target.version))
    } else {
        match marker::read_marker(&target.marker_path(), &target.version) {
            MarkerState::Stale(old) => change(
                Step::Extract,
                PlanAction::Update,
                format!("replace {} with {}", old, target.version),
            ),
            _ if target.base_dir.join("bin").is_dir() => change(
                Step::Extract,
                PlanAction::Update,
                format!("re-extract {}", target.version),
            ),
            _ => change(
                Step::Extract,
                PlanAction::Create,
                format!("extract {} into {}", target.version, target.base_dir.display()),
            ),
        }
    };
    changes.push(extract);

    changes.push(dir_change(Step::LogDir, &target.log_dir));

    let files = resources::managed_files(target, host)?;
    let (before_marker, after_marker): (Vec<&ManagedFile>, Vec<&ManagedFile>) = files
        .iter()
        .partition(|f| matches!(f.step, Step::Properties | Step::ServiceUnit));
    for f in before_marker {
        changes.push(file_change(f)?);
    }

    changes.push(if deployed {
        change(Step::Marker, PlanAction::NoOp, target.version.clone())
    } else {
        change(
            Step::Marker,
            PlanAction::Create,
            format!("write {} to {}", target.version, target.marker_path().display()),
        )
    });

    for f in after_marker {
        changes.push(file_change(f)?);
    }
    if !files.iter().any(|f| f.step == Step::JvmOptions) {
        changes.push(change(
            Step::JvmOptions,
            PlanAction::Skip,
            "configured mode is not domain",
        ));
    }

    changes.push(change(
        Step::Service,
        PlanAction::NoOp,
        format!("enable and start {}", target.service_name),
    ));

    let restart_needed = changes.iter().any(|c| {
        matches!(c.action, PlanAction::Create | PlanAction::Update)
            && matches!(
                c.step,
                Step::Extract | Step::Properties | Step::ServiceUnit | Step::JvmOptions
            )
    });
    changes.push(if restart_needed {
        change(Step::Restart, PlanAction::Update, "restart once (deferred)")
    } else {
        change(Step::Restart, PlanAction::NoOp, "nothing pending")
    });

    let mut to_create = 0u32;
    let mut to_update = 0u32;
    let mut unchanged = 0u32;
    for c in &changes {
        match c.action {
            PlanAction::Create => to_create += 1,
            PlanAction::Update => to_update += 1,
            PlanAction::NoOp => unchanged += 1,
            PlanAction::Skip => {}
        }
    }

    Ok(ExecutionPlan {
        service_name: target.service_name.clone(),
        changes,
        to_create,
        to_update,
        unchanged,
    })
}

fn change(step: Step, action: PlanAction, description: impl Into<String>) -> PlannedChange {
    PlannedChange {
        step,
        action,
        description: description.into(),
    }
}

fn dir_change(step: Step, dir: &Path) -> PlannedChange {
    if dir.is_dir() {
        change(step, PlanAction::NoOp, dir.display().to_string())
    } else {
        change(step, PlanAction::Create, format!("create {}", dir.display()))
    }
}

fn file_change(f: &ManagedFile) -> Result<PlannedChange> {
    let desired = hasher::hash_string(&f.content);
    let action = match hasher::hash_file_if_exists(&f.path)? {
        None => PlanAction::Create,
        Some(current) if current == desired => PlanAction::NoOp,
        Some(_) => PlanAction::Update,
    };
    let verb = match action {
        PlanAction::Create => "create",
        PlanAction::Update => "update",
        _ => "keep",
    };
    Ok(change(f.step, action, format!("{} {}", verb, f.path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::artifact::fixtures::{release_tarball, sha256_of};
    use crate::core::executor::{ensure_installed, ApplyConfig};
    use crate::core::host::RecordingHost;
    use crate::core::state;
    use crate::resources::test_support::{host_under, wf1};

    fn setup(root: &Path) -> (DeploymentTarget, HostConfig) {
        let tarball = root.join("wildfly-18.0.0.tar.gz");
        release_tarball(&tarball, "18.0.0");
        let mut t = wf1();
        t.base_dir = root.join("opt/wf1");
        t.log_dir = t.base_dir.join("standalone/log");
        t.url = format!("file://{}", tarball.display());
        t.checksum = sha256_of(&tarball);
        (t, host_under(root))
    }

    fn apply(t: &DeploymentTarget, h: &HostConfig, state_dir: &Path) {
        let policy = Policy::default();
        let cfg = ApplyConfig {
            target: t,
            host_config: h,
            state_dir: Some(state_dir),
            policy: &policy,
            force: false,
        };
        ensure_installed(&cfg, &mut RecordingHost::new(PlatformFamily::Rhel)).unwrap();
    }

    #[test]
    fn test_plan_fresh_host() {
        let dir = tempfile::tempdir().unwrap();
        let (t, h) = setup(dir.path());
        let p = plan(&t, &h, None, false).unwrap();
        assert_eq!(p.action(Step::Artifact), Some(&PlanAction::Create));
        assert_eq!(p.action(Step::Extract), Some(&PlanAction::Create));
        assert_eq!(p.action(Step::Properties), Some(&PlanAction::Create));
        assert_eq!(p.action(Step::Marker), Some(&PlanAction::Create));
        assert_eq!(p.action(Step::Restart), Some(&PlanAction::Update));
        assert!(p.to_create >= 9);
        // planning is read-only
        assert!(!t.base_dir.exists());
        assert!(!t.cache_path(&h).exists());
    }

    #[test]
    fn test_plan_noop_after_apply() {
        let dir = tempfile::tempdir().unwrap();
        let (t, h) = setup(dir.path());
        let state_dir = dir.path().join("state");
        apply(&t, &h, &state_dir);

        let lock = state::load_lock(&state_dir, "wf1").unwrap();
        let p = plan(&t, &h, lock.as_ref(), false).unwrap();
        assert_eq!(p.to_create, 0);
        assert_eq!(p.to_update, 0);
        assert!(p
            .changes
            .iter()
            .all(|c| matches!(c.action, PlanAction::NoOp | PlanAction::Skip)));
    }

    #[test]
    fn test_plan_detects_edit_and_version_bump() {
        let dir = tempfile::tempdir().unwrap();
        let (mut t, h) = setup(dir.path());
        let state_dir = dir.path().join("state");
        apply(&t, &h, &state_dir);
        let lock = state::load_lock(&state_dir, "wf1").unwrap();

        std::fs::write(t.properties_path(&h), "edited=1").unwrap();
        let p = plan(&t, &h, lock.as_ref(), false).unwrap();
        assert_eq!(p.action(Step::Properties), Some(&PlanAction::Update));
        assert_eq!(p.action(Step::ServiceUnit), Some(&PlanAction::NoOp));
        assert_eq!(p.action(Step::Restart), Some(&PlanAction::Update));

        t.version = "19.0.0".to_string();
        let p = plan(&t, &h, lock.as_ref(), false).unwrap();
        assert_eq!(p.action(Step::Extract), Some(&PlanAction::Update));
        assert_eq!(p.action(Step::Artifact), Some(&PlanAction::Create));
    }

    #[test]
    fn test_plan_force() {
        let dir = tempfile::tempdir().unwrap();
        let (t, h) = setup(dir.path());
        let state_dir = dir.path().join("state");
        apply(&t, &h, &state_dir);
        let p = plan(&t, &h, None, true).unwrap();
        // cached tarball is reused, tree is re-extracted
        assert_eq!(p.action(Step::Artifact), Some(&PlanAction::NoOp));
        assert_eq!(p.action(Step::Extract), Some(&PlanAction::Update));
    }

    #[test]
    fn test_plan_skips() {
        let dir = tempfile::tempdir().unwrap();
        let (mut t, h) = setup(dir.path());
        t.provision_user = false;
        t.mode = Mode::Domain;
        let p = plan(&t, &h, None, false).unwrap();
        assert_eq!(p.action(Step::Identity), Some(&PlanAction::Skip));
        assert_eq!(p.action(Step::JvmOptions), Some(&PlanAction::Skip));
    }
}
