//! Drift detection: compare managed files and the marker on disk with the
//! hashes recorded in the instance lock.

use crate::core::error::Result;
use crate::core::marker::{self, MarkerState};
use crate::core::types::{InstanceLock, ProvenanceEvent, Step, StepStatus};
use crate::tripwire::{eventlog, hasher};
use std::path::{Path, PathBuf};

/// A single drift finding.
#[derive(Debug, Clone)]
pub struct DriftFinding {
    pub step: String,
    pub path: PathBuf,
    pub expected_hash: String,
    pub actual_hash: String,
    pub detail: String,
}

/// Check one managed file against its recorded hash.
pub fn check_file_drift(step: &str, path: &Path, expected_hash: &str) -> Option<DriftFinding> {
    let finding = |actual: String, detail: String| DriftFinding {
        step: step.to_string(),
        path: path.to_path_buf(),
        expected_hash: expected_hash.to_string(),
        actual_hash: actual,
        detail,
    };
    match hasher::hash_file_if_exists(path) {
        Ok(None) => Some(finding(
            "MISSING".to_string(),
            format!("{} does not exist", path.display()),
        )),
        Ok(Some(actual)) if actual == expected_hash => None,
        Ok(Some(actual)) => Some(finding(actual, format!("{} content changed", path.display()))),
        Err(e) => Some(finding(format!("ERROR:{}", e), format!("{} unreadable", path.display()))),
    }
}

/// Check every converged file step in `lock`, plus the marker when a
/// deployment is recorded. The artifact cache is not checked.
pub fn detect_drift(lock: &InstanceLock) -> Vec<DriftFinding> {
    let mut findings = Vec::new();

    for (step, sl) in &lock.steps {
        if !matches!(sl.status, StepStatus::Changed | StepStatus::Unchanged) {
            continue;
        }
        if step == Step::Artifact.as_str() || sl.hash.is_empty() {
            continue;
        }
        let path = match sl.details.get("path") {
            Some(serde_yaml_ng::Value::String(s)) => Path::new(s),
            _ => continue,
        };
        if let Some(f) = check_file_drift(step, path, &sl.hash) {
            findings.push(f);
        }
    }

    if let (Some(record), Some(marker_lock)) =
        (&lock.deployment, lock.steps.get(Step::Marker.as_str()))
    {
        if let Some(serde_yaml_ng::Value::String(p)) = marker_lock.details.get("path") {
            let path = PathBuf::from(p);
            let actual = match marker::read_marker(&path, &record.version) {
                MarkerState::Current => None,
                MarkerState::Absent => Some("MISSING".to_string()),
                MarkerState::Stale(v) => Some(v),
                MarkerState::Unreadable(e) => Some(format!("ERROR:{}", e)),
            };
            if let Some(actual) = actual {
                findings.push(DriftFinding {
                    step: Step::Marker.to_string(),
                    detail: format!("{} no longer records {}", path.display(), record.version),
                    path,
                    expected_hash: record.version.clone(),
                    actual_hash: actual,
                });
            }
        }
    }

    findings
}

/// Append a `DriftDetected` event per finding.
pub fn record_drift(state_dir: &Path, service: &str, findings: &[DriftFinding]) -> Result<()> {
    for f in findings {
        eventlog::append_event(
            state_dir,
            service,
            ProvenanceEvent::DriftDetected {
                service: service.to_string(),
                step: f.step.clone(),
                expected_hash: f.expected_hash.clone(),
                actual_hash: f.actual_hash.clone(),
            },
        )?;
    }
    Ok(())
}
