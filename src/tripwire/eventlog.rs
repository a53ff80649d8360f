//! Append-only JSONL provenance event log, one file per instance.

use crate::core::error::{ProvisionError, Result};
use crate::core::types::{ProvenanceEvent, TimestampedEvent};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

/// Generate an ISO 8601 timestamp (UTC, second precision).
pub fn now_iso8601() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format_epoch(secs)
}

fn format_epoch(secs: u64) -> String {
    let days = secs / 86400;
    let time_secs = secs % 86400;
    let hours = time_secs / 3600;
    let minutes = (time_secs % 3600) / 60;
    let seconds = time_secs % 60;

    let mut y = 1970i64;
    let mut remaining = days as i64;
    loop {
        let year_days = if is_leap(y) { 366 } else { 365 };
        if remaining < year_days {
            break;
        }
        remaining -= year_days;
        y += 1;
    }
    let feb = if is_leap(y) { 29 } else { 28 };
    let month_days = [31, feb, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
    let mut m = 0;
    for (i, &md) in month_days.iter().enumerate() {
        if remaining < md {
            m = i + 1;
            break;
        }
        remaining -= md;
    }
    let d = remaining + 1;

    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        y, m, d, hours, minutes, seconds
    )
}

fn is_leap(y: i64) -> bool {
    (y % 4 == 0 && y % 100 != 0) || y % 400 == 0
}

/// Generate a run ID.
pub fn generate_run_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("r-{:012x}", nanos & 0xFFFF_FFFF_FFFF)
}

/// Event log path for an instance.
pub fn event_log_path(state_dir: &Path, service: &str) -> PathBuf {
    state_dir.join(service).join("events.jsonl")
}

/// Append an event to the instance's event log.
pub fn append_event(state_dir: &Path, service: &str, event: ProvenanceEvent) -> Result<()> {
    let path = event_log_path(state_dir, service);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(ProvisionError::fs("create", parent))?;
    }

    let te = TimestampedEvent {
        ts: now_iso8601(),
        event,
    };
    let json = serde_json::to_string(&te)
        .map_err(|e| ProvisionError::State(format!("JSON serialize error: {}", e)))?;

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(ProvisionError::fs("open", &path))?;

    writeln!(file, "{}", json).map_err(ProvisionError::fs("write", &path))?;

    Ok(())
}

/// Read back the event log. Lines that fail to parse are skipped.
pub fn read_events(state_dir: &Path, service: &str) -> Result<Vec<TimestampedEvent>> {
    let path = event_log_path(state_dir, service);
    let file = match std::fs::File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(ProvisionError::fs("open", &path)(e)),
    };
    let mut events = Vec::new();
    for line in std::io::BufReader::new(file).lines() {
        let line = line.map_err(ProvisionError::fs("read", &path))?;
        match serde_json::from_str::<TimestampedEvent>(&line) {
            Ok(ev) => events.push(ev),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping malformed event"),
        }
    }
    Ok(events)
}
