use std::path::{Path, PathBuf};

use pursuit_core::config::TrackerConfig;
use pursuit_core::models::SyncConflict;
use pursuit_core::queue::{DrainReport, DrainStop};
use pursuit_core::Tracker;
use serde::Serialize;

use crate::auth::{resolve_session, SessionStore};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct SyncConflictItem {
    pub id: i64,
    pub entity: String,
    pub record_id: String,
    pub local_updated_at: i64,
    pub remote_updated_at: i64,
    pub winner: String,
    pub resolved_at: i64,
    pub resolved_at_iso: String,
    pub strategy: String,
}

#[derive(Debug, Serialize)]
pub struct DrainItem {
    pub entity: String,
    pub skipped: bool,
    pub applied: u32,
    pub retried: u32,
    pub abandoned: u32,
    pub stopped: Option<String>,
}

/// Open the tracker and hand it the stored session, if any.
pub async fn open_tracker(db_path: Option<PathBuf>, sessions: &SessionStore) -> Result<Tracker, CliError> {
    let mut config = TrackerConfig::from_env()?;
    let path = resolve_db_path(db_path, config.db_path.take())?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    config.db_path = Some(path);

    let tracker = Tracker::init(config, None).await?;
    if let Some(session) = resolve_session(sessions)? {
        tracker.sign_in(&session).await?;
    }
    Ok(tracker)
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>, configured: Option<PathBuf>) -> Result<PathBuf, CliError> {
    match cli_db_path.or(configured) {
        Some(path) => Ok(path),
        None => default_db_path(),
    }
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("pursuit").join("pursuit.db"))
        .ok_or(CliError::DataDir)
}

pub fn display_path(path: Option<&Path>) -> String {
    path.map_or_else(|| "(in memory)".to_string(), |path| path.display().to_string())
}

pub fn sync_conflict_to_item(conflict: &SyncConflict) -> SyncConflictItem {
    SyncConflictItem {
        id: conflict.id,
        entity: conflict.entity.to_string(),
        record_id: conflict.record_id.clone(),
        local_updated_at: conflict.local_updated_at,
        remote_updated_at: conflict.remote_updated_at,
        winner: conflict.winner.as_str().to_string(),
        resolved_at: conflict.resolved_at,
        resolved_at_iso: format_sync_timestamp(conflict.resolved_at),
        strategy: conflict.strategy.clone(),
    }
}

pub fn format_sync_conflict_lines(conflicts: &[SyncConflictItem]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            format!(
                "{}  {:<6}  {:<16} record={}  local={} remote={}",
                conflict.resolved_at_iso,
                conflict.winner,
                conflict.entity,
                conflict.record_id,
                conflict.local_updated_at,
                conflict.remote_updated_at
            )
        })
        .collect()
}

pub fn drain_to_item(report: &DrainReport) -> DrainItem {
    DrainItem {
        entity: report.entity.to_string(),
        skipped: report.skipped,
        applied: report.applied,
        retried: report.retried,
        abandoned: report.abandoned,
        stopped: report.stopped.as_ref().map(describe_stop),
    }
}

pub fn describe_stop(stop: &DrainStop) -> String {
    match stop {
        DrainStop::Unresolved => "waiting for sign-in or connectivity".to_string(),
        DrainStop::Auth => "session rejected; sign in again".to_string(),
        DrainStop::Backoff => "waiting out retry delay".to_string(),
        DrainStop::Transient(error) => format!("retry scheduled: {error}"),
        DrainStop::Storage(message) => format!("local storage error: {message}"),
    }
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

pub fn print_json(value: &impl Serialize) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
