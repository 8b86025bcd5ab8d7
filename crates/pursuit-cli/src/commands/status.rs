use std::path::PathBuf;

use pursuit_core::auth::AuthState;
use pursuit_core::cache::CacheStatus;
use pursuit_core::queue::QueueSnapshot;
use pursuit_core::Tracker;
use serde::Serialize;

use crate::auth::SessionStore;
use crate::commands::common::{
    format_sync_conflict_lines, format_sync_timestamp, open_tracker, print_json,
    sync_conflict_to_item, SyncConflictItem,
};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct QueueEntityItem {
    pub entity: String,
    pub pending: u64,
    pub in_flight: u64,
}

#[derive(Debug, Serialize)]
pub struct FailureItem {
    pub entity: String,
    pub record_id: String,
    pub operation: String,
    pub attempts: u32,
    pub error: String,
    pub failed_at_iso: String,
}

#[derive(Debug, Serialize)]
pub struct StatusItem {
    pub local_only: bool,
    pub auth: AuthState,
    pub pending: u64,
    pub in_flight: u64,
    pub abandoned: u64,
    pub queue: Vec<QueueEntityItem>,
    pub recent_failures: Vec<FailureItem>,
    pub cache_entries: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_ttl_secs: u64,
    pub conflicts: Vec<SyncConflictItem>,
}

pub async fn run_status(
    conflict_limit: u32,
    as_json: bool,
    db_path: Option<PathBuf>,
    sessions: &SessionStore,
) -> Result<(), CliError> {
    let tracker = open_tracker(db_path, sessions).await?;
    let result = collect_status(&tracker, conflict_limit).await;
    tracker.teardown().await;
    let status = result?;

    if as_json {
        return print_json(&status);
    }
    for line in format_status_lines(&status) {
        println!("{line}");
    }
    Ok(())
}

pub async fn collect_status(tracker: &Tracker, conflict_limit: u32) -> Result<StatusItem, CliError> {
    let snapshot = tracker.queue_snapshot().await?;
    let conflicts = tracker.recent_conflicts(conflict_limit).await?;
    Ok(status_item(
        tracker.is_local_only(),
        tracker.auth_state(),
        &snapshot,
        tracker.cache_status(),
        conflicts.iter().map(sync_conflict_to_item).collect(),
    ))
}

fn status_item(
    local_only: bool,
    auth: AuthState,
    snapshot: &QueueSnapshot,
    cache: CacheStatus,
    conflicts: Vec<SyncConflictItem>,
) -> StatusItem {
    StatusItem {
        local_only,
        auth,
        pending: snapshot.pending,
        in_flight: snapshot.in_flight,
        abandoned: snapshot.abandoned,
        queue: snapshot
            .entities
            .iter()
            .map(|count| QueueEntityItem {
                entity: count.entity.to_string(),
                pending: count.pending,
                in_flight: count.in_flight,
            })
            .collect(),
        recent_failures: snapshot
            .recent_failures
            .iter()
            .map(|failure| FailureItem {
                entity: failure.entity.to_string(),
                record_id: failure.record_id.clone(),
                operation: failure.operation.to_string(),
                attempts: failure.attempts,
                error: failure.error.clone(),
                failed_at_iso: format_sync_timestamp(failure.failed_at),
            })
            .collect(),
        cache_entries: cache.entries,
        cache_hits: cache.hits,
        cache_misses: cache.misses,
        cache_ttl_secs: cache.ttl.as_secs(),
        conflicts,
    }
}

fn describe_auth(auth: &AuthState) -> String {
    match auth {
        AuthState::SignedOut => "signed out".to_string(),
        AuthState::SignedIn { session_id } => format!("signed in ({session_id})"),
        AuthState::ReauthRequired { session_id } => format!("re-authentication required ({session_id})"),
    }
}

pub fn format_status_lines(status: &StatusItem) -> Vec<String> {
    let mut lines = vec![
        format!(
            "Sync:      {}",
            if status.local_only { "local-only" } else { "remote configured" }
        ),
        format!("Auth:      {}", describe_auth(&status.auth)),
        format!(
            "Queue:     {} pending, {} in flight, {} abandoned",
            status.pending, status.in_flight, status.abandoned
        ),
    ];
    for entity in &status.queue {
        lines.push(format!(
            "  {:<16} pending={} in_flight={}",
            entity.entity, entity.pending, entity.in_flight
        ));
    }
    lines.push(format!(
        "Cache:     {} entries, ttl {}s",
        status.cache_entries, status.cache_ttl_secs
    ));

    if !status.recent_failures.is_empty() {
        lines.push("Recent failures:".to_string());
        for failure in &status.recent_failures {
            lines.push(format!(
                "  {}  {} {} record={} attempts={}  {}",
                failure.failed_at_iso,
                failure.operation,
                failure.entity,
                failure.record_id,
                failure.attempts,
                failure.error
            ));
        }
    }

    if status.conflicts.is_empty() {
        lines.push("No sync conflicts recorded.".to_string());
    } else {
        lines.push("Recent conflicts:".to_string());
        lines.extend(
            format_sync_conflict_lines(&status.conflicts)
                .into_iter()
                .map(|line| format!("  {line}")),
        );
    }
    lines
}
