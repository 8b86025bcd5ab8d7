use std::path::PathBuf;

use pursuit_core::conflict::ReconcileReport;
use pursuit_core::{RefreshReport, Tracker};
use serde::Serialize;

use crate::auth::SessionStore;
use crate::commands::common::{drain_to_item, open_tracker, print_json, DrainItem};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct ReconcileItem {
    pub entity: String,
    pub inserted: u32,
    pub remote_won: u32,
    pub local_kept: u32,
    pub requeued: u32,
    pub unchanged: u32,
}

#[derive(Debug, Serialize)]
pub struct RefreshItem {
    pub drained: Vec<DrainItem>,
    pub reconciled: Vec<ReconcileItem>,
}

pub async fn run_refresh(as_json: bool, db_path: Option<PathBuf>, sessions: &SessionStore) -> Result<(), CliError> {
    let tracker = open_tracker(db_path, sessions).await?;
    let result = refresh_tracker(&tracker).await;
    tracker.teardown().await;
    let report = result?;

    let item = refresh_to_item(&report);
    if as_json {
        return print_json(&item);
    }

    for line in format_refresh_lines(&item) {
        println!("{line}");
    }
    println!("Refresh completed");
    Ok(())
}

pub async fn refresh_tracker(tracker: &Tracker) -> Result<RefreshReport, CliError> {
    if tracker.is_local_only() {
        return Err(CliError::SyncNotConfigured("refresh"));
    }
    if tracker.auth_state().active_session().is_none() {
        tracing::warn!("No active session; queued changes stay local");
    }
    Ok(tracker.force_refresh().await?)
}

pub fn refresh_to_item(report: &RefreshReport) -> RefreshItem {
    RefreshItem {
        drained: report.drained.iter().map(drain_to_item).collect(),
        reconciled: report
            .reconciled
            .iter()
            .map(|(entity, reconcile)| reconcile_to_item(&entity.to_string(), reconcile))
            .collect(),
    }
}

fn reconcile_to_item(entity: &str, report: &ReconcileReport) -> ReconcileItem {
    ReconcileItem {
        entity: entity.to_string(),
        inserted: report.inserted,
        remote_won: report.remote_won,
        local_kept: report.local_kept,
        requeued: report.requeued,
        unchanged: report.unchanged,
    }
}

/// One line per entity type that pushed or pulled anything.
pub fn format_refresh_lines(item: &RefreshItem) -> Vec<String> {
    let mut lines = Vec::new();
    for drain in &item.drained {
        if drain.applied + drain.retried + drain.abandoned == 0 && drain.stopped.is_none() {
            continue;
        }
        let mut line = format!(
            "push {:<16} applied={} retried={} abandoned={}",
            drain.entity, drain.applied, drain.retried, drain.abandoned
        );
        if let Some(stopped) = &drain.stopped {
            line.push_str(&format!("  ({stopped})"));
        }
        lines.push(line);
    }
    for reconcile in &item.reconciled {
        if reconcile.inserted + reconcile.remote_won + reconcile.local_kept == 0 {
            continue;
        }
        lines.push(format!(
            "pull {:<16} inserted={} remote_won={} local_kept={} requeued={}",
            reconcile.entity, reconcile.inserted, reconcile.remote_won, reconcile.local_kept, reconcile.requeued
        ));
    }
    if lines.is_empty() {
        lines.push("Everything up to date.".to_string());
    }
    lines
}
