use std::path::PathBuf;

use pursuit_core::store::StorageHealth;
use serde::Serialize;

use crate::auth::SessionStore;
use crate::commands::common::{display_path, format_bytes, open_tracker, print_json};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct HealthItem {
    pub path: String,
    pub schema_version: i32,
    pub used_bytes: u64,
    pub available_bytes: u64,
    pub page_size: u64,
    pub page_count: u64,
    pub recent_errors: usize,
    pub last_error: Option<String>,
}

pub async fn run_health(as_json: bool, db_path: Option<PathBuf>, sessions: &SessionStore) -> Result<(), CliError> {
    let tracker = open_tracker(db_path, sessions).await?;
    let result = tracker.storage_health().await;
    tracker.teardown().await;
    let item = health_to_item(&result?);

    if as_json {
        return print_json(&item);
    }
    for line in format_health_lines(&item) {
        println!("{line}");
    }
    Ok(())
}

pub fn health_to_item(health: &StorageHealth) -> HealthItem {
    HealthItem {
        path: display_path(health.path.as_deref()),
        schema_version: health.schema_version,
        used_bytes: health.used_bytes,
        available_bytes: health.available_bytes,
        page_size: health.usage.page_size,
        page_count: health.usage.page_count,
        recent_errors: health.recent_errors,
        last_error: health.last_error.clone(),
    }
}

pub fn format_health_lines(item: &HealthItem) -> Vec<String> {
    let mut lines = vec![
        format!("Database:  {} (schema v{})", item.path, item.schema_version),
        format!(
            "Storage:   {} used, {} available",
            format_bytes(item.used_bytes),
            format_bytes(item.available_bytes)
        ),
        format!("Errors:    {} in the last hour", item.recent_errors),
    ];
    if let Some(last_error) = &item.last_error {
        lines.push(format!("Last error: {last_error}"));
    }
    lines
}
