//! Read-only cross-account rollups for operational reporting.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDate, Weekday};
use serde::Serialize;

use crate::db::OrderBy;
use crate::error::RemoteError;
use crate::models::{AccountKey, EntityType, Record};
use crate::remote::{RemoteRecord, RemoteSyncClient};
use crate::store::LocalStore;
use crate::util::unix_millis_now;
use crate::Result;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Entity types the report reads.
const SOURCES: [EntityType; 3] = [
    EntityType::Sessions,
    EntityType::AnalyticsEvents,
    EntityType::Applications,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdminSettings {
    /// Rows per unscoped page
    pub page_size: u32,
    /// Upper bound on rows read per entity type
    pub max_rows: u32,
}

impl Default for AdminSettings {
    fn default() -> Self {
        Self {
            page_size: 1000,
            max_rows: 20_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportSource {
    Remote,
    /// Remote unreachable; only this device's data was counted.
    LocalFallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ActiveAccounts {
    pub last_day: u64,
    pub last_week: u64,
    pub last_month: u64,
}

/// Accounts grouped by the week of their first activity
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetentionCohort {
    /// Monday of the cohort week (UTC)
    pub week_start: NaiveDate,
    pub accounts: u64,
    /// Active again in the week after the cohort week
    pub retained_week1: u64,
    /// Active again four weeks after the cohort week
    pub retained_week4: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ReportTotals {
    pub accounts: u64,
    pub sessions: u64,
    pub events: u64,
    pub applications: u64,
    /// Remote rows without a `user_id`, left out of every account count
    pub unowned_rows: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdminReport {
    pub source: ReportSource,
    pub generated_at: i64,
    pub active_accounts: ActiveAccounts,
    pub feature_usage: BTreeMap<String, u64>,
    pub device_mix: BTreeMap<String, u64>,
    pub retention: Vec<RetentionCohort>,
    pub totals: ReportTotals,
    /// Some entity type hit the row bound, so counts are partial.
    pub truncated: bool,
}

#[derive(Clone)]
pub struct AdminAggregator {
    client: Option<RemoteSyncClient>,
    store: LocalStore,
    settings: AdminSettings,
}

impl AdminAggregator {
    pub const fn new(client: Option<RemoteSyncClient>, store: LocalStore, settings: AdminSettings) -> Self {
        Self {
            client,
            store,
            settings,
        }
    }

    /// Build the report from the remote, or from local data if that fails.
    pub async fn report(&self) -> Result<AdminReport> {
        if let Some(client) = &self.client {
            match self.fetch_remote(client).await {
                Ok((rows, truncated)) => {
                    tracing::info!(rows = rows.len(), truncated, "Built admin report from remote");
                    return Ok(rollup(ReportSource::Remote, &rows, truncated, unix_millis_now()));
                }
                Err(error) => {
                    tracing::warn!("Admin report falling back to local data: {error}");
                }
            }
        }
        self.local_report().await
    }

    async fn fetch_remote(&self, client: &RemoteSyncClient) -> std::result::Result<(Vec<RemoteRecord>, bool), RemoteError> {
        let page_size = self.settings.page_size.max(1);
        let mut rows = Vec::new();
        let mut truncated = false;

        for entity in SOURCES {
            let mut offset = 0;
            loop {
                let page = client.pull_unscoped(entity, page_size, offset).await?;
                let fetched = u32::try_from(page.len()).unwrap_or(u32::MAX);
                rows.extend(page);
                offset = offset.saturating_add(fetched);
                if fetched < page_size {
                    break;
                }
                if offset >= self.settings.max_rows {
                    truncated = true;
                    break;
                }
            }
        }
        Ok((rows, truncated))
    }

    async fn local_report(&self) -> Result<AdminReport> {
        let mut rows = Vec::new();
        for entity in SOURCES {
            rows.extend(
                self.store
                    .list(entity, OrderBy::CreatedDesc)
                    .await?
                    .into_iter()
                    .map(|record| RemoteRecord {
                        account_key: None,
                        synced_at: None,
                        record,
                    }),
            );
        }
        Ok(rollup(ReportSource::LocalFallback, &rows, false, unix_millis_now()))
    }
}

/// Compute every rollup from already-fetched rows.
fn rollup(source: ReportSource, rows: &[RemoteRecord], truncated: bool, now: i64) -> AdminReport {
    let mut activity: HashMap<Option<AccountKey>, Vec<i64>> = HashMap::new();
    let mut feature_usage = BTreeMap::new();
    let mut device_mix = BTreeMap::new();
    let mut totals = ReportTotals::default();

    for row in rows {
        let record = &row.record;
        // Local rows carry no owner and all belong to this device's account.
        if row.account_key.is_some() || source == ReportSource::LocalFallback {
            activity
                .entry(row.account_key)
                .or_default()
                .push(record.created_at);
        } else {
            totals.unowned_rows += 1;
        }

        match record.entity {
            EntityType::Sessions => {
                totals.sessions += 1;
                *device_mix.entry(label(record, "deviceType")).or_insert(0) += 1;
            }
            EntityType::AnalyticsEvents => {
                totals.events += 1;
                *feature_usage.entry(label(record, "eventName")).or_insert(0) += 1;
            }
            EntityType::Applications => totals.applications += 1,
            _ => {}
        }
    }
    totals.accounts = activity.len() as u64;

    let active_within = |days: i64| {
        activity
            .values()
            .filter(|times| times.iter().any(|&at| at >= now - days * DAY_MS))
            .count() as u64
    };
    let active_accounts = ActiveAccounts {
        last_day: active_within(1),
        last_week: active_within(7),
        last_month: active_within(30),
    };

    AdminReport {
        source,
        generated_at: now,
        active_accounts,
        feature_usage,
        device_mix,
        retention: retention(&activity),
        totals,
        truncated,
    }
}

fn retention(activity: &HashMap<Option<AccountKey>, Vec<i64>>) -> Vec<RetentionCohort> {
    let mut cohorts: BTreeMap<NaiveDate, RetentionCohort> = BTreeMap::new();

    for times in activity.values() {
        let weeks: Vec<NaiveDate> = times.iter().filter_map(|&at| week_start(at)).collect();
        let Some(&first) = weeks.iter().min() else {
            continue;
        };
        let active_in = |offset: i64| {
            weeks
                .iter()
                .any(|week| (*week - first).num_days() == offset * 7)
        };

        let cohort = cohorts.entry(first).or_insert(RetentionCohort {
            week_start: first,
            accounts: 0,
            retained_week1: 0,
            retained_week4: 0,
        });
        cohort.accounts += 1;
        if active_in(1) {
            cohort.retained_week1 += 1;
        }
        if active_in(4) {
            cohort.retained_week4 += 1;
        }
    }
    cohorts.into_values().collect()
}

fn week_start(unix_ms: i64) -> Option<NaiveDate> {
    let date = DateTime::from_timestamp_millis(unix_ms)?.date_naive();
    Some(date.week(Weekday::Mon).first_day())
}

fn label(record: &Record, field: &str) -> String {
    record
        .field_str(field)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or("unknown")
        .to_string()
}
