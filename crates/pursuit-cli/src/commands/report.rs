use std::path::PathBuf;

use pursuit_core::admin::{AdminReport, ReportSource};

use crate::auth::SessionStore;
use crate::commands::common::{format_sync_timestamp, open_tracker, print_json};
use crate::error::CliError;

pub async fn run_report(as_json: bool, db_path: Option<PathBuf>, sessions: &SessionStore) -> Result<(), CliError> {
    let tracker = open_tracker(db_path, sessions).await?;
    let result = tracker.admin().await;
    tracker.teardown().await;
    let report = result?;

    if as_json {
        return print_json(&report);
    }
    for line in format_report_lines(&report) {
        println!("{line}");
    }
    Ok(())
}

pub fn format_report_lines(report: &AdminReport) -> Vec<String> {
    let source = match report.source {
        ReportSource::Remote => "remote",
        ReportSource::LocalFallback => "local fallback (remote unreachable)",
    };
    let mut lines = vec![
        format!("Report generated {} from {source}", format_sync_timestamp(report.generated_at)),
        format!(
            "Accounts:  {} total; active {} day / {} week / {} month",
            report.totals.accounts,
            report.active_accounts.last_day,
            report.active_accounts.last_week,
            report.active_accounts.last_month
        ),
        format!(
            "Rows:      {} sessions, {} events, {} applications",
            report.totals.sessions, report.totals.events, report.totals.applications
        ),
    ];
    if report.totals.unowned_rows > 0 {
        lines.push(format!(
            "{} rows had no owning account and were left out of account counts.",
            report.totals.unowned_rows
        ));
    }
    if report.truncated {
        lines.push("Counts are partial: the row limit was reached.".to_string());
    }

    push_breakdown(&mut lines, "Feature usage", &report.feature_usage);
    push_breakdown(&mut lines, "Device mix", &report.device_mix);

    if !report.retention.is_empty() {
        lines.push("Retention:".to_string());
        for cohort in &report.retention {
            lines.push(format!(
                "  week of {}  accounts={} week1={} week4={}",
                cohort.week_start, cohort.accounts, cohort.retained_week1, cohort.retained_week4
            ));
        }
    }
    lines
}

fn push_breakdown(lines: &mut Vec<String>, title: &str, counts: &std::collections::BTreeMap<String, u64>) {
    if counts.is_empty() {
        return;
    }
    lines.push(format!("{title}:"));
    for (label, count) in counts {
        lines.push(format!("  {label:<24} {count}"));
    }
}
