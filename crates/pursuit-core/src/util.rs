//! Small helpers shared by config, the REST backend and the queue.

use std::time::Duration;

/// Longest backend body excerpt kept in an error message
pub const ERROR_EXCERPT_CHARS: usize = 180;

/// Trimmed value, or `None` when absent or blank.
pub fn non_blank(value: Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

pub fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// First [`ERROR_EXCERPT_CHARS`] characters of a response body.
pub fn excerpt(body: &str) -> String {
    body.trim().chars().take(ERROR_EXCERPT_CHARS).collect()
}

/// Current Unix timestamp in milliseconds.
pub fn unix_millis_now() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// `at` plus `delay`, saturating instead of overflowing.
pub fn millis_after(at: i64, delay: Duration) -> i64 {
    at.saturating_add(i64::try_from(delay.as_millis()).unwrap_or(i64::MAX))
}
