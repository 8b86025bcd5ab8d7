//! Runtime configuration read from the environment.
//!
//! The remote endpoint is optional: without both `PURSUIT_REMOTE_URL` and
//! `PURSUIT_REMOTE_KEY` the tracker runs local-only. Numeric tunables are
//! range-checked and rejected when out of bounds.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::admin::AdminSettings;
use crate::cache::DEFAULT_TTL;
use crate::queue::QueueSettings;
use crate::remote::{RetryPolicy, DEFAULT_PAGE_SIZE};
use crate::util::{is_http_url, non_blank};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Remote backend endpoint and its public API key.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub url: String,
    pub api_key: String,
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RemoteConfig")
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Database file; `None` keeps the store in memory.
    pub db_path: Option<PathBuf>,
    pub remote: Option<RemoteConfig>,
    pub cache_ttl: Duration,
    pub remote_timeout: Duration,
    pub remote_max_attempts: u32,
    pub queue_max_retries: u32,
    pub queue_drain_interval: Duration,
    pub queue_min_drain_interval: Duration,
    pub pull_page_size: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        let queue = QueueSettings::default();
        Self {
            db_path: None,
            remote: None,
            cache_ttl: DEFAULT_TTL,
            remote_timeout: retry.timeout,
            remote_max_attempts: retry.max_attempts,
            queue_max_retries: queue.max_retries,
            queue_drain_interval: Duration::from_secs(30),
            queue_min_drain_interval: queue.min_drain_interval,
            pull_page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl TrackerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let db_path = optional_trimmed(&lookup, "PURSUIT_DB_PATH").map(PathBuf::from);
        let remote = parse_remote_config(&lookup);

        let cache_ttl_secs = bounded(&lookup, "PURSUIT_CACHE_TTL_SECS", defaults.cache_ttl.as_secs(), 1..=3_600)?;
        let remote_timeout_ms = bounded(
            &lookup,
            "PURSUIT_REMOTE_TIMEOUT_MS",
            u64::try_from(defaults.remote_timeout.as_millis()).unwrap_or(10_000),
            100..=60_000,
        )?;
        let remote_max_attempts = bounded(&lookup, "PURSUIT_REMOTE_MAX_ATTEMPTS", defaults.remote_max_attempts, 1..=10)?;
        let queue_max_retries = bounded(&lookup, "PURSUIT_QUEUE_MAX_RETRIES", defaults.queue_max_retries, 1..=50)?;
        let drain_interval_secs = bounded(
            &lookup,
            "PURSUIT_QUEUE_DRAIN_INTERVAL_SECS",
            defaults.queue_drain_interval.as_secs(),
            1..=3_600,
        )?;
        let min_drain_interval_ms = bounded(
            &lookup,
            "PURSUIT_QUEUE_MIN_DRAIN_INTERVAL_MS",
            u64::try_from(defaults.queue_min_drain_interval.as_millis()).unwrap_or(2_000),
            0..=60_000,
        )?;
        let pull_page_size = bounded(&lookup, "PURSUIT_PULL_PAGE_SIZE", defaults.pull_page_size, 1..=1_000)?;

        Ok(Self {
            db_path,
            remote,
            cache_ttl: Duration::from_secs(cache_ttl_secs),
            remote_timeout: Duration::from_millis(remote_timeout_ms),
            remote_max_attempts,
            queue_max_retries,
            queue_drain_interval: Duration::from_secs(drain_interval_secs),
            queue_min_drain_interval: Duration::from_millis(min_drain_interval_ms),
            pull_page_size,
        })
    }

    pub const fn is_local_only(&self) -> bool {
        self.remote.is_none()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: self.remote_timeout,
            max_attempts: self.remote_max_attempts,
            ..RetryPolicy::default()
        }
    }

    pub fn queue_settings(&self) -> QueueSettings {
        QueueSettings {
            max_retries: self.queue_max_retries,
            min_drain_interval: self.queue_min_drain_interval,
            ..QueueSettings::default()
        }
    }

    pub fn admin_settings(&self) -> AdminSettings {
        AdminSettings::default()
    }
}

/// Both values or nothing. A partial or malformed pair is logged and ignored.
fn parse_remote_config(lookup: impl Fn(&str) -> Option<String>) -> Option<RemoteConfig> {
    let url = optional_trimmed(&lookup, "PURSUIT_REMOTE_URL");
    let api_key = optional_trimmed(&lookup, "PURSUIT_REMOTE_KEY");

    match (url, api_key) {
        (None, None) => None,
        (Some(url), Some(api_key)) => {
            if is_http_url(&url) {
                Some(RemoteConfig {
                    url: url.trim_end_matches('/').to_string(),
                    api_key,
                })
            } else {
                tracing::warn!("PURSUIT_REMOTE_URL must start with http:// or https://; running local-only");
                None
            }
        }
        (Some(_), None) => {
            tracing::warn!("PURSUIT_REMOTE_URL is set without PURSUIT_REMOTE_KEY; running local-only");
            None
        }
        (None, Some(_)) => {
            tracing::warn!("PURSUIT_REMOTE_KEY is set without PURSUIT_REMOTE_URL; running local-only");
            None
        }
    }
}

fn bounded<T>(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
    range: RangeInclusive<T>,
) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + fmt::Display + Copy,
{
    let Some(raw) = optional_trimmed(lookup, name) else {
        return Ok(default);
    };
    let invalid = || {
        ConfigError::Invalid(format!(
            "{name} must be an integer in [{}, {}]",
            range.start(),
            range.end()
        ))
    };
    let value = raw.parse::<T>().map_err(|_| invalid())?;
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(invalid())
    }
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    non_blank(lookup(name))
}
