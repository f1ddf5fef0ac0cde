//! Sync engine configuration.
//!
//! `SyncSettings::default()` carries the stock timings. Embedders can override
//! individual values through `TABKEEP_*` environment variables.

use std::env;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::remote::DEFAULT_SYNC_FILE_NAME;
use crate::util::normalize_text_option;

const ENV_DEBOUNCE_SECS: &str = "TABKEEP_SYNC_DEBOUNCE_SECS";
const ENV_FALLBACK_SECS: &str = "TABKEEP_SYNC_FALLBACK_SECS";
const ENV_RECENT_SECS: &str = "TABKEEP_SYNC_RECENT_SECS";
const ENV_TOMBSTONE_RETENTION_DAYS: &str = "TABKEEP_TOMBSTONE_RETENTION_DAYS";
const ENV_SYNC_FILE_NAME: &str = "TABKEEP_SYNC_FILE_NAME";

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Retry policy applied to each remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl RetryPolicy {
    /// Delay slept before attempt `attempt` (0-based): `initial_delay * 2^attempt`.
    #[must_use]
    pub fn delay_before(&self, attempt: u32) -> Duration {
        self.initial_delay
            .saturating_mul(2_u32.saturating_pow(attempt))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
        }
    }
}

/// Timings and options of a `SyncSession`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Delay of a debounced `schedule_sync` request.
    pub debounce_delay: Duration,
    /// Scheduled syncs are skipped when the last one finished within this window.
    pub recent_window: Duration,
    /// Interval of the periodic fallback sync.
    pub fallback_interval: Duration,
    pub retry: RetryPolicy,
    /// Drop tombstones older than this after each merge. `None` keeps them forever.
    pub tombstone_retention: Option<Duration>,
    /// Name of the sync file in the remote store.
    pub remote_file_name: String,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            debounce_delay: Duration::from_secs(60),
            recent_window: Duration::from_secs(60),
            fallback_interval: Duration::from_secs(20 * 60),
            retry: RetryPolicy::default(),
            tombstone_retention: None,
            remote_file_name: DEFAULT_SYNC_FILE_NAME.to_string(),
        }
    }
}

impl SyncSettings {
    /// Defaults with overrides from the process environment.
    pub fn from_env() -> Result<Self> {
        parse_settings(|key| env::var(key).ok())
    }
}

fn parse_settings(lookup: impl Fn(&str) -> Option<String>) -> Result<SyncSettings> {
    let mut settings = SyncSettings::default();

    if let Some(secs) = parse_u64(&lookup, ENV_DEBOUNCE_SECS)? {
        settings.debounce_delay = Duration::from_secs(secs);
    }
    if let Some(secs) = parse_u64(&lookup, ENV_RECENT_SECS)? {
        settings.recent_window = Duration::from_secs(secs);
    }
    if let Some(secs) = parse_u64(&lookup, ENV_FALLBACK_SECS)? {
        if secs == 0 {
            return Err(Error::InvalidInput(format!(
                "{ENV_FALLBACK_SECS} must be greater than zero"
            )));
        }
        settings.fallback_interval = Duration::from_secs(secs);
    }
    if let Some(days) = parse_u64(&lookup, ENV_TOMBSTONE_RETENTION_DAYS)? {
        settings.tombstone_retention = Some(Duration::from_secs(days.saturating_mul(SECS_PER_DAY)));
    }
    if let Some(name) = normalize_text_option(lookup(ENV_SYNC_FILE_NAME)) {
        settings.remote_file_name = name;
    }

    Ok(settings)
}

fn parse_u64(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<u64>> {
    let Some(raw) = normalize_text_option(lookup(key)) else {
        return Ok(None);
    };

    raw.parse()
        .map(Some)
        .map_err(|_| Error::InvalidInput(format!("{key} must be a non-negative integer, got {raw:?}")))
}
