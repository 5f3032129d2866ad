//! Configuration for the controller.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::TimeDelta;
use leftover_api::FIELD_OWNER;

/// Controller configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins when set.
    pub log_level: String,

    /// How often the worker lists requests to find due passes.
    pub resync_interval: Duration,

    /// Deadline for one reconciliation pass.
    pub pass_timeout: Duration,

    /// Retry delay after a failed pass.
    pub failure_backoff: Duration,

    /// Steady interval for requests without a valid `requeueMinutes`.
    pub default_requeue: Duration,

    /// Spot price history lookback.
    pub quote_window: TimeDelta,

    /// Selector scoring window.
    pub selection_batch_size: usize,

    /// Passes of different requests allowed to run at once.
    pub max_concurrent_passes: usize,

    /// Field manager for NodePool applies.
    pub field_owner: String,

    /// Capacity snapshot served in place of the cloud APIs.
    pub snapshot_file: Option<PathBuf>,

    /// Node classes and requests loaded into the in-memory store at startup.
    pub seed_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            resync_interval: Duration::from_secs(5),
            pass_timeout: Duration::from_secs(120),
            failure_backoff: Duration::from_secs(60),
            default_requeue: Duration::from_secs(7 * 60),
            quote_window: TimeDelta::minutes(10),
            selection_batch_size: 5,
            max_concurrent_passes: 4,
            field_owner: FIELD_OWNER.to_string(),
            snapshot_file: None,
            seed_file: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, falling back to defaults for
    /// unset keys. Set but unparsable values are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let log_level = lookup("LEFTOVER_LOG_LEVEL").unwrap_or(defaults.log_level);

        let resync_secs: u64 = parse_var(&lookup, "LEFTOVER_RESYNC_INTERVAL_SECS")?
            .unwrap_or(defaults.resync_interval.as_secs());
        let pass_timeout_secs: u64 = parse_var(&lookup, "LEFTOVER_PASS_TIMEOUT_SECS")?
            .unwrap_or(defaults.pass_timeout.as_secs());
        let backoff_secs: u64 = parse_var(&lookup, "LEFTOVER_FAILURE_BACKOFF_SECS")?
            .unwrap_or(defaults.failure_backoff.as_secs());
        let requeue_minutes: u64 = parse_var(&lookup, "LEFTOVER_DEFAULT_REQUEUE_MINUTES")?
            .unwrap_or(defaults.default_requeue.as_secs() / 60);
        let window_minutes: i64 = parse_var(&lookup, "LEFTOVER_QUOTE_WINDOW_MINUTES")?
            .unwrap_or(defaults.quote_window.num_minutes());
        let selection_batch_size = parse_var(&lookup, "LEFTOVER_SELECTION_BATCH_SIZE")?
            .unwrap_or(defaults.selection_batch_size);
        let max_concurrent_passes: usize = parse_var(&lookup, "LEFTOVER_MAX_CONCURRENT_PASSES")?
            .unwrap_or(defaults.max_concurrent_passes);

        let default_requeue = requeue_minutes
            .max(1)
            .checked_mul(60)
            .map(Duration::from_secs)
            .context("LEFTOVER_DEFAULT_REQUEUE_MINUTES is too large")?;
        let quote_window = TimeDelta::try_minutes(window_minutes)
            .context("LEFTOVER_QUOTE_WINDOW_MINUTES is out of range")?;

        let field_owner = lookup("LEFTOVER_FIELD_OWNER")
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.field_owner);
        let snapshot_file = lookup("LEFTOVER_SNAPSHOT_FILE")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        let seed_file = lookup("LEFTOVER_SEED_FILE")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        Ok(Self {
            log_level,
            resync_interval: Duration::from_secs(resync_secs.max(1)),
            pass_timeout: Duration::from_secs(pass_timeout_secs.max(1)),
            failure_backoff: Duration::from_secs(backoff_secs),
            default_requeue,
            quote_window,
            selection_batch_size,
            max_concurrent_passes: max_concurrent_passes.max(1),
            field_owner,
            snapshot_file,
            seed_file,
        })
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("invalid value {raw:?} for {key}")),
    }
}
