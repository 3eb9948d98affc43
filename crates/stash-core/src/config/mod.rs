//! Pipeline tuning loaded from the environment.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use thiserror::Error;

use crate::autosave::DEFAULT_DEBOUNCE;
use crate::drain::DEFAULT_CONFLICT_RETRY_CAP;
use crate::retry::RetryPolicy;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PipelineConfig {
    pub debounce: Duration,
    pub retry: RetryPolicy,
    pub drain_interval: Duration,
    pub conflict_retry_cap: u32,
    /// How often a connectivity probe runs, when one is configured
    pub probe_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            retry: RetryPolicy::default(),
            drain_interval: Duration::from_secs(30),
            conflict_retry_cap: DEFAULT_CONFLICT_RETRY_CAP,
            probe_interval: Duration::from_secs(15),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    /// Build from a variable lookup; unset or blank variables keep their defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let debounce_ms = ranged(&lookup, "STASH_DEBOUNCE_MS", 3_000, 100..=60_000)?;
        let max_attempts = ranged(&lookup, "STASH_MAX_ATTEMPTS", 3, 1..=10)?;
        let retry_base_ms = ranged(&lookup, "STASH_RETRY_BASE_MS", 1_000, 10..=60_000)?;
        let drain_interval_secs = ranged(&lookup, "STASH_DRAIN_INTERVAL_SECS", 30, 1..=3_600)?;
        let conflict_retry_cap = ranged(&lookup, "STASH_CONFLICT_RETRY_CAP", 3, 1..=100)?;
        let probe_interval_secs = ranged(&lookup, "STASH_PROBE_INTERVAL_SECS", 15, 1..=3_600)?;

        Ok(Self {
            debounce: Duration::from_millis(debounce_ms),
            retry: RetryPolicy {
                max_attempts: narrow(max_attempts, defaults.retry.max_attempts),
                base_delay: Duration::from_millis(retry_base_ms),
            },
            drain_interval: Duration::from_secs(drain_interval_secs),
            conflict_retry_cap: narrow(conflict_retry_cap, defaults.conflict_retry_cap),
            probe_interval: Duration::from_secs(probe_interval_secs),
        })
    }
}

fn ranged(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: u64,
    range: std::ops::RangeInclusive<u64>,
) -> Result<u64, ConfigError> {
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
    let value = raw.parse::<u64>().map_err(|_| invalid())?;
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(invalid())
    }
}

fn narrow(value: u64, fallback: u32) -> u32 {
    u32::try_from(value).unwrap_or(fallback)
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
