use std::collections::HashMap;
use std::env;
use std::fmt::Display;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8787";
const DEFAULT_DB_PATH: &str = "data/stash-api.db";
const IN_MEMORY: &str = ":memory:";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: String,
    /// `None` keeps the store in memory
    pub db_path: Option<PathBuf>,
    pub rate_limit_window: Duration,
    pub write_limit_per_window: u32,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let read = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let bind_addr =
            read("STASH_API_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let db_path = match read("STASH_API_DB_PATH").as_deref() {
            Some(IN_MEMORY) => None,
            Some(path) => Some(PathBuf::from(path)),
            None => Some(PathBuf::from(DEFAULT_DB_PATH)),
        };
        let window_secs: u64 = bounded(
            read("STASH_API_RATE_LIMIT_WINDOW_SECS"),
            "STASH_API_RATE_LIMIT_WINDOW_SECS",
            60,
            10..=3_600,
        )?;
        let write_limit_per_window = bounded(
            read("STASH_API_WRITE_LIMIT_PER_WINDOW"),
            "STASH_API_WRITE_LIMIT_PER_WINDOW",
            120,
            1..=10_000,
        )?;

        Ok(Self {
            bind_addr,
            db_path,
            rate_limit_window: Duration::from_secs(window_secs),
            write_limit_per_window,
        })
    }
}

/// Parse `raw` (or take `default`) and require it to fall within `range`
fn bounded<T>(
    raw: Option<String>,
    name: &str,
    default: T,
    range: RangeInclusive<T>,
) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Display,
{
    let invalid = || {
        ConfigError::Invalid(format!(
            "{name} must be an integer in [{}, {}]",
            range.start(),
            range.end()
        ))
    };
    let value = match raw {
        Some(raw) => raw.parse::<T>().map_err(|_| invalid())?,
        None => default,
    };
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(invalid())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use pretty_assertions::assert_eq;

    fn load(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<&str, &str> = pairs.iter().copied().collect();
        AppConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
    }

    #[test]
    fn defaults_apply_without_environment() {
        assert_eq!(
            load(&[]).unwrap(),
            AppConfig {
                bind_addr: "127.0.0.1:8787".to_string(),
                db_path: Some(PathBuf::from("data/stash-api.db")),
                rate_limit_window: Duration::from_secs(60),
                write_limit_per_window: 120,
            }
        );
    }

    #[test]
    fn memory_path_disables_persistence() {
        let config = load(&[("STASH_API_DB_PATH", ":memory:")]).unwrap();
        assert_eq!(config.db_path, None);
    }

    #[test]
    fn limits_are_range_checked() {
        let err = load(&[("STASH_API_WRITE_LIMIT_PER_WINDOW", "0")]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid configuration: STASH_API_WRITE_LIMIT_PER_WINDOW must be an integer in [1, 10000]"
        );
        assert!(load(&[("STASH_API_RATE_LIMIT_WINDOW_SECS", "soon")]).is_err());

        let config = load(&[
            ("STASH_API_RATE_LIMIT_WINDOW_SECS", " 30 "),
            ("STASH_API_BIND_ADDR", "  "),
        ])
        .unwrap();
        assert_eq!(config.rate_limit_window, Duration::from_secs(30));
        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR);
    }
}
