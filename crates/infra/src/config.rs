//! Runtime configuration loaded from environment variables.
//!
//! | variable | default |
//! |---|---|
//! | `SEISFLOW_DISPATCHER_WORKERS` | 4 |
//! | `SEISFLOW_DISPATCH_POLL_MS` | 100 |
//! | `SEISFLOW_MAX_WORKERS` | 4 |
//! | `SEISFLOW_MAX_QUEUE_SIZE` | 20 |
//! | `SEISFLOW_QUEUE_POLL_MS` | 100 |
//! | `SEISFLOW_METRICS_INTERVAL_MS` | 1000 (`0` disables the tick) |
//! | `SEISFLOW_JOURNAL_DIR` | unset (no journal) |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use seisflow_events::DispatcherConfig;

use crate::jobs::ServiceConfig;

pub const DISPATCHER_WORKERS: &str = "SEISFLOW_DISPATCHER_WORKERS";
pub const DISPATCH_POLL_MS: &str = "SEISFLOW_DISPATCH_POLL_MS";
pub const MAX_WORKERS: &str = "SEISFLOW_MAX_WORKERS";
pub const MAX_QUEUE_SIZE: &str = "SEISFLOW_MAX_QUEUE_SIZE";
pub const QUEUE_POLL_MS: &str = "SEISFLOW_QUEUE_POLL_MS";
pub const METRICS_INTERVAL_MS: &str = "SEISFLOW_METRICS_INTERVAL_MS";
pub const JOURNAL_DIR: &str = "SEISFLOW_JOURNAL_DIR";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Everything the composition root needs to wire the engine.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    pub dispatcher: DispatcherConfig,
    /// Template for services started through the runtime; the name is replaced
    pub service: ServiceConfig,
    /// Where the message journal is written; `None` disables it
    pub journal_dir: Option<PathBuf>,
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup (tests pass a map).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(workers) = parse_positive::<usize>(&lookup, DISPATCHER_WORKERS)? {
            config.dispatcher.workers = workers;
        }
        if let Some(ms) = parse_positive::<u64>(&lookup, DISPATCH_POLL_MS)? {
            config.dispatcher.poll_interval = Duration::from_millis(ms);
        }
        if let Some(workers) = parse_positive::<usize>(&lookup, MAX_WORKERS)? {
            config.service.max_workers = workers;
        }
        if let Some(size) = parse_positive::<usize>(&lookup, MAX_QUEUE_SIZE)? {
            config.service.max_queue_size = size;
        }
        if let Some(ms) = parse_positive::<u64>(&lookup, QUEUE_POLL_MS)? {
            config.service.poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse::<u64>(&lookup, METRICS_INTERVAL_MS)? {
            config.service.metrics_interval = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(dir) = lookup(JOURNAL_DIR).filter(|d| !d.trim().is_empty()) {
            config.journal_dir = Some(PathBuf::from(dir));
        }

        Ok(config)
    }

    /// The service template with `name` applied.
    pub fn service_named(&self, name: impl Into<String>) -> ServiceConfig {
        self.service.clone().with_name(name)
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|err| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: err.to_string(),
        })
}

fn parse_positive<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr + Default + PartialEq + ToString,
    T::Err: core::fmt::Display,
{
    match parse::<T>(lookup, key)? {
        Some(value) if value == T::default() => Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: "must be at least 1".to_string(),
        }),
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = RuntimeConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.dispatcher.workers, 4);
        assert_eq!(config.service.max_workers, 4);
        assert_eq!(config.service.max_queue_size, 20);
        assert_eq!(config.service.metrics_interval, Some(Duration::from_secs(1)));
        assert!(config.journal_dir.is_none());
    }

    #[test]
    fn reads_every_variable() {
        let config = RuntimeConfig::from_lookup(lookup(&[
            (DISPATCHER_WORKERS, "8"),
            (DISPATCH_POLL_MS, "25"),
            (MAX_WORKERS, "2"),
            (MAX_QUEUE_SIZE, " 50 "),
            (QUEUE_POLL_MS, "10"),
            (METRICS_INTERVAL_MS, "0"),
            (JOURNAL_DIR, "/var/log/seisflow"),
        ]))
        .unwrap();

        assert_eq!(config.dispatcher.workers, 8);
        assert_eq!(config.dispatcher.poll_interval, Duration::from_millis(25));
        assert_eq!(config.service.max_workers, 2);
        assert_eq!(config.service.max_queue_size, 50);
        assert_eq!(config.service.poll_interval, Duration::from_millis(10));
        assert_eq!(config.service.metrics_interval, None);
        assert_eq!(config.journal_dir, Some(PathBuf::from("/var/log/seisflow")));
        assert_eq!(config.service_named("picking").name, "picking");
    }

    #[test]
    fn rejects_garbage_and_zero_sizes() {
        let err = RuntimeConfig::from_lookup(lookup(&[(MAX_WORKERS, "many")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: MAX_WORKERS, .. }));

        let err = RuntimeConfig::from_lookup(lookup(&[(MAX_QUEUE_SIZE, "0")])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid value \"0\" for SEISFLOW_MAX_QUEUE_SIZE: must be at least 1"
        );
    }

    #[test]
    fn zero_poll_intervals_are_rejected() {
        for key in [DISPATCH_POLL_MS, QUEUE_POLL_MS] {
            let err = RuntimeConfig::from_lookup(lookup(&[(key, "0")])).unwrap_err();
            assert_eq!(err.to_string(), format!("invalid value \"0\" for {key}: must be at least 1"));
        }

        // a zero metrics interval turns the tick off instead
        let config = RuntimeConfig::from_lookup(lookup(&[(METRICS_INTERVAL_MS, "0")])).unwrap();
        assert_eq!(config.service.metrics_interval, None);
    }
}
