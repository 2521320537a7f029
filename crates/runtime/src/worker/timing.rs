//! Worker timing configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(10);
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Failure to load a [`WorkerTiming`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({source})")]
    InvalidEnv {
        var: String,
        value: String,
        #[source]
        source: std::num::ParseIntError,
    },

    #[error("invalid timing json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Timing knobs for a reconcile worker.
///
/// Serialised with every duration as integer milliseconds. Zero values are
/// replaced by the defaults when the worker is built, except
/// `cluster_sync_delay`, for which zero is a valid setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerTiming {
    /// How often the processing loop wakes to drain the queue.
    #[serde(rename = "poll_interval_ms", with = "millis")]
    pub poll_interval: Duration,
    /// Delay used when a reconcile asks to be checked again.
    #[serde(rename = "retry_delay_ms", with = "millis")]
    pub retry_delay: Duration,
    /// Delay used when the wider system is not synced yet.
    #[serde(rename = "cluster_sync_delay_ms", with = "millis")]
    pub cluster_sync_delay: Duration,
    #[serde(rename = "initial_backoff_ms", with = "millis")]
    pub initial_backoff: Duration,
    #[serde(rename = "max_backoff_ms", with = "millis")]
    pub max_backoff: Duration,
}

impl Default for WorkerTiming {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            retry_delay: DEFAULT_RETRY_DELAY,
            cluster_sync_delay: Duration::ZERO,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

impl WorkerTiming {
    pub fn with_poll_interval(mut self, d: Duration) -> Self {
        self.poll_interval = d;
        self
    }

    pub fn with_retry_delay(mut self, d: Duration) -> Self {
        self.retry_delay = d;
        self
    }

    pub fn with_cluster_sync_delay(mut self, d: Duration) -> Self {
        self.cluster_sync_delay = d;
        self
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    /// Replace zero-valued fields with their defaults.
    pub fn or_defaults(mut self) -> Self {
        fn fill(d: &mut Duration, default: Duration) {
            if d.is_zero() {
                *d = default;
            }
        }

        fill(&mut self.poll_interval, DEFAULT_POLL_INTERVAL);
        fill(&mut self.retry_delay, DEFAULT_RETRY_DELAY);
        fill(&mut self.initial_backoff, DEFAULT_INITIAL_BACKOFF);
        fill(&mut self.max_backoff, DEFAULT_MAX_BACKOFF);
        self
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read `<PREFIX>_POLL_INTERVAL_MS`, `<PREFIX>_RETRY_DELAY_MS`,
    /// `<PREFIX>_CLUSTER_SYNC_DELAY_MS`, `<PREFIX>_INITIAL_BACKOFF_MS` and
    /// `<PREFIX>_MAX_BACKOFF_MS`. Unset variables keep their defaults.
    pub fn from_env(prefix: &str) -> Result<Self, ConfigError> {
        Self::from_lookup(prefix, |var| std::env::var(var).ok())
    }

    /// [`from_env`](Self::from_env) against an arbitrary variable source.
    pub fn from_lookup<F>(prefix: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |suffix: &str, default: Duration| -> Result<Duration, ConfigError> {
            let var = format!("{prefix}_{suffix}");
            match lookup(&var) {
                None => Ok(default),
                Some(value) => value
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_millis)
                    .map_err(|source| ConfigError::InvalidEnv { var, value, source }),
            }
        };

        let defaults = Self::default();
        Ok(Self {
            poll_interval: read("POLL_INTERVAL_MS", defaults.poll_interval)?,
            retry_delay: read("RETRY_DELAY_MS", defaults.retry_delay)?,
            cluster_sync_delay: read("CLUSTER_SYNC_DELAY_MS", defaults.cluster_sync_delay)?,
            initial_backoff: read("INITIAL_BACKOFF_MS", defaults.initial_backoff)?,
            max_backoff: read("MAX_BACKOFF_MS", defaults.max_backoff)?,
        })
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(crate::as_millis_u64(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn zero_fields_take_defaults_except_cluster_sync() {
        let timing = WorkerTiming {
            poll_interval: Duration::ZERO,
            retry_delay: Duration::ZERO,
            cluster_sync_delay: Duration::ZERO,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
        .or_defaults();

        assert_eq!(timing, WorkerTiming::default());
        assert_eq!(timing.cluster_sync_delay, Duration::ZERO);
    }

    #[test]
    fn explicit_values_survive_defaults() {
        let timing = WorkerTiming::default()
            .with_poll_interval(Duration::from_millis(10))
            .with_cluster_sync_delay(Duration::from_secs(3))
            .or_defaults();

        assert_eq!(timing.poll_interval, Duration::from_millis(10));
        assert_eq!(timing.cluster_sync_delay, Duration::from_secs(3));
        assert_eq!(timing.retry_delay, DEFAULT_RETRY_DELAY);
    }

    #[test]
    fn json_uses_millisecond_fields_and_fills_missing() {
        let timing = WorkerTiming::from_json(r#"{"retry_delay_ms": 250, "max_backoff_ms": 5000}"#)
            .unwrap();

        assert_eq!(timing.retry_delay, Duration::from_millis(250));
        assert_eq!(timing.max_backoff, Duration::from_secs(5));
        assert_eq!(timing.poll_interval, DEFAULT_POLL_INTERVAL);

        let json = serde_json::to_value(timing).unwrap();
        assert_eq!(json["retry_delay_ms"], 250);
    }

    #[test]
    fn oversized_durations_serialize_saturated() {
        let timing = WorkerTiming::default().with_retry_delay(Duration::MAX);

        let json = serde_json::to_value(timing).unwrap();
        assert_eq!(json["retry_delay_ms"], u64::MAX);
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(matches!(
            WorkerTiming::from_json(r#"{"retry_delay_ms": "soon"}"#),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn lookup_reads_prefixed_variables() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("SYNC_POLL_INTERVAL_MS", "50"),
            ("SYNC_CLUSTER_SYNC_DELAY_MS", " 2000 "),
        ]);

        let timing =
            WorkerTiming::from_lookup("SYNC", |v| vars.get(v).map(|s| s.to_string())).unwrap();

        assert_eq!(timing.poll_interval, Duration::from_millis(50));
        assert_eq!(timing.cluster_sync_delay, Duration::from_secs(2));
        assert_eq!(timing.retry_delay, DEFAULT_RETRY_DELAY);
    }

    #[test]
    fn lookup_reports_bad_variable() {
        let err = WorkerTiming::from_lookup("SYNC", |v| {
            (v == "SYNC_RETRY_DELAY_MS").then(|| "ten".to_string())
        })
        .unwrap_err();

        match err {
            ConfigError::InvalidEnv { var, value, .. } => {
                assert_eq!(var, "SYNC_RETRY_DELAY_MS");
                assert_eq!(value, "ten");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
