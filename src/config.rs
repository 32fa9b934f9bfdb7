use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::de::IntoDeserializer;
use serde::Deserialize;

use crate::engine::{AllocatorConfig, CapacityPolicy};
use crate::model::Ms;
use crate::scheduler::SchedulerConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be {expected}, got {value:?}")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Service configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    /// Prometheus exporter port; `None` disables the exporter.
    pub metrics_port: Option<u16>,
    /// WAL appends since the last compaction that trigger the next one.
    pub compact_threshold: u64,
    pub max_conflict_retries: u32,
    pub store_timeout: Duration,
    pub past_tolerance_ms: Ms,
    pub capacity_policy: CapacityPolicy,
    pub shutdown_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8080,
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            compact_threshold: 1000,
            max_conflict_retries: 3,
            store_timeout: Duration::from_millis(2000),
            past_tolerance_ms: 0,
            capacity_policy: CapacityPolicy::OverlapCount,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl Config {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                        | Default         |
    /// |--------------------------------|-----------------|
    /// | `ALLOCD_BIND`                  | `0.0.0.0`       |
    /// | `ALLOCD_PORT`                  | `8080`          |
    /// | `ALLOCD_DATA_DIR`              | `./data`        |
    /// | `ALLOCD_METRICS_PORT`          | unset (off)     |
    /// | `ALLOCD_COMPACT_THRESHOLD`     | `1000`          |
    /// | `ALLOCD_MAX_CONFLICT_RETRIES`  | `3`             |
    /// | `ALLOCD_STORE_TIMEOUT_MS`      | `2000`          |
    /// | `ALLOCD_PAST_TOLERANCE_MS`     | `0`             |
    /// | `ALLOCD_CAPACITY_POLICY`       | `overlap-count` |
    /// | `ALLOCD_SHUTDOWN_TIMEOUT_SECS` | `10`            |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] but reading from an arbitrary source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let bind = lookup("ALLOCD_BIND").unwrap_or(defaults.bind);
        let port = parse(&lookup, "ALLOCD_PORT", "a port number")?.unwrap_or(defaults.port);
        let data_dir = lookup("ALLOCD_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);
        let metrics_port = parse(&lookup, "ALLOCD_METRICS_PORT", "a port number")?;
        let compact_threshold = parse(&lookup, "ALLOCD_COMPACT_THRESHOLD", "a positive integer")?
            .unwrap_or(defaults.compact_threshold);
        let max_conflict_retries =
            parse(&lookup, "ALLOCD_MAX_CONFLICT_RETRIES", "a non-negative integer")?
                .unwrap_or(defaults.max_conflict_retries);
        let store_timeout = parse::<u64>(&lookup, "ALLOCD_STORE_TIMEOUT_MS", "milliseconds")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.store_timeout);
        let past_tolerance_ms = parse(&lookup, "ALLOCD_PAST_TOLERANCE_MS", "milliseconds")?
            .unwrap_or(defaults.past_tolerance_ms);
        let capacity_policy = match lookup("ALLOCD_CAPACITY_POLICY") {
            None => defaults.capacity_policy,
            Some(raw) => CapacityPolicy::deserialize(raw.trim().into_deserializer()).map_err(
                |_: serde::de::value::Error| ConfigError::Invalid {
                    var: "ALLOCD_CAPACITY_POLICY",
                    expected: "overlap-count or peak-concurrency",
                    value: raw.clone(),
                },
            )?,
        };
        let shutdown_timeout = parse::<u64>(&lookup, "ALLOCD_SHUTDOWN_TIMEOUT_SECS", "seconds")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.shutdown_timeout);

        if compact_threshold == 0 {
            return Err(ConfigError::Invalid {
                var: "ALLOCD_COMPACT_THRESHOLD",
                expected: "a positive integer",
                value: "0".into(),
            });
        }
        if store_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                var: "ALLOCD_STORE_TIMEOUT_MS",
                expected: "a positive number of milliseconds",
                value: "0".into(),
            });
        }
        if past_tolerance_ms < 0 {
            return Err(ConfigError::Invalid {
                var: "ALLOCD_PAST_TOLERANCE_MS",
                expected: "a non-negative number of milliseconds",
                value: past_tolerance_ms.to_string(),
            });
        }

        Ok(Self {
            bind,
            port,
            data_dir,
            metrics_port,
            compact_threshold,
            max_conflict_retries,
            store_timeout,
            past_tolerance_ms,
            capacity_policy,
            shutdown_timeout,
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("allocd.wal")
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            allocator: AllocatorConfig {
                max_conflict_retries: self.max_conflict_retries,
                store_timeout: self.store_timeout,
                past_tolerance_ms: self.past_tolerance_ms,
            },
            capacity_policy: self.capacity_policy,
        }
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    expected: &'static str,
) -> Result<Option<T>, ConfigError> {
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::Invalid {
            var,
            expected,
            value: raw,
        })
}
