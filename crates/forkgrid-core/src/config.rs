//! Cluster configuration: `forkgrid.toml` plus environment overrides.
//!
//! Every field has a default, so an empty file (or no file) is valid.
//! Durations are written as strings such as `"30s"`, `"500ms"` or `"5m"`.
//!
//! ```toml
//! enable_sticky_sessions = true
//! port = 3000
//!
//! [thresholds]
//! min_workers = 2
//! max_workers = 8
//!
//! [pool]
//! grace_period = "10s"
//! ```
//!
//! Recognized environment variables: `MAX_WORKERS`, `MIN_WORKERS`,
//! `ENABLE_CLUSTERING`, `ENABLE_STICKY_SESSIONS`, `HEALTH_CHECK_PORT`,
//! `PORT`, `CPU_THRESHOLD`, `MEMORY_THRESHOLD`, `RESPONSE_TIME_THRESHOLD`.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{BalanceStrategy, ScalingThresholds};

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidEnv {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration for the master process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Fork workers. When false the application is served in-process.
    pub enable_clustering: bool,
    /// Pin clients to workers by source IP instead of round-robin.
    pub enable_sticky_sessions: bool,
    /// Public application port the master balances.
    pub port: u16,
    /// Port of the operational `/health` and `/metrics` surface.
    pub health_check_port: u16,
    /// Initial pool size; defaults to the number of CPUs, clamped to bounds.
    pub initial_workers: Option<u32>,
    pub thresholds: ScalingThresholds,
    pub pool: PoolConfig,
    pub autoscale: AutoscaleConfig,
    pub health: HealthConfig,
    pub shutdown: ShutdownConfig,
    pub worker: WorkerConfig,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            enable_clustering: true,
            enable_sticky_sessions: false,
            port: 3000,
            health_check_port: 3001,
            initial_workers: None,
            thresholds: ScalingThresholds::default(),
            pool: PoolConfig::default(),
            autoscale: AutoscaleConfig::default(),
            health: HealthConfig::default(),
            shutdown: ShutdownConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}

/// Worker lifecycle timing and crash-loop protection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Time a new worker has to send `ready`.
    #[serde(with = "duration_str")]
    pub start_timeout: Duration,
    /// Time a draining worker has before it is killed.
    #[serde(with = "duration_str")]
    pub grace_period: Duration,
    /// Restarts tolerated inside `restart_window` before backing off.
    pub max_restarts: u32,
    #[serde(with = "duration_str")]
    pub restart_window: Duration,
    /// Delay before respawning a worker that exceeded `max_restarts`.
    #[serde(with = "duration_str")]
    pub restart_backoff: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            start_timeout: Duration::from_secs(30),
            grace_period: Duration::from_secs(10),
            max_restarts: 5,
            restart_window: Duration::from_secs(300),
            restart_backoff: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoscaleConfig {
    #[serde(with = "duration_str")]
    pub interval: Duration,
    /// No scale-down this soon after a scale-up.
    #[serde(with = "duration_str")]
    pub scale_down_cooldown: Duration,
}

impl Default for AutoscaleConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            scale_down_cooldown: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    #[serde(with = "duration_str")]
    pub interval: Duration,
    /// Silence after which a worker is treated as crashed.
    #[serde(with = "duration_str")]
    pub heartbeat_timeout: Duration,
    /// Minimum share of healthy workers for a healthy cluster.
    pub healthy_ratio: f64,
    /// Error rate (0.0–1.0) at or above which the cluster is unhealthy.
    pub max_error_rate: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            heartbeat_timeout: Duration::from_secs(60),
            healthy_ratio: 0.8,
            max_error_rate: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Global bound on draining the whole pool.
    #[serde(with = "duration_str")]
    pub timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

/// Settings forwarded to worker processes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// How often a worker reports `worker_metrics`.
    #[serde(with = "duration_str")]
    pub metrics_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            metrics_interval: Duration::from_secs(5),
        }
    }
}

impl ClusterConfig {
    /// Parse a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// File (or defaults), then process environment, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from environment-style variables.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = env_value::<u32>(&lookup, "MAX_WORKERS")? {
            self.thresholds.max_workers = v;
        }
        if let Some(v) = env_value::<u32>(&lookup, "MIN_WORKERS")? {
            self.thresholds.min_workers = v;
        }
        if let Some(v) = env_bool(&lookup, "ENABLE_CLUSTERING")? {
            self.enable_clustering = v;
        }
        if let Some(v) = env_bool(&lookup, "ENABLE_STICKY_SESSIONS")? {
            self.enable_sticky_sessions = v;
        }
        if let Some(v) = env_value::<u16>(&lookup, "HEALTH_CHECK_PORT")? {
            self.health_check_port = v;
        }
        if let Some(v) = env_value::<u16>(&lookup, "PORT")? {
            self.port = v;
        }
        if let Some(v) = env_value::<f64>(&lookup, "CPU_THRESHOLD")? {
            self.thresholds.cpu_pct = v;
        }
        if let Some(v) = env_value::<f64>(&lookup, "MEMORY_THRESHOLD")? {
            self.thresholds.mem_pct = v;
        }
        if let Some(v) = env_value::<f64>(&lookup, "RESPONSE_TIME_THRESHOLD")? {
            self.thresholds.response_ms = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.thresholds;
        if t.min_workers == 0 {
            return Err(ConfigError::Invalid("min_workers must be at least 1".into()));
        }
        if t.min_workers > t.max_workers {
            return Err(ConfigError::Invalid(format!(
                "min_workers ({}) exceeds max_workers ({})",
                t.min_workers, t.max_workers
            )));
        }
        for (name, value) in [
            ("cpu_pct", t.cpu_pct),
            ("mem_pct", t.mem_pct),
            ("response_ms", t.response_ms),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::Invalid(format!("{name} must be positive")));
            }
        }
        if !(self.health.healthy_ratio > 0.0 && self.health.healthy_ratio <= 1.0) {
            return Err(ConfigError::Invalid("healthy_ratio must be in (0, 1]".into()));
        }
        if self.autoscale.interval.is_zero() || self.health.interval.is_zero() {
            return Err(ConfigError::Invalid("periodic intervals must be non-zero".into()));
        }
        Ok(())
    }

    /// Number of workers forked at startup.
    pub fn initial_worker_count(&self) -> u32 {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(1);
        self.initial_workers
            .unwrap_or(cores)
            .clamp(self.thresholds.min_workers, self.thresholds.max_workers)
    }

    pub fn balance_strategy(&self) -> BalanceStrategy {
        if self.enable_sticky_sessions {
            BalanceStrategy::Sticky
        } else {
            BalanceStrategy::RoundRobin
        }
    }
}

fn env_value<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnv {
                key,
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}

fn env_bool(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<bool>, ConfigError> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(ConfigError::InvalidEnv {
            key,
            value: raw,
            reason: "expected a boolean".into(),
        }),
    }
}

/// Parse a duration string like "5s", "500ms", "1m". Plain numbers are seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

fn format_duration(d: Duration) -> String {
    if d.subsec_millis() != 0 || d.as_secs() == 0 {
        format!("{}ms", d.as_millis())
    } else {
        format!("{}s", d.as_secs())
    }
}

mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_duration(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid duration {raw:?}")))
    }
}
