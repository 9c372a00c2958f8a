/*!
 * Supervisor Configuration
 *
 * Runtime configuration for the sampler, the cleanup verifier, and the
 * module controller. Every field has a default from `core::limits`; a JSON
 * file and `MODVISOR_*` environment variables can override them.
 *
 * Environment variables:
 * - MODVISOR_SAMPLE_INTERVAL_MS
 * - MODVISOR_SAMPLE_RETENTION
 * - MODVISOR_LEAK_THRESHOLD_BYTES
 * - MODVISOR_WARNING_THRESHOLD_BYTES
 * - MODVISOR_CRITICAL_THRESHOLD_BYTES
 * - MODVISOR_CLEANUP_TIMEOUT_MS
 * - MODVISOR_CONTAINER_REGION
 */

use super::errors::{ConfigError, ConfigResult};
use super::limits::*;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Resource sampler configuration
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Sampling cadence
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "interval_ms")]
    pub interval: Duration,
    /// Ring buffer retention (samples)
    pub retention: usize,
    pub leak_threshold_bytes: u64,
    pub warning_threshold_bytes: u64,
    pub critical_threshold_bytes: u64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SAMPLE_INTERVAL,
            retention: DEFAULT_SAMPLE_RETENTION,
            leak_threshold_bytes: DEFAULT_LEAK_THRESHOLD_BYTES,
            warning_threshold_bytes: DEFAULT_WARNING_THRESHOLD_BYTES,
            critical_threshold_bytes: DEFAULT_CRITICAL_THRESHOLD_BYTES,
        }
    }
}

impl SamplerConfig {
    #[inline]
    #[must_use]
    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_leak_threshold(mut self, bytes: u64) -> Self {
        self.leak_threshold_bytes = bytes;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_thresholds(mut self, warning_bytes: u64, critical_bytes: u64) -> Self {
        self.warning_threshold_bytes = warning_bytes;
        self.critical_threshold_bytes = critical_bytes;
        self
    }
}

/// Cleanup verifier configuration
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    /// Timeout for modules that do not declare one
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "default_cleanup_timeout_ms")]
    pub default_cleanup_timeout: Duration,
    /// Memory retained after a cleanup that is reported as an issue
    pub leak_threshold_bytes: u64,
    /// Finalized records kept in history
    pub history_limit: usize,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            default_cleanup_timeout: DEFAULT_CLEANUP_TIMEOUT,
            leak_threshold_bytes: DEFAULT_CLEANUP_LEAK_THRESHOLD_BYTES,
            history_limit: CLEANUP_HISTORY_LIMIT,
        }
    }
}

impl VerifierConfig {
    #[inline]
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_cleanup_timeout = timeout;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_leak_threshold(mut self, bytes: u64) -> Self {
        self.leak_threshold_bytes = bytes;
        self
    }
}

/// Module controller configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Name of the container region the controller owns
    pub region: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            region: DEFAULT_CONTAINER_REGION.to_string(),
        }
    }
}

/// Complete supervisor configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub sampler: SamplerConfig,
    pub verifier: VerifierConfig,
    pub controller: ControllerConfig,
}

impl SupervisorConfig {
    /// Parse configuration from a JSON string
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&contents)
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> ConfigResult<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `MODVISOR_*` environment overrides on top of the current values
    pub fn apply_env(&mut self) -> ConfigResult<()> {
        if let Some(ms) = env_parse::<u64>("MODVISOR_SAMPLE_INTERVAL_MS")? {
            self.sampler.interval = Duration::from_millis(ms);
        }
        if let Some(retention) = env_parse::<usize>("MODVISOR_SAMPLE_RETENTION")? {
            self.sampler.retention = retention;
        }
        if let Some(bytes) = env_parse::<u64>("MODVISOR_LEAK_THRESHOLD_BYTES")? {
            self.sampler.leak_threshold_bytes = bytes;
            self.verifier.leak_threshold_bytes = bytes;
        }
        if let Some(bytes) = env_parse::<u64>("MODVISOR_WARNING_THRESHOLD_BYTES")? {
            self.sampler.warning_threshold_bytes = bytes;
        }
        if let Some(bytes) = env_parse::<u64>("MODVISOR_CRITICAL_THRESHOLD_BYTES")? {
            self.sampler.critical_threshold_bytes = bytes;
        }
        if let Some(ms) = env_parse::<u64>("MODVISOR_CLEANUP_TIMEOUT_MS")? {
            self.verifier.default_cleanup_timeout = Duration::from_millis(ms);
        }
        if let Ok(region) = std::env::var("MODVISOR_CONTAINER_REGION") {
            self.controller.region = region;
        }
        Ok(())
    }

    /// Reject configurations the supervisor cannot run with
    pub fn validate(&self) -> ConfigResult<()> {
        if self.sampler.retention == 0 {
            return Err(ConfigError::Invalid {
                field: "sampler.retention",
                reason: "must keep at least one sample".into(),
            });
        }
        if self.sampler.interval.is_zero() {
            return Err(ConfigError::Invalid {
                field: "sampler.interval_ms",
                reason: "must be greater than zero".into(),
            });
        }
        if self.sampler.leak_threshold_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "sampler.leak_threshold_bytes",
                reason: "must be greater than zero".into(),
            });
        }
        if self.sampler.warning_threshold_bytes >= self.sampler.critical_threshold_bytes {
            return Err(ConfigError::Invalid {
                field: "sampler.warning_threshold_bytes",
                reason: format!(
                    "warning ({}) must be below critical ({})",
                    self.sampler.warning_threshold_bytes, self.sampler.critical_threshold_bytes
                ),
            });
        }
        if self.verifier.default_cleanup_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                field: "verifier.default_cleanup_timeout_ms",
                reason: "must be greater than zero".into(),
            });
        }
        if self.verifier.history_limit == 0 {
            return Err(ConfigError::Invalid {
                field: "verifier.history_limit",
                reason: "must keep at least one record".into(),
            });
        }
        if self.controller.region.is_empty() {
            return Err(ConfigError::Invalid {
                field: "controller.region",
                reason: "must not be empty".into(),
            });
        }
        Ok(())
    }
}

fn env_parse<T: FromStr>(key: &'static str) -> ConfigResult<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Invalid {
                field: key,
                reason: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}
