//! Verifier configuration
//!
//! Defaults are compiled in; [`VerifierConfig::from_env`] overlays
//! `RELEASEGATE_*` environment variables.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default artifact size limit: 500 MiB.
pub const DEFAULT_MAX_ARTIFACT_BYTES: u64 = 500 * 1024 * 1024;

/// Default clamd TCP endpoint.
pub const DEFAULT_CLAMD_ADDRESS: &str = "127.0.0.1:3310";

const ENV_MAX_ARTIFACT_BYTES: &str = "RELEASEGATE_MAX_ARTIFACT_BYTES";
const ENV_CLAMD_ADDRESS: &str = "RELEASEGATE_CLAMD_ADDRESS";
const ENV_SCANNER_TIMEOUT_SECS: &str = "RELEASEGATE_SCANNER_TIMEOUT_SECS";
const ENV_MAX_CONCURRENT_RUNS: &str = "RELEASEGATE_MAX_CONCURRENT_RUNS";
const ENV_NOTIFY_TIMEOUT_SECS: &str = "RELEASEGATE_NOTIFY_TIMEOUT_SECS";

/// Errors raised while reading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: '{value}' ({reason})")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Verifier configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifierConfig {
    /// Largest artifact accepted by the ingest stage
    pub max_artifact_bytes: u64,
    /// clamd `host:port`
    pub clamd_address: String,
    /// Timeout for each scanner connect, write or reply
    pub scanner_timeout_secs: u64,
    /// Runs the dispatcher executes at once
    pub max_concurrent_runs: usize,
    /// How long a run waits on one notification before moving on
    #[serde(default = "default_notify_timeout_secs")]
    pub notify_timeout_secs: u64,
}

fn default_notify_timeout_secs() -> u64 {
    10
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            max_artifact_bytes: DEFAULT_MAX_ARTIFACT_BYTES,
            clamd_address: DEFAULT_CLAMD_ADDRESS.to_string(),
            scanner_timeout_secs: 30,
            max_concurrent_runs: 4,
            notify_timeout_secs: default_notify_timeout_secs(),
        }
    }
}

impl VerifierConfig {
    /// Defaults overlaid with `RELEASEGATE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Defaults overlaid with values from an arbitrary lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(value) = lookup(ENV_MAX_ARTIFACT_BYTES) {
            config.max_artifact_bytes = parse_number(ENV_MAX_ARTIFACT_BYTES, &value)?;
        }
        if let Some(value) = lookup(ENV_CLAMD_ADDRESS) {
            config.clamd_address = value;
        }
        if let Some(value) = lookup(ENV_SCANNER_TIMEOUT_SECS) {
            config.scanner_timeout_secs = parse_number(ENV_SCANNER_TIMEOUT_SECS, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_CONCURRENT_RUNS) {
            let runs: usize = parse_number(ENV_MAX_CONCURRENT_RUNS, &value)?;
            if runs == 0 {
                return Err(ConfigError::InvalidValue {
                    var: ENV_MAX_CONCURRENT_RUNS,
                    value,
                    reason: "must be at least 1".to_string(),
                });
            }
            config.max_concurrent_runs = runs;
        }
        if let Some(value) = lookup(ENV_NOTIFY_TIMEOUT_SECS) {
            config.notify_timeout_secs = parse_number(ENV_NOTIFY_TIMEOUT_SECS, &value)?;
        }
        Ok(config)
    }

    /// Set the artifact size limit
    pub fn with_max_artifact_bytes(mut self, bytes: u64) -> Self {
        self.max_artifact_bytes = bytes;
        self
    }

    /// Set the clamd endpoint
    pub fn with_clamd_address(mut self, address: impl Into<String>) -> Self {
        self.clamd_address = address.into();
        self
    }

    /// Set the scanner timeout
    pub fn with_scanner_timeout_secs(mut self, secs: u64) -> Self {
        self.scanner_timeout_secs = secs;
        self
    }

    /// Set the dispatcher concurrency limit (at least 1)
    pub fn with_max_concurrent_runs(mut self, runs: usize) -> Self {
        self.max_concurrent_runs = runs.max(1);
        self
    }

    /// Set the per-notification timeout
    pub fn with_notify_timeout_secs(mut self, secs: u64) -> Self {
        self.notify_timeout_secs = secs;
        self
    }

    pub fn scanner_timeout(&self) -> Duration {
        Duration::from_secs(self.scanner_timeout_secs)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify_timeout_secs)
    }
}

fn parse_number<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue {
            var,
            value: value.to_string(),
            reason: e.to_string(),
        })
}
