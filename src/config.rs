//! Runtime configuration.
//!
//! Loaded from environment variables, falling back to defaults for anything unset.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::ledger::DEFAULT_HOLD_TTL_SECS;

pub const HOLD_TTL_SECS: &str = "ADMISSIONS_HOLD_TTL_SECS";
pub const SWEEP_INTERVAL_SECS: &str = "ADMISSIONS_SWEEP_INTERVAL_SECS";
pub const STEP_TIMEOUT_MS: &str = "ADMISSIONS_STEP_TIMEOUT_MS";
pub const MAX_IN_FLIGHT: &str = "ADMISSIONS_MAX_IN_FLIGHT";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key}: invalid value '{value}'")]
    Invalid { key: &'static str, value: String },

    #[error("{key} must be positive")]
    NotPositive { key: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Advisory lifetime of a tentative hold
    pub hold_ttl: chrono::Duration,
    /// How often expired holds are swept
    pub sweep_interval: Duration,
    /// Upper bound on each collaborator call, if any
    pub step_timeout: Option<Duration>,
    /// Enrollments running at once in batch mode
    pub max_in_flight: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hold_ttl: chrono::Duration::seconds(DEFAULT_HOLD_TTL_SECS),
            sweep_interval: Duration::from_secs(30),
            step_timeout: None,
            max_in_flight: 16,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(secs) = parse::<i64>(&lookup, HOLD_TTL_SECS)? {
            config.hold_ttl = chrono::Duration::try_seconds(secs)
                .filter(|ttl| *ttl >= chrono::Duration::zero())
                .ok_or_else(|| ConfigError::Invalid {
                    key: HOLD_TTL_SECS,
                    value: secs.to_string(),
                })?;
        }
        if let Some(secs) = parse::<u64>(&lookup, SWEEP_INTERVAL_SECS)? {
            config.sweep_interval = Duration::from_secs(positive(SWEEP_INTERVAL_SECS, secs)?);
        }
        if let Some(ms) = parse::<u64>(&lookup, STEP_TIMEOUT_MS)? {
            config.step_timeout = Some(Duration::from_millis(positive(STEP_TIMEOUT_MS, ms)?));
        }
        if let Some(n) = parse::<usize>(&lookup, MAX_IN_FLIGHT)? {
            config.max_in_flight = positive(MAX_IN_FLIGHT, n)?;
        }

        Ok(config)
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse().map(Some).map_err(|_| ConfigError::Invalid {
        key,
        value: raw.to_string(),
    })
}

fn positive<T: PartialEq + Default>(key: &'static str, value: T) -> Result<T, ConfigError> {
    if value == T::default() {
        return Err(ConfigError::NotPositive { key });
    }
    Ok(value)
}
