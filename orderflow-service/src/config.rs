//! Service configuration loaded from environment variables.
//!
//! | Variable                            | Default        |
//! |-------------------------------------|----------------|
//! | `ORDERFLOW_HTTP_ADDR`               | `0.0.0.0:8080` |
//! | `ORDERFLOW_SIMULATE_STOCK_FAILURES` | `true`         |
//! | `ORDERFLOW_STOCK_FAILURE_PERCENT`   | `10`           |
//! | `ORDERFLOW_MAX_ATTEMPTS`            | `3`            |
//! | `ORDERFLOW_INITIAL_DELAY_MS`        | `1000`         |
//! | `ORDERFLOW_BACKOFF_MULTIPLIER`      | `2.0`          |
//! | `ORDERFLOW_MAX_DELAY_MS`            | `10000`        |
//! | `ORDERFLOW_UNKNOWN_FAILURES`        | `retry`        |
//! | `ORDERFLOW_LOG_FORMAT`              | `pretty`       |
//!
//! Values are read into [`EnvConfig`] and then validated into the bounded
//! pipeline types.

use config::{Config, Environment};
use orderflow::config::{BackoffConfig, FailurePercent, PipelineConfig};
use orderflow::errors::ConfigError;
use orderflow::UnknownFailurePolicy;
use serde::Deserialize;
use std::net::SocketAddr;
use thiserror::Error;

/// Prefix shared by every variable the service reads.
pub const ENV_PREFIX: &str = "ORDERFLOW";

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Errors raised while loading the service configuration.
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    /// A variable is malformed for its type.
    #[error("failed to read configuration: {0}")]
    Source(#[from] config::ConfigError),
    /// A variable is well-formed but out of range.
    #[error(transparent)]
    Invalid(#[from] ConfigError),
}

/// Settings as read from the environment, before validation.
#[derive(Debug, Clone, Deserialize)]
pub struct EnvConfig {
    /// Address the HTTP ingress listens on.
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,

    /// Whether the simulated stock check fails at random.
    #[serde(default = "default_simulate_stock_failures")]
    pub simulate_stock_failures: bool,

    /// Failure rate of the simulated stock check.
    #[serde(default = "default_stock_failure_percent")]
    pub stock_failure_percent: u8,

    // Redelivery backoff
    /// Total delivery attempts.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first redelivery.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Growth factor between redeliveries.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Upper bound on any redelivery delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// How failures of unknown origin are classified.
    #[serde(default)]
    pub unknown_failures: UnknownFailurePolicy,

    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_simulate_stock_failures() -> bool {
    PipelineConfig::default().stock.simulate_failures
}

fn default_stock_failure_percent() -> u8 {
    PipelineConfig::default().stock.failure_percent.into_inner()
}

fn default_max_attempts() -> u32 {
    BackoffConfig::default().max_attempts.into_inner()
}

fn default_initial_delay_ms() -> u64 {
    BackoffConfig::default().initial_delay.into_inner()
}

fn default_backoff_multiplier() -> f64 {
    BackoffConfig::default().multiplier.into_inner()
}

fn default_max_delay_ms() -> u64 {
    BackoffConfig::default().max_delay.into_inner()
}

impl EnvConfig {
    /// Reads the settings from `source`, using defaults for absent keys.
    pub fn load(source: Environment) -> Result<Self, config::ConfigError> {
        Config::builder()
            .add_source(source)
            .build()?
            .try_deserialize()
    }
}

/// Complete configuration of the service.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    /// Address the HTTP ingress listens on.
    pub http_addr: SocketAddr,
    /// Pipeline configuration.
    pub pipeline: PipelineConfig,
    /// Log output format.
    pub log_format: LogFormat,
}

impl ServiceConfig {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        Self::from_environment(Environment::with_prefix(ENV_PREFIX))
    }

    /// Loads and validates configuration from `source`.
    pub fn from_environment(source: Environment) -> Result<Self, ConfigLoadError> {
        Ok(Self::try_from(EnvConfig::load(source)?)?)
    }
}

impl TryFrom<EnvConfig> for ServiceConfig {
    type Error = ConfigError;

    fn try_from(raw: EnvConfig) -> Result<Self, Self::Error> {
        let backoff = BackoffConfig::try_new(
            raw.max_attempts,
            raw.initial_delay_ms,
            raw.backoff_multiplier,
            raw.max_delay_ms,
        )?;
        let failure_percent = FailurePercent::try_new(raw.stock_failure_percent)
            .map_err(|e| ConfigError::invalid("stock_failure_percent", e))?;

        let mut pipeline = PipelineConfig {
            backoff,
            unknown_failures: raw.unknown_failures,
            ..PipelineConfig::default()
        };
        pipeline.stock.simulate_failures = raw.simulate_stock_failures;
        pipeline.stock.failure_percent = failure_percent;

        Ok(Self {
            http_addr: raw.http_addr,
            pipeline,
            log_format: raw.log_format,
        })
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            pipeline: PipelineConfig::default(),
            log_format: LogFormat::default(),
        }
    }
}
