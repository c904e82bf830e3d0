//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::event_store::EventStoreConfig;
use crate::resilience::{CircuitBreakerConfig, RetryPolicy};

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Retries of a failed write after the first attempt
    pub max_retries: u32,

    /// Delay before the first retry
    pub retry_base_delay: Duration,

    /// Upper bound for a single retry delay
    pub retry_max_delay: Duration,

    /// Consecutive write failures before the circuit opens
    pub circuit_failure_threshold: u32,

    /// Consecutive trial successes before the circuit closes
    pub circuit_success_threshold: u32,

    /// Cooldown of an open circuit
    pub circuit_timeout: Duration,

    /// Log output format
    pub log_format: LogFormat,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnv("DATABASE_URL"))?;

        let log_format = match env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            Ok("pretty") | Err(_) => LogFormat::Pretty,
            Ok(_) => return Err(ConfigError::InvalidValue("LOG_FORMAT")),
        };

        Ok(Self {
            database_url,
            database_max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10)?,
            max_retries: parse_env("EVENT_STORE_MAX_RETRIES", 3)?,
            retry_base_delay: Duration::from_millis(parse_env("EVENT_STORE_RETRY_BASE_DELAY_MS", 100)?),
            retry_max_delay: Duration::from_millis(parse_env("EVENT_STORE_RETRY_MAX_DELAY_MS", 2_000)?),
            circuit_failure_threshold: parse_env("CIRCUIT_FAILURE_THRESHOLD", 5)?,
            circuit_success_threshold: parse_env("CIRCUIT_SUCCESS_THRESHOLD", 2)?,
            circuit_timeout: Duration::from_millis(parse_env("CIRCUIT_TIMEOUT_MS", 60_000)?),
            log_format,
        })
    }

    /// Resilience settings for the event store
    pub fn event_store_config(&self) -> EventStoreConfig {
        EventStoreConfig {
            retry: RetryPolicy {
                max_retries: self.max_retries,
                base_delay: self.retry_base_delay,
                max_delay: self.retry_max_delay,
            },
            circuit: CircuitBreakerConfig {
                failure_threshold: self.circuit_failure_threshold,
                success_threshold: self.circuit_success_threshold,
                timeout: self.circuit_timeout,
            },
        }
    }
}

/// Read an optional numeric variable, falling back to a default
fn parse_env<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value.parse().map_err(|_| ConfigError::InvalidValue(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
