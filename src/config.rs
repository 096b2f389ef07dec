//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::normalize_currency;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Environment (development, production)
    pub environment: String,

    pub ledger: LedgerConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| ConfigError::MissingEnv("DATABASE_URL"))?;

        let database_max_connections = parse_env("DATABASE_MAX_CONNECTIONS", 10)?;

        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        Ok(Self {
            database_url,
            database_max_connections,
            environment,
            ledger: LedgerConfig::from_env()?,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

/// Ledger engine tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Maximum wait for a single row lock
    pub lock_timeout: Duration,

    /// Deadline for a whole unit of work
    pub operation_timeout: Duration,

    /// Attempts with a fresh generated identifier after a collision
    pub max_id_retries: u32,

    /// Currency for accounts opened without one
    pub default_currency: String,

    pub default_page_size: i64,
    pub max_page_size: i64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(2000),
            operation_timeout: Duration::from_millis(5000),
            max_id_retries: 3,
            default_currency: "USD".to_string(),
            default_page_size: 50,
            max_page_size: 500,
        }
    }
}

impl LedgerConfig {
    /// Load from `LEDGER_*` environment variables, falling back to defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let lock_timeout_ms: u64 = parse_env("LEDGER_LOCK_TIMEOUT_MS", 2000)?;
        let operation_timeout_ms: u64 = parse_env("LEDGER_OPERATION_TIMEOUT_MS", 5000)?;
        let max_id_retries = parse_env("LEDGER_MAX_ID_RETRIES", defaults.max_id_retries)?;

        let default_currency = match env::var("LEDGER_DEFAULT_CURRENCY") {
            Ok(code) => normalize_currency(&code)
                .map_err(|_| ConfigError::InvalidValue("LEDGER_DEFAULT_CURRENCY"))?,
            Err(_) => defaults.default_currency,
        };

        if lock_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue("LEDGER_LOCK_TIMEOUT_MS"));
        }
        if operation_timeout_ms < lock_timeout_ms {
            return Err(ConfigError::InvalidValue("LEDGER_OPERATION_TIMEOUT_MS"));
        }

        Ok(Self {
            lock_timeout: Duration::from_millis(lock_timeout_ms),
            operation_timeout: Duration::from_millis(operation_timeout_ms),
            max_id_retries,
            default_currency,
            ..defaults
        })
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn with_operation_timeout(mut self, operation_timeout: Duration) -> Self {
        self.operation_timeout = operation_timeout;
        self
    }

    pub fn with_max_id_retries(mut self, max_id_retries: u32) -> Self {
        self.max_id_retries = max_id_retries;
        self
    }
}

fn parse_env<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue(key)),
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
