//! Query and backend configuration
//!
//! Both configurations load from environment variables on top of their
//! defaults and validate themselves before use.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::expr::NullPlacement;

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for '{field}': '{value}', expected {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("Missing required configuration '{field}': {hint}")]
    MissingRequired { field: String, hint: String },
}

/// Settings that shape how builders resolve defaults and validate limits
#[derive(Debug, Clone, PartialEq)]
pub struct QueryConfig {
    /// Null placement for order keys that do not specify one
    pub default_null_placement: NullPlacement,
    /// Upper bound on `limit`, if any
    pub max_limit: Option<u64>,
    /// Let `fetch_one` ask the backend for at most two rows when no limit is set
    pub limit_fetch_one: bool,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_null_placement: NullPlacement::First,
            max_limit: None,
            limit_fetch_one: true,
        }
    }
}

impl QueryConfig {
    /// Load configuration from `QUARRY_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(value) = env::var("QUARRY_NULL_ORDERING") {
            config.default_null_placement = value.parse()?;
        }

        if let Ok(value) = env::var("QUARRY_MAX_LIMIT") {
            let limit = value.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                field: "max_limit".to_string(),
                value: value.clone(),
                expected: "a positive integer".to_string(),
            })?;
            config.max_limit = Some(limit);
        }

        if let Ok(value) = env::var("QUARRY_LIMIT_FETCH_ONE") {
            config.limit_fetch_one = parse_bool("limit_fetch_one", &value)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_limit == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "max_limit".to_string(),
                value: "0".to_string(),
                expected: "a positive integer".to_string(),
            });
        }
        Ok(())
    }

    pub fn with_null_placement(mut self, placement: NullPlacement) -> Self {
        self.default_null_placement = placement;
        self
    }

    pub fn with_max_limit(mut self, max_limit: u64) -> Self {
        self.max_limit = Some(max_limit);
        self
    }
}

impl FromStr for NullPlacement {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "first" | "nulls_first" => Ok(NullPlacement::First),
            "last" | "nulls_last" => Ok(NullPlacement::Last),
            _ => Err(ConfigError::InvalidValue {
                field: "null_ordering".to_string(),
                value: s.to_string(),
                expected: "first or last".to_string(),
            }),
        }
    }
}

/// Connection pool configuration for the PostgreSQL backend
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: u64,
    pub idle_timeout: Option<u64>,
    pub max_lifetime: Option<u64>,
    pub test_before_acquire: bool,
}

impl BackendConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: 30,
            idle_timeout: Some(600),  // 10 minutes
            max_lifetime: Some(1800), // 30 minutes
            test_before_acquire: true,
        }
    }

    /// Load from `DATABASE_URL` and optional `DATABASE_*` pool settings
    pub fn from_env() -> Result<Self, ConfigError> {
        let url = env::var("DATABASE_URL").map_err(|_| ConfigError::MissingRequired {
            field: "database_url".to_string(),
            hint: "DATABASE_URL environment variable is required".to_string(),
        })?;
        let mut config = Self::new(url);

        if let Ok(value) = env::var("DATABASE_MAX_CONNECTIONS") {
            config.max_connections = parse_number("max_connections", &value)?;
        }
        if let Ok(value) = env::var("DATABASE_MIN_CONNECTIONS") {
            config.min_connections = parse_number("min_connections", &value)?;
        }
        if let Ok(value) = env::var("DATABASE_ACQUIRE_TIMEOUT") {
            config.acquire_timeout = parse_number("acquire_timeout", &value)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.database_url.starts_with("postgres://")
            && !self.database_url.starts_with("postgresql://")
        {
            return Err(ConfigError::InvalidValue {
                field: "database_url".to_string(),
                value: self.database_url.clone(),
                expected: "a postgres:// or postgresql:// URL".to_string(),
            });
        }

        if self.max_connections == 0 || self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue {
                field: "min_connections".to_string(),
                value: format!("{}..{}", self.min_connections, self.max_connections),
                expected: "0 <= min_connections <= max_connections, max_connections > 0"
                    .to_string(),
            });
        }

        Ok(())
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout)
    }
}

fn parse_number<T: FromStr>(field: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        expected: "a non-negative integer".to_string(),
    })
}

fn parse_bool(field: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            expected: "true or false".to_string(),
        }),
    }
}
