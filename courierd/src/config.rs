//! Daemon configuration.
//!
//! Loads configuration from environment variables with sensible defaults.

use crate::error::{DaemonError, DaemonResult};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

// =============================================================================
// Configuration
// =============================================================================

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// API server configuration
    pub api: ApiConfig,

    /// Event forwarding configuration
    pub events: EventConfig,

    /// JSON pricing table loaded at startup (empty table when unset)
    pub pricing_file: Option<PathBuf>,

    /// PostgreSQL connection string (in-memory store when unset)
    pub database_url: Option<String>,

    /// Environment (test, development, production)
    pub environment: Environment,
}

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
}

/// Event bus and store-event forwarding.
#[derive(Debug, Clone)]
pub struct EventConfig {
    /// Broadcast buffer per subscriber
    pub bus_capacity: usize,
    /// How often committed store events are forwarded to the bus
    pub poll_interval: Duration,
}

/// Environment type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Test environment (uses stubs)
    Test,
    /// Development environment
    Development,
    /// Production environment
    Production,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> DaemonResult<Self> {
        // Load .env file if present (ignore errors)
        let _ = dotenvy::dotenv();

        let environment = Self::load_environment()?;
        let api = Self::load_api_config()?;
        let events = Self::load_event_config()?;
        let pricing_file = env::var("COURIER_PRICING_FILE").ok().map(PathBuf::from);
        let database_url = env::var("DATABASE_URL").ok().filter(|url| !url.is_empty());

        Ok(Self {
            api,
            events,
            pricing_file,
            database_url,
            environment,
        })
    }

    /// Create test configuration.
    pub fn test() -> Self {
        Self {
            api: ApiConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Let OS assign port
            },
            events: EventConfig {
                bus_capacity: 64,
                poll_interval: Duration::from_millis(20),
            },
            pricing_file: None,
            database_url: None,
            environment: Environment::Test,
        }
    }

    fn load_environment() -> DaemonResult<Environment> {
        let env_str = env::var("COURIER_ENV").unwrap_or_else(|_| "development".to_string());

        match env_str.to_lowercase().as_str() {
            "test" => Ok(Environment::Test),
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(DaemonError::Config(format!(
                "Invalid COURIER_ENV: {}. Expected: test, development, production",
                other
            ))),
        }
    }

    fn load_api_config() -> DaemonResult<ApiConfig> {
        let host = env::var("COURIER_API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = Self::load_number_env("COURIER_API_PORT", 8080u16)?;

        Ok(ApiConfig { host, port })
    }

    fn load_event_config() -> DaemonResult<EventConfig> {
        let bus_capacity = Self::load_number_env("COURIER_EVENT_BUS_CAPACITY", 1000usize)?;
        if bus_capacity == 0 {
            return Err(DaemonError::Config(
                "COURIER_EVENT_BUS_CAPACITY must be greater than zero".to_string(),
            ));
        }
        let poll_ms = Self::load_number_env("COURIER_EVENT_POLL_MS", 500u64)?;

        Ok(EventConfig {
            bus_capacity,
            poll_interval: Duration::from_millis(poll_ms),
        })
    }

    fn load_number_env<T: std::str::FromStr>(key: &str, default: T) -> DaemonResult<T> {
        match env::var(key) {
            Ok(val) => val
                .parse::<T>()
                .map_err(|_| DaemonError::Config(format!("Invalid {} value: {}", key, val))),
            Err(_) => Ok(default),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            events: EventConfig {
                bus_capacity: 1000,
                poll_interval: Duration::from_millis(500),
            },
            pricing_file: None,
            database_url: None,
            environment: Environment::Development,
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Test => write!(f, "test"),
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.api.port, 8080);
        assert_eq!(config.events.bus_capacity, 1000);
        assert_eq!(config.environment, Environment::Development);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_test_config() {
        let config = Config::test();

        assert_eq!(config.api.port, 0);
        assert_eq!(config.environment, Environment::Test);
        assert!(config.pricing_file.is_none());
    }

    #[test]
    fn test_environment_display() {
        assert_eq!(Environment::Test.to_string(), "test");
        assert_eq!(Environment::Development.to_string(), "development");
        assert_eq!(Environment::Production.to_string(), "production");
    }

    #[test]
    fn test_number_env_rejects_garbage() {
        std::env::set_var("COURIER_TEST_NUMBER_GARBAGE", "eighty");
        let result = Config::load_number_env("COURIER_TEST_NUMBER_GARBAGE", 80u16);
        assert!(matches!(result, Err(DaemonError::Config(_))));

        let fallback = Config::load_number_env("COURIER_TEST_NUMBER_UNSET", 80u16).unwrap();
        assert_eq!(fallback, 80);
    }
}
