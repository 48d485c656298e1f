//! Daemon configuration.
//!
//! Loads configuration from environment variables with sensible defaults.

use crate::error::{DaemonError, DaemonResult};
use std::env;
use std::str::FromStr;
use std::time::Duration;

// =============================================================================
// Configuration
// =============================================================================

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// API server configuration
    pub api: ApiConfig,

    /// Storage configuration
    pub store: StoreConfig,

    /// Accrual oracle configuration
    pub accrual: AccrualConfig,

    /// Reconciliation loop configuration
    pub reconcile: ReconcileConfig,

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

/// Storage configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// PostgreSQL DSN; `None` selects the in-memory store
    pub database_url: Option<String>,
    /// Budget for a single ledger operation
    pub timeout: Duration,
}

/// Accrual oracle configuration.
#[derive(Debug, Clone)]
pub struct AccrualConfig {
    /// Oracle base URL
    pub address: String,
    /// Budget for a single oracle request
    pub timeout: Duration,
}

/// Reconciliation loop configuration.
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Delay between ticks
    pub interval: Duration,
    /// Maximum orders examined per tick
    pub batch_size: usize,
    /// Upper bound on a `Retry-After` pause requested by the oracle
    pub max_pause: Duration,
}

/// Environment type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Test environment
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
        let store = Self::load_store_config()?;
        let accrual = Self::load_accrual_config()?;
        let reconcile = Self::load_reconcile_config()?;

        Ok(Self {
            api,
            store,
            accrual,
            reconcile,
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
            store: StoreConfig {
                database_url: None,
                timeout: Duration::from_millis(500),
            },
            accrual: AccrualConfig {
                address: "http://127.0.0.1:8081".to_string(),
                timeout: Duration::from_millis(500),
            },
            reconcile: ReconcileConfig {
                interval: Duration::from_millis(10),
                batch_size: 100,
                max_pause: Duration::from_secs(1),
            },
            environment: Environment::Test,
        }
    }

    fn load_environment() -> DaemonResult<Environment> {
        let env_str = env::var("LOYALTY_ENV").unwrap_or_else(|_| "development".to_string());

        match env_str.to_lowercase().as_str() {
            "test" => Ok(Environment::Test),
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(DaemonError::Config(format!(
                "Invalid LOYALTY_ENV: {}. Expected: test, development, production",
                other
            ))),
        }
    }

    fn load_api_config() -> DaemonResult<ApiConfig> {
        let (default_host, default_port) = match env::var("RUN_ADDRESS") {
            Ok(addr) => Self::parse_run_address(&addr)?,
            Err(_) => ("0.0.0.0".to_string(), 8080),
        };
        let host = env::var("LOYALTY_API_HOST").unwrap_or(default_host);
        let port = Self::load_parsed_env("LOYALTY_API_PORT", default_port)?;

        Ok(ApiConfig { host, port })
    }

    /// Split a `host:port` bind address. An empty host binds all interfaces.
    fn parse_run_address(addr: &str) -> DaemonResult<(String, u16)> {
        let invalid = || {
            DaemonError::Config(format!("Invalid RUN_ADDRESS: {}. Expected host:port", addr))
        };

        let (host, port) = addr.trim().rsplit_once(':').ok_or_else(invalid)?;
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        let host = match host {
            "" => "0.0.0.0",
            h => h.trim_start_matches('[').trim_end_matches(']'),
        };

        Ok((host.to_string(), port))
    }

    fn load_store_config() -> DaemonResult<StoreConfig> {
        let database_url = env::var("DATABASE_URI").ok().filter(|v| !v.trim().is_empty());
        let timeout = Self::load_millis_env("LOYALTY_STORE_TIMEOUT_MS", 500)?;

        Ok(StoreConfig {
            database_url,
            timeout,
        })
    }

    fn load_accrual_config() -> DaemonResult<AccrualConfig> {
        let address = env::var("ACCRUAL_SYSTEM_ADDRESS")
            .unwrap_or_else(|_| "http://localhost:8081".to_string());
        if !address.starts_with("http://") && !address.starts_with("https://") {
            return Err(DaemonError::Config(format!(
                "Invalid ACCRUAL_SYSTEM_ADDRESS: {}. Expected an http(s) URL",
                address
            )));
        }
        let timeout = Self::load_millis_env("LOYALTY_ORACLE_TIMEOUT_MS", 5000)?;

        Ok(AccrualConfig { address, timeout })
    }

    fn load_reconcile_config() -> DaemonResult<ReconcileConfig> {
        let interval = Self::load_millis_env("LOYALTY_RECONCILE_INTERVAL_MS", 500)?;
        let batch_size = Self::load_parsed_env("LOYALTY_RECONCILE_BATCH", 100usize)?;
        if batch_size == 0 {
            return Err(DaemonError::Config("LOYALTY_RECONCILE_BATCH must be positive".to_string()));
        }
        let max_pause = Self::load_millis_env("LOYALTY_RECONCILE_MAX_PAUSE_MS", 60_000)?;

        Ok(ReconcileConfig {
            interval,
            batch_size,
            max_pause,
        })
    }

    fn load_millis_env(key: &str, default_ms: u64) -> DaemonResult<Duration> {
        let millis = Self::load_parsed_env(key, default_ms)?;
        if millis == 0 {
            return Err(DaemonError::Config(format!("{} must be positive", key)));
        }
        Ok(Duration::from_millis(millis))
    }

    fn load_parsed_env<T: FromStr>(key: &str, default: T) -> DaemonResult<T> {
        match env::var(key) {
            Ok(val) => val
                .trim()
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
            store: StoreConfig {
                database_url: None,
                timeout: Duration::from_millis(500),
            },
            accrual: AccrualConfig {
                address: "http://localhost:8081".to_string(),
                timeout: Duration::from_secs(5),
            },
            reconcile: ReconcileConfig {
                interval: Duration::from_millis(500),
                batch_size: 100,
                max_pause: Duration::from_secs(60),
            },
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
