//! Configuration management for RentVault
//!
//! Loads and validates configuration from environment variables, with
//! support for different environments (development, staging, production).

use std::env;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid environment value: {0}")]
    InvalidValue(String),

    #[error("Invalid port number: {0}")]
    InvalidPort(String),
}

/// Application environment
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    /// Parse environment from string
    pub fn from_str(s: &str) -> Result<Self, ConfigError> {
        match s.to_lowercase().as_str() {
            "dev" | "development" => Ok(Environment::Development),
            "staging" => Ok(Environment::Staging),
            "prod" | "production" => Ok(Environment::Production),
            _ => Err(ConfigError::InvalidValue(format!(
                "Invalid environment: '{}'. Expected: dev, staging, or prod",
                s
            ))),
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

/// Which ledger client backs the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerMode {
    /// Soroban JSON-RPC
    Rpc,
    /// In-process ledger, no network
    Simulated,
}

impl LedgerMode {
    pub fn from_str(s: &str) -> Result<Self, ConfigError> {
        match s.to_lowercase().as_str() {
            "rpc" => Ok(LedgerMode::Rpc),
            "simulated" | "sim" => Ok(LedgerMode::Simulated),
            _ => Err(ConfigError::InvalidValue(format!(
                "Invalid ledger mode: '{}'. Expected: rpc or simulated",
                s
            ))),
        }
    }

    /// Production talks to the real network unless told otherwise
    pub fn default_for(environment: &Environment) -> Self {
        if environment.is_production() {
            LedgerMode::Rpc
        } else {
            LedgerMode::Simulated
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Soroban RPC URL for blockchain interactions
    pub soroban_rpc_url: String,

    /// Factory contract emitting agreement creation events
    pub factory_contract_id: Option<String>,

    /// Current environment
    pub environment: Environment,

    /// Server port
    pub port: u16,

    /// Maximum database connections
    pub db_max_connections: u32,

    pub ledger_mode: LedgerMode,

    /// Upper bound on every ledger round-trip
    pub ledger_timeout_secs: u64,

    /// How often the RPC client polls `getEvents`
    pub ledger_poll_interval_secs: u64,

    /// Period of the on-chain state sweep and default detection
    pub reconcile_interval_secs: u64,

    /// CORS allowed origins
    pub cors_allowed_origins: Option<String>,

    /// Log level (RUST_LOG)
    pub log_level: String,
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors)
        dotenvy::dotenv().ok();

        let environment = env::var("ENVIRONMENT")
            .map(|s| Environment::from_str(&s))
            .unwrap_or(Ok(Environment::Development))?;

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))?;

        let soroban_rpc_url = env::var("SOROBAN_RPC_URL")
            .unwrap_or_else(|_| "https://soroban-testnet.stellar.org".to_string());

        let factory_contract_id = env::var("FACTORY_CONTRACT_ID")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3001".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort("PORT must be a valid number".to_string()))?;

        let ledger_mode = match env::var("LEDGER_MODE") {
            Ok(s) => LedgerMode::from_str(&s)?,
            Err(_) => LedgerMode::default_for(&environment),
        };

        Ok(Config {
            database_url,
            soroban_rpc_url,
            factory_contract_id,
            environment,
            port,
            db_max_connections: parse_or("DB_MAX_CONNECTIONS", 5),
            ledger_mode,
            ledger_timeout_secs: parse_or("LEDGER_TIMEOUT_SECS", 10),
            ledger_poll_interval_secs: parse_or("LEDGER_POLL_INTERVAL_SECS", 5),
            reconcile_interval_secs: parse_or("RECONCILE_INTERVAL_SECS", 60),
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS").ok(),
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }

    pub fn ledger_timeout(&self) -> Duration {
        Duration::from_secs(self.ledger_timeout_secs.max(1))
    }

    pub fn ledger_poll_interval(&self) -> Duration {
        Duration::from_secs(self.ledger_poll_interval_secs.max(1))
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs.max(1))
    }

    /// Get database URL with the password masked, for logging
    pub fn database_url_masked(&self) -> String {
        if let Some(at_pos) = self.database_url.find('@') {
            if let Some(colon_pos) = self.database_url[..at_pos].rfind(':') {
                let prefix = &self.database_url[..colon_pos + 1];
                let suffix = &self.database_url[at_pos..];
                return format!("{}****{}", prefix, suffix);
            }
        }
        self.database_url.clone()
    }
}
