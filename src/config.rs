//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use bigdecimal::BigDecimal;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    /// `None` when running with `SKIP_EXTERNALS=true` on the in-memory store.
    pub database: Option<DatabaseConfig>,
    pub logging: LoggingConfig,
    pub payments: PaymentsConfig,
    pub auth: AuthConfig,
    pub sweeper: SweeperConfig,
    pub orders: OrdersConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub skip_externals: bool,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
    pub run_migrations: bool,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Settings shared by every payment attempt, independent of provider
#[derive(Debug, Clone)]
pub struct PaymentsConfig {
    pub currency: String,
    pub success_url: Option<String>,
    pub failure_url: Option<String>,
}

/// Bearer token verification
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_issuer: Option<String>,
}

/// Pending payment sweeper worker
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    pub enabled: bool,
    pub poll_interval: Duration,
    /// Pending records younger than this are left to webhooks and clients.
    pub pending_age: Duration,
    pub batch_size: i64,
    pub concurrency: usize,
}

#[derive(Debug, Clone)]
pub struct OrdersConfig {
    /// Tax rate applied to the subtotal, e.g. `0.12`.
    pub tax_rate: BigDecimal,
}

fn parse_var<T: FromStr>(key: &str, default: &str) -> Result<T, ConfigError> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(key.to_string()))
}

fn optional_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        let server = ServerConfig::from_env()?;
        let database = if server.skip_externals {
            None
        } else {
            Some(DatabaseConfig::from_env()?)
        };

        Ok(AppConfig {
            server,
            database,
            logging: LoggingConfig::from_env()?,
            payments: PaymentsConfig::from_env()?,
            auth: AuthConfig::from_env()?,
            sweeper: SweeperConfig::from_env()?,
            orders: OrdersConfig::from_env()?,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        if let Some(database) = &self.database {
            database.validate()?;
        }
        self.logging.validate()?;
        self.payments.validate()?;
        self.auth.validate()?;
        self.sweeper.validate()?;
        self.orders.validate()?;

        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_var("PORT", "8000")?,
            skip_externals: parse_var::<String>("SKIP_EXTERNALS", "false")?.to_lowercase()
                == "true",
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue("PORT cannot be 0".to_string()));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue("HOST cannot be empty".to_string()));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::MissingVariable("DATABASE_URL".to_string()))?,
            max_connections: parse_var("DB_MAX_CONNECTIONS", "20")?,
            min_connections: parse_var("DB_MIN_CONNECTIONS", "5")?,
            connection_timeout: parse_var("DB_CONNECTION_TIMEOUT", "30")?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
            run_migrations: parse_var::<String>("DB_RUN_MIGRATIONS", "true")?.to_lowercase()
                != "false",
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            format: LogFormat::Plain,
        }
    }
}

impl PaymentsConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(PaymentsConfig {
            currency: env::var("PAYMENT_CURRENCY").unwrap_or_else(|_| "PHP".to_string()),
            success_url: optional_var("PAYMENT_SUCCESS_URL"),
            failure_url: optional_var("PAYMENT_FAILURE_URL"),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(ConfigError::InvalidValue(
                "PAYMENT_CURRENCY must be a 3-letter ISO code".to_string(),
            ));
        }

        for url in [&self.success_url, &self.failure_url].into_iter().flatten() {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::InvalidValue(format!(
                    "redirect URL '{}' must be absolute",
                    url
                )));
            }
        }

        Ok(())
    }
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            currency: "PHP".to_string(),
            success_url: None,
            failure_url: None,
        }
    }
}

impl AuthConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(AuthConfig {
            jwt_secret: env::var("JWT_SECRET")
                .map_err(|_| ConfigError::MissingVariable("JWT_SECRET".to_string()))?,
            jwt_issuer: optional_var("JWT_ISSUER"),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.len() < 32 {
            return Err(ConfigError::ValidationFailed(
                "JWT_SECRET must be at least 32 bytes".to_string(),
            ));
        }

        Ok(())
    }
}

impl SweeperConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(SweeperConfig {
            enabled: parse_var::<String>("SWEEPER_ENABLED", "true")?.to_lowercase() != "false",
            poll_interval: Duration::from_secs(parse_var("SWEEPER_POLL_INTERVAL_SECONDS", "60")?),
            pending_age: Duration::from_secs(parse_var("SWEEPER_PENDING_AGE_SECONDS", "300")?),
            batch_size: parse_var("SWEEPER_BATCH_SIZE", "50")?,
            concurrency: parse_var("SWEEPER_CONCURRENCY", "4")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "SWEEPER_POLL_INTERVAL_SECONDS".to_string(),
            ));
        }

        if self.batch_size <= 0 {
            return Err(ConfigError::InvalidValue("SWEEPER_BATCH_SIZE".to_string()));
        }

        if self.concurrency == 0 {
            return Err(ConfigError::InvalidValue("SWEEPER_CONCURRENCY".to_string()));
        }

        Ok(())
    }
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: Duration::from_secs(60),
            pending_age: Duration::from_secs(300),
            batch_size: 50,
            concurrency: 4,
        }
    }
}

impl OrdersConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(OrdersConfig {
            tax_rate: parse_var("ORDER_TAX_RATE", "0.12")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tax_rate < BigDecimal::from(0) || self.tax_rate >= BigDecimal::from(1) {
            return Err(ConfigError::ValidationFailed(
                "ORDER_TAX_RATE must be in [0, 1)".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for OrdersConfig {
    fn default() -> Self {
        Self {
            tax_rate: BigDecimal::new(12.into(), 2),
        }
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}
