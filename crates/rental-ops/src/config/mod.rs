use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use rust_decimal::Decimal;

use crate::workflows::rental::domain::PaymentTerms;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub lifecycle: LifecyclePolicy,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            lifecycle: LifecyclePolicy::from_env()?,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Business rules applied by the rental lifecycle service.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecyclePolicy {
    /// Tax rate applied when an agreement does not carry its own.
    pub default_tax_percentage: Decimal,
    pub min_extension_reason_len: usize,
    pub min_rejection_reason_len: usize,
    /// Read-validate-commit cycles attempted before surfacing a concurrent modification.
    pub max_commit_attempts: u32,
    pub quotation_validity_days: u32,
    pub default_payment_terms: PaymentTerms,
    /// Billable hours per calendar day for hourly lines without a stored duration.
    pub hours_per_day: u32,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            default_tax_percentage: Decimal::from(15),
            min_extension_reason_len: 10,
            min_rejection_reason_len: 5,
            max_commit_attempts: 3,
            quotation_validity_days: 30,
            default_payment_terms: PaymentTerms::Net(30),
            hours_per_day: 8,
        }
    }
}

impl LifecyclePolicy {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let default_tax_percentage =
            read_var("RENTAL_DEFAULT_TAX_PERCENTAGE")?.unwrap_or(defaults.default_tax_percentage);
        if default_tax_percentage < Decimal::ZERO || default_tax_percentage > Decimal::ONE_HUNDRED
        {
            return Err(ConfigError::InvalidValue {
                variable: "RENTAL_DEFAULT_TAX_PERCENTAGE",
                value: default_tax_percentage.to_string(),
            });
        }

        let max_commit_attempts =
            read_var("RENTAL_MAX_COMMIT_ATTEMPTS")?.unwrap_or(defaults.max_commit_attempts);
        if max_commit_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                variable: "RENTAL_MAX_COMMIT_ATTEMPTS",
                value: "0".to_string(),
            });
        }

        let default_payment_terms = env::var("RENTAL_DEFAULT_PAYMENT_TERMS")
            .map(|raw| PaymentTerms::parse(&raw))
            .unwrap_or(defaults.default_payment_terms);

        Ok(Self {
            default_tax_percentage,
            min_extension_reason_len: read_var("RENTAL_MIN_EXTENSION_REASON")?
                .unwrap_or(defaults.min_extension_reason_len),
            min_rejection_reason_len: read_var("RENTAL_MIN_REJECTION_REASON")?
                .unwrap_or(defaults.min_rejection_reason_len),
            max_commit_attempts,
            quotation_validity_days: read_var("RENTAL_QUOTATION_VALIDITY_DAYS")?
                .unwrap_or(defaults.quotation_validity_days),
            default_payment_terms,
            hours_per_day: read_var("RENTAL_HOURS_PER_DAY")?.unwrap_or(defaults.hours_per_day),
        })
    }
}

fn read_var<T: FromStr>(variable: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(variable) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                variable,
                value: raw,
            }),
        Err(_) => Ok(None),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidValue { variable: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidValue { variable, value } => {
                write!(f, "{variable} has an invalid value '{value}'")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort | ConfigError::InvalidValue { .. } => None,
            ConfigError::InvalidHost { source } => Some(source),
        }
    }
}
