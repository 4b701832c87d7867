use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::info;
use validator::Validate;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_CURRENCY: &str = "INR";
const DEFAULT_RETURN_WINDOW_DAYS: i64 = 7;
const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 10;

/// Which settlement step records a coupon redemption.
///
/// `OnOrder` burns the coupon as soon as the order is durably created, even
/// if payment is later abandoned. `OnPayment` defers it to verified payment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CouponRedemptionPolicy {
    OnOrder,
    OnPayment,
}

impl Default for CouponRedemptionPolicy {
    fn default() -> Self {
        CouponRedemptionPolicy::OnOrder
    }
}

/// Payment gateway connection settings.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Base URL of the gateway REST API; unset selects the sandbox gateway
    #[serde(default)]
    pub base_url: Option<String>,

    /// API key id used for basic auth against the gateway
    #[serde(default)]
    pub key_id: String,

    /// Shared secret: basic-auth password and HMAC signing key
    #[validate(length(min = 8))]
    pub key_secret: String,

    /// ISO currency code used for payment intents
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Bound on outbound gateway calls, in seconds
    #[serde(default = "default_gateway_timeout_secs")]
    pub timeout_secs: u64,
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// JWT secret key used to verify bearer tokens
    #[validate(length(min = 32))]
    pub jwt_secret: String,

    /// JWT expiration time in seconds
    pub jwt_expiration: usize,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Payment gateway settings
    #[validate]
    pub gateway: GatewayConfig,

    /// When a coupon redemption is recorded
    #[serde(default)]
    pub coupon_redemption: CouponRedemptionPolicy,

    /// Days after delivery during which a return may be requested
    #[serde(default = "default_return_window_days")]
    pub return_window_days: i64,
}

impl AppConfig {
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development" || self.environment == "test"
    }

    /// Minimal constructor used by the test harness.
    pub fn for_tests(database_url: String, jwt_secret: String, gateway_secret: String) -> Self {
        Self {
            database_url,
            jwt_secret,
            jwt_expiration: 3600,
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            environment: "test".to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            auto_migrate: true,
            db_max_connections: 1,
            db_min_connections: 1,
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            gateway: GatewayConfig {
                base_url: None,
                key_id: "test_key".to_string(),
                key_secret: gateway_secret,
                currency: DEFAULT_CURRENCY.to_string(),
                timeout_secs: DEFAULT_GATEWAY_TIMEOUT_SECS,
            },
            coupon_redemption: CouponRedemptionPolicy::default(),
            return_window_days: DEFAULT_RETURN_WINDOW_DAYS,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_return_window_days() -> i64 {
    DEFAULT_RETURN_WINDOW_DAYS
}

fn default_gateway_timeout_secs() -> u64 {
    DEFAULT_GATEWAY_TIMEOUT_SECS
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_min_connections() -> u32 {
    1
}

fn default_db_connect_timeout_secs() -> u64 {
    30
}

fn default_db_idle_timeout_secs() -> u64 {
    600
}

fn default_db_acquire_timeout_secs() -> u64 {
    8
}

/// Initialize the tracing subscriber with an env-filter built from config,
/// overridable through RUST_LOG.
pub fn init_tracing(level: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let default_directive = format!("swiftcart_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    tracing_subscriber::registry()
        .with(EnvFilter::new(filter_directive))
        .with(fmt::layer())
        .init();
}

/// Loads configuration from files and environment.
///
/// Layering: built-in defaults, then `config/default`, then
/// `config/{RUN_ENV}`, then `APP__`-prefixed environment variables.
/// `jwt_secret` and `gateway.key_secret` have no defaults and must be
/// provided explicitly.
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://swiftcart.db?mode=rwc")?
        .set_default("jwt_expiration", 3600)?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("gateway.currency", DEFAULT_CURRENCY)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;
    app_config.validate()?;

    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_rejects_short_jwt_secret() {
        let mut cfg = AppConfig::for_tests(
            "sqlite::memory:".into(),
            "short".into(),
            "gateway_secret_key".into(),
        );
        cfg.jwt_secret = "short".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_default_redemption_policy_is_on_order() {
        assert_eq!(
            CouponRedemptionPolicy::default(),
            CouponRedemptionPolicy::OnOrder
        );
    }
}
