use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_CURRENCY: &str = "KES";
const DEFAULT_FREE_SHIPPING_THRESHOLD: Decimal = dec!(5000);
const MPESA_SANDBOX_URL: &str = "https://sandbox.safaricom.co.ke";
const STRIPE_API_URL: &str = "https://api.stripe.com";
const FLUTTERWAVE_API_URL: &str = "https://api.flutterwave.com";

/// Safaricom Daraja credentials for Lipa na M-Pesa Online (STK push)
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MpesaConfig {
    pub consumer_key: String,
    pub consumer_secret: String,
    /// Paybill or till number the customer pays into
    pub shortcode: String,
    pub passkey: String,
    /// Publicly reachable URL of `POST /api/payments/mpesa/callback`
    pub callback_url: String,
    #[serde(default = "default_mpesa_base_url")]
    pub base_url: String,
    #[serde(default = "default_mpesa_transaction_type")]
    pub transaction_type: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StripeConfig {
    pub secret_key: String,
    /// Signing secret for `Stripe-Signature`; verification is skipped when unset
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default = "default_stripe_base_url")]
    pub base_url: String,
    #[serde(default = "default_webhook_tolerance_secs")]
    pub webhook_tolerance_secs: i64,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlutterwaveConfig {
    pub secret_key: String,
    /// Value Flutterwave echoes in the `verif-hash` header
    #[serde(default)]
    pub secret_hash: Option<String>,
    pub redirect_url: String,
    #[serde(default = "default_flutterwave_base_url")]
    pub base_url: String,
}

/// Account details printed on bank transfer instructions
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BankTransferConfig {
    pub bank_name: String,
    pub account_name: String,
    pub account_number: String,
    #[serde(default)]
    pub branch: Option<String>,
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins (production)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Allow permissive CORS fallback
    #[serde(default)]
    pub cors_allow_any_origin: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    #[validate(range(min = 1))]
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

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    #[validate(range(min = 1))]
    pub event_channel_capacity: usize,

    /// ISO currency code orders and payments are denominated in
    #[serde(default = "default_currency")]
    #[validate(length(equal = 3))]
    pub currency: String,

    /// Order subtotal at or above which delivery is free
    #[serde(default = "default_free_shipping_threshold")]
    #[validate(custom = "validate_non_negative")]
    pub free_shipping_threshold: Decimal,

    /// Shared secret expected in `x-admin-key` on admin mutations
    #[serde(default)]
    pub admin_api_key: Option<String>,

    /// Timeout for outbound payment provider calls
    #[serde(default = "default_payment_request_timeout_secs")]
    pub payment_request_timeout_secs: u64,

    #[serde(default)]
    pub mpesa: Option<MpesaConfig>,

    #[serde(default)]
    pub stripe: Option<StripeConfig>,

    #[serde(default)]
    pub flutterwave: Option<FlutterwaveConfig>,

    #[serde(default)]
    pub bank_transfer: Option<BankTransferConfig>,
}

impl AppConfig {
    /// Gets database URL reference
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Creates a new configuration with defaults for everything but the essentials
    pub fn new(database_url: String, host: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            currency: default_currency(),
            free_shipping_threshold: default_free_shipping_threshold(),
            admin_api_key: None,
            payment_request_timeout_secs: default_payment_request_timeout_secs(),
            mpesa: None,
            stripe: None,
            flutterwave: None,
            bank_transfer: None,
        }
    }

    /// Checks if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Checks if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Returns true if explicit CORS origins are configured
    pub fn has_cors_allowed_origins(&self) -> bool {
        self.cors_allowed_origins
            .as_ref()
            .map(|raw| raw.split(',').any(|origin| !origin.trim().is_empty()))
            .unwrap_or(false)
    }

    /// Whether we should fall back to permissive CORS
    pub fn should_allow_permissive_cors(&self) -> bool {
        self.is_development() || self.cors_allow_any_origin
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.should_allow_permissive_cors() && !self.has_cors_allowed_origins() {
            let mut err = ValidationError::new("cors_allowed_origins_required");
            err.message = Some(
                "Set APP__CORS_ALLOWED_ORIGINS for non-development environments or explicitly opt-in via APP__CORS_ALLOW_ANY_ORIGIN=true".into(),
            );
            errors.add("cors_allowed_origins", err);
        }

        if self.is_production() && self.admin_api_key.as_deref().map_or(true, str::is_empty) {
            let mut err = ValidationError::new("admin_api_key_required");
            err.message = Some("Set APP__ADMIN_API_KEY in production".into());
            errors.add("admin_api_key", err);
        }

        if let Some(mpesa) = &self.mpesa {
            if mpesa.shortcode.is_empty() || !mpesa.shortcode.chars().all(|c| c.is_ascii_digit())
            {
                let mut err = ValidationError::new("mpesa_shortcode");
                err.message = Some("mpesa.shortcode must be numeric".into());
                errors.add("mpesa", err);
            }
        }

        if let Some(stripe) = &self.stripe {
            if stripe.webhook_tolerance_secs <= 0 {
                let mut err = ValidationError::new("stripe_webhook_tolerance");
                err.message = Some("stripe.webhook_tolerance_secs must be positive".into());
                errors.add("stripe", err);
            }
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    2
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

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_free_shipping_threshold() -> Decimal {
    DEFAULT_FREE_SHIPPING_THRESHOLD
}

fn default_payment_request_timeout_secs() -> u64 {
    30
}

fn default_mpesa_base_url() -> String {
    MPESA_SANDBOX_URL.to_string()
}

fn default_mpesa_transaction_type() -> String {
    "CustomerPayBillOnline".to_string()
}

fn default_stripe_base_url() -> String {
    STRIPE_API_URL.to_string()
}

fn default_flutterwave_base_url() -> String {
    FLUTTERWAVE_API_URL.to_string()
}

fn default_webhook_tolerance_secs() -> i64 {
    300
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_non_negative(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() {
        let mut err = ValidationError::new("free_shipping_threshold");
        err.message = Some("free_shipping_threshold must not be negative".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("household_planet_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);
    let filter = EnvFilter::new(filter_directive);

    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    // Support both RUN_ENV and APP_ENV for selecting config profile
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
        .set_default("database_url", "sqlite://household_planet.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", i64::from(DEFAULT_PORT))?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .set_default("currency", DEFAULT_CURRENCY)?
        .set_default(
            "free_shipping_threshold",
            DEFAULT_FREE_SHIPPING_THRESHOLD.to_string(),
        )?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration security validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!(
        mpesa = app_config.mpesa.is_some(),
        stripe = app_config.stripe.is_some(),
        flutterwave = app_config.flutterwave.is_some(),
        "Configuration loaded successfully"
    );
    Ok(app_config)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_storefront_policy() {
        let cfg = AppConfig::new(
            "sqlite::memory:".into(),
            "127.0.0.1".into(),
            8080,
            "development".into(),
        );
        assert_eq!(cfg.currency, "KES");
        assert_eq!(cfg.free_shipping_threshold, dec!(5000));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn negative_threshold_is_rejected() {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".into(),
            "127.0.0.1".into(),
            8080,
            "development".into(),
        );
        cfg.free_shipping_threshold = dec!(-1);
        let errors = cfg.validate().unwrap_err();
        assert!(errors
            .field_errors()
            .contains_key("free_shipping_threshold"));
    }

    #[test]
    fn non_numeric_mpesa_shortcode_is_rejected() {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".into(),
            "127.0.0.1".into(),
            8080,
            "development".into(),
        );
        cfg.mpesa = Some(MpesaConfig {
            consumer_key: "key".into(),
            consumer_secret: "secret".into(),
            shortcode: "17437X".into(),
            passkey: "pass".into(),
            callback_url: "https://example.test/cb".into(),
            base_url: default_mpesa_base_url(),
            transaction_type: default_mpesa_transaction_type(),
        });
        assert!(cfg.validate_additional_constraints().is_err());
    }
}
