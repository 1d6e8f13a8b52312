//! Server configuration
//!
//! Loaded in layers: built-in defaults, then an optional TOML or JSON file,
//! then `FIXPAY_*` environment variables. `.env` files are read by the binary
//! before the environment is snapshotted.
//!
//! ```toml
//! [server]
//! port = 8080
//! webhook_timeout_secs = 10
//!
//! [gateway]
//! server_key = "SB-Mid-server-..."
//! production = false
//! signature_scheme = "body_digest"
//! default_bank = "bca"
//!
//! [reconcile]
//! interval_secs = 300
//! grace_period_secs = 600
//!
//! [orders]
//! base_url = "http://orders.internal:8000"
//! ```

mod env;
mod error;
mod loader;
mod validation;

pub use env::{ENV_PREFIX, EnvLoader};
pub use error::{ConfigError, Result};
pub use loader::{ConfigLoader, FileFormat};
pub use validation::{ConfigValidator, Validate};

use fixpay_payments::{
    Bank, GatewayConfig, ReconcileConfig, RetryPolicy, ServiceOptions, SignatureScheme,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Full server configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSettings,
    pub gateway: GatewaySettings,
    pub reconcile: ReconcileSettings,
    pub orders: OrderSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Upper bound on webhook processing
    pub webhook_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            webhook_timeout_secs: 10,
        }
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    #[serde(deserialize_with = "deserialize_secret")]
    pub server_key: SecretString,
    pub client_key: Option<String>,
    pub production: bool,
    /// Overrides the sandbox/production URL
    pub base_url: Option<String>,
    pub signature_scheme: SignatureScheme,
    /// Where e-wallet apps send the customer back to
    pub callback_url: Option<String>,
    pub default_bank: Bank,
    pub qris_acquirer: String,
    pub timeout_secs: u64,
    pub expiry_hours: u32,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            server_key: SecretString::new(String::new().into_boxed_str()),
            client_key: None,
            production: false,
            base_url: None,
            signature_scheme: SignatureScheme::BodyDigest,
            callback_url: None,
            default_bank: Bank::Bca,
            qris_acquirer: "gopay".to_string(),
            timeout_secs: 30,
            expiry_hours: 24,
        }
    }
}

impl fmt::Debug for GatewaySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewaySettings")
            .field("server_key", &"[REDACTED]")
            .field("client_key", &self.client_key)
            .field("production", &self.production)
            .field("base_url", &self.base_url)
            .field("signature_scheme", &self.signature_scheme)
            .field("callback_url", &self.callback_url)
            .field("default_bank", &self.default_bank)
            .field("qris_acquirer", &self.qris_acquirer)
            .field("timeout_secs", &self.timeout_secs)
            .field("expiry_hours", &self.expiry_hours)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconcileSettings {
    pub enabled: bool,
    pub interval_secs: u64,
    pub grace_period_secs: u64,
    pub batch_size: usize,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 300,
            grace_period_secs: 600,
            batch_size: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrderSettings {
    /// Order service; without one, orders come from an in-process directory
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    /// Retries for settlement notices after the first attempt
    pub notify_attempts: u32,
}

impl Default for OrderSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: 5,
            notify_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

fn deserialize_secret<'de, D>(deserializer: D) -> std::result::Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    Ok(SecretString::new(value.into_boxed_str()))
}

impl AppConfig {
    /// Load from an optional file, then the process environment, then validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, &EnvLoader::default())
    }

    /// Load from an optional file and the given environment, then validate
    pub fn load_with(path: Option<&Path>, env: &EnvLoader) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(env)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML or JSON file; missing keys take defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let value = ConfigLoader::auto(path)?.load_file(path)?;
        serde_json::from_value(value).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Override fields from `FIXPAY_*` variables
    pub fn apply_env(&mut self, env: &EnvLoader) -> Result<()> {
        if let Some(v) = env.get("server_host") {
            self.server.host = v.to_string();
        }
        set_parsed(env, "server_port", &mut self.server.port)?;
        set_parsed(env, "server_webhook_timeout_secs", &mut self.server.webhook_timeout_secs)?;

        if let Some(v) = env.get("gateway_server_key") {
            self.gateway.server_key = SecretString::new(v.to_string().into_boxed_str());
        }
        if let Some(v) = env.get("gateway_client_key") {
            self.gateway.client_key = Some(v.to_string());
        }
        set_parsed(env, "gateway_production", &mut self.gateway.production)?;
        if let Some(v) = env.get("gateway_base_url") {
            self.gateway.base_url = Some(v.to_string());
        }
        if let Some(v) = env.get("gateway_signature_scheme") {
            self.gateway.signature_scheme =
                SignatureScheme::parse(v).ok_or_else(|| invalid(env, "gateway_signature_scheme", v))?;
        }
        if let Some(v) = env.get("gateway_callback_url") {
            self.gateway.callback_url = Some(v.to_string());
        }
        if let Some(v) = env.get("gateway_default_bank") {
            self.gateway.default_bank =
                Bank::from_code(v).ok_or_else(|| invalid(env, "gateway_default_bank", v))?;
        }
        if let Some(v) = env.get("gateway_qris_acquirer") {
            self.gateway.qris_acquirer = v.to_string();
        }
        set_parsed(env, "gateway_timeout_secs", &mut self.gateway.timeout_secs)?;
        set_parsed(env, "gateway_expiry_hours", &mut self.gateway.expiry_hours)?;

        set_parsed(env, "reconcile_enabled", &mut self.reconcile.enabled)?;
        set_parsed(env, "reconcile_interval_secs", &mut self.reconcile.interval_secs)?;
        set_parsed(env, "reconcile_grace_period_secs", &mut self.reconcile.grace_period_secs)?;
        set_parsed(env, "reconcile_batch_size", &mut self.reconcile.batch_size)?;

        if let Some(v) = env.get("orders_base_url") {
            self.orders.base_url = Some(v.to_string());
        }
        set_parsed(env, "orders_timeout_secs", &mut self.orders.timeout_secs)?;
        set_parsed(env, "orders_notify_attempts", &mut self.orders.notify_attempts)?;

        if let Some(v) = env.get("log_level") {
            self.logging.level = v.to_lowercase();
        }
        if let Some(v) = env.get("log_format") {
            self.logging.format = v.to_lowercase();
        }
        Ok(())
    }

    /// Listen address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.server.webhook_timeout_secs)
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        let gateway = &self.gateway;
        GatewayConfig {
            server_key: gateway.server_key.clone(),
            client_key: gateway.client_key.clone(),
            is_production: gateway.production,
            base_url: gateway.base_url.clone(),
            timeout: Duration::from_secs(gateway.timeout_secs),
            callback_url: gateway.callback_url.clone(),
            default_bank: gateway.default_bank,
            qris_acquirer: gateway.qris_acquirer.clone(),
            expiry_hours: gateway.expiry_hours,
        }
    }

    pub fn service_options(&self) -> ServiceOptions {
        ServiceOptions {
            default_bank: self.gateway.default_bank,
            callback_url: self.gateway.callback_url.clone(),
            qris_acquirer: self.gateway.qris_acquirer.clone(),
            expiry_hours: self.gateway.expiry_hours,
            notify_retry: RetryPolicy::exponential(self.orders.notify_attempts),
            ..Default::default()
        }
    }

    pub fn reconcile_config(&self) -> ReconcileConfig {
        ReconcileConfig {
            interval: Duration::from_secs(self.reconcile.interval_secs),
            grace_period: Duration::from_secs(self.reconcile.grace_period_secs),
            batch_size: self.reconcile.batch_size,
        }
    }

    pub fn order_timeout(&self) -> Duration {
        Duration::from_secs(self.orders.timeout_secs)
    }
}

impl Validate for AppConfig {
    fn validate(&self) -> Result<()> {
        ConfigValidator::not_empty(&self.server.host, "server.host")?;
        ConfigValidator::is_port(self.server.port, "server.port")?;
        ConfigValidator::in_range(self.server.webhook_timeout_secs, 1, 120, "server.webhook_timeout_secs")?;

        ConfigValidator::not_empty(self.gateway.server_key.expose_secret(), "gateway.server_key")?;
        if let Some(url) = &self.gateway.base_url {
            ConfigValidator::is_url(url, "gateway.base_url")?;
        }
        if let Some(url) = &self.gateway.callback_url {
            ConfigValidator::is_url(url, "gateway.callback_url")?;
        }
        ConfigValidator::not_empty(&self.gateway.qris_acquirer, "gateway.qris_acquirer")?;
        ConfigValidator::in_range(self.gateway.timeout_secs, 1, 300, "gateway.timeout_secs")?;
        ConfigValidator::in_range(self.gateway.expiry_hours, 1, 168, "gateway.expiry_hours")?;

        ConfigValidator::in_range(self.reconcile.interval_secs, 1, 86_400, "reconcile.interval_secs")?;
        ConfigValidator::in_range(self.reconcile.batch_size, 1, 1_000, "reconcile.batch_size")?;

        if let Some(url) = &self.orders.base_url {
            ConfigValidator::is_url(url, "orders.base_url")?;
        }
        ConfigValidator::in_range(self.orders.timeout_secs, 1, 120, "orders.timeout_secs")?;
        ConfigValidator::in_range(self.orders.notify_attempts, 0, 10, "orders.notify_attempts")?;

        ConfigValidator::one_of(
            &self.logging.level,
            &["trace", "debug", "info", "warn", "error"],
            "logging.level",
        )?;
        ConfigValidator::one_of(
            &self.logging.format,
            &["json", "plain", "pretty", "compact"],
            "logging.format",
        )?;
        Ok(())
    }
}

fn set_parsed<T>(env: &EnvLoader, key: &str, slot: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    if let Some(raw) = env.get(key) {
        *slot = raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: env.var_name(key),
            message: e.to_string(),
        })?;
    }
    Ok(())
}

fn invalid(env: &EnvLoader, key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: env.var_name(key),
        message: format!("unrecognized value {:?}", value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env(vars: &[(&str, &str)]) -> EnvLoader {
        EnvLoader::from_vars(ENV_PREFIX, vars.iter().copied())
    }

    #[test]
    fn test_defaults_need_a_server_key() {
        let err = AppConfig::load_with(None, &env(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(ref m) if m.contains("server_key")));
    }

    #[test]
    fn test_env_overrides() {
        let config = AppConfig::load_with(
            None,
            &env(&[
                ("FIXPAY_GATEWAY_SERVER_KEY", "SB-Mid-server-abc"),
                ("FIXPAY_SERVER_PORT", "9090"),
                ("FIXPAY_GATEWAY_SIGNATURE_SCHEME", "hmac_sha256"),
                ("FIXPAY_GATEWAY_DEFAULT_BANK", "BNI"),
                ("FIXPAY_RECONCILE_ENABLED", "false"),
                ("FIXPAY_LOG_FORMAT", "Pretty"),
            ]),
        )
        .unwrap();

        assert_eq!(config.gateway.server_key.expose_secret(), "SB-Mid-server-abc");
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.gateway.signature_scheme, SignatureScheme::HmacSha256);
        assert_eq!(config.gateway.default_bank, Bank::Bni);
        assert!(!config.reconcile.enabled);
        assert_eq!(config.logging.format, "pretty");
        assert_eq!(config.bind_address(), "0.0.0.0:9090");
    }

    #[test]
    fn test_bad_env_value() {
        let err = AppConfig::load_with(
            None,
            &env(&[
                ("FIXPAY_GATEWAY_SERVER_KEY", "k"),
                ("FIXPAY_SERVER_PORT", "eighty"),
            ]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "FIXPAY_SERVER_PORT"));

        let err = AppConfig::load_with(
            None,
            &env(&[
                ("FIXPAY_GATEWAY_SERVER_KEY", "k"),
                ("FIXPAY_GATEWAY_DEFAULT_BANK", "mandiri"),
            ]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_file_then_env() {
        let dir = std::env::temp_dir().join(format!("fixpay-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("fixpay.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
            [server]
            port = 7000

            [gateway]
            server_key = "SB-Mid-server-file"
            base_url = "http://127.0.0.1:4010"
            callback_url = "https://pos.example.com/done"

            [reconcile]
            interval_secs = 60
            "#
        )
        .unwrap();

        let config = AppConfig::load_with(
            Some(&path),
            &env(&[("FIXPAY_RECONCILE_BATCH_SIZE", "25")]),
        )
        .unwrap();

        assert_eq!(config.server.port, 7000);
        assert_eq!(config.gateway.server_key.expose_secret(), "SB-Mid-server-file");
        assert_eq!(config.reconcile_config().interval, Duration::from_secs(60));
        assert_eq!(config.reconcile_config().batch_size, 25);
        assert_eq!(config.gateway_config().endpoint(), "http://127.0.0.1:4010");
        assert_eq!(config.server.webhook_timeout_secs, 10);

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_validation_rules() {
        let mut config = AppConfig::default();
        config.gateway.server_key = SecretString::new("k".to_string().into_boxed_str());
        assert!(config.validate().is_ok());

        config.gateway.base_url = Some("ftp://gateway".into());
        assert!(config.validate().is_err());
        config.gateway.base_url = None;

        config.reconcile.batch_size = 0;
        assert!(config.validate().is_err());
        config.reconcile.batch_size = 100;

        config.logging.level = "loud".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_server_key() {
        let mut config = AppConfig::default();
        config.gateway.server_key = SecretString::new("SB-Mid-server-secret".to_string().into_boxed_str());
        let printed = format!("{:?}", config);
        assert!(!printed.contains("SB-Mid-server-secret"));
    }
}
