use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub push: PushConfig,
    #[serde(default)]
    pub checkout: CheckoutConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Directory of the built storefront, served for any path the API does not claim
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
            static_dir: None,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Username of the admin account created on first start
    #[serde(default = "default_admin_username")]
    pub admin_username: String,
    #[serde(default = "default_admin_name")]
    pub admin_name: String,
    /// Password for the bootstrap admin. Random (and logged once) when unset.
    pub admin_password: Option<String>,
    #[serde(default = "default_session_hours")]
    pub session_hours: i64,
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    /// Mark the session cookie `Secure` (requires HTTPS in front)
    #[serde(default)]
    pub secure_cookie: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            admin_username: default_admin_username(),
            admin_name: default_admin_name(),
            admin_password: None,
            session_hours: default_session_hours(),
            cookie_name: default_cookie_name(),
            secure_cookie: false,
        }
    }
}

fn default_admin_username() -> String {
    "admin".to_string()
}

fn default_admin_name() -> String {
    "Administrator".to_string()
}

fn default_session_hours() -> i64 {
    24 * 7
}

fn default_cookie_name() -> String {
    "oxistore_session".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_api_requests")]
    pub api_requests_per_window: u32,
    /// Login, registration and password reset
    #[serde(default = "default_auth_requests")]
    pub auth_requests_per_window: u32,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    /// Seconds between sweeps of stale limiter entries
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,
    /// Key clients on `X-Forwarded-For`/`X-Real-IP`. Only enable behind a proxy that overwrites them.
    #[serde(default)]
    pub trust_proxy_headers: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_requests_per_window: default_api_requests(),
            auth_requests_per_window: default_auth_requests(),
            window_seconds: default_window_seconds(),
            cleanup_interval: default_cleanup_interval(),
            trust_proxy_headers: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_api_requests() -> u32 {
    120
}

fn default_auth_requests() -> u32 {
    20
}

fn default_window_seconds() -> u64 {
    60
}

fn default_cleanup_interval() -> u64 {
    300
}

/// Web Push (VAPID) settings
#[derive(Debug, Clone, Deserialize)]
pub struct PushConfig {
    #[serde(default)]
    pub enabled: bool,
    /// `mailto:` or `https:` contact sent in the VAPID claims
    #[serde(default = "default_vapid_subject")]
    pub subject: String,
    /// Uncompressed P-256 public key, base64url without padding
    #[serde(default)]
    pub public_key: String,
    /// PKCS#8 PEM file holding the matching private key
    pub private_key_path: Option<PathBuf>,
    /// Seconds the push service may hold an undelivered message
    #[serde(default = "default_push_ttl")]
    pub ttl: u32,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            subject: default_vapid_subject(),
            public_key: String::new(),
            private_key_path: None,
            ttl: default_push_ttl(),
        }
    }
}

fn default_vapid_subject() -> String {
    "mailto:admin@localhost".to_string()
}

fn default_push_ttl() -> u32 {
    86_400
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutConfig {
    /// Products whose category name contains this word are print jobs
    #[serde(default = "default_print_keyword")]
    pub print_keyword: String,
    /// Rental length when an item carries no end date
    #[serde(default = "default_rental_days")]
    pub default_rental_days: i64,
    /// Proof-of-payment value that marks an order as already paid
    #[serde(default = "default_instant_payment_marker")]
    pub instant_payment_marker: String,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            print_keyword: default_print_keyword(),
            default_rental_days: default_rental_days(),
            instant_payment_marker: default_instant_payment_marker(),
        }
    }
}

fn default_print_keyword() -> String {
    "cetak".to_string()
}

fn default_rental_days() -> i64 {
    1
}

fn default_instant_payment_marker() -> String {
    "INSTANT_PAYMENT".to_string()
}

/// Background rental monitor
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_monitor_interval")]
    pub interval_seconds: u64,
    /// Rentals due within this many hours get a reminder push
    #[serde(default = "default_reminder_lead_hours")]
    pub reminder_lead_hours: i64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: default_monitor_interval(),
            reminder_lead_hours: default_reminder_lead_hours(),
        }
    }
}

fn default_monitor_interval() -> u64 {
    900
}

fn default_reminder_lead_hours() -> i64 {
    24
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::parse(&content)
        } else {
            info!("No config file found, using defaults");
            Ok(Config::default())
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).with_context(|| "Failed to parse configuration file")
    }

    /// Problems that would make the configured features misbehave
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.push.enabled {
            if self.push.public_key.is_empty() {
                warnings.push("push.enabled is set but push.public_key is empty".to_string());
            }
            if self.push.private_key_path.is_none() {
                warnings.push("push.enabled is set but push.private_key_path is missing".to_string());
            }
        }
        if self.auth.session_hours <= 0 {
            warnings.push("auth.session_hours must be positive".to_string());
        }
        if self.checkout.default_rental_days < 1 {
            warnings.push("checkout.default_rental_days must be at least 1".to_string());
        }
        if self.checkout.print_keyword.trim().is_empty() {
            warnings.push("checkout.print_keyword is empty; every product would be a print job".to_string());
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.checkout.print_keyword, "cetak");
        assert_eq!(config.checkout.default_rental_days, 1);
        assert_eq!(config.auth.session_hours, 168);
        assert!(config.rate_limit.enabled);
        assert!(!config.rate_limit.trust_proxy_headers);
        assert!(!config.push.enabled);
        assert!(config.warnings().is_empty());
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let config = Config::parse(
            r#"
            [server]
            port = 3000

            [push]
            enabled = true
            subject = "mailto:owner@toko.id"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.push.subject, "mailto:owner@toko.id");
        assert_eq!(config.push.ttl, 86_400);
        assert_eq!(config.warnings().len(), 2);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        assert!(Config::parse("[server\nport = ").is_err());
    }
}
