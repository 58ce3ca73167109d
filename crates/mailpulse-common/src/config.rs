//! Configuration for MailPulse

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Mailbox provider OAuth client
    #[serde(default)]
    pub oauth: OAuthConfig,

    /// Token-at-rest encryption
    #[serde(default)]
    pub security: SecurityConfig,

    /// Open/click tracking
    #[serde(default)]
    pub tracking: TrackingConfig,

    /// Delivery throttling
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Scheduled campaign sweep
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Hostname
    #[serde(default = "default_hostname")]
    pub hostname: String,

    /// Bind address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            bind_address: default_bind_address(),
        }
    }
}

fn default_hostname() -> String {
    "localhost".to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database backend, only "postgres" is supported
    #[serde(default = "default_db_backend")]
    pub backend: String,

    /// Database URL
    pub url: Option<String>,

    /// Maximum connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

fn default_db_backend() -> String {
    "postgres".to_string()
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    2
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API port
    #[serde(default = "default_api_port")]
    pub port: u16,

    /// Bearer token required on the internal `/api/v1` routes
    pub internal_token: Option<String>,

    /// CORS allowed origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_api_port(),
            internal_token: None,
            cors_origins: Vec::new(),
        }
    }
}

fn default_api_port() -> u16 {
    8080
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// OAuth client used to refresh mailbox access tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    /// OAuth client id
    #[serde(default)]
    pub client_id: String,

    /// OAuth client secret
    #[serde(default)]
    pub client_secret: String,

    /// Token endpoint
    #[serde(default = "default_token_url")]
    pub token_url: String,

    /// Base URL of the mailbox send API
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Refresh this many seconds before the recorded expiry
    #[serde(default = "default_refresh_skew_secs")]
    pub refresh_skew_secs: i64,

    /// HTTP timeout for provider calls in seconds
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            token_url: default_token_url(),
            api_base_url: default_api_base_url(),
            refresh_skew_secs: default_refresh_skew_secs(),
            http_timeout_secs: default_http_timeout_secs(),
        }
    }
}

fn default_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

fn default_api_base_url() -> String {
    "https://gmail.googleapis.com".to_string()
}

fn default_refresh_skew_secs() -> i64 {
    60
}

fn default_http_timeout_secs() -> u64 {
    30
}

/// Encryption of OAuth tokens at rest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// 256-bit key as 64 hex characters. Falls back to `token_key_env`.
    pub token_key: Option<String>,

    /// Environment variable holding the key when `token_key` is unset
    #[serde(default = "default_token_key_env")]
    pub token_key_env: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            token_key: None,
            token_key_env: default_token_key_env(),
        }
    }
}

fn default_token_key_env() -> String {
    "MAILPULSE_TOKEN_KEY".to_string()
}

impl SecurityConfig {
    /// Resolve the hex-encoded token key from config or the environment
    pub fn resolve_token_key(&self) -> crate::Result<String> {
        if let Some(key) = self.token_key.as_deref().filter(|k| !k.is_empty()) {
            return Ok(key.to_string());
        }

        std::env::var(&self.token_key_env).map_err(|_| {
            crate::Error::Config(format!(
                "No token key configured (set security.token_key or {})",
                self.token_key_env
            ))
        })
    }
}

/// Tracking link configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Public base URL the tracking endpoints are reachable at
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            public_base_url: default_public_base_url(),
        }
    }
}

fn default_public_base_url() -> String {
    "http://localhost:8080".to_string()
}

/// Delivery throttling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Delay between two sends of the same campaign, in milliseconds
    #[serde(default = "default_send_delay_ms")]
    pub send_delay_ms: u64,

    /// Campaign batches allowed to run at the same time
    #[serde(default = "default_max_concurrent_campaigns")]
    pub max_concurrent_campaigns: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            send_delay_ms: default_send_delay_ms(),
            max_concurrent_campaigns: default_max_concurrent_campaigns(),
        }
    }
}

fn default_send_delay_ms() -> u64 {
    500
}

fn default_max_concurrent_campaigns() -> usize {
    4
}

/// Scheduled campaign sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Run the sweep in-process on an interval
    #[serde(default = "default_scheduler_enabled")]
    pub enabled: bool,

    /// Seconds between two in-process sweeps
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Bearer secret required on `/cron/process-scheduled` when set
    pub cron_secret: Option<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_scheduler_enabled(),
            poll_interval_secs: default_poll_interval_secs(),
            cron_secret: None,
        }
    }
}

fn default_scheduler_enabled() -> bool {
    true
}

fn default_poll_interval_secs() -> u64 {
    60
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        debug!("Loading configuration from {}", path.display());

        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load configuration from `$MAILPULSE_CONFIG` or the default locations
    pub fn load() -> crate::Result<Self> {
        if let Ok(path) = std::env::var("MAILPULSE_CONFIG") {
            return Self::from_file(Path::new(&path));
        }

        let paths = [
            PathBuf::from("./config.toml"),
            PathBuf::from("/etc/mailpulse/config.toml"),
        ];

        for path in paths {
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        Err(crate::Error::Config(
            "No configuration file found".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let server = ServerConfig::default();
        assert_eq!(server.hostname, "localhost");
        assert_eq!(server.bind_address, "0.0.0.0");

        let dispatch = DispatchConfig::default();
        assert_eq!(dispatch.send_delay_ms, 500);
        assert_eq!(dispatch.max_concurrent_campaigns, 4);

        let oauth = OAuthConfig::default();
        assert_eq!(oauth.token_url, "https://oauth2.googleapis.com/token");
        assert_eq!(oauth.refresh_skew_secs, 60);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[server]
hostname = "mail.example.com"

[database]
url = "postgres://localhost/mailpulse"

[tracking]
public_base_url = "https://t.example.com"

[scheduler]
enabled = false
cron_secret = "s3cret"
"#;

        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.server.hostname, "mail.example.com");
        assert_eq!(config.database.backend, "postgres");
        assert_eq!(config.tracking.public_base_url, "https://t.example.com");
        assert!(!config.scheduler.enabled);
        assert_eq!(config.scheduler.cron_secret.as_deref(), Some("s3cret"));
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_missing_database_section_fails() {
        assert!(Config::from_toml("[server]\nhostname = \"x\"\n").is_err());
    }

    #[test]
    fn test_token_key_from_config_wins() {
        let security = SecurityConfig {
            token_key: Some("ab".repeat(32)),
            token_key_env: "MAILPULSE_TEST_UNSET_KEY".to_string(),
        };
        assert_eq!(security.resolve_token_key().unwrap().len(), 64);
    }

    #[test]
    fn test_token_key_missing() {
        let security = SecurityConfig {
            token_key: None,
            token_key_env: "MAILPULSE_TEST_DEFINITELY_UNSET".to_string(),
        };
        assert!(security.resolve_token_key().is_err());
    }
}
