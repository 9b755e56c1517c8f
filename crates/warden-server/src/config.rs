//! Server configuration loading from file and environment variables.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use thiserror::Error;
use warden_api::ApiConfig;
use warden_bridge::BridgeConfig;
use warden_rules::EngineConfig;
use warden_store::DbRuntimeSettings;
use warden_watcher::WatcherConfig;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Local control API settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Platform API client settings.
    #[serde(default)]
    pub api: ApiConfig,

    /// Push pipeline connection settings.
    #[serde(default)]
    pub pipeline: BridgeConfig,

    /// Local log watcher settings, including the optional grammar table.
    #[serde(default)]
    pub watcher: WatcherConfig,

    /// Rule engine tunables.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Operator session.
    #[serde(default)]
    pub session: SessionConfig,
}

/// Network configuration for the control API.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "warden_bridge=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Credentials of the operator's platform session.
///
/// Login flows live elsewhere; the engine is handed an existing cookie.
#[derive(Clone, Default, Deserialize)]
pub struct SessionConfig {
    /// Value of the platform `auth` cookie.
    #[serde(default)]
    pub auth_cookie: Option<String>,

    /// The operator's platform user id.
    #[serde(default)]
    pub user_id: Option<String>,
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("auth_cookie", &self.auth_cookie.as_ref().map(|_| "[REDACTED]"))
            .field("user_id", &self.user_id)
            .finish()
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_db_path() -> String {
    "warden.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    DbRuntimeSettings::default().busy_timeout_ms
}

fn default_pool_max_size() -> u32 {
    DbRuntimeSettings::default().pool_max_size
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl DatabaseConfig {
    pub fn runtime_settings(&self) -> DbRuntimeSettings {
        DbRuntimeSettings {
            busy_timeout_ms: self.busy_timeout_ms,
            pool_max_size: self.pool_max_size,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `WARDEN_HOST` overrides `server.host`
/// - `WARDEN_PORT` overrides `server.port`
/// - `WARDEN_DB_PATH` overrides `database.path`
/// - `WARDEN_LOG_LEVEL` overrides `logging.level`
/// - `WARDEN_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `WARDEN_AUTH_COOKIE` overrides `session.auth_cookie`
/// - `WARDEN_USER_ID` overrides `session.user_id`
/// - `WARDEN_LOG_DIR` overrides `watcher.log_dir`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Applies `WARDEN_*` overrides read through `lookup`. Unparseable values
/// are ignored.
pub fn apply_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = lookup("WARDEN_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = lookup("WARDEN_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(db_path) = lookup("WARDEN_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(level) = lookup("WARDEN_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = lookup("WARDEN_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(cookie) = lookup("WARDEN_AUTH_COOKIE") {
        config.session.auth_cookie = Some(cookie);
    }
    if let Some(user_id) = lookup("WARDEN_USER_ID") {
        config.session.user_id = Some(user_id);
    }
    if let Some(dir) = lookup("WARDEN_LOG_DIR") {
        if !dir.trim().is_empty() {
            config.watcher.log_dir = Some(PathBuf::from(dir));
        }
    }
}
