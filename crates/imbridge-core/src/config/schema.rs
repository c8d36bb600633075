//! Configuration schema definitions.

use crate::secret::SecretString;
use crate::types::Platform;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Main imbridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Raw driver entries, one per platform connection.
    ///
    /// Kept untyped so that one malformed entry does not reject the whole
    /// file; see [`BridgeConfig::driver_configs`].
    #[serde(default)]
    pub drivers: Vec<Value>,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Configuration of one driver, tagged by `platform`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "platform", rename_all = "lowercase")]
pub enum DriverConfig {
    /// OneBot v11 over WebSocket.
    Qq(QqConfig),

    /// Telegram Bot API.
    Telegram(TelegramConfig),

    /// Matrix client-server API.
    Matrix(MatrixConfig),
}

impl DriverConfig {
    /// Platform served by this entry.
    pub fn platform(&self) -> Platform {
        match self {
            DriverConfig::Qq(_) => Platform::Qq,
            DriverConfig::Telegram(_) => Platform::Telegram,
            DriverConfig::Matrix(_) => Platform::Matrix,
        }
    }

    /// Whether the driver should be started.
    pub fn enabled(&self) -> bool {
        match self {
            DriverConfig::Qq(c) => c.enabled,
            DriverConfig::Telegram(c) => c.enabled,
            DriverConfig::Matrix(c) => c.enabled,
        }
    }
}

/// OneBot driver configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QqConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Accept reverse connections or dial out.
    #[serde(default)]
    pub connection_type: ConnectionType,

    /// Reverse WebSocket (we listen) settings.
    #[serde(default, alias = "server")]
    pub ws_server: WsServerConfig,

    /// Forward WebSocket (we dial) settings.
    #[serde(default, alias = "client")]
    pub ws_client: WsClientConfig,
}

/// WebSocket role of the OneBot driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionType {
    /// Listen for connections from the OneBot implementation.
    #[default]
    #[serde(rename = "ws_server", alias = "server")]
    WsServer,

    /// Connect to the OneBot implementation.
    #[serde(rename = "ws_client", alias = "client")]
    WsClient,
}

/// Reverse WebSocket listener settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Required from connecting clients when non-empty.
    #[serde(default)]
    pub access_token: SecretString,

    /// Path (or path prefix) accepted for upgrades.
    #[serde(default = "default_url_prefix")]
    pub url_prefix: String,
}

impl Default for WsServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            access_token: SecretString::default(),
            url_prefix: default_url_prefix(),
        }
    }
}

/// Forward WebSocket client settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsClientConfig {
    #[serde(default = "default_ws_url")]
    pub ws_url: String,

    /// Sent as a bearer token when non-empty.
    #[serde(default)]
    pub access_token: SecretString,

    /// Ping interval in seconds; 0 disables heartbeats.
    #[serde(default = "default_heartbeat")]
    pub heartbeat: u64,

    /// Delay between reconnect attempts in seconds.
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval: u64,
}

impl Default for WsClientConfig {
    fn default() -> Self {
        Self {
            ws_url: default_ws_url(),
            access_token: SecretString::default(),
            heartbeat: default_heartbeat(),
            reconnect_interval: default_reconnect_interval(),
        }
    }
}

/// Telegram driver configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Bot token from @BotFather.
    #[serde(default)]
    pub token: SecretString,

    /// Proxy for all Bot API traffic, e.g. `http://127.0.0.1:7890`.
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "empty_as_none")]
    pub http_proxy: Option<String>,
}

/// Matrix driver configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Fully qualified user ID, e.g. `@bot:example.org`.
    #[serde(default)]
    pub user_id: String,

    /// Access token.
    #[serde(default)]
    pub token: SecretString,

    /// Homeserver base URL.
    #[serde(default)]
    pub homeserver: String,

    #[serde(default = "default_device_id")]
    pub device_id: String,
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            user_id: String::new(),
            token: SecretString::default(),
            homeserver: String::new(),
            device_id: default_device_id(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default)]
    pub level: LogLevel,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

/// Log level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,

    /// One JSON object per line.
    Json,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_url_prefix() -> String {
    "/ws/".to_string()
}

fn default_ws_url() -> String {
    "ws://127.0.0.1:6700".to_string()
}

fn default_heartbeat() -> u64 {
    30
}

fn default_reconnect_interval() -> u64 {
    5
}

fn default_device_id() -> String {
    "imbridge".to_string()
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}
