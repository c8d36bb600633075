//! Configuration loading, validation and persistence.

use super::{BridgeConfig, ConnectionType, DriverConfig};
use crate::error::ConfigError;
use crate::paths;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::{info, warn};
use url::Url;

/// Config written by [`BridgeConfig::load_or_create`] when no file exists.
pub const DEFAULT_CONFIG: &str = r#"{
  // Each entry starts one driver. Set `enabled: true` to use it.
  drivers: [
    {
      platform: "qq",
      enabled: false,
      // "ws_server": the OneBot implementation connects to us (reverse WS)
      // "ws_client": we connect to the OneBot implementation (forward WS)
      connection_type: "ws_server",
      ws_server: { host: "0.0.0.0", port: 8080, access_token: "", url_prefix: "/ws/" },
      ws_client: { ws_url: "ws://127.0.0.1:6700", access_token: "", heartbeat: 30, reconnect_interval: 5 },
    },
    {
      platform: "telegram",
      enabled: false,
      token: "",
      http_proxy: "",
    },
    {
      platform: "matrix",
      enabled: false,
      homeserver: "https://matrix.org",
      user_id: "@bot:matrix.org",
      token: "",
      device_id: "imbridge",
    },
  ],
  logging: { level: "info", format: "pretty" },
}
"#;

impl BridgeConfig {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = paths::config_file()?;
        Self::load(&path)
    }

    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Load configuration, writing [`DEFAULT_CONFIG`] first if the file is missing.
    pub fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, DEFAULT_CONFIG)?;
            info!("Wrote default configuration to {}", path.display());
        }
        Self::load(path)
    }

    /// Parse configuration from a string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        json5::from_str(content).map_err(|e| ConfigError::Json5(e.to_string()))
    }

    /// Save configuration to a file path.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = self.to_json5()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write atomically
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &content)?;
        fs::rename(&temp_path, path)?;

        Ok(())
    }

    /// Serialize to JSON5 string.
    pub fn to_json5(&self) -> Result<String, ConfigError> {
        // json5 has no serializer; JSON is valid JSON5
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Typed driver entries.
    ///
    /// Entries that fail to parse are logged and skipped so the remaining
    /// drivers can still start.
    pub fn driver_configs(&self) -> Vec<DriverConfig> {
        self.drivers
            .iter()
            .enumerate()
            .filter_map(|(i, raw)| match DriverConfig::from_value(raw.clone()) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Skipping driver entry [{}]: {}", i, e);
                    None
                }
            })
            .collect()
    }

    /// Validate the configuration, collecting all errors before returning.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        for (i, raw) in self.drivers.iter().enumerate() {
            match DriverConfig::from_value(raw.clone()) {
                Ok(config) => {
                    for problem in config.problems() {
                        errors.push(format!("Driver [{}] ({}): {}", i, config.platform(), problem));
                    }
                }
                Err(e) => errors.push(format!("Driver [{}]: {}", i, e)),
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors.join("; ")))
        }
    }
}

impl DriverConfig {
    /// Parse one raw driver entry. The `platform` tag is matched
    /// case-insensitively.
    pub fn from_value(mut raw: Value) -> Result<Self, ConfigError> {
        let obj = raw
            .as_object_mut()
            .ok_or_else(|| ConfigError::Parse("driver entry must be an object".to_string()))?;

        match obj.get("platform").and_then(Value::as_str) {
            Some(platform) => {
                let normalized = platform.trim().to_ascii_lowercase();
                obj.insert("platform".to_string(), Value::String(normalized));
            }
            None => return Err(ConfigError::Parse("missing `platform`".to_string())),
        }

        serde_json::from_value(raw).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Validate this entry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let problems = self.problems();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(problems.join("; ")))
        }
    }

    fn problems(&self) -> Vec<String> {
        let mut errors = Vec::new();

        match self {
            DriverConfig::Qq(qq) => match qq.connection_type {
                ConnectionType::WsServer => {
                    if qq.ws_server.port == 0 {
                        errors.push("ws_server.port cannot be 0".to_string());
                    }
                    if !qq.ws_server.url_prefix.starts_with('/') {
                        errors.push(format!(
                            "ws_server.url_prefix must start with '/', got '{}'",
                            qq.ws_server.url_prefix
                        ));
                    }
                }
                ConnectionType::WsClient => {
                    match Url::parse(&qq.ws_client.ws_url) {
                        Ok(url) if matches!(url.scheme(), "ws" | "wss") => {}
                        Ok(url) => errors.push(format!(
                            "ws_client.ws_url must use ws:// or wss://, got '{}://'",
                            url.scheme()
                        )),
                        Err(e) => errors.push(format!(
                            "ws_client.ws_url '{}' is invalid: {}",
                            qq.ws_client.ws_url, e
                        )),
                    }
                    if qq.ws_client.reconnect_interval == 0 {
                        errors.push("ws_client.reconnect_interval must be greater than 0".to_string());
                    }
                }
            },
            DriverConfig::Telegram(tg) => {
                if tg.enabled && tg.token.is_empty() {
                    errors.push("Telegram is enabled but token is not set".to_string());
                }
                if let Some(proxy) = &tg.http_proxy {
                    if let Err(e) = Url::parse(proxy) {
                        errors.push(format!("http_proxy '{}' is invalid: {}", proxy, e));
                    }
                }
            }
            DriverConfig::Matrix(mx) => {
                match Url::parse(&mx.homeserver) {
                    Ok(url) if matches!(url.scheme(), "http" | "https") => {}
                    Ok(_) | Err(_) => errors.push(format!(
                        "homeserver '{}' must be an http(s) URL",
                        mx.homeserver
                    )),
                }
                if !(mx.user_id.starts_with('@') && mx.user_id.contains(':')) {
                    errors.push(format!(
                        "user_id '{}' must look like '@name:server'",
                        mx.user_id
                    ));
                }
                if mx.enabled && mx.token.is_empty() {
                    errors.push("Matrix is enabled but token is not set".to_string());
                }
            }
        }

        errors
    }
}
