//! Path resolution utilities.

use crate::error::ConfigError;
use std::path::PathBuf;

/// Get the imbridge base directory (`<config dir>/imbridge`).
///
/// Falls back to `~/.imbridge` on platforms without a config directory.
pub fn base_dir() -> Result<PathBuf, ConfigError> {
    if let Some(dir) = dirs::config_dir() {
        return Ok(dir.join("imbridge"));
    }
    let home = dirs::home_dir().ok_or_else(|| {
        ConfigError::Validation("Could not determine home directory".to_string())
    })?;
    Ok(home.join(".imbridge"))
}

/// Get the main config file path (`<base dir>/imbridge.json5`).
pub fn config_file() -> Result<PathBuf, ConfigError> {
    Ok(base_dir()?.join("imbridge.json5"))
}
