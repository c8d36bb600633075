//! CLI command implementations.

pub mod check;
pub mod run;
pub mod send;
pub mod status;

use anyhow::Context;
use imbridge_core::config::DEFAULT_CONFIG;
use imbridge_core::{paths, BridgeConfig, DriverConfig};
use imbridge_drivers::DriverManager;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Resolve the config file path: the explicit one, or the default.
pub fn config_path(path: Option<&Path>) -> anyhow::Result<PathBuf> {
    match path {
        Some(path) => Ok(path.to_path_buf()),
        None => Ok(paths::config_file()?),
    }
}

/// Load the configuration from `path` or the default location.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<BridgeConfig> {
    let path = config_path(path)?;
    BridgeConfig::load(&path).with_context(|| format!("Failed to load {}", path.display()))
}

/// Build a manager with every transport and start the given drivers.
pub fn start_drivers(configs: &[DriverConfig]) -> DriverManager {
    let manager = DriverManager::with_default_drivers();
    let connected = manager.load_drivers_parallel(configs);
    let loaded = manager.get_all_drivers().len();
    if connected < loaded {
        warn!("{} of {} driver(s) failed to connect", loaded - connected, loaded);
    }
    manager
}

/// Write the default configuration file.
pub fn init(path: Option<&Path>, force: bool) -> anyhow::Result<()> {
    let path = config_path(path)?;
    if path.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {}. Use --force to overwrite.",
            path.display()
        );
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, DEFAULT_CONFIG)?;
    println!("Created config file: {}", path.display());
    println!("  Tip: enable a driver, then run 'imbridge check'.");
    Ok(())
}
