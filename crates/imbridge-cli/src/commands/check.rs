//! `imbridge check`: parse and validate the configuration.

use crate::render::describe_driver;
use console::{style, Emoji};
use std::path::Path;

static CHECK: Emoji = Emoji("✓", "+");
static CROSS: Emoji = Emoji("✗", "x");
static WARN: Emoji = Emoji("⚠", "!");

/// Run the check command.
pub fn run(path: Option<&Path>) -> anyhow::Result<()> {
    let path = super::config_path(path)?;
    println!("Checking {}\n", path.display());

    let config = match super::load_config(Some(&path)) {
        Ok(config) => {
            println!("  {} Configuration parsed", style(CHECK).green());
            config
        }
        Err(e) => {
            println!("  {} {:#}", style(CROSS).red(), e);
            anyhow::bail!("configuration could not be loaded");
        }
    };

    let drivers = config.driver_configs();
    if drivers.len() < config.drivers.len() {
        println!(
            "  {} {} driver entries could not be parsed",
            style(WARN).yellow(),
            config.drivers.len() - drivers.len()
        );
    }

    println!("\n{}", style("Drivers").bold());
    if drivers.is_empty() {
        println!("  {} No drivers configured", style(WARN).yellow());
    }
    for driver in &drivers {
        println!("  {}", describe_driver(driver));
    }
    if !drivers.iter().any(|d| d.enabled()) {
        println!("  {} No driver is enabled", style(WARN).yellow());
    }

    println!();
    match config.validate() {
        Ok(()) => {
            println!("  {} Configuration valid", style(CHECK).green());
            Ok(())
        }
        Err(e) => {
            println!("  {} {}", style(CROSS).red(), e);
            anyhow::bail!("configuration is invalid")
        }
    }
}
