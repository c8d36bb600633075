//! `imbridge status`: start the drivers once and report their state.

use crate::render::render_status;
use std::path::Path;

/// Run the status command.
pub fn run(path: Option<&Path>) -> anyhow::Result<()> {
    let config = super::load_config(path)?;
    let manager = super::start_drivers(&config.driver_configs());
    render_status(&manager.status());
    manager.shutdown();
    Ok(())
}
