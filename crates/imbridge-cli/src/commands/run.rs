//! `imbridge run`: keep every enabled driver up until Ctrl-C.

use crate::render::render_status;
use imbridge_core::{Event, Message, Platform};
use std::path::Path;
use std::sync::{mpsc, Arc};
use tracing::info;

fn log_message(platform: Platform, message: Message) {
    info!(
        "[{}] {} <{}> {}",
        platform,
        message.channel.name.as_deref().unwrap_or(&message.channel.id),
        message.user.display_name(),
        message.content
    );
}

fn log_event(platform: Platform, event: Event) {
    let user = event.user.as_ref().map(|u| u.display_name()).unwrap_or("-");
    let channel = event.channel.as_ref().map(|c| c.id.as_str()).unwrap_or("-");
    info!("[{}] {} user={} channel={}", platform, event.kind, user, channel);
}

/// Run the bridge.
pub fn run(path: Option<&Path>) -> anyhow::Result<()> {
    let config = super::load_config(path)?;
    let drivers = config.driver_configs();
    if !drivers.iter().any(|d| d.enabled()) {
        anyhow::bail!("No driver is enabled; edit the config file or run 'imbridge check'");
    }

    let manager = imbridge_drivers::DriverManager::with_default_drivers();
    manager.register_callbacks(Arc::new(log_message), Arc::new(log_event));
    manager.load_drivers_parallel(&drivers);
    render_status(&manager.status());

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;

    info!("imbridge running, press Ctrl-C to stop");
    let _ = rx.recv();

    info!("Shutting down");
    manager.shutdown();
    Ok(())
}
