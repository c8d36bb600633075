//! `imbridge send`: deliver one message and exit.

use clap::{Args, ValueEnum};
use imbridge_core::{ChannelInfo, ChannelType, Platform, SendMessageRequest};
use std::path::Path;

/// Channel kind accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ChannelKind {
    Group,
    Private,
    Channel,
}

impl From<ChannelKind> for ChannelType {
    fn from(kind: ChannelKind) -> Self {
        match kind {
            ChannelKind::Group => ChannelType::Group,
            ChannelKind::Private => ChannelType::Private,
            ChannelKind::Channel => ChannelType::Channel,
        }
    }
}

/// Send command arguments.
#[derive(Args)]
pub struct SendArgs {
    /// Target platform; repeat for several. Omit to send everywhere.
    #[arg(short, long)]
    pub platform: Vec<Platform>,

    /// Channel, group, chat or room ID
    #[arg(long)]
    pub channel: String,

    /// Kind of the target channel
    #[arg(long, value_enum, default_value = "group")]
    pub kind: ChannelKind,

    /// Message text
    pub text: String,
}

impl SendArgs {
    pub fn request(&self) -> SendMessageRequest {
        let request = SendMessageRequest::new(
            ChannelInfo::new(self.channel.clone(), self.kind.into()),
            self.text.clone(),
        );
        if self.platform.is_empty() {
            request
        } else {
            request.to_platforms(self.platform.iter().copied())
        }
    }
}

/// Run the send command.
pub fn run(path: Option<&Path>, args: SendArgs) -> anyhow::Result<()> {
    let config = super::load_config(path)?;
    let request = args.request();

    // Only start the drivers the request can reach.
    let drivers: Vec<_> = config
        .driver_configs()
        .into_iter()
        .filter(|d| request.targets(d.platform()))
        .collect();

    let manager = super::start_drivers(&drivers);
    let ids = manager.send_message(&request);
    manager.shutdown();

    if ids.is_empty() {
        anyhow::bail!("Message was not delivered by any driver");
    }
    for id in ids {
        println!("{}", id);
    }
    Ok(())
}
