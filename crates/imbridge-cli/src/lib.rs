//! imbridge command-line interface.

pub mod commands;
pub mod logging;
pub mod render;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// imbridge - bridge QQ, Telegram and Matrix chats
#[derive(Parser)]
#[command(name = "imbridge")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to config file
    #[arg(short, long, env = "IMBRIDGE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Start every enabled driver and log inbound traffic until Ctrl-C
    Run,

    /// Parse and validate the configuration
    Check,

    /// Start the drivers, print their connection status, and stop
    Status,

    /// Send one message through the configured drivers
    Send(commands::send::SendArgs),

    /// Write a default configuration file
    Init {
        /// Overwrite existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Show version information
    Version,
}

/// Run the CLI with the given arguments.
pub fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.config.as_deref();
    match cli.command {
        Commands::Run => commands::run::run(config),
        Commands::Check => commands::check::run(config),
        Commands::Status => commands::status::run(config),
        Commands::Send(args) => commands::send::run(config, args),
        Commands::Init { force } => commands::init(config, force),
        Commands::Version => {
            println!("imbridge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
