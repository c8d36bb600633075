//! imbridge CLI entry point.

use clap::Parser;
use imbridge_cli::{commands, logging, run, Cli};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logging settings come from the config file when it can be read; the
    // command itself reports load errors.
    let settings = commands::load_config(cli.config.as_deref())
        .map(|config| config.logging)
        .unwrap_or_default();
    logging::init(&settings, cli.verbose);

    run(cli)
}
