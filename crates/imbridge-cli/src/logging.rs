//! Tracing subscriber setup.

use imbridge_core::config::{LogFormat, LoggingConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter directive used when `RUST_LOG` is not set.
pub fn default_directive(settings: &LoggingConfig, verbose: u8) -> String {
    let level = match verbose {
        0 => settings.level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    format!("imbridge={}", level)
}

/// Install the global subscriber. `RUST_LOG` takes precedence.
pub fn init(settings: &LoggingConfig, verbose: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_directive(settings, verbose).into());

    let registry = tracing_subscriber::registry().with(filter);
    let result = match settings.format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
    };
    if let Err(e) = result {
        eprintln!("Logging already initialized: {}", e);
    }
}
