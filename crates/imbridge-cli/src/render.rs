//! Terminal rendering utilities.

use console::style;
use imbridge_core::DriverConfig;
use imbridge_drivers::DriverStatus;

/// One status line per driver.
pub fn status_lines(status: &[DriverStatus]) -> Vec<String> {
    status
        .iter()
        .map(|s| {
            let state = if s.connected {
                style("connected").green()
            } else {
                style("disconnected").red()
            };
            format!("  {:<10} {}", s.platform.as_str(), state)
        })
        .collect()
}

/// Print the status of every loaded driver.
pub fn render_status(status: &[DriverStatus]) {
    if status.is_empty() {
        println!("{}", style("No drivers loaded.").yellow());
        return;
    }
    println!("{}", style("Drivers").bold());
    for line in status_lines(status) {
        println!("{}", line);
    }
}

/// Short description of a driver entry for `imbridge check`.
pub fn describe_driver(config: &DriverConfig) -> String {
    let detail = match config {
        DriverConfig::Qq(qq) => match qq.connection_type {
            imbridge_core::config::ConnectionType::WsServer => format!(
                "ws_server on {}:{}{}",
                qq.ws_server.host, qq.ws_server.port, qq.ws_server.url_prefix
            ),
            imbridge_core::config::ConnectionType::WsClient => {
                format!("ws_client to {}", qq.ws_client.ws_url)
            }
        },
        DriverConfig::Telegram(tg) => match &tg.http_proxy {
            Some(proxy) => format!("long polling via {}", proxy),
            None => "long polling".to_string(),
        },
        DriverConfig::Matrix(mx) => format!("{} on {}", mx.user_id, mx.homeserver),
    };
    let enabled = if config.enabled() { "enabled" } else { "disabled" };
    format!("{:<10} {:<8} {}", config.platform().as_str(), enabled, detail)
}
