//! Driver manager wired to the real transports.

use imbridge_core::{
    BridgeConfig, ChannelInfo, ChannelType, DriverConfig, Platform, SendMessageRequest,
};
use imbridge_drivers::{Driver, DriverManager};
use imbridge_integration_tests::*;
use serde_json::json;
use std::time::Duration;

fn config_with_qq(port: u16) -> BridgeConfig {
    BridgeConfig::parse(&format!(
        r#"{{
            // QQ gateway connects to us
            drivers: [
                {{ platform: "QQ", enabled: true, connection_type: "server",
                   server: {{ host: "127.0.0.1", port: {port}, url_prefix: "/ws/" }} }},
                {{ platform: "telegram", enabled: false, token: "123:abc" }},
                {{ platform: "irc", enabled: true }},
            ],
        }}"#,
        port = port
    ))
    .unwrap()
}

#[test]
fn test_manager_routes_through_onebot() {
    let port = free_port();
    let config = config_with_qq(port);
    let drivers = config.driver_configs();
    assert_eq!(drivers.len(), 2, "unknown platform entry is skipped");

    let manager = DriverManager::with_default_drivers();
    let recorder = Recorder::default();
    let (on_message, on_event) = recorder.callbacks();
    manager.register_callbacks(on_message, on_event);

    assert_eq!(manager.load_drivers_parallel(&drivers), 1);
    let status = manager.status();
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].platform, Platform::Qq);
    assert!(status[0].connected);

    let mut peer = ws_connect(port, "/ws/", None).unwrap();
    let qq = manager.driver(Platform::Qq).unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        format!("{:?}", qq).contains("connections: 1")
    }));

    send_text(
        &mut peer,
        &json!({
            "post_type": "message",
            "message_type": "private",
            "message_id": 9,
            "user_id": 7,
            "message": "inbound",
            "sender": { "user_id": 7, "nickname": "bob" }
        })
        .to_string(),
    );
    assert!(wait_until(Duration::from_secs(2), || recorder.message_count() == 1));
    assert_eq!(recorder.messages.lock()[0].1.channel.kind, ChannelType::Private);

    let request = SendMessageRequest::new(ChannelInfo::new("100", ChannelType::Group), "hi");
    assert_eq!(manager.send_message(&request).len(), 1);
    assert!(read_text(&mut peer, Duration::from_secs(2)).unwrap().contains("send_group_msg"));

    let elsewhere = request.clone().to_platforms([Platform::Telegram]);
    assert!(manager.send_message(&elsewhere).is_empty());

    manager.shutdown();
    assert!(manager.get_all_drivers().is_empty());
    assert!(!qq.is_connected());
}

#[test]
fn test_failed_driver_is_kept_disconnected() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = taken.local_addr().unwrap().port();
    let drivers: Vec<DriverConfig> = config_with_qq(port).driver_configs();

    let manager = DriverManager::with_default_drivers();
    assert_eq!(manager.load_drivers_parallel(&drivers), 0);
    let status = manager.status();
    assert_eq!(status.len(), 1);
    assert!(!status[0].connected);

    let request = SendMessageRequest::new(ChannelInfo::new("100", ChannelType::Group), "hi");
    assert!(manager.send_message(&request).is_empty());
    manager.shutdown();
}

#[test]
fn test_empty_manager() {
    let manager = DriverManager::with_default_drivers();
    assert_eq!(
        manager.registered_platforms(),
        vec![Platform::Qq, Platform::Telegram, Platform::Matrix]
    );
    assert_eq!(manager.load_drivers_parallel(&[]), 0);

    let request = SendMessageRequest::new(ChannelInfo::new("1", ChannelType::Group), "hi");
    assert!(manager.send_message(&request).is_empty());
    manager.shutdown();
}
