//! QQ driver in reverse WebSocket (server) mode against real loopback peers.

use imbridge_core::{ChannelInfo, ChannelType, Platform, SendMessageRequest, EVENT_MEMBER_JOIN};
use imbridge_drivers::onebot::OneBotDriver;
use imbridge_drivers::Driver;
use imbridge_integration_tests::*;
use serde_json::{json, Value};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio_tungstenite::tungstenite::{self, http::StatusCode};

fn group_request(content: &str) -> SendMessageRequest {
    SendMessageRequest::new(ChannelInfo::new("100", ChannelType::Group), content)
        .to_platforms([Platform::Qq])
}

fn connected_driver(token: &str) -> (OneBotDriver, u16) {
    let port = free_port();
    let driver = OneBotDriver::new(qq_server_config(port, token));
    driver.connect().unwrap();
    assert!(driver.is_connected());
    (driver, port)
}

#[test]
fn test_send_group_message_frame() {
    let (driver, port) = connected_driver("");
    let mut peer = ws_connect(port, "/ws/", None).unwrap();
    assert!(wait_until(Duration::from_secs(2), || driver.connection_count() == 1));

    let id = driver.send_message(&group_request("hi")).unwrap();
    assert!(!id.is_empty());

    let frame = read_text(&mut peer, Duration::from_secs(2)).unwrap();
    assert_eq!(
        frame,
        r#"{"action":"send_group_msg","params":{"message":"hi","group_id":100}}"#
    );

    driver.disconnect().unwrap();
    assert_eq!(driver.connection_count(), 0);
}

#[test]
fn test_inbound_frames_reach_callbacks() {
    let (driver, port) = connected_driver("");
    let recorder = Recorder::default();
    let (on_message, on_event) = recorder.callbacks();
    driver.register_callbacks(on_message, on_event);

    let mut peer = ws_connect(port, "/ws/", None).unwrap();
    send_text(
        &mut peer,
        &json!({
            "post_type": "message",
            "message_type": "group",
            "message_id": 55,
            "group_id": 100,
            "user_id": 42,
            "message": "hello bridge",
            "raw_message": "hello bridge",
            "time": 1700000000,
            "sender": { "user_id": 42, "nickname": "alice", "card": "Alice" }
        })
        .to_string(),
    );
    send_text(
        &mut peer,
        &json!({ "post_type": "meta_event", "meta_event_type": "heartbeat" }).to_string(),
    );
    send_text(
        &mut peer,
        &json!({
            "post_type": "notice",
            "notice_type": "group_increase",
            "sub_type": "approve",
            "group_id": 100,
            "user_id": 43,
            "operator_id": 1,
            "time": 1700000001
        })
        .to_string(),
    );

    assert!(wait_until(Duration::from_secs(2), || {
        recorder.message_count() == 1 && recorder.event_count() == 1
    }));

    let (platform, message) = recorder.messages.lock()[0].clone();
    assert_eq!(platform, Platform::Qq);
    assert_eq!(message.content, "hello bridge");
    assert_eq!(message.user.id, "42");
    assert_eq!(message.channel.id, "100");
    assert_eq!(message.user.nick.as_deref(), Some("Alice"));

    let (_, event) = recorder.events.lock()[0].clone();
    assert_eq!(event.kind, EVENT_MEMBER_JOIN);
    assert_eq!(event.user.map(|u| u.id).as_deref(), Some("43"));

    driver.disconnect().unwrap();
}

#[test]
fn test_upgrade_checks_path_and_token() {
    let (driver, port) = connected_driver("s3cret");

    match ws_connect(port, "/ws/", None) {
        Err(tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED)
        }
        other => panic!("expected 401, got {:?}", other.map(|_| ())),
    }
    match ws_connect(port, "/elsewhere", Some("Bearer s3cret")) {
        Err(tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), StatusCode::NOT_FOUND)
        }
        other => panic!("expected 404, got {:?}", other.map(|_| ())),
    }

    let _bearer = ws_connect(port, "/ws/", Some("Bearer s3cret")).unwrap();
    let _query = ws_connect(port, "/ws/?access_token=s3cret", None).unwrap();
    assert!(wait_until(Duration::from_secs(2), || driver.connection_count() == 2));

    driver.disconnect().unwrap();
}

#[test]
fn test_concurrent_sends_go_to_first_connection() {
    let (driver, port) = connected_driver("");
    let driver = Arc::new(driver);

    let mut peers = Vec::new();
    for expected in 1..=3 {
        peers.push(ws_connect(port, "/ws/", None).unwrap());
        assert!(wait_until(Duration::from_secs(2), || driver.connection_count() == expected));
    }

    let senders: Vec<_> = (0..20)
        .map(|i| {
            let driver = driver.clone();
            thread::spawn(move || driver.send_message(&group_request(&format!("msg {}", i))))
        })
        .collect();
    for sender in senders {
        assert!(sender.join().unwrap().is_ok());
    }

    let mut seen = Vec::new();
    while let Some(frame) = read_text(&mut peers[0], Duration::from_millis(500)) {
        let value: Value = serde_json::from_str(&frame).expect("frame is a single JSON object");
        assert_eq!(value["action"], "send_group_msg");
        seen.push(value["params"]["message"].as_str().unwrap().to_string());
    }
    seen.sort();
    let mut expected: Vec<String> = (0..20).map(|i| format!("msg {}", i)).collect();
    expected.sort();
    assert_eq!(seen, expected);

    for peer in peers.iter_mut().skip(1) {
        assert_eq!(read_text(peer, Duration::from_millis(200)), None);
    }

    driver.disconnect().unwrap();
}

#[test]
fn test_failover_after_first_peer_leaves() {
    let (driver, port) = connected_driver("");
    let first = ws_connect(port, "/ws/", None).unwrap();
    assert!(wait_until(Duration::from_secs(2), || driver.connection_count() == 1));
    let mut second = ws_connect(port, "/ws/", None).unwrap();
    assert!(wait_until(Duration::from_secs(2), || driver.connection_count() == 2));

    drop(first);
    assert!(wait_until(Duration::from_secs(2), || driver.connection_count() == 1));

    driver.send_message(&group_request("still here")).unwrap();
    let frame = read_text(&mut second, Duration::from_secs(2)).unwrap();
    assert!(frame.contains("still here"));

    driver.disconnect().unwrap();
}
