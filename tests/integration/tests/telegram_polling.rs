//! Telegram driver against a mocked Bot API server.

use imbridge_core::config::TelegramConfig;
use imbridge_core::{ChannelInfo, ChannelType, SecretString, SendMessageRequest};
use imbridge_drivers::telegram::{TelegramDriver, SHUTDOWN_TIMEOUT};
use imbridge_drivers::{Driver, LinkState};
use imbridge_integration_tests::*;
use serde_json::json;
use std::thread;
use std::time::{Duration, Instant};
use url::Url;
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, ResponseTemplate};

fn driver(api: &MockApi) -> TelegramDriver {
    let config = TelegramConfig {
        enabled: true,
        token: SecretString::new("123456:TEST"),
        http_proxy: None,
    };
    TelegramDriver::new(config)
        .unwrap()
        .with_api_url(Url::parse(&api.uri()).unwrap())
}

/// Bot API method names are case-insensitive.
fn calls(api: &MockApi, name: &str) -> usize {
    api.requests_matching("/bot")
        .iter()
        .filter(|r| r.url.path().to_ascii_lowercase().ends_with(name))
        .count()
}

fn mount_bot(api: &MockApi) {
    api.mount(
        Mock::given(method("POST"))
            .and(path_regex("(?i)/getme$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": {
                    "id": 123456,
                    "is_bot": true,
                    "first_name": "Bridge",
                    "username": "bridge_bot",
                    "can_join_groups": true,
                    "can_read_all_group_messages": false,
                    "supports_inline_queries": false
                }
            }))),
    );
    api.mount(
        Mock::given(method("POST"))
            .and(path_regex("(?i)/getupdates$"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "ok": true, "result": [] }))
                    .set_delay(Duration::from_millis(200)),
            ),
    );
}

#[test]
fn test_disconnect_right_after_connect_stops_polling() {
    let api = MockApi::start();
    mount_bot(&api);

    let driver = driver(&api);
    driver.connect().unwrap();
    assert_eq!(driver.state(), LinkState::Connected);

    let started = Instant::now();
    driver.disconnect().unwrap();
    assert!(started.elapsed() < SHUTDOWN_TIMEOUT);
    assert_eq!(driver.state(), LinkState::Disconnected);

    let polls = calls(&api, "/getupdates");
    thread::sleep(Duration::from_secs(1));
    assert_eq!(calls(&api, "/getupdates"), polls, "polling continued after disconnect");
}

#[test]
fn test_send_message_returns_message_id() {
    let api = MockApi::start();
    mount_bot(&api);
    api.mount(
        Mock::given(method("POST"))
            .and(path_regex("(?i)/sendmessage$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": {
                    "message_id": 77,
                    "date": 1700000000,
                    "chat": { "id": 42, "type": "private", "first_name": "Ada" },
                    "from": { "id": 123456, "is_bot": true, "first_name": "Bridge" },
                    "text": "hello"
                }
            }))),
    );

    let driver = driver(&api);
    driver.connect().unwrap();
    assert!(wait_until(Duration::from_secs(2), || calls(&api, "/getupdates") >= 1));

    let request = SendMessageRequest::new(ChannelInfo::new("42", ChannelType::Private), "hello");
    assert_eq!(driver.send_message(&request).unwrap(), "77");

    let sent = api.requests_matching("/bot");
    let body: serde_json::Value = sent
        .iter()
        .find(|r| r.url.path().to_ascii_lowercase().ends_with("/sendmessage"))
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .unwrap();
    assert_eq!(body["chat_id"], json!(42));
    assert_eq!(body["text"], json!("hello"));

    driver.disconnect().unwrap();
}
