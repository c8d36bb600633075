//! Matrix driver against a mocked homeserver.

use imbridge_core::config::MatrixConfig;
use imbridge_core::{ChannelInfo, ChannelType, Platform, SecretString, SendMessageRequest};
use imbridge_drivers::matrix::{MatrixDriver, SHUTDOWN_TIMEOUT};
use imbridge_drivers::{Driver, LinkState};
use imbridge_integration_tests::*;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, Request, ResponseTemplate};

const ROOM: &str = "!lobby:localhost";
const BOT: &str = "@bot:localhost";
const SYNC: &str = "/_matrix/client/v3/sync";

fn config(homeserver: String) -> MatrixConfig {
    MatrixConfig {
        enabled: true,
        user_id: BOT.into(),
        token: SecretString::new("syt_test"),
        homeserver,
        ..Default::default()
    }
}

fn text_event(id: &str, sender: &str, body: &str) -> Value {
    json!({
        "type": "m.room.message",
        "event_id": id,
        "sender": sender,
        "origin_server_ts": 1700000000000i64,
        "content": { "msgtype": "m.text", "body": body }
    })
}

fn batch(next: &str, state: Value, timeline: Value) -> Value {
    json!({
        "next_batch": next,
        "rooms": { "join": { ROOM: {
            "state": { "events": state },
            "timeline": { "events": timeline }
        }}}
    })
}

fn empty_batch(next: &str) -> Value {
    json!({ "next_batch": next })
}

fn resumes(request: &Request) -> bool {
    request.url.query_pairs().any(|(key, _)| key == "since")
}

/// Sync route: the initial sync answers `initial`, later syncs go through
/// `incremental` with a running count.
fn sync_route(
    initial: Value,
    incremental: impl Fn(usize) -> ResponseTemplate + Send + Sync + 'static,
) -> Mock {
    let syncs = AtomicUsize::new(0);
    Mock::given(method("GET")).and(path(SYNC)).respond_with(move |request: &Request| {
        if !resumes(request) {
            return ResponseTemplate::new(200).set_body_json(initial.clone());
        }
        incremental(syncs.fetch_add(1, Ordering::SeqCst))
    })
}

fn idle_sync(n: usize) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_json(empty_batch(&format!("s{}", n + 2)))
        .set_delay(Duration::from_millis(200))
}

#[test]
fn test_sync_delivers_new_messages_and_sends() {
    let api = MockApi::start();
    api.mount(sync_route(
        batch(
            "s1",
            json!([{ "type": "m.room.name", "state_key": "", "sender": BOT,
                     "content": { "name": "Lobby" } }]),
            json!([text_event("$old", "@alice:localhost", "backlog")]),
        ),
        |n| match n {
            0 => ResponseTemplate::new(200).set_body_json(batch(
                "s2",
                json!([{ "type": "m.room.member", "state_key": "@alice:localhost",
                         "sender": "@alice:localhost",
                         "content": { "membership": "join", "displayname": "Al" } }]),
                json!([
                    text_event("$new", "@alice:localhost", "fresh"),
                    text_event("$mine", BOT, "echo")
                ]),
            )),
            n => idle_sync(n),
        },
    ));
    api.mount(
        Mock::given(method("GET"))
            .and(path_regex("^/_matrix/client/v3/profile/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({ "displayname": "Alice", "avatar_url": "mxc://localhost/face" }),
            )),
    );
    api.mount(
        Mock::given(method("PUT"))
            .and(path_regex("/send/m\\.room\\.message/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "event_id": "$sent" }))),
    );

    let driver = MatrixDriver::new(config(api.uri())).unwrap();
    let recorder = Recorder::default();
    let (on_message, on_event) = recorder.callbacks();
    driver.register_callbacks(on_message, on_event);

    driver.connect().unwrap();
    assert_eq!(driver.state(), LinkState::Connected);
    assert!(wait_until(Duration::from_secs(3), || recorder.message_count() >= 1));
    thread::sleep(Duration::from_millis(300));

    let messages = recorder.messages.lock().clone();
    assert_eq!(messages.len(), 1, "backlog and own messages are not delivered");
    let (platform, message) = &messages[0];
    assert_eq!(*platform, Platform::Matrix);
    assert_eq!(message.id, "$new");
    assert_eq!(message.content, "fresh");
    assert_eq!(message.channel.id, ROOM);
    assert_eq!(message.channel.name.as_deref(), Some("Lobby"));
    assert_eq!(message.user.id, "@alice:localhost");
    assert_eq!(message.user.nick.as_deref(), Some("Al"));
    assert_eq!(message.user.name.as_deref(), Some("Alice"));
    assert_eq!(
        message.user.avatar,
        Some(format!("{}/_matrix/media/v3/download/localhost/face", api.uri()))
    );

    let request = SendMessageRequest::new(ChannelInfo::new(ROOM, ChannelType::Group), "hello room");
    assert_eq!(driver.send_message(&request).unwrap(), "$sent");

    let sent = api.requests_matching("/send/m.room.message/");
    assert_eq!(sent.len(), 1);
    assert!(sent[0]
        .url
        .path()
        .starts_with("/_matrix/client/v3/rooms/!lobby:localhost/send/m.room.message/imbridge."));
    let body: Value = serde_json::from_slice(&sent[0].body).unwrap();
    assert_eq!(body, json!({ "msgtype": "m.text", "body": "hello room" }));

    let syncs = api.requests_matching(SYNC);
    assert!(!resumes(&syncs[0]));
    assert!(syncs.iter().skip(1).all(resumes));

    driver.disconnect().unwrap();
    assert_eq!(driver.state(), LinkState::Disconnected);
}

#[test]
fn test_server_errors_pause_sync_until_homeserver_answers() {
    let api = MockApi::start();
    let resumed = Arc::new(AtomicUsize::new(0));
    {
        let resumed = resumed.clone();
        api.mount(sync_route(empty_batch("s1"), move |n| {
            resumed.store(n + 1, Ordering::SeqCst);
            match n {
                0 => ResponseTemplate::new(502).set_body_string("bad gateway"),
                n => idle_sync(n),
            }
        }));
    }
    api.mount(
        Mock::given(method("GET"))
            .and(path("/_matrix/client/versions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "versions": ["v1.6"] }))),
    );

    let driver = MatrixDriver::new(config(api.uri())).unwrap();
    driver.connect().unwrap();

    assert!(wait_until(Duration::from_secs(2), || !driver.is_reachable()));
    assert!(api.requests_matching("/versions").is_empty());

    assert!(wait_until(Duration::from_secs(8), || driver.is_reachable()));
    assert!(!api.requests_matching("/versions").is_empty());
    assert!(wait_until(Duration::from_secs(2), || resumed.load(Ordering::SeqCst) >= 2));

    driver.disconnect().unwrap();
}

#[test]
fn test_rejected_token_fails_connect() {
    let api = MockApi::start();
    api.mount(Mock::given(method("GET")).respond_with(
        ResponseTemplate::new(401)
            .set_body_json(json!({ "errcode": "M_UNKNOWN_TOKEN", "error": "Invalid token" })),
    ));

    let driver = MatrixDriver::new(config(api.uri())).unwrap();
    let err = driver.connect().unwrap_err();
    assert!(err.to_string().contains("initial sync failed"));
    assert_eq!(driver.state(), LinkState::Disconnected);
}

#[test]
fn test_disconnect_interrupts_profile_lookup() {
    let api = MockApi::start();
    api.mount(sync_route(empty_batch("s1"), |n| match n {
        0 => ResponseTemplate::new(200).set_body_json(batch(
            "s2",
            json!([]),
            json!([text_event("$slow", "@carol:localhost", "hi")]),
        )),
        n => idle_sync(n),
    }));
    api.mount(
        Mock::given(method("GET"))
            .and(path_regex("^/_matrix/client/v3/profile/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "displayname": "Carol" }))
                    .set_delay(Duration::from_secs(8)),
            ),
    );

    let driver = MatrixDriver::new(config(api.uri())).unwrap();
    let recorder = Recorder::default();
    let (on_message, on_event) = recorder.callbacks();
    driver.register_callbacks(on_message, on_event);
    driver.connect().unwrap();

    assert!(wait_until(Duration::from_secs(3), || {
        !api.requests_matching("/profile/").is_empty()
    }));

    let started = Instant::now();
    driver.disconnect().unwrap();
    assert!(started.elapsed() < SHUTDOWN_TIMEOUT);
    assert_eq!(driver.state(), LinkState::Disconnected);
    assert_eq!(recorder.message_count(), 0);
}
