//! QQ driver in forward WebSocket (client) mode against a blocking gateway.

use imbridge_core::config::{ConnectionType, QqConfig, WsClientConfig};
use imbridge_core::{ChannelInfo, ChannelType, SecretString, SendMessageRequest};
use imbridge_drivers::onebot::OneBotDriver;
use imbridge_drivers::{Driver, LinkState};
use imbridge_integration_tests::*;
use std::net::TcpListener;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};

fn client_config(port: u16, token: &str) -> QqConfig {
    QqConfig {
        enabled: true,
        connection_type: ConnectionType::WsClient,
        ws_client: WsClientConfig {
            ws_url: format!("ws://127.0.0.1:{}/", port),
            access_token: SecretString::new(token),
            heartbeat: 30,
            reconnect_interval: 1,
        },
        ..Default::default()
    }
}

/// Accept one gateway connection, report its Authorization header, then
/// forward every text frame to `frames` until the peer goes away.
fn gateway_once(listener: &TcpListener, auth: mpsc::Sender<Option<String>>, frames: mpsc::Sender<String>) {
    let (stream, _) = listener.accept().unwrap();
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let header = request
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let _ = auth.send(header);
        Ok(response)
    };
    let mut ws = tungstenite::accept_hdr(stream, callback).unwrap();
    loop {
        match ws.read() {
            Ok(WsMessage::Text(text)) => {
                let _ = frames.send(text);
            }
            Ok(_) => {}
            Err(_) => return,
        }
    }
}

fn request() -> SendMessageRequest {
    SendMessageRequest::new(ChannelInfo::new("42", ChannelType::Private), "ping")
}

#[test]
fn test_client_converges_once_gateway_appears() {
    let port = free_port();
    let (auth_tx, auth_rx) = mpsc::channel();
    let (frame_tx, frame_rx) = mpsc::channel();

    // The gateway comes up after the driver has already failed a few dials.
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(1500));
        let listener = TcpListener::bind(("127.0.0.1", port)).unwrap();
        gateway_once(&listener, auth_tx, frame_tx);
    });

    let driver = OneBotDriver::new(client_config(port, "tok"));
    let started = Instant::now();
    driver.connect().unwrap();
    assert!(started.elapsed() < Duration::from_millis(1500 + 2 * 1000 + 500));
    assert_eq!(driver.state(), LinkState::Connected);

    assert_eq!(
        auth_rx.recv_timeout(Duration::from_secs(1)).unwrap().as_deref(),
        Some("Bearer tok")
    );

    driver.send_message(&request()).unwrap();
    let frame = frame_rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(
        frame,
        r#"{"action":"send_private_msg","params":{"message":"ping","user_id":42}}"#
    );

    driver.disconnect().unwrap();
    assert_eq!(driver.state(), LinkState::Disconnected);
}

#[test]
fn test_client_reconnects_after_drop() {
    let port = free_port();
    let listener = TcpListener::bind(("127.0.0.1", port)).unwrap();
    let (auth_tx, auth_rx) = mpsc::channel();
    let (frame_tx, frame_rx) = mpsc::channel();

    let (first_tx, first_rx) = mpsc::channel::<()>();
    thread::spawn(move || {
        // First session: accept and drop straight away.
        {
            let (stream, _) = listener.accept().unwrap();
            let ws = tungstenite::accept(stream).unwrap();
            let _ = first_tx.send(());
            drop(ws);
        }
        gateway_once(&listener, auth_tx, frame_tx);
    });

    let driver = OneBotDriver::new(client_config(port, ""));
    driver.connect().unwrap();
    first_rx.recv_timeout(Duration::from_secs(2)).unwrap();

    // The second session carries no token either.
    assert_eq!(auth_rx.recv_timeout(Duration::from_secs(5)).unwrap(), None);
    assert!(wait_until(Duration::from_secs(2), || driver.is_connected()));

    assert!(wait_until(Duration::from_secs(3), || driver.send_message(&request()).is_ok()));
    assert!(frame_rx.recv_timeout(Duration::from_secs(2)).unwrap().contains("ping"));

    driver.disconnect().unwrap();
}

#[test]
fn test_disconnect_is_bounded_without_gateway() {
    let port = free_port();
    let driver = OneBotDriver::new(client_config(port, ""));
    assert!(driver.connect().is_err());

    let started = Instant::now();
    driver.disconnect().unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(driver.state(), LinkState::Disconnected);
}
