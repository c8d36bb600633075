//! Shared fixtures for the integration tests: loopback sockets, a blocking
//! WebSocket peer, a callback recorder and a mock HTTP API.

use imbridge_core::config::{ConnectionType, QqConfig, WsServerConfig};
use imbridge_core::{Event, Message, Platform, SecretString};
use imbridge_drivers::{EventCallback, MessageCallback};
use parking_lot::Mutex;
use std::io::ErrorKind;
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tokio_tungstenite::tungstenite::{self, HandshakeError, Message as WsMessage, WebSocket};
use wiremock::{Mock, MockServer, Request};

/// A port that was free a moment ago.
pub fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Poll `condition` every 20 ms until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(20));
    }
}

/// QQ reverse WebSocket config on loopback.
pub fn qq_server_config(port: u16, token: &str) -> QqConfig {
    QqConfig {
        enabled: true,
        connection_type: ConnectionType::WsServer,
        ws_server: WsServerConfig {
            host: "127.0.0.1".into(),
            port,
            access_token: SecretString::new(token),
            url_prefix: "/ws/".into(),
        },
        ..Default::default()
    }
}

pub type Peer = WebSocket<TcpStream>;

/// Open a blocking WebSocket to `ws://127.0.0.1:{port}{path}`.
pub fn ws_connect(port: u16, path: &str, authorization: Option<&str>) -> tungstenite::Result<Peer> {
    let mut request = format!("ws://127.0.0.1:{}{}", port, path).into_client_request()?;
    if let Some(value) = authorization {
        request.headers_mut().insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(value).map_err(|e| tungstenite::Error::HttpFormat(e.into()))?,
        );
    }

    let stream = TcpStream::connect(("127.0.0.1", port))?;
    match tungstenite::client(request, stream) {
        Ok((ws, _response)) => Ok(ws),
        Err(HandshakeError::Failure(e)) => Err(e),
        Err(HandshakeError::Interrupted(_)) => Err(tungstenite::Error::Io(ErrorKind::WouldBlock.into())),
    }
}

/// Next text frame, or `None` on timeout or close.
pub fn read_text(ws: &mut Peer, timeout: Duration) -> Option<String> {
    ws.get_ref().set_read_timeout(Some(timeout)).ok()?;
    loop {
        match ws.read() {
            Ok(WsMessage::Text(text)) => return Some(text),
            Ok(WsMessage::Close(_)) => return None,
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
}

pub fn send_text(ws: &mut Peer, text: &str) {
    ws.send(WsMessage::Text(text.to_string())).unwrap();
}

/// Collects everything the drivers deliver.
#[derive(Default, Clone)]
pub struct Recorder {
    pub messages: Arc<Mutex<Vec<(Platform, Message)>>>,
    pub events: Arc<Mutex<Vec<(Platform, Event)>>>,
}

impl Recorder {
    pub fn callbacks(&self) -> (MessageCallback, EventCallback) {
        let messages = self.messages.clone();
        let events = self.events.clone();
        (
            Arc::new(move |platform: Platform, message: Message| {
                messages.lock().push((platform, message))
            }),
            Arc::new(move |platform: Platform, event: Event| events.lock().push((platform, event))),
        )
    }

    pub fn message_count(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().len()
    }
}

/// A wiremock server driven from blocking tests.
///
/// The drivers under test block their caller, so the tests stay synchronous
/// and this fixture owns the runtime used to start the server and mount
/// mocks.
pub struct MockApi {
    pub server: MockServer,
    runtime: tokio::runtime::Runtime,
}

impl MockApi {
    pub fn start() -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let server = runtime.block_on(MockServer::start());
        Self { server, runtime }
    }

    pub fn mount(&self, mock: Mock) {
        self.runtime.block_on(mock.mount(&self.server));
    }

    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// Received requests whose path contains `needle`, in arrival order.
    pub fn requests_matching(&self, needle: &str) -> Vec<Request> {
        self.runtime
            .block_on(self.server.received_requests())
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.url.path().contains(needle))
            .collect()
    }
}
