//! Reverse WebSocket role: the OneBot implementation connects to us.

use super::{deliver, Command, Shared};
use crate::traits::LinkState;
use crate::worker::{ReadySignal, WorkerContext};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use imbridge_core::config::WsServerConfig;
use imbridge_core::SecretString;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{header, StatusCode};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-connection close budget at shutdown.
const CLOSE_TIMEOUT: Duration = Duration::from_millis(500);

/// Per-connection write budget, including the wait for the connection's lock.
pub(crate) const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

type WsSink = SplitSink<WebSocketStream<TcpStream>, WsMessage>;

/// One accepted connection. Writes go through `sink`'s lock so frames from
/// concurrent sends never interleave.
pub(crate) struct WsConnection {
    id: u64,
    peer: SocketAddr,
    sink: tokio::sync::Mutex<WsSink>,
    closed: AtomicBool,
}

/// Accepted connections, iterated in accept order.
#[derive(Default)]
pub(crate) struct ConnectionRegistry {
    next_id: AtomicU64,
    connections: Mutex<BTreeMap<u64, Arc<WsConnection>>>,
}

impl ConnectionRegistry {
    fn insert(&self, peer: SocketAddr, sink: WsSink) -> Arc<WsConnection> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let conn = Arc::new(WsConnection {
            id,
            peer,
            sink: tokio::sync::Mutex::new(sink),
            closed: AtomicBool::new(false),
        });
        self.connections.lock().insert(id, conn.clone());
        conn
    }

    fn remove(&self, id: u64) {
        self.connections.lock().remove(&id);
    }

    fn snapshot(&self) -> Vec<Arc<WsConnection>> {
        self.connections.lock().values().cloned().collect()
    }

    /// Number of tracked connections.
    pub(crate) fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub(crate) fn clear(&self) {
        self.connections.lock().clear();
    }

    /// Write `frame` to the first connection that accepts it.
    pub(crate) async fn send_first(&self, frame: &str) -> bool {
        for conn in self.snapshot() {
            if conn.closed.load(Ordering::Acquire) {
                continue;
            }
            let write = async {
                let mut sink = conn.sink.lock().await;
                sink.send(WsMessage::Text(frame.to_string())).await
            };
            match tokio::time::timeout(WRITE_TIMEOUT, write).await {
                Ok(Ok(())) => {
                    debug!("Frame sent on OneBot connection #{} ({})", conn.id, conn.peer);
                    return true;
                }
                Ok(Err(e)) => {
                    warn!("Write to OneBot connection #{} failed: {}", conn.id, e);
                    conn.closed.store(true, Ordering::Release);
                }
                Err(_) => {
                    // Stalled peer; try the next one but keep this connection.
                    warn!(
                        "Write to OneBot connection #{} timed out after {:?}",
                        conn.id, WRITE_TIMEOUT
                    );
                }
            }
        }
        warn!("No active OneBot connections");
        false
    }

    async fn close_all(&self) {
        for conn in self.snapshot() {
            let close = async {
                let mut sink = conn.sink.lock().await;
                sink.close().await
            };
            match tokio::time::timeout(CLOSE_TIMEOUT, close).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("Closing OneBot connection #{}: {}", conn.id, e),
                Err(_) => warn!("Closing OneBot connection #{} timed out", conn.id),
            }
            conn.closed.store(true, Ordering::Release);
        }
        self.clear();
    }
}

/// Why an upgrade request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Rejection {
    NotFound,
    Unauthorized,
}

/// Whether `path` is `prefix` itself or lies below it. Trailing slashes on
/// either side are not significant.
pub(crate) fn path_matches(prefix: &str, path: &str) -> bool {
    let base = prefix.trim_end_matches('/');
    if base.is_empty() {
        return true;
    }
    match path.strip_prefix(base) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Check an upgrade request's path and credentials.
///
/// The token may arrive as `Authorization: Bearer <t>`, `Authorization:
/// Token <t>`, or an `access_token` query parameter.
pub(crate) fn check_upgrade(
    prefix: &str,
    token: &SecretString,
    path: &str,
    query: Option<&str>,
    authorization: Option<&str>,
) -> Result<(), Rejection> {
    if !path_matches(prefix, path) {
        return Err(Rejection::NotFound);
    }
    if token.is_empty() {
        return Ok(());
    }

    let from_header = authorization.and_then(|value| {
        let (scheme, credential) = value.trim().split_once(' ')?;
        (scheme.eq_ignore_ascii_case("bearer") || scheme.eq_ignore_ascii_case("token"))
            .then(|| credential.trim())
    });
    if from_header.map_or(false, |t| token.matches(t)) {
        return Ok(());
    }

    let from_query = query.and_then(|q| {
        url::form_urlencoded::parse(q.as_bytes())
            .find(|(key, _)| key == "access_token")
            .map(|(_, value)| value.into_owned())
    });
    if from_query.map_or(false, |t| token.matches(&t)) {
        return Ok(());
    }

    Err(Rejection::Unauthorized)
}

fn reject(rejection: Rejection) -> ErrorResponse {
    let (status, body) = match rejection {
        Rejection::NotFound => (StatusCode::NOT_FOUND, "not found"),
        Rejection::Unauthorized => (StatusCode::UNAUTHORIZED, "invalid access token"),
    };
    let mut response = ErrorResponse::new(Some(body.to_string()));
    *response.status_mut() = status;
    response
}

/// Worker body for server mode.
pub(crate) async fn run(
    config: WsServerConfig,
    shared: Arc<Shared>,
    ready: ReadySignal,
    mut ctx: WorkerContext<Command>,
) {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            ready.failed(format!("failed to bind {}: {}", addr, e));
            return;
        }
    };

    info!("OneBot server listening on ws://{}{}", addr, config.url_prefix);
    shared.link.set(LinkState::Connected);
    ready.ready();

    let config = Arc::new(config);

    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("Incoming OneBot connection from {}", peer);
                    tokio::spawn(serve(stream, peer, config.clone(), shared.clone(), ctx.cancel.clone()));
                }
                Err(e) => warn!("Failed to accept connection: {}", e),
            },
            command = ctx.commands.recv() => match command {
                Some(Command::Send { frame, reply }) => {
                    let shared = shared.clone();
                    tokio::spawn(async move {
                        reply.send(shared.connections.send_first(&frame).await);
                    });
                }
                None => break,
            },
        }
    }

    info!("OneBot server on {} shutting down", addr);
    shared.connections.close_all().await;
}

async fn serve(
    stream: TcpStream,
    peer: SocketAddr,
    config: Arc<WsServerConfig>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) {
    let callback = |request: &Request, response: Response| {
        let authorization = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        match check_upgrade(
            &config.url_prefix,
            &config.access_token,
            request.uri().path(),
            request.uri().query(),
            authorization,
        ) {
            Ok(()) => Ok(response),
            Err(rejection) => {
                warn!("Rejected OneBot upgrade from {} ({:?})", peer, rejection);
                Err(reject(rejection))
            }
        }
    };

    let ws = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!("Handshake with {} failed: {}", peer, e);
            return;
        }
    };

    let (sink, mut stream) = ws.split();
    let conn = shared.connections.insert(peer, sink);
    info!("OneBot connection #{} established from {}", conn.id, peer);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frame = stream.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => deliver(&shared, &text),
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("OneBot connection #{} read error: {}", conn.id, e);
                    break;
                }
            },
        }
    }

    conn.closed.store(true, Ordering::Release);
    shared.connections.remove(conn.id);
    info!("OneBot connection #{} closed", conn.id);
}
