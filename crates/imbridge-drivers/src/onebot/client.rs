//! Forward WebSocket role: we connect to the OneBot implementation and keep
//! reconnecting until told to stop.

use super::{deliver, Command, Shared};
use crate::traits::LinkState;
use crate::worker::{ReadySignal, WorkerContext};
use futures::{SinkExt, StreamExt};
use imbridge_core::config::WsClientConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{interval, sleep, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

/// Budget for one connection attempt.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum Exit {
    /// The link dropped; reconnect.
    Lost,
    /// Stop requested.
    Stopped,
}

async fn dial(config: &WsClientConfig) -> Result<WsStream, String> {
    let mut request = config
        .ws_url
        .as_str()
        .into_client_request()
        .map_err(|e| e.to_string())?;

    if !config.access_token.is_empty() {
        let value = HeaderValue::from_str(&config.access_token.bearer()).map_err(|e| e.to_string())?;
        request.headers_mut().insert(header::AUTHORIZATION, value);
    }

    match timeout(CONNECT_TIMEOUT, connect_async(request)).await {
        Ok(Ok((ws, _response))) => Ok(ws),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("timed out after {:?}", CONNECT_TIMEOUT)),
    }
}

/// Worker body for client mode.
pub(crate) async fn run(
    config: WsClientConfig,
    shared: Arc<Shared>,
    ready: ReadySignal,
    mut ctx: WorkerContext<Command>,
) {
    let mut ready = Some(ready);
    let delay = Duration::from_secs(config.reconnect_interval.max(1));
    let mut attempt: u64 = 0;

    loop {
        attempt += 1;
        shared.link.set(LinkState::Connecting);
        debug!("Connecting to OneBot at {} (attempt {})", config.ws_url, attempt);

        let dialed = tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            dialed = dial(&config) => dialed,
        };

        match dialed {
            Ok(ws) => {
                info!("Connected to OneBot at {}", config.ws_url);
                attempt = 0;
                shared.link.set(LinkState::Connected);
                if let Some(ready) = ready.take() {
                    ready.ready();
                }

                match drive(ws, &config, &shared, &mut ctx).await {
                    Exit::Stopped => break,
                    Exit::Lost => warn!("OneBot connection to {} lost", config.ws_url),
                }
                shared.link.set(LinkState::Connecting);
            }
            Err(e) => warn!("Failed to connect to OneBot at {}: {}", config.ws_url, e),
        }

        // Wait out the reconnect delay; refuse sends meanwhile.
        let pause = sleep(delay);
        tokio::pin!(pause);
        loop {
            tokio::select! {
                _ = ctx.cancel.cancelled() => return,
                _ = &mut pause => break,
                command = ctx.commands.recv() => match command {
                    Some(Command::Send { reply, .. }) => reply.send(false),
                    None => return,
                },
            }
        }
    }
}

/// Pump one established connection until it drops or a stop is requested.
async fn drive(
    ws: WsStream,
    config: &WsClientConfig,
    shared: &Shared,
    ctx: &mut WorkerContext<Command>,
) -> Exit {
    let (mut sink, mut stream) = ws.split();

    let heartbeat = Duration::from_secs(config.heartbeat);
    let mut ticker = interval(heartbeat.max(Duration::from_secs(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => {
                let _ = timeout(Duration::from_millis(500), sink.close()).await;
                return Exit::Stopped;
            }
            frame = stream.next() => {
                last_seen = Instant::now();
                match frame {
                    Some(Ok(WsMessage::Text(text))) => deliver(shared, &text),
                    Some(Ok(WsMessage::Close(_))) | None => return Exit::Lost,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("OneBot read error: {}", e);
                        return Exit::Lost;
                    }
                }
            }
            _ = ticker.tick(), if config.heartbeat > 0 => {
                if last_seen.elapsed() > heartbeat * 2 {
                    warn!("No frames from OneBot for {:?}, reconnecting", last_seen.elapsed());
                    return Exit::Lost;
                }
                if let Err(e) = sink.send(WsMessage::Ping(Vec::new())).await {
                    debug!("Heartbeat ping failed: {}", e);
                    return Exit::Lost;
                }
            }
            command = ctx.commands.recv() => match command {
                Some(Command::Send { frame, reply }) => {
                    match sink.send(WsMessage::Text(frame)).await {
                        Ok(()) => reply.send(true),
                        Err(e) => {
                            warn!("Failed to send OneBot frame: {}", e);
                            reply.send(false);
                            return Exit::Lost;
                        }
                    }
                }
                None => return Exit::Stopped,
            },
        }
    }
}
