//! QQ driver speaking OneBot v11 over WebSocket.
//!
//! Two mutually exclusive roles, chosen by `connection_type`:
//!
//! - `ws_server` (reverse WebSocket): we listen on `host:port` and the OneBot
//!   implementation connects to `url_prefix`. Several connections may be open
//!   at once; outbound frames go to the first one that accepts the write.
//! - `ws_client` (forward WebSocket): we dial `ws_url` and reconnect after a
//!   fixed delay whenever the link drops.
//!
//! All socket I/O runs on the driver's [`Worker`].

#![cfg(feature = "qq")]

mod client;
pub mod protocol;
mod server;

use crate::error::DriverError;
use crate::sink::Sinks;
use crate::traits::{Driver, LinkCell, LinkState};
use crate::worker::{readiness, Readiness, Reply, Worker};
use crate::Result;
use imbridge_core::config::{ConnectionType, QqConfig};
use imbridge_core::{DriverConfig, Platform, SendMessageRequest};
use parking_lot::Mutex;
use protocol::Inbound;
use server::ConnectionRegistry;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How long `connect` waits for the listener to bind or the first dial.
pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

/// How long `disconnect` waits for the worker to stop.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// How long a send waits for the worker's answer.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Commands handled by the worker.
pub(crate) enum Command {
    /// Write one text frame; answers whether it was written.
    Send { frame: String, reply: Reply<bool> },
}

/// State shared between the driver handle and its worker.
pub(crate) struct Shared {
    pub(crate) link: LinkCell,
    pub(crate) sinks: Sinks,
    pub(crate) connections: ConnectionRegistry,
}

/// Decode a text frame and hand the result to the sinks.
pub(crate) fn deliver(shared: &Shared, text: &str) {
    match protocol::parse_frame(text) {
        Ok(Inbound::Message(message)) => {
            debug!(
                "QQ message {} from {} in {}",
                message.id, message.user.id, message.channel.id
            );
            shared.sinks.message(message);
        }
        Ok(Inbound::Event(event)) => {
            debug!("QQ event {} ({})", event.kind, event.id);
            shared.sinks.event(event);
        }
        Ok(Inbound::Ignored) => {}
        Err(e) => warn!("Malformed OneBot frame: {}", e),
    }
}

/// OneBot v11 driver.
pub struct OneBotDriver {
    config: QqConfig,
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker<Command>>>,
}

impl std::fmt::Debug for OneBotDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OneBotDriver")
            .field("connection_type", &self.config.connection_type)
            .field("state", &self.shared.link.get())
            .field("connections", &self.shared.connections.len())
            .finish()
    }
}

impl OneBotDriver {
    /// Create a disconnected driver.
    pub fn new(config: QqConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared {
                link: LinkCell::default(),
                sinks: Sinks::new(Platform::Qq),
                connections: ConnectionRegistry::default(),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Constructor used by the driver registry.
    pub fn from_config(config: &DriverConfig) -> Result<Self> {
        match config {
            DriverConfig::Qq(qq) => Ok(Self::new(qq.clone())),
            other => Err(DriverError::Unsupported(other.platform())),
        }
    }

    /// Number of open reverse WebSocket connections.
    pub fn connection_count(&self) -> usize {
        self.shared.connections.len()
    }

    /// ID of the running worker, if any.
    pub fn worker_id(&self) -> Option<u64> {
        self.worker.lock().as_ref().map(|w| w.id())
    }

    fn spawn_worker(&self) -> Result<(Worker<Command>, crate::worker::ReadyWait)> {
        let (ready, wait) = readiness();
        let shared = self.shared.clone();

        let worker = match self.config.connection_type {
            ConnectionType::WsServer => {
                let config = self.config.ws_server.clone();
                Worker::spawn("onebot-server", move |ctx| server::run(config, shared, ready, ctx))?
            }
            ConnectionType::WsClient => {
                let config = self.config.ws_client.clone();
                Worker::spawn("onebot-client", move |ctx| client::run(config, shared, ready, ctx))?
            }
        };
        Ok((worker, wait))
    }
}

impl Driver for OneBotDriver {
    fn platform(&self) -> Platform {
        Platform::Qq
    }

    fn connect(&self) -> Result<()> {
        let mut slot = self.worker.lock();
        if let Some(worker) = slot.as_ref() {
            if !worker.is_finished() {
                if self.shared.link.get() == LinkState::Connected {
                    debug!("QQ driver already running");
                    return Ok(());
                }
                // A client worker kept after a startup timeout is still dialing.
                debug!("QQ driver running but not linked yet");
                return Err(DriverError::NotConnected(Platform::Qq));
            }
        }
        slot.take();

        info!(
            "Starting QQ driver ({:?})",
            self.config.connection_type
        );
        self.shared.link.set(LinkState::Connecting);
        let (worker, wait) = self.spawn_worker().map_err(|e| {
            self.shared.link.set(LinkState::Disconnected);
            e
        })?;

        match wait.wait(STARTUP_TIMEOUT) {
            Readiness::Ready => {
                *slot = Some(worker);
                info!("QQ driver connected");
                Ok(())
            }
            Readiness::TimedOut if self.config.connection_type == ConnectionType::WsClient => {
                // Keep dialing in the background; the link comes up when the
                // gateway does.
                warn!(
                    "OneBot gateway not reachable within {:?}, retrying in background",
                    STARTUP_TIMEOUT
                );
                *slot = Some(worker);
                Err(DriverError::StartupTimeout(STARTUP_TIMEOUT))
            }
            outcome => {
                worker.stop(SHUTDOWN_TIMEOUT);
                self.shared.link.set(LinkState::Disconnected);
                self.shared.connections.clear();
                Err(match outcome {
                    Readiness::Failed(reason) => DriverError::platform(Platform::Qq, reason),
                    Readiness::TimedOut => DriverError::StartupTimeout(STARTUP_TIMEOUT),
                    _ => DriverError::platform(Platform::Qq, "worker exited during startup"),
                })
            }
        }
    }

    fn disconnect(&self) -> Result<()> {
        let Some(worker) = self.worker.lock().take() else {
            return Ok(());
        };

        info!("Disconnecting QQ driver");
        self.shared.link.set(LinkState::Disconnecting);
        let stopped = worker.stop(SHUTDOWN_TIMEOUT);
        self.shared.link.set(LinkState::Disconnected);
        self.shared.connections.clear();

        if stopped {
            info!("QQ driver disconnected");
            Ok(())
        } else {
            Err(DriverError::ShutdownTimeout(SHUTDOWN_TIMEOUT))
        }
    }

    fn state(&self) -> LinkState {
        let state = self.shared.link.get();
        if state != LinkState::Connected {
            return state;
        }
        // A worker that died on its own cannot be connected.
        match self.worker.try_lock() {
            Some(slot) => match &*slot {
                Some(worker) if !worker.is_finished() => state,
                _ => LinkState::Disconnected,
            },
            None => state,
        }
    }

    fn send_message(&self, request: &SendMessageRequest) -> Result<String> {
        self.check_request(request)?;
        let frame = protocol::encode_send(request)?;

        let handle = self
            .worker
            .lock()
            .as_ref()
            .map(|w| w.handle())
            .ok_or(DriverError::NotConnected(Platform::Qq))?;

        let delivered = handle.call(|reply| Command::Send { frame, reply }, SEND_TIMEOUT)?;
        if delivered {
            Ok(uuid::Uuid::new_v4().to_string())
        } else {
            Err(DriverError::platform(Platform::Qq, "no connection accepted the frame"))
        }
    }

    fn sinks(&self) -> &Sinks {
        &self.shared.sinks
    }
}

impl Drop for OneBotDriver {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            worker.stop(Duration::from_millis(200));
        }
    }
}
