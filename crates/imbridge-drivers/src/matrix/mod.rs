//! Matrix driver over the client-server API.
//!
//! The worker performs one backlog-skipping `/sync`, then long-polls
//! `/sync?since=` until stopped. When the homeserver answers a sync with a
//! 5xx it is considered unreachable: the loop stops syncing and polls
//! `/_matrix/client/versions` until it answers again.

#![cfg(feature = "matrix")]

mod api;
mod sync;

use crate::error::DriverError;
use crate::sink::Sinks;
use crate::traits::{Driver, LinkCell, LinkState};
use crate::worker::{readiness, Readiness, ReadySignal, Reply, Worker, WorkerContext};
use crate::Result;
use api::{Profile, Session};
use imbridge_core::config::MatrixConfig;
use imbridge_core::{ConfigError, DriverConfig, Message, Platform, SendMessageRequest};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sync::RoomDirectory;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};
use url::Url;

/// How long `connect` waits for the initial sync.
pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

/// How long `disconnect` waits for the worker to stop.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// How long a send waits for the homeserver's answer.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Server-side long-poll timeout for `/sync`.
const LONG_POLL: Duration = Duration::from_secs(30);

/// Delay between reachability checks, and after a failed sync.
const RETRY_DELAY: Duration = Duration::from_secs(5);

enum Command {
    Send {
        room_id: String,
        body: String,
        reply: Reply<std::result::Result<String, String>>,
    },
}

struct Shared {
    link: LinkCell,
    sinks: Sinks,
    /// Whether the homeserver answers. Written only by the worker.
    reachable: AtomicBool,
}

/// Matrix client-server API driver.
pub struct MatrixDriver {
    config: MatrixConfig,
    homeserver: Url,
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker<Command>>>,
}

impl std::fmt::Debug for MatrixDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatrixDriver")
            .field("user_id", &self.config.user_id)
            .field("homeserver", &self.homeserver.as_str())
            .field("state", &self.shared.link.get())
            .field("reachable", &self.is_reachable())
            .finish()
    }
}

impl MatrixDriver {
    /// Create a disconnected driver. Fails on a malformed homeserver URL.
    pub fn new(config: MatrixConfig) -> Result<Self> {
        let homeserver = Url::parse(&config.homeserver).map_err(|e| {
            ConfigError::Validation(format!("invalid homeserver {:?}: {}", config.homeserver, e))
        })?;
        if config.token.is_empty() {
            return Err(ConfigError::Validation("matrix token is required".into()).into());
        }

        Ok(Self {
            config,
            homeserver,
            shared: Arc::new(Shared {
                link: LinkCell::default(),
                sinks: Sinks::new(Platform::Matrix),
                reachable: AtomicBool::new(true),
            }),
            worker: Mutex::new(None),
        })
    }

    /// Constructor used by the driver registry.
    pub fn from_config(config: &DriverConfig) -> Result<Self> {
        match config {
            DriverConfig::Matrix(matrix) => Self::new(matrix.clone()),
            other => Err(DriverError::Unsupported(other.platform())),
        }
    }

    /// Whether the last sync found the homeserver answering.
    pub fn is_reachable(&self) -> bool {
        self.shared.reachable.load(Ordering::Acquire)
    }
}

impl Driver for MatrixDriver {
    fn platform(&self) -> Platform {
        Platform::Matrix
    }

    fn connect(&self) -> Result<()> {
        let mut slot = self.worker.lock();
        if let Some(worker) = slot.as_ref() {
            if !worker.is_finished() {
                debug!("Matrix driver already running");
                return Ok(());
            }
        }
        slot.take();

        info!(
            "Starting Matrix driver for {} on {} as device {}",
            self.config.user_id, self.homeserver, self.config.device_id
        );
        self.shared.link.set(LinkState::Connecting);

        let (ready, wait) = readiness();
        let shared = self.shared.clone();
        let homeserver = self.homeserver.clone();
        let token = self.config.token.clone();
        let user_id = self.config.user_id.clone();
        let device_id = self.config.device_id.clone();
        let worker = Worker::spawn("matrix", move |ctx| {
            run(homeserver, token, user_id, device_id, shared, ready, ctx)
        })
        .map_err(|e| {
            self.shared.link.set(LinkState::Disconnected);
            e
        })?;

        match wait.wait(STARTUP_TIMEOUT) {
            Readiness::Ready => {
                *slot = Some(worker);
                info!("Matrix driver connected");
                Ok(())
            }
            outcome => {
                worker.stop(SHUTDOWN_TIMEOUT);
                self.shared.link.set(LinkState::Disconnected);
                Err(match outcome {
                    Readiness::Failed(reason) => DriverError::platform(Platform::Matrix, reason),
                    Readiness::TimedOut => DriverError::StartupTimeout(STARTUP_TIMEOUT),
                    _ => DriverError::platform(Platform::Matrix, "worker exited during startup"),
                })
            }
        }
    }

    fn disconnect(&self) -> Result<()> {
        let Some(worker) = self.worker.lock().take() else {
            return Ok(());
        };

        info!("Disconnecting Matrix driver");
        self.shared.link.set(LinkState::Disconnecting);
        let stopped = worker.stop(SHUTDOWN_TIMEOUT);
        self.shared.link.set(LinkState::Disconnected);

        if stopped {
            info!("Matrix driver disconnected");
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
        let room_id = request.channel_id().trim();
        if room_id.is_empty() {
            return Err(DriverError::invalid_request("matrix room id is empty"));
        }

        let handle = self
            .worker
            .lock()
            .as_ref()
            .map(|w| w.handle())
            .ok_or(DriverError::NotConnected(Platform::Matrix))?;

        let room_id = room_id.to_string();
        let body = request.content.clone();
        let sent = handle.call(
            |reply| Command::Send {
                room_id,
                body,
                reply,
            },
            SEND_TIMEOUT,
        )?;
        sent.map_err(|e| DriverError::platform(Platform::Matrix, e))
    }

    fn sinks(&self) -> &Sinks {
        &self.shared.sinks
    }
}

impl Drop for MatrixDriver {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            worker.stop(Duration::from_millis(200));
        }
    }
}

/// Worker body.
async fn run(
    homeserver: Url,
    token: imbridge_core::SecretString,
    user_id: String,
    device_id: String,
    shared: Arc<Shared>,
    ready: ReadySignal,
    ctx: WorkerContext<Command>,
) {
    let session = match Session::new(&homeserver, &token, &device_id) {
        Ok(session) => session,
        Err(e) => {
            ready.failed(format!("failed to create HTTP session: {}", e));
            return;
        }
    };

    let mut rooms = RoomDirectory::default();
    let initial = tokio::select! {
        _ = ctx.cancel.cancelled() => return,
        initial = session.sync(None, Duration::ZERO) => initial,
    };
    let mut since = match initial {
        Ok(response) => {
            rooms.absorb_backlog(&response);
            response.next_batch
        }
        Err(e) => {
            ready.failed(format!("initial sync failed: {}", e));
            return;
        }
    };

    shared.reachable.store(true, Ordering::Release);
    shared.link.set(LinkState::Connected);
    ready.ready();

    tokio::spawn(pump_commands(session.clone(), ctx.commands));

    let mut profiles: HashMap<String, Profile> = HashMap::new();
    loop {
        if !shared.reachable.load(Ordering::Acquire) {
            tokio::select! {
                _ = ctx.cancel.cancelled() => break,
                _ = tokio::time::sleep(RETRY_DELAY) => {}
            }
            let check = tokio::select! {
                _ = ctx.cancel.cancelled() => break,
                check = session.versions() => check,
            };
            match check {
                Ok(()) => {
                    info!("Matrix homeserver {} is reachable again", homeserver);
                    shared.reachable.store(true, Ordering::Release);
                }
                Err(e) => debug!("Matrix homeserver still unreachable: {}", e),
            }
            continue;
        }

        let result = tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            result = session.sync(Some(&since), LONG_POLL) => result,
        };

        match result {
            Ok(response) => {
                since = response.next_batch.clone();
                let messages = rooms.collect(&response, &user_id);
                // Profile lookups are network calls; stop must not wait on them.
                tokio::select! {
                    _ = ctx.cancel.cancelled() => break,
                    _ = deliver(&session, &mut profiles, &shared.sinks, messages) => {}
                }
            }
            Err(e) if e.is_server_error() => {
                warn!("Matrix sync failed with a server error, probing homeserver: {}", e);
                shared.reachable.store(false, Ordering::Release);
            }
            Err(e) => {
                warn!("Matrix sync failed: {}", e);
                tokio::select! {
                    _ = ctx.cancel.cancelled() => break,
                    _ = tokio::time::sleep(RETRY_DELAY) => {}
                }
            }
        }
    }

    shared.link.set(LinkState::Disconnected);
    info!("Matrix sync loop stopped");
}

async fn deliver(
    session: &Session,
    profiles: &mut HashMap<String, Profile>,
    sinks: &Sinks,
    messages: Vec<Message>,
) {
    for message in messages {
        let message = with_profile(session, profiles, message).await;
        debug!(
            "Matrix message {} from {} in {}",
            message.id, message.user.id, message.channel.id
        );
        sinks.message(message);
    }
}

/// Fill `user.name` and `user.avatar` from the cached global profile.
async fn with_profile(
    session: &Session,
    profiles: &mut HashMap<String, Profile>,
    mut message: Message,
) -> Message {
    if !profiles.contains_key(&message.user.id) {
        let profile = match session.profile(&message.user.id).await {
            Ok(profile) => profile,
            Err(e) => {
                debug!("No profile for {}: {}", message.user.id, e);
                Profile::default()
            }
        };
        profiles.insert(message.user.id.clone(), profile);
    }

    if let Some(profile) = profiles.get(&message.user.id) {
        message.user.name = profile.displayname.clone();
        message.user.avatar = profile
            .avatar_url
            .as_deref()
            .and_then(|mxc| session.media_url(mxc));
    }
    message
}

async fn pump_commands(session: Session, mut commands: UnboundedReceiver<Command>) {
    while let Some(command) = commands.recv().await {
        match command {
            Command::Send {
                room_id,
                body,
                reply,
            } => {
                let session = session.clone();
                tokio::spawn(async move {
                    match session.send_text(&room_id, &body).await {
                        Ok(event_id) => reply.send(Ok(event_id)),
                        Err(e) => {
                            warn!("Failed to send Matrix message to {}: {}", room_id, e);
                            reply.send(Err(e.to_string()));
                        }
                    }
                });
            }
        }
    }
}
