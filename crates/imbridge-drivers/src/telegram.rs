//! Telegram driver using the Bot API through `teloxide`.
//!
//! The worker verifies the token, then runs a long-polling dispatcher for
//! text messages and `chat_member` updates. Outbound messages are marshalled
//! onto the worker so they share the bot's HTTP client.

#![cfg(feature = "telegram")]

use crate::error::DriverError;
use crate::sink::Sinks;
use crate::traits::{Driver, LinkCell, LinkState};
use crate::worker::{Reply, Worker, WorkerContext};
use crate::Result;
use imbridge_core::config::TelegramConfig;
use imbridge_core::{
    Channel, ChannelType, ConfigError, DriverConfig, Event, Message, Platform,
    SendMessageRequest, User, EVENT_MEMBER_JOIN, EVENT_MEMBER_LEAVE,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use teloxide::prelude::*;
use teloxide::types::{
    AllowedUpdate, ChatMemberStatus, ChatMemberUpdated, MessageId, User as TgUser,
};
use teloxide::update_listeners::Polling;
use tracing::{debug, info, warn};
use url::Url;

/// How long `connect` waits for the bot to come up.
pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

/// How long `disconnect` waits for the worker to stop.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a send waits for the Bot API's answer.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Startup poll interval for the `running` flag.
const STARTUP_POLL: Duration = Duration::from_millis(100);

/// How often the supervisor checks for a stop request.
const SUPERVISOR_TICK: Duration = Duration::from_millis(500);

/// Delay between attempts to stop a dispatcher that is not polling yet.
const SHUTDOWN_RETRY: Duration = Duration::from_millis(50);

/// Long-poll timeout passed to `getUpdates`.
const POLL_TIMEOUT: Duration = Duration::from_secs(10);

/// Commands handled by the worker.
enum Command {
    Send {
        chat_id: i64,
        text: String,
        reply_to: Option<i32>,
        silent: bool,
        reply: Reply<std::result::Result<i32, String>>,
    },
}

struct Shared {
    link: LinkCell,
    sinks: Sinks,
    /// Set by the worker once the dispatcher is about to poll.
    running: AtomicBool,
    /// Cooperative stop request, checked by the supervisor.
    stop: AtomicBool,
    /// Why the worker gave up during startup.
    failure: Mutex<Option<String>>,
}

/// Telegram Bot API driver.
pub struct TelegramDriver {
    config: TelegramConfig,
    bot: Bot,
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker<Command>>>,
}

impl std::fmt::Debug for TelegramDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramDriver")
            .field("proxy", &self.config.http_proxy)
            .field("state", &self.shared.link.get())
            .finish()
    }
}

fn build_bot(config: &TelegramConfig) -> Result<Bot> {
    let token = config.token.expose_secret();
    let Some(proxy) = config.http_proxy.as_deref() else {
        return Ok(Bot::new(token));
    };

    let proxy = reqwest::Proxy::all(proxy)
        .map_err(|e| ConfigError::Validation(format!("invalid http_proxy {}: {}", proxy, e)))?;
    let client = teloxide::net::default_reqwest_settings()
        .proxy(proxy)
        .build()
        .map_err(|e| DriverError::platform(Platform::Telegram, e.to_string()))?;
    Ok(Bot::with_client(token, client))
}

impl TelegramDriver {
    /// Create a disconnected driver. Fails on an empty token or a bad proxy.
    pub fn new(config: TelegramConfig) -> Result<Self> {
        if config.token.is_empty() {
            return Err(ConfigError::Validation("telegram token is required".into()).into());
        }
        let bot = build_bot(&config)?;

        Ok(Self {
            config,
            bot,
            shared: Arc::new(Shared {
                link: LinkCell::default(),
                sinks: Sinks::new(Platform::Telegram),
                running: AtomicBool::new(false),
                stop: AtomicBool::new(false),
                failure: Mutex::new(None),
            }),
            worker: Mutex::new(None),
        })
    }

    /// Point the bot at another Bot API server, e.g. a local `telegram-bot-api`.
    pub fn with_api_url(mut self, url: Url) -> Self {
        self.bot = self.bot.clone().set_api_url(url);
        self
    }

    /// Constructor used by the driver registry.
    pub fn from_config(config: &DriverConfig) -> Result<Self> {
        match config {
            DriverConfig::Telegram(telegram) => Self::new(telegram.clone()),
            other => Err(DriverError::Unsupported(other.platform())),
        }
    }

    fn reset(&self) {
        self.shared.running.store(false, Ordering::Release);
        self.shared.link.set(LinkState::Disconnected);
    }
}

impl Driver for TelegramDriver {
    fn platform(&self) -> Platform {
        Platform::Telegram
    }

    fn connect(&self) -> Result<()> {
        let mut slot = self.worker.lock();
        if let Some(worker) = slot.as_ref() {
            if !worker.is_finished() {
                debug!("Telegram driver already running");
                return Ok(());
            }
        }
        slot.take();

        info!("Starting Telegram driver");
        self.shared.stop.store(false, Ordering::Release);
        self.shared.running.store(false, Ordering::Release);
        self.shared.failure.lock().take();
        self.shared.link.set(LinkState::Connecting);

        let bot = self.bot.clone();
        let shared = self.shared.clone();
        let worker = Worker::spawn("telegram", move |ctx| run(bot, shared, ctx)).map_err(|e| {
            self.reset();
            e
        })?;

        let deadline = Instant::now() + STARTUP_TIMEOUT;
        loop {
            if self.shared.running.load(Ordering::Acquire) {
                *slot = Some(worker);
                info!("Telegram driver connected");
                return Ok(());
            }
            if worker.is_finished() {
                worker.stop(SHUTDOWN_TIMEOUT);
                self.reset();
                let reason = self
                    .shared
                    .failure
                    .lock()
                    .take()
                    .unwrap_or_else(|| "worker exited during startup".to_string());
                return Err(DriverError::platform(Platform::Telegram, reason));
            }
            if Instant::now() >= deadline {
                warn!("Telegram bot did not start within {:?}", STARTUP_TIMEOUT);
                self.shared.stop.store(true, Ordering::Release);
                worker.stop(SHUTDOWN_TIMEOUT);
                self.reset();
                return Err(DriverError::StartupTimeout(STARTUP_TIMEOUT));
            }
            std::thread::sleep(STARTUP_POLL);
        }
    }

    fn disconnect(&self) -> Result<()> {
        let Some(worker) = self.worker.lock().take() else {
            return Ok(());
        };

        info!("Disconnecting Telegram driver");
        self.shared.link.set(LinkState::Disconnecting);
        self.shared.stop.store(true, Ordering::Release);
        let stopped = worker.stop(SHUTDOWN_TIMEOUT);
        self.reset();

        if stopped {
            info!("Telegram driver disconnected");
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
        let chat_id: i64 = request.channel_id().parse().map_err(|_| {
            DriverError::invalid_request(format!(
                "telegram chat id must be an integer, got {:?}",
                request.channel_id()
            ))
        })?;
        let (reply_to, silent) = request.telegram_extra().unwrap_or((None, false));

        let handle = self
            .worker
            .lock()
            .as_ref()
            .map(|w| w.handle())
            .ok_or(DriverError::NotConnected(Platform::Telegram))?;

        let text = request.content.clone();
        let sent = handle.call(
            |reply| Command::Send {
                chat_id,
                text,
                reply_to,
                silent,
                reply,
            },
            SEND_TIMEOUT,
        )?;

        sent.map(|id| id.to_string())
            .map_err(|e| DriverError::platform(Platform::Telegram, e))
    }

    fn sinks(&self) -> &Sinks {
        &self.shared.sinks
    }
}

impl Drop for TelegramDriver {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            self.shared.stop.store(true, Ordering::Release);
            worker.stop(Duration::from_millis(200));
        }
    }
}

/// Worker body: verify the token, then poll until stopped.
async fn run(bot: Bot, shared: Arc<Shared>, mut ctx: WorkerContext<Command>) {
    let me = match bot.get_me().await {
        Ok(me) => me,
        Err(e) => {
            *shared.failure.lock() = Some(format!("getMe failed: {}", e));
            return;
        }
    };
    info!(
        "Connected to Telegram as @{}",
        me.user.username.as_deref().unwrap_or("<unnamed>")
    );

    let on_message = {
        let shared = shared.clone();
        move |msg: teloxide::types::Message| {
            let shared = shared.clone();
            async move {
                match convert_message(&msg) {
                    Some(message) => {
                        debug!(
                            "Telegram message {} from {} in {}",
                            message.id, message.user.id, message.channel.id
                        );
                        shared.sinks.message(message);
                    }
                    None => debug!("Ignoring non-text Telegram message {}", msg.id.0),
                }
                respond(())
            }
        }
    };

    let on_member = {
        let shared = shared.clone();
        move |update: ChatMemberUpdated| {
            let shared = shared.clone();
            async move {
                if let Some(event) = convert_member_update(&update) {
                    debug!("Telegram event {} ({})", event.kind, event.id);
                    shared.sinks.event(event);
                }
                respond(())
            }
        }
    };

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(on_message))
        .branch(Update::filter_chat_member().endpoint(on_member));

    let mut dispatcher = Dispatcher::builder(bot.clone(), handler)
        .default_handler(|update| async move {
            debug!("Unhandled Telegram update {:?}", update.id);
        })
        .build();
    let shutdown = dispatcher.shutdown_token();

    let listener = Polling::builder(bot.clone())
        .timeout(POLL_TIMEOUT)
        .allowed_updates(vec![AllowedUpdate::Message, AllowedUpdate::ChatMember])
        .build();

    shared.link.set(LinkState::Connected);
    shared.running.store(true, Ordering::Release);

    let dispatched = AtomicBool::new(false);

    let dispatch = async {
        dispatcher
            .dispatch_with_listener(
                listener,
                LoggingErrorHandler::with_custom_text("Telegram update listener error"),
            )
            .await;
        dispatched.store(true, Ordering::Release);
    };

    let supervisor = async {
        let mut ticker = tokio::time::interval(SUPERVISOR_TICK);
        loop {
            tokio::select! {
                _ = ctx.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if shared.stop.load(Ordering::Acquire) {
                        break;
                    }
                }
                command = ctx.commands.recv() => match command {
                    Some(command) => {
                        tokio::spawn(handle_command(bot.clone(), command));
                    }
                    None => break,
                },
            }
        }

        debug!("Stopping Telegram dispatcher");
        // The token refuses while the dispatcher is idle, which includes the
        // window before it starts polling. Retry until it has run to the end.
        while !dispatched.load(Ordering::Acquire) {
            match shutdown.shutdown() {
                Ok(done) => {
                    done.await;
                    return;
                }
                Err(_) => tokio::time::sleep(SHUTDOWN_RETRY).await,
            }
        }
    };

    tokio::join!(dispatch, supervisor);

    shared.running.store(false, Ordering::Release);
    shared.link.set(LinkState::Disconnected);
    info!("Telegram polling stopped");
}

async fn handle_command(bot: Bot, command: Command) {
    match command {
        Command::Send {
            chat_id,
            text,
            reply_to,
            silent,
            reply,
        } => {
            let mut request = bot.send_message(ChatId(chat_id), text);
            if let Some(id) = reply_to {
                request = request.reply_to_message_id(MessageId(id));
            }
            if silent {
                request = request.disable_notification(true);
            }
            match request.await {
                Ok(sent) => reply.send(Ok(sent.id.0)),
                Err(e) => {
                    warn!("Failed to send Telegram message to {}: {}", chat_id, e);
                    reply.send(Err(e.to_string()));
                }
            }
        }
    }
}

fn convert_user(user: &TgUser) -> User {
    User {
        id: user.id.0.to_string(),
        name: Some(user.full_name()),
        nick: user.username.clone(),
        avatar: None,
        is_bot: user.is_bot,
    }
}

fn convert_chat(chat: &teloxide::types::Chat) -> Channel {
    let kind = if chat.is_group() || chat.is_supergroup() {
        ChannelType::Group
    } else if chat.is_channel() {
        ChannelType::Channel
    } else {
        ChannelType::Private
    };
    Channel {
        id: chat.id.0.to_string(),
        kind,
        name: chat.title().map(str::to_string),
        guild_id: None,
    }
}

/// Translate a text message. Other message kinds yield `None`.
pub(crate) fn convert_message(msg: &teloxide::types::Message) -> Option<Message> {
    let text = msg.text()?;
    let channel = convert_chat(&msg.chat);
    // Channel posts carry no sender; attribute them to the chat.
    let user = match msg.from() {
        Some(user) => convert_user(user),
        None => User {
            name: channel.name.clone(),
            ..User::new(channel.id.clone())
        },
    };

    Some(Message {
        id: msg.id.0.to_string(),
        content: text.to_string(),
        channel,
        user,
        platform: Some(Platform::Telegram),
        reply_to: msg.reply_to_message().map(|m| m.id.0.to_string()),
        created_at: Some(msg.date),
    })
}

/// Map a membership transition to an event kind.
pub(crate) fn classify_membership(
    old: ChatMemberStatus,
    new: ChatMemberStatus,
) -> Option<&'static str> {
    match (old, new) {
        (_, ChatMemberStatus::Member) => Some(EVENT_MEMBER_JOIN),
        (ChatMemberStatus::Member, ChatMemberStatus::Left) => Some(EVENT_MEMBER_LEAVE),
        _ => None,
    }
}

fn convert_member_update(update: &ChatMemberUpdated) -> Option<Event> {
    let kind = classify_membership(
        update.old_chat_member.kind.status(),
        update.new_chat_member.kind.status(),
    )?;

    Some(
        Event::new(update.date.timestamp().to_string(), kind, Platform::Telegram)
            .with_channel(convert_chat(&update.chat))
            .with_user(convert_user(&update.new_chat_member.user))
            .with_data(serde_json::json!({ "operator_id": update.from.id.0.to_string() })),
    )
}
