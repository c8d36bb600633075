//! Callback sinks through which drivers hand inbound data to the host.
//!
//! A driver may produce messages before the host has installed its
//! callbacks. Such items are held in a bounded buffer and replayed, in
//! arrival order, once [`Sinks::install`] is called.

use imbridge_core::{Event, Message, Platform};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{error, warn};

/// Host callback for inbound chat messages.
pub type MessageCallback = Arc<dyn Fn(Platform, Message) + Send + Sync>;

/// Host callback for inbound events.
pub type EventCallback = Arc<dyn Fn(Platform, Event) + Send + Sync>;

/// Items buffered while no callbacks are installed.
pub const PENDING_CAPACITY: usize = 256;

enum Pending {
    Message(Message),
    Event(Event),
}

#[derive(Default)]
struct SinkState {
    on_message: Option<MessageCallback>,
    on_event: Option<EventCallback>,
    pending: VecDeque<Pending>,
    /// Set while `install` drains `pending`; new items queue behind it.
    replaying: bool,
}

/// Per-driver pair of host callbacks.
pub struct Sinks {
    platform: Platform,
    state: Mutex<SinkState>,
}

impl std::fmt::Debug for Sinks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Sinks")
            .field("platform", &self.platform)
            .field("installed", &state.on_message.is_some())
            .field("pending", &state.pending.len())
            .finish()
    }
}

impl Sinks {
    /// Create empty sinks for a driver.
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            state: Mutex::new(SinkState::default()),
        }
    }

    /// Install the host callbacks and flush anything buffered so far.
    ///
    /// Items arriving during the flush are queued behind the backlog, so the
    /// host sees everything in arrival order.
    pub fn install(&self, on_message: MessageCallback, on_event: EventCallback) {
        {
            let mut state = self.state.lock();
            state.on_message = Some(on_message);
            state.on_event = Some(on_event);
            if state.replaying {
                return;
            }
            state.replaying = true;
        }

        loop {
            let (batch, on_message, on_event) = {
                let mut state = self.state.lock();
                match (state.on_message.clone(), state.on_event.clone()) {
                    (Some(on_message), Some(on_event)) if !state.pending.is_empty() => {
                        (std::mem::take(&mut state.pending), on_message, on_event)
                    }
                    _ => {
                        state.replaying = false;
                        return;
                    }
                }
            };

            for item in batch {
                match item {
                    Pending::Message(message) => self.invoke_message(&on_message, message),
                    Pending::Event(event) => self.invoke_event(&on_event, event),
                }
            }
        }
    }

    /// Whether callbacks have been installed.
    pub fn is_installed(&self) -> bool {
        self.state.lock().on_message.is_some()
    }

    /// Number of buffered items.
    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Deliver an inbound message.
    pub fn message(&self, message: Message) {
        let callback = {
            let mut state = self.state.lock();
            match state.on_message.clone() {
                Some(cb) if !state.replaying => cb,
                _ => {
                    self.buffer(&mut state, Pending::Message(message));
                    return;
                }
            }
        };
        self.invoke_message(&callback, message);
    }

    /// Deliver an inbound event.
    pub fn event(&self, event: Event) {
        let callback = {
            let mut state = self.state.lock();
            match state.on_event.clone() {
                Some(cb) if !state.replaying => cb,
                _ => {
                    self.buffer(&mut state, Pending::Event(event));
                    return;
                }
            }
        };
        self.invoke_event(&callback, event);
    }

    fn buffer(&self, state: &mut SinkState, item: Pending) {
        if state.pending.len() >= PENDING_CAPACITY {
            state.pending.pop_front();
            warn!(
                "{} sink backlog full, dropping oldest buffered item",
                self.platform
            );
        }
        state.pending.push_back(item);
    }

    fn invoke_message(&self, callback: &MessageCallback, message: Message) {
        let platform = self.platform;
        if catch_unwind(AssertUnwindSafe(|| callback(platform, message))).is_err() {
            error!("{} message callback panicked", platform);
        }
    }

    fn invoke_event(&self, callback: &EventCallback, event: Event) {
        let platform = self.platform;
        if catch_unwind(AssertUnwindSafe(|| callback(platform, event))).is_err() {
            error!("{} event callback panicked", platform);
        }
    }
}
