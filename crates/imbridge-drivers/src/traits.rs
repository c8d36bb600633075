//! The driver contract shared by every platform transport.

use crate::error::DriverError;
use crate::sink::{EventCallback, MessageCallback, Sinks};
use crate::Result;
use imbridge_core::{Platform, SendMessageRequest};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::{debug, warn};

/// Connection state of a driver's transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl LinkState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => LinkState::Connecting,
            2 => LinkState::Connected,
            3 => LinkState::Disconnecting,
            _ => LinkState::Disconnected,
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
            LinkState::Disconnecting => "disconnecting",
        };
        f.write_str(s)
    }
}

/// Lock-free holder for a [`LinkState`], written by the driver's worker and
/// read from any thread.
#[derive(Debug)]
pub struct LinkCell(AtomicU8);

impl Default for LinkCell {
    fn default() -> Self {
        Self(AtomicU8::new(LinkState::Disconnected as u8))
    }
}

impl LinkCell {
    pub fn get(&self) -> LinkState {
        LinkState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: LinkState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Snapshot of a driver for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriverStatus {
    pub platform: Platform,
    pub connected: bool,
}

/// A platform transport.
///
/// All methods are blocking from the caller's point of view; network I/O
/// happens on a worker thread owned by the driver. Every blocking method is
/// bounded by a timeout.
pub trait Driver: Send + Sync + fmt::Debug {
    /// Platform this driver speaks to. Fixed at construction.
    fn platform(&self) -> Platform;

    /// Start the transport.
    ///
    /// Idempotent: returns immediately if a worker is already running.
    /// Otherwise waits until the worker reports that it started, or until
    /// the transport's startup timeout elapses.
    fn connect(&self) -> Result<()>;

    /// Stop the transport and release its worker.
    ///
    /// A no-op when nothing is running. Returns
    /// [`DriverError::ShutdownTimeout`] if the worker had to be detached.
    fn disconnect(&self) -> Result<()>;

    /// Current link state.
    fn state(&self) -> LinkState;

    /// Send a message and return its platform identifier.
    fn send_message(&self, request: &SendMessageRequest) -> Result<String>;

    /// Callback sinks of this driver.
    fn sinks(&self) -> &Sinks;

    fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    /// Install the host callbacks. May be called before or after `connect`.
    fn register_callbacks(&self, on_message: MessageCallback, on_event: EventCallback) {
        self.sinks().install(on_message, on_event);
    }

    fn status(&self) -> DriverStatus {
        DriverStatus {
            platform: self.platform(),
            connected: self.is_connected(),
        }
    }

    /// Reject requests that are not for this driver or cannot be sent now.
    fn check_request(&self, request: &SendMessageRequest) -> Result<()> {
        if !request.targets(self.platform()) {
            return Err(DriverError::Filtered(self.platform()));
        }
        if !self.is_connected() {
            return Err(DriverError::NotConnected(self.platform()));
        }
        Ok(())
    }

    /// Like [`Driver::send_message`], but logs the failure and returns `None`.
    fn try_send(&self, request: &SendMessageRequest) -> Option<String> {
        match self.send_message(request) {
            Ok(id) => Some(id),
            Err(DriverError::Filtered(platform)) => {
                debug!("Request not addressed to {}", platform);
                None
            }
            Err(e) => {
                warn!("Failed to send to {}: {}", self.platform(), e);
                None
            }
        }
    }
}
