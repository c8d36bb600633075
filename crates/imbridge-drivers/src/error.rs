//! Driver error types.

use imbridge_core::{ConfigError, Platform};
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during driver operations.
#[derive(Debug, Error)]
pub enum DriverError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid driver configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// No constructor registered for the platform.
    #[error("No driver registered for platform: {0}")]
    Unsupported(Platform),

    /// The driver has no live transport.
    #[error("Driver not connected: {0}")]
    NotConnected(Platform),

    /// The request does not target this driver's platform.
    #[error("Request does not target platform: {0}")]
    Filtered(Platform),

    /// The request cannot be expressed on this platform.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The worker did not report readiness in time.
    #[error("Startup timed out after {0:?}")]
    StartupTimeout(Duration),

    /// The worker did not stop in time and was detached.
    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),

    /// Authentication rejected by the remote side.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Platform-specific error.
    #[error("Driver error ({platform}): {message}")]
    Platform {
        /// Platform the error came from.
        platform: Platform,
        /// Error message.
        message: String,
    },

    /// Timeout waiting on the worker.
    #[error("Operation timed out")]
    Timeout,

    /// The worker went away while a call was in flight.
    #[error("Worker stopped")]
    WorkerGone,
}

impl DriverError {
    /// Create a platform-specific error.
    pub fn platform(platform: Platform, message: impl Into<String>) -> Self {
        Self::Platform {
            platform,
            message: message.into(),
        }
    }

    /// Create an invalid request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Create an auth error.
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    /// Check if this error is retriable.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Io(_) | Self::NotConnected(_) | Self::StartupTimeout(_)
        )
    }
}
