//! Platform drivers for imbridge.
//!
//! This crate provides the [`Driver`] contract, the background [`worker`]
//! every transport runs on, and the [`DriverManager`] that starts, feeds and
//! stops a set of drivers. Transports are feature-gated:
//!
//! - `qq`: OneBot v11 over reverse or forward WebSocket
//! - `telegram`: Telegram Bot API long polling
//! - `matrix`: Matrix client-server `/sync` loop

pub mod error;
pub mod manager;
pub mod registry;
pub mod sink;
pub mod traits;
pub mod worker;

#[cfg(feature = "qq")]
pub mod onebot;

#[cfg(feature = "telegram")]
pub mod telegram;

#[cfg(feature = "matrix")]
pub mod matrix;

pub use error::DriverError;
pub use manager::DriverManager;
pub use registry::{DriverConstructor, DriverRegistry};
pub use sink::{EventCallback, MessageCallback, Sinks};
pub use traits::{Driver, DriverStatus, LinkCell, LinkState};

/// Result type for driver operations.
pub type Result<T> = std::result::Result<T, DriverError>;
