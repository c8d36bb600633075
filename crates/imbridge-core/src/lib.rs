//! # imbridge-core
//!
//! Core types, configuration, and utilities for imbridge.
//!
//! This crate provides the shared vocabulary used by every driver and by the
//! host binary:
//!
//! - **Types**: the normalized `Platform`, `User`, `Channel`, `Message`,
//!   `Event` and `SendMessageRequest` model
//! - **Configuration**: loading and validation of per-driver config records
//! - **Utilities**: secret handling and default path resolution

pub mod config;
pub mod error;
pub mod paths;
pub mod secret;
pub mod types;

// Re-exports for convenience
pub use config::{BridgeConfig, DriverConfig};
pub use error::{ConfigError, Error, Result};
pub use secret::SecretString;
pub use types::*;
