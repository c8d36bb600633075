//! Normalized message model shared by all drivers.

mod message;
mod platform;
mod request;

pub use message::*;
pub use platform::*;
pub use request::*;
