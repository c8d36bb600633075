//! Configuration management for imbridge.

mod loader;
mod schema;

pub use loader::*;
pub use schema::*;
