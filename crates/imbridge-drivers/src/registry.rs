//! Driver constructor registry.

use crate::error::DriverError;
use crate::traits::Driver;
use crate::Result;
use imbridge_core::{DriverConfig, Platform};
use std::sync::Arc;
use tracing::info;

/// Builds a driver from its configuration.
pub type DriverConstructor = Arc<dyn Fn(&DriverConfig) -> Result<Arc<dyn Driver>> + Send + Sync>;

/// Ordered map from platform to driver constructor.
///
/// Order of registration is the order in which drivers are listed by the
/// manager.
#[derive(Default, Clone)]
pub struct DriverRegistry {
    constructors: Vec<(Platform, DriverConstructor)>,
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.constructors.iter().map(|(p, _)| p))
            .finish()
    }
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor. Re-registering a platform replaces its
    /// constructor but keeps its position.
    pub fn register(&mut self, platform: Platform, constructor: DriverConstructor) {
        info!("Registering driver for platform: {}", platform);
        match self.constructors.iter_mut().find(|(p, _)| *p == platform) {
            Some(entry) => entry.1 = constructor,
            None => self.constructors.push((platform, constructor)),
        }
    }

    pub fn contains(&self, platform: Platform) -> bool {
        self.position(platform).is_some()
    }

    /// Registration index of a platform.
    pub fn position(&self, platform: Platform) -> Option<usize> {
        self.constructors.iter().position(|(p, _)| *p == platform)
    }

    /// Registered platforms in registration order.
    pub fn platforms(&self) -> Vec<Platform> {
        self.constructors.iter().map(|(p, _)| *p).collect()
    }

    /// Construct a driver for `config`.
    pub fn create(&self, config: &DriverConfig) -> Result<Arc<dyn Driver>> {
        let platform = config.platform();
        let (_, constructor) = self
            .constructors
            .iter()
            .find(|(p, _)| *p == platform)
            .ok_or(DriverError::Unsupported(platform))?;
        constructor(config)
    }

    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }
}
