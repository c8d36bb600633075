//! Driver manager for orchestrating platform drivers.
//!
//! The DriverManager provides a unified interface for:
//! - Registering driver constructors per platform
//! - Constructing and connecting all configured drivers in parallel
//! - Installing the host's callback sinks on every driver
//! - Dispatching outbound messages to the targeted platforms
//! - Concurrent, bounded shutdown

use crate::registry::{DriverConstructor, DriverRegistry};
use crate::sink::{EventCallback, MessageCallback};
use crate::traits::{Driver, DriverStatus};
use crate::Result;
use imbridge_core::{DriverConfig, Platform, SendMessageRequest};
use parking_lot::RwLock;
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, warn};

struct LoadedDriver {
    /// (registration index, load sequence)
    order: (usize, usize),
    driver: Arc<dyn Driver>,
}

/// The central manager for all platform drivers.
pub struct DriverManager {
    /// Constructors by platform.
    registry: DriverRegistry,

    /// Live drivers, kept sorted by `order`.
    drivers: RwLock<Vec<LoadedDriver>>,

    /// Sinks to install on drivers loaded later.
    callbacks: RwLock<Option<(MessageCallback, EventCallback)>>,

    /// Next load sequence number.
    next_seq: RwLock<usize>,
}

impl Default for DriverManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DriverManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverManager")
            .field("registry", &self.registry)
            .field("drivers", &self.drivers.read().len())
            .finish()
    }
}

impl DriverManager {
    /// Create a manager with no registered constructors.
    pub fn new() -> Self {
        Self {
            registry: DriverRegistry::new(),
            drivers: RwLock::new(Vec::new()),
            callbacks: RwLock::new(None),
            next_seq: RwLock::new(0),
        }
    }

    /// Create a manager with every compiled-in transport registered.
    pub fn with_default_drivers() -> Self {
        let mut manager = Self::new();

        #[cfg(feature = "qq")]
        manager.register_driver(Platform::Qq, |config| {
            crate::onebot::OneBotDriver::from_config(config)
                .map(|d| Arc::new(d) as Arc<dyn Driver>)
        });

        #[cfg(feature = "telegram")]
        manager.register_driver(Platform::Telegram, |config| {
            crate::telegram::TelegramDriver::from_config(config)
                .map(|d| Arc::new(d) as Arc<dyn Driver>)
        });

        #[cfg(feature = "matrix")]
        manager.register_driver(Platform::Matrix, |config| {
            crate::matrix::MatrixDriver::from_config(config)
                .map(|d| Arc::new(d) as Arc<dyn Driver>)
        });

        manager
    }

    /// Register a driver constructor for a platform.
    pub fn register_driver<F>(&mut self, platform: Platform, constructor: F) -> &mut Self
    where
        F: Fn(&DriverConfig) -> Result<Arc<dyn Driver>> + Send + Sync + 'static,
    {
        let constructor: DriverConstructor = Arc::new(constructor);
        self.registry.register(platform, constructor);
        self
    }

    /// Platforms with a registered constructor.
    pub fn registered_platforms(&self) -> Vec<Platform> {
        self.registry.platforms()
    }

    /// Construct and connect every enabled driver concurrently.
    ///
    /// A driver that fails to connect is kept (disconnected) so its status
    /// can be reported. Returns the number of drivers that connected.
    pub fn load_drivers_parallel(&self, configs: &[DriverConfig]) -> usize {
        let candidates: Vec<(usize, &DriverConfig)> = configs
            .iter()
            .filter_map(|config| {
                let platform = config.platform();
                if !config.enabled() {
                    info!("Driver {} is disabled, skipping", platform);
                    return None;
                }
                let Some(position) = self.registry.position(platform) else {
                    warn!("No driver registered for platform {}, skipping", platform);
                    return None;
                };
                if let Err(e) = config.validate() {
                    warn!("Invalid {} configuration, skipping: {}", platform, e);
                    return None;
                }
                Some((position, config))
            })
            .collect();

        if candidates.is_empty() {
            info!("No drivers to load");
            return 0;
        }

        let callbacks = self.callbacks.read().clone();
        let registry = &self.registry;

        let loaded: Vec<((usize, usize), Arc<dyn Driver>)> = thread::scope(|scope| {
            let handles: Vec<_> = candidates
                .into_iter()
                .map(|(position, config)| {
                    let seq = self.take_seq();
                    let callbacks = callbacks.clone();
                    let handle = scope.spawn(move || {
                        let driver = registry.create(config)?;
                        if let Some((on_message, on_event)) = callbacks {
                            driver.register_callbacks(on_message, on_event);
                        }
                        match driver.connect() {
                            Ok(()) => info!("Driver {} connected", driver.platform()),
                            Err(e) => error!("Driver {} failed to connect: {}", driver.platform(), e),
                        }
                        Ok::<_, crate::DriverError>(driver)
                    });
                    (config.platform(), (position, seq), handle)
                })
                .collect();

            handles
                .into_iter()
                .filter_map(|(platform, order, handle)| match handle.join() {
                    Ok(Ok(driver)) => Some((order, driver)),
                    Ok(Err(e)) => {
                        error!("Failed to construct {} driver: {}", platform, e);
                        None
                    }
                    Err(_) => {
                        error!("Loading {} driver panicked", platform);
                        None
                    }
                })
                .collect()
        });

        let connected = loaded.iter().filter(|(_, d)| d.is_connected()).count();

        let mut drivers = self.drivers.write();
        for (order, driver) in loaded {
            drivers.push(LoadedDriver { order, driver });
        }
        drivers.sort_by_key(|d| d.order);

        info!("Loaded {} driver(s), {} connected", drivers.len(), connected);
        connected
    }

    fn take_seq(&self) -> usize {
        let mut seq = self.next_seq.write();
        let current = *seq;
        *seq += 1;
        current
    }

    /// Snapshot of all live drivers, in registration then config order.
    pub fn get_all_drivers(&self) -> Vec<Arc<dyn Driver>> {
        self.drivers.read().iter().map(|d| d.driver.clone()).collect()
    }

    /// First live driver for a platform.
    pub fn driver(&self, platform: Platform) -> Option<Arc<dyn Driver>> {
        self.drivers
            .read()
            .iter()
            .find(|d| d.driver.platform() == platform)
            .map(|d| d.driver.clone())
    }

    /// Install the host callbacks on every current and future driver.
    pub fn register_callbacks(&self, on_message: MessageCallback, on_event: EventCallback) {
        *self.callbacks.write() = Some((on_message.clone(), on_event.clone()));
        for driver in self.get_all_drivers() {
            driver.register_callbacks(on_message.clone(), on_event.clone());
        }
    }

    /// Send to every targeted driver, in order. Returns the identifiers of
    /// successful sends; an empty list means nothing was delivered.
    pub fn send_message(&self, request: &SendMessageRequest) -> Vec<String> {
        let mut ids = Vec::new();
        for driver in self.get_all_drivers() {
            if !request.targets(driver.platform()) {
                continue;
            }
            if let Some(id) = driver.try_send(request) {
                debug!("Sent to {}: {}", driver.platform(), id);
                ids.push(id);
            }
        }
        ids
    }

    /// Connection status of every live driver.
    pub fn status(&self) -> Vec<DriverStatus> {
        self.get_all_drivers().iter().map(|d| d.status()).collect()
    }

    /// Disconnect every driver concurrently and empty the live set.
    pub fn shutdown(&self) {
        let drivers: Vec<Arc<dyn Driver>> = self
            .drivers
            .write()
            .drain(..)
            .map(|d| d.driver)
            .collect();

        if drivers.is_empty() {
            return;
        }

        info!("Stopping {} driver(s)", drivers.len());

        thread::scope(|scope| {
            let handles: Vec<_> = drivers
                .iter()
                .map(|driver| (driver.platform(), scope.spawn(move || driver.disconnect())))
                .collect();

            for (platform, handle) in handles {
                match handle.join() {
                    Ok(Ok(())) => debug!("Driver {} stopped", platform),
                    Ok(Err(e)) => warn!("Driver {} did not stop cleanly: {}", platform, e),
                    Err(_) => error!("Stopping {} driver panicked", platform),
                }
            }
        });

        info!("All drivers stopped");
    }
}
