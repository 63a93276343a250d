//! The `ScaleCentral` facade.
//!
//! One explicitly-constructed object owning the driver registry, the
//! discovery session and the connection controller over a shared transport.
//! There is no process-wide instance; applications create a central, hold on
//! to it, and pass it where it is needed.

use std::sync::{Arc, Mutex};

use tracing::info;

use scalelink_types::ScaleUser;

use crate::discovery::{DiscoveredDevice, DiscoverySession};
use crate::driver::DriverRegistry;
use crate::error::Result;
use crate::events::{DiscoveryReceiver, LifecycleReceiver};
use crate::session::{ConnectionController, RetryPolicy, SessionSnapshot, SessionState};
use crate::transport::ScaleTransport;

/// Facade over discovery, driver matching and the connection lifecycle.
pub struct ScaleCentral {
    registry: Arc<DriverRegistry>,
    discovery: DiscoverySession,
    controller: ConnectionController,
    selected_user: Mutex<Option<ScaleUser>>,
}

impl ScaleCentral {
    /// Create a central with the built-in drivers and default retry policy.
    ///
    /// Returns the central and the lifecycle event stream for its single
    /// consumer.
    pub fn new(transport: Arc<dyn ScaleTransport>) -> (Self, LifecycleReceiver) {
        Self::with_config(transport, DriverRegistry::builtin(), RetryPolicy::default())
    }

    /// Create a central with a custom registry and retry policy.
    pub fn with_config(
        transport: Arc<dyn ScaleTransport>,
        registry: DriverRegistry,
        policy: RetryPolicy,
    ) -> (Self, LifecycleReceiver) {
        let registry = Arc::new(registry);
        let discovery = DiscoverySession::new(Arc::clone(&transport), Arc::clone(&registry));
        let (controller, lifecycle) = ConnectionController::new(transport, policy);
        let central = Self {
            registry,
            discovery,
            controller,
            selected_user: Mutex::new(None),
        };
        (central, lifecycle)
    }

    /// The driver registry in use.
    pub fn registry(&self) -> &DriverRegistry {
        &self.registry
    }

    /// Begin scanning for supported scales.
    pub async fn start_discovery(&self) -> Result<()> {
        self.discovery.start().await
    }

    /// Stop scanning. Idempotent.
    pub async fn stop_discovery(&self) {
        self.discovery.stop().await;
    }

    /// Subscribe to discovery events.
    pub fn discovery_events(&self) -> DiscoveryReceiver {
        self.discovery.subscribe()
    }

    /// Devices found in the current scan, in first-seen order.
    pub fn discovered_devices(&self) -> Vec<DiscoveredDevice> {
        self.discovery.devices()
    }

    /// Connect to the scale at `address` with the driver registered under
    /// `driver_id`.
    pub async fn connect(&self, address: &str, driver_id: &str) -> Result<()> {
        info!(address, driver_id, "connect requested");
        self.controller.connect(address, driver_id).await
    }

    /// Connect to an arbitrary peripheral with the debug driver, which logs
    /// its service table and pushes a synthetic measurement through the
    /// normal event path.
    pub async fn connect_debug(&self, address: &str) -> Result<()> {
        info!(address, "debug connect requested");
        self.controller.connect(address, "debug").await
    }

    /// Tear down the active session, if any.
    pub async fn disconnect(&self) -> Result<()> {
        self.controller.disconnect().await
    }

    /// Current connection phase.
    pub fn state(&self) -> SessionState {
        self.controller.state()
    }

    /// Snapshot of the active session, if any.
    pub fn session(&self) -> Option<SessionSnapshot> {
        self.controller.session()
    }

    /// The user measurements are attributed to, if one is selected.
    pub fn selected_user(&self) -> Option<ScaleUser> {
        self.lock_user().clone()
    }

    /// Select (or clear) the active user.
    pub fn set_selected_user(&self, user: Option<ScaleUser>) {
        *self.lock_user() = user;
    }

    fn lock_user(&self) -> std::sync::MutexGuard<'_, Option<ScaleUser>> {
        match self.selected_user.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
