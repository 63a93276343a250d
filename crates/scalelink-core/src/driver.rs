//! Device matching and the driver seam.
//!
//! A [`DriverRegistry`] holds an ordered list of [`DriverDescriptor`]s. Each
//! descriptor knows which advertised names it supports and how to build the
//! [`ScaleDriver`] that speaks the device's protocol. Matching is pure and
//! stateless; the first descriptor whose matcher accepts a name wins, so
//! registration order is part of the registry's contract.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::transport::DriverSink;

/// GATT access to one connected peripheral.
///
/// Drivers run against this seam rather than a concrete BLE stack, which is
/// what lets the mock transport exercise them without a radio.
#[async_trait]
pub trait DeviceLink: Send + Sync {
    /// Hardware address of the peripheral.
    fn address(&self) -> &str;

    /// UUIDs of the services discovered on the peripheral.
    async fn services(&self) -> Result<Vec<Uuid>>;

    /// Enable notifications for a characteristic. Notified payloads are
    /// delivered to [`ScaleDriver::handle_notification`].
    async fn subscribe(&self, characteristic: Uuid) -> Result<()>;

    /// Read a characteristic value.
    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>>;

    /// Write a characteristic value.
    async fn write(&self, characteristic: Uuid, payload: &[u8]) -> Result<()>;
}

/// Protocol logic for one family of scales.
///
/// The transport calls [`start`](Self::start) once the link is up; the driver
/// performs its handshake (subscriptions, time sync, unit setup) and reports
/// completion through the sink. Notification payloads are then fed to
/// [`handle_notification`](Self::handle_notification) until the link drops.
#[async_trait]
pub trait ScaleDriver: Send + Sync {
    /// Stable identifier, matching the descriptor that created this driver.
    fn id(&self) -> &str;

    /// Run the protocol handshake against a connected peripheral.
    ///
    /// Must end with either `sink.handshake_complete()` or
    /// `sink.handshake_failed(..)`; an `Err` return is treated as a failed
    /// handshake by the transport.
    async fn start(&self, link: &dyn DeviceLink, sink: &DriverSink) -> Result<()>;

    /// Decode one characteristic notification.
    async fn handle_notification(
        &self,
        characteristic: Uuid,
        payload: &[u8],
        sink: &DriverSink,
    ) -> Result<()>;
}

/// An immutable entry in the driver registry.
#[derive(Clone, Copy)]
pub struct DriverDescriptor {
    /// Stable identifier, e.g. `"mibcs"`.
    pub id: &'static str,
    /// Human-readable product name.
    pub display_name: &'static str,
    matcher: fn(&str) -> bool,
    factory: fn() -> Arc<dyn ScaleDriver>,
}

impl DriverDescriptor {
    /// Create a descriptor.
    pub const fn new(
        id: &'static str,
        display_name: &'static str,
        matcher: fn(&str) -> bool,
        factory: fn() -> Arc<dyn ScaleDriver>,
    ) -> Self {
        Self {
            id,
            display_name,
            matcher,
            factory,
        }
    }

    /// Whether this descriptor supports the given advertised name.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        (self.matcher)(name)
    }

    /// Instantiate the driver.
    #[must_use]
    pub fn create(&self) -> Arc<dyn ScaleDriver> {
        (self.factory)()
    }
}

impl fmt::Debug for DriverDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverDescriptor")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .finish_non_exhaustive()
    }
}

/// Ordered collection of driver descriptors.
///
/// Descriptors are registered at construction time and never change
/// afterwards; `match_name` walks them in registration order and returns the
/// first match.
#[derive(Debug, Clone, Default)]
pub struct DriverRegistry {
    descriptors: Vec<DriverDescriptor>,
}

impl DriverRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry preloaded with the built-in drivers.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for descriptor in crate::drivers::builtin_descriptors() {
            registry.register(descriptor);
        }
        registry
    }

    /// Append a descriptor. Later registrations lose ties to earlier ones.
    pub fn register(&mut self, descriptor: DriverDescriptor) {
        self.descriptors.push(descriptor);
    }

    /// Find the first descriptor supporting the given advertised name.
    ///
    /// Pure and stateless; an empty name or no match returns `None`.
    #[must_use]
    pub fn match_name(&self, name: &str) -> Option<&DriverDescriptor> {
        if name.is_empty() {
            return None;
        }
        self.descriptors.iter().find(|d| d.matches(name))
    }

    /// Find a descriptor by its stable id.
    #[must_use]
    pub fn by_id(&self, id: &str) -> Option<&DriverDescriptor> {
        self.descriptors.iter().find(|d| d.id == id)
    }

    /// Instantiate a driver for the given advertised name, if supported.
    #[must_use]
    pub fn create_driver(&self, name: &str) -> Option<Arc<dyn ScaleDriver>> {
        self.match_name(name).map(DriverDescriptor::create)
    }

    /// Instantiate a driver by id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownDriver`] if no descriptor carries the id.
    pub fn create_by_id(&self, id: &str) -> Result<Arc<dyn ScaleDriver>> {
        self.by_id(id)
            .map(DriverDescriptor::create)
            .ok_or_else(|| Error::UnknownDriver(id.to_string()))
    }

    /// All registered descriptors, in registration order.
    #[must_use]
    pub fn descriptors(&self) -> &[DriverDescriptor] {
        &self.descriptors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_matches_known_names() {
        let registry = DriverRegistry::builtin();

        assert_eq!(registry.match_name("MIBCS").map(|d| d.id), Some("mibcs"));
        assert_eq!(registry.match_name("MIBFS").map(|d| d.id), Some("mibcs"));
        assert_eq!(
            registry.match_name("MI_SCALE").map(|d| d.id),
            Some("mi_scale")
        );
        assert_eq!(
            registry.match_name("SANITAS SBF70/71").map(|d| d.id),
            Some("sanitas_sbf70")
        );
    }

    #[test]
    fn test_unknown_and_empty_names_do_not_match() {
        let registry = DriverRegistry::builtin();
        assert!(registry.match_name("JBL Flip 5").is_none());
        assert!(registry.match_name("").is_none());
    }

    #[test]
    fn test_matching_is_stateless() {
        let registry = DriverRegistry::builtin();
        let first = registry.match_name("MIBCS").map(|d| d.id);
        let second = registry.match_name("MIBCS").map(|d| d.id);
        assert_eq!(first, second);
    }

    #[test]
    fn test_first_match_wins() {
        fn always(_: &str) -> bool {
            true
        }
        fn make_debug() -> Arc<dyn ScaleDriver> {
            Arc::new(crate::drivers::DebugDriver::new())
        }

        let mut registry = DriverRegistry::new();
        registry.register(DriverDescriptor::new("a", "A", always, make_debug));
        registry.register(DriverDescriptor::new("b", "B", always, make_debug));

        assert_eq!(registry.match_name("anything").map(|d| d.id), Some("a"));
    }

    #[test]
    fn test_create_by_id_unknown() {
        let registry = DriverRegistry::builtin();
        assert!(matches!(
            registry.create_by_id("nope"),
            Err(Error::UnknownDriver(_))
        ));
        assert!(registry.create_by_id("debug").is_ok());
    }
}
