//! Scanning for supported scales.
//!
//! A [`DiscoverySession`] drives the transport's scanner and filters the
//! advertisement stream through the driver registry. Each supported device is
//! reported at most once per scan as a [`DiscoveryEvent::DeviceFound`];
//! repeated advertisements from the same address and devices no registered
//! driver supports produce nothing.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::driver::DriverRegistry;
use crate::error::Result;
use crate::events::{DiscoveryEvent, DiscoveryReceiver};
use crate::transport::{ScaleTransport, TransportEvent};

/// A supported device retained from the current scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    /// Hardware address.
    pub address: String,
    /// Advertised name.
    pub name: String,
    /// Id of the driver that matched the name.
    pub driver_id: String,
}

#[derive(Debug, Default)]
struct Inner {
    scanning: bool,
    seen: HashSet<String>,
    devices: Vec<DiscoveredDevice>,
    cancel: Option<CancellationToken>,
}

/// Discovery state machine: `Idle → Scanning → Idle`.
///
/// `start` and `stop` are idempotent; the retained device list survives
/// `stop` and is cleared by the next `start`.
pub struct DiscoverySession {
    transport: Arc<dyn ScaleTransport>,
    registry: Arc<DriverRegistry>,
    inner: Arc<Mutex<Inner>>,
    events: broadcast::Sender<DiscoveryEvent>,
}

impl DiscoverySession {
    /// Default capacity of the discovery event channel.
    pub const EVENT_CAPACITY: usize = 64;

    /// Create a session over the given transport and registry.
    pub fn new(transport: Arc<dyn ScaleTransport>, registry: Arc<DriverRegistry>) -> Self {
        let (events, _) = broadcast::channel(Self::EVENT_CAPACITY);
        Self {
            transport,
            registry,
            inner: Arc::new(Mutex::new(Inner::default())),
            events,
        }
    }

    /// Subscribe to discovery events.
    pub fn subscribe(&self) -> DiscoveryReceiver {
        self.events.subscribe()
    }

    /// Whether a scan is currently running.
    pub fn is_scanning(&self) -> bool {
        self.lock_inner().scanning
    }

    /// Devices discovered so far, in first-seen order.
    pub fn devices(&self) -> Vec<DiscoveredDevice> {
        self.lock_inner().devices.clone()
    }

    /// Begin scanning.
    ///
    /// Clears the devices retained from the previous scan. A no-op when
    /// already scanning.
    ///
    /// # Errors
    ///
    /// Surfaces the transport's scan-start failure without retrying.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<()> {
        {
            let mut inner = self.lock_inner();
            if inner.scanning {
                return Ok(());
            }
            inner.seen.clear();
            inner.devices.clear();
        }

        // Subscribe before the scan starts so no advertisement is missed.
        let rx = self.transport.events();
        self.transport.start_scan().await?;

        let cancel = CancellationToken::new();
        {
            let mut inner = self.lock_inner();
            inner.scanning = true;
            inner.cancel = Some(cancel.clone());
        }

        let registry = Arc::clone(&self.registry);
        let state = Arc::clone(&self.inner);
        let events = self.events.clone();
        tokio::spawn(pump_advertisements(rx, registry, state, events, cancel));

        debug!("scan started");
        Ok(())
    }

    /// Stop scanning. Idempotent; safe to call in any state.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        let cancel = {
            let mut inner = self.lock_inner();
            if !inner.scanning {
                return;
            }
            inner.scanning = false;
            inner.cancel.take()
        };
        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        if let Err(error) = self.transport.stop_scan().await {
            warn!(%error, "failed to stop transport scan");
        }
        debug!("scan stopped");
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

async fn pump_advertisements(
    mut rx: crate::transport::TransportEventReceiver,
    registry: Arc<DriverRegistry>,
    state: Arc<Mutex<Inner>>,
    events: broadcast::Sender<DiscoveryEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            event = rx.recv() => event,
        };
        match event {
            Ok(TransportEvent::Advertisement { address, name }) => {
                handle_advertisement(&registry, &state, &events, address, name);
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "advertisement stream lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn handle_advertisement(
    registry: &DriverRegistry,
    state: &Mutex<Inner>,
    events: &broadcast::Sender<DiscoveryEvent>,
    address: String,
    name: Option<String>,
) {
    let Some(name) = name.filter(|n| !n.is_empty()) else {
        return;
    };

    let Some(descriptor) = registry.match_name(&name) else {
        debug!(%address, %name, "no driver supports advertised device");
        return;
    };

    let device = {
        let mut inner = match state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !inner.scanning || !inner.seen.insert(address.clone()) {
            return;
        }
        let device = DiscoveredDevice {
            address,
            name,
            driver_id: descriptor.id.to_string(),
        };
        inner.devices.push(device.clone());
        device
    };

    debug!(address = %device.address, name = %device.name, driver = %device.driver_id, "device found");
    let _ = events.send(DiscoveryEvent::DeviceFound {
        address: device.address,
        name: device.name,
        driver_id: device.driver_id,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_state() -> (Arc<Mutex<Inner>>, broadcast::Sender<DiscoveryEvent>) {
        let inner = Inner {
            scanning: true,
            ..Inner::default()
        };
        let (tx, _) = broadcast::channel(16);
        (Arc::new(Mutex::new(inner)), tx)
    }

    #[test]
    fn test_dedup_by_address() {
        let registry = DriverRegistry::builtin();
        let (state, tx) = session_state();
        let mut rx = tx.subscribe();

        for _ in 0..3 {
            handle_advertisement(
                &registry,
                &state,
                &tx,
                "FA:A0:F7:11:12:46".into(),
                Some("MIBCS".into()),
            );
        }

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
        let guard = state.lock().unwrap();
        assert_eq!(guard.devices.len(), 1);
    }

    #[test]
    fn test_unmatched_and_unnamed_advertisements_dropped() {
        let registry = DriverRegistry::builtin();
        let (state, tx) = session_state();
        let mut rx = tx.subscribe();

        handle_advertisement(
            &registry,
            &state,
            &tx,
            "AA:BB:CC:DD:EE:FF".into(),
            Some("JBL Flip 5".into()),
        );
        handle_advertisement(&registry, &state, &tx, "AA:BB:CC:DD:EE:01".into(), None);
        handle_advertisement(
            &registry,
            &state,
            &tx,
            "AA:BB:CC:DD:EE:02".into(),
            Some(String::new()),
        );

        assert!(rx.try_recv().is_err());
        assert!(state.lock().unwrap().devices.is_empty());
    }

    #[test]
    fn test_insertion_order_preserved() {
        let registry = DriverRegistry::builtin();
        let (state, tx) = session_state();

        handle_advertisement(
            &registry,
            &state,
            &tx,
            "FA:A0:F7:11:12:46".into(),
            Some("MIBCS".into()),
        );
        handle_advertisement(
            &registry,
            &state,
            &tx,
            "AA:BB:CC:DD:EE:FF".into(),
            Some("MI_SCALE".into()),
        );

        let guard = state.lock().unwrap();
        assert_eq!(guard.devices[0].address, "FA:A0:F7:11:12:46");
        assert_eq!(guard.devices[1].address, "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn test_late_advertisements_dropped_after_stop() {
        let registry = DriverRegistry::builtin();
        let (state, tx) = session_state();
        state.lock().unwrap().scanning = false;

        handle_advertisement(
            &registry,
            &state,
            &tx,
            "FA:A0:F7:11:12:46".into(),
            Some("MIBCS".into()),
        );
        assert!(state.lock().unwrap().devices.is_empty());
    }
}
