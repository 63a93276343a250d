//! btleplug-backed transport.
//!
//! `BleTransport` owns one adapter, translates the platform's central events
//! into [`TransportEvent`]s, and hosts the scale drivers: after a link comes
//! up it runs the matched driver's handshake and feeds it every
//! characteristic notification until the link drops.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use btleplug::api::{
    Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::driver::{DeviceLink, DriverRegistry, ScaleDriver};
use crate::error::{ConnectFailureReason, Error, Result, TransportUnavailableReason};
use crate::transport::{
    DriverSink, ScaleTransport, TransportEvent, TransportEventReceiver, TransportEvents,
};

struct BleShared {
    adapter: Adapter,
    registry: Arc<DriverRegistry>,
    events: TransportEvents,
    /// Addresses with a user-requested teardown in flight; used to tell a
    /// confirmed disconnect apart from a dropped link.
    teardown: Mutex<HashSet<String>>,
    /// Cancellation handle per in-flight session task, keyed by address, so
    /// a teardown request can abort a connect attempt that has no link yet.
    /// The request token disambiguates tasks targeting the same address.
    attempts: Mutex<HashMap<String, (u64, CancellationToken)>>,
}

/// Production [`ScaleTransport`] over the system Bluetooth stack.
pub struct BleTransport {
    shared: Arc<BleShared>,
    cancel: CancellationToken,
}

impl BleTransport {
    /// Create a transport on the first available adapter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportUnavailable`] when no adapter is present.
    pub async fn new(registry: Arc<DriverRegistry>) -> Result<Self> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::transport_unavailable(TransportUnavailableReason::NoAdapter))?;
        Self::with_adapter(adapter, registry).await
    }

    /// Create a transport on a specific adapter.
    pub async fn with_adapter(adapter: Adapter, registry: Arc<DriverRegistry>) -> Result<Self> {
        let shared = Arc::new(BleShared {
            adapter,
            registry,
            events: TransportEvents::default(),
            teardown: Mutex::new(HashSet::new()),
            attempts: Mutex::new(HashMap::new()),
        });
        let cancel = CancellationToken::new();

        let central_events = shared.adapter.events().await?;
        tokio::spawn(pump_central_events(
            central_events,
            Arc::clone(&shared),
            cancel.clone(),
        ));

        Ok(Self { shared, cancel })
    }
}

impl Drop for BleTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait::async_trait]
impl ScaleTransport for BleTransport {
    async fn is_available(&self) -> bool {
        self.shared.adapter.adapter_info().await.is_ok()
    }

    async fn start_scan(&self) -> Result<()> {
        self.shared
            .adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| {
                Error::transport_unavailable(TransportUnavailableReason::BleError(e.to_string()))
            })
    }

    async fn stop_scan(&self) -> Result<()> {
        self.shared.adapter.stop_scan().await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn connect(&self, address: &str, driver_id: &str, token: u64) -> Result<()> {
        // Fail fast on an unknown driver id; everything past this point is
        // reported through the event stream.
        let driver = self.shared.registry.create_by_id(driver_id)?;
        let cancel = self.shared.register_attempt(address, token);
        let shared = Arc::clone(&self.shared);
        let address = address.to_string();
        tokio::spawn(run_session(shared, address, driver, token, cancel));
        Ok(())
    }

    #[instrument(skip(self))]
    async fn disconnect(&self, address: &str) -> Result<()> {
        self.shared.mark_teardown(address);

        // Abort a session task that is still mid-connect or mid-handshake;
        // its cancellation path tears down whatever link it managed to open.
        if let Some(cancel) = self.shared.take_attempt(address) {
            cancel.cancel();
        }

        let peripheral = self.shared.find_peripheral(address).await?;
        let connected = match &peripheral {
            Some(p) => p.is_connected().await.unwrap_or(false),
            None => false,
        };

        if let (Some(p), true) = (&peripheral, connected) {
            p.disconnect().await?;
            // Confirmation arrives via the central event stream.
        } else {
            // Nothing to tear down; confirm directly.
            self.shared.clear_teardown(address);
            self.shared.events.send(TransportEvent::Disconnected {
                address: address.to_string(),
                unexpected: false,
            });
        }
        Ok(())
    }

    fn events(&self) -> TransportEventReceiver {
        self.shared.events.subscribe()
    }
}

impl BleShared {
    fn mark_teardown(&self, address: &str) {
        self.lock_teardown().insert(address.to_string());
    }

    fn clear_teardown(&self, address: &str) -> bool {
        self.lock_teardown().remove(address)
    }

    fn lock_teardown(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        match self.teardown.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Create the cancellation handle for a new session task, displacing
    /// (and cancelling) any leftover one for the same address.
    fn register_attempt(&self, address: &str, token: u64) -> CancellationToken {
        let cancel = CancellationToken::new();
        if let Some((_, old)) = self
            .lock_attempts()
            .insert(address.to_string(), (token, cancel.clone()))
        {
            old.cancel();
        }
        cancel
    }

    fn take_attempt(&self, address: &str) -> Option<CancellationToken> {
        self.lock_attempts().remove(address).map(|(_, cancel)| cancel)
    }

    /// Drop the handle for a finished session task, unless a newer task for
    /// the same address has already replaced it.
    fn finish_attempt(&self, address: &str, token: u64) {
        let mut attempts = self.lock_attempts();
        if attempts.get(address).is_some_and(|(t, _)| *t == token) {
            attempts.remove(address);
        }
    }

    fn lock_attempts(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<String, (u64, CancellationToken)>> {
        match self.attempts.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn find_peripheral(&self, address: &str) -> Result<Option<Peripheral>> {
        for peripheral in self.adapter.peripherals().await? {
            if peripheral.address().to_string() == address {
                return Ok(Some(peripheral));
            }
        }
        Ok(None)
    }
}

/// Translate adapter events onto the transport stream.
async fn pump_central_events(
    mut central_events: std::pin::Pin<Box<dyn futures::Stream<Item = CentralEvent> + Send>>,
    shared: Arc<BleShared>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            event = central_events.next() => match event {
                Some(event) => event,
                None => break,
            },
        };
        match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                let Ok(peripheral) = shared.adapter.peripheral(&id).await else {
                    continue;
                };
                let address = peripheral.address().to_string();
                let name = match peripheral.properties().await {
                    Ok(Some(props)) => props.local_name,
                    _ => None,
                };
                shared
                    .events
                    .send(TransportEvent::Advertisement { address, name });
            }
            CentralEvent::DeviceDisconnected(id) => {
                let Ok(peripheral) = shared.adapter.peripheral(&id).await else {
                    continue;
                };
                let address = peripheral.address().to_string();
                let requested = shared.clear_teardown(&address);
                debug!(address, requested, "peripheral disconnected");
                shared.events.send(TransportEvent::Disconnected {
                    address,
                    unexpected: !requested,
                });
            }
            _ => {}
        }
    }
}

/// Run one session task under its cancellation handle.
///
/// Cancellation aborts the session wherever it is; a link that already came
/// up is physically torn down on the way out.
async fn run_session(
    shared: Arc<BleShared>,
    address: String,
    driver: Arc<dyn ScaleDriver>,
    token: u64,
    cancel: CancellationToken,
) {
    tokio::select! {
        () = cancel.cancelled() => {
            debug!(address, "session task cancelled");
            abort_link(&shared, &address).await;
        }
        () = drive_session(Arc::clone(&shared), address.clone(), driver, token) => {}
    }
    shared.finish_attempt(&address, token);
}

/// Best-effort teardown of a link a cancelled session task may have opened.
async fn abort_link(shared: &BleShared, address: &str) {
    let Ok(Some(peripheral)) = shared.find_peripheral(address).await else {
        return;
    };
    if peripheral.is_connected().await.unwrap_or(false) {
        shared.mark_teardown(address);
        if let Err(error) = peripheral.disconnect().await {
            warn!(address, %error, "failed to tear down cancelled link");
            shared.clear_teardown(address);
        }
    }
}

/// Drive one link: connect, handshake, then pump notifications into the
/// driver until the link drops.
async fn drive_session(
    shared: Arc<BleShared>,
    address: String,
    driver: Arc<dyn ScaleDriver>,
    token: u64,
) {
    let peripheral = match shared.find_peripheral(&address).await {
        Ok(Some(p)) => p,
        Ok(None) => {
            shared.events.send(TransportEvent::ConnectFailed {
                address,
                token,
                reason: ConnectFailureReason::OutOfRange,
            });
            return;
        }
        Err(error) => {
            shared.events.send(TransportEvent::ConnectFailed {
                address,
                token,
                reason: ConnectFailureReason::BleError(error.to_string()),
            });
            return;
        }
    };

    if let Err(error) = peripheral.connect().await {
        shared.events.send(TransportEvent::ConnectFailed {
            address,
            token,
            reason: ConnectFailureReason::BleError(error.to_string()),
        });
        return;
    }
    shared.events.send(TransportEvent::Connected {
        address: address.clone(),
        token,
    });

    let sink = DriverSink::new(address.clone(), shared.events.clone());
    if let Err(error) = peripheral.discover_services().await {
        sink.handshake_failed(format!("service discovery failed: {error}"));
        return;
    }

    let link = BlePeripheralLink {
        address: address.clone(),
        peripheral: peripheral.clone(),
    };
    if let Err(error) = driver.start(&link, &sink).await {
        sink.handshake_failed(error.to_string());
        return;
    }

    let mut notifications = match peripheral.notifications().await {
        Ok(stream) => stream,
        Err(error) => {
            sink.handshake_failed(format!("notification stream failed: {error}"));
            return;
        }
    };

    // Ends when the link drops and the stream closes.
    while let Some(notification) = notifications.next().await {
        if let Err(error) = driver
            .handle_notification(notification.uuid, &notification.value, &sink)
            .await
        {
            warn!(address, %error, "driver failed to decode notification");
        }
    }
    debug!(address, "notification stream ended");
}

/// GATT access to one connected btleplug peripheral.
struct BlePeripheralLink {
    address: String,
    peripheral: Peripheral,
}

impl BlePeripheralLink {
    fn characteristic(&self, uuid: Uuid) -> Result<btleplug::api::Characteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or_else(|| {
                Error::Bluetooth(btleplug::Error::NotSupported(format!(
                    "characteristic {uuid} not present"
                )))
            })
    }
}

#[async_trait::async_trait]
impl DeviceLink for BlePeripheralLink {
    fn address(&self) -> &str {
        &self.address
    }

    async fn services(&self) -> Result<Vec<Uuid>> {
        Ok(self
            .peripheral
            .services()
            .into_iter()
            .map(|s| s.uuid)
            .collect())
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<()> {
        let characteristic = self.characteristic(characteristic)?;
        self.peripheral.subscribe(&characteristic).await?;
        Ok(())
    }

    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>> {
        let characteristic = self.characteristic(characteristic)?;
        Ok(self.peripheral.read(&characteristic).await?)
    }

    async fn write(&self, characteristic: Uuid, payload: &[u8]) -> Result<()> {
        let characteristic = self.characteristic(characteristic)?;
        self.peripheral
            .write(&characteristic, payload, WriteType::WithResponse)
            .await?;
        Ok(())
    }
}
