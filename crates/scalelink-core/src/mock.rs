//! Scriptable in-memory transport for tests and examples.
//!
//! `MockTransport` accepts the full [`ScaleTransport`] surface without a
//! radio. Tests configure failure injection up front, then feed
//! advertisements, measurements and link drops through the injection helpers
//! and assert on the resulting lifecycle events.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use scalelink_types::ScaleMeasurement;

use crate::error::{ConnectFailureReason, Error, Result, TransportUnavailableReason};
use crate::events::InfoCode;
use crate::transport::{
    ScaleTransport, TransportEvent, TransportEventReceiver, TransportEvents,
};

#[derive(Debug)]
struct MockState {
    available: bool,
    scanning: bool,
    /// Number of connect attempts that fail before one succeeds.
    failures_remaining: u32,
    /// Emit `HandshakeComplete` right after a successful connect.
    auto_handshake: bool,
    connected: HashSet<String>,
    attempts: Vec<(String, String)>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            available: true,
            scanning: false,
            failures_remaining: 0,
            auto_handshake: true,
            connected: HashSet::new(),
            attempts: Vec::new(),
        }
    }
}

/// In-memory [`ScaleTransport`] with failure injection.
#[derive(Debug, Default)]
pub struct MockTransport {
    events: TransportEvents,
    state: Mutex<MockState>,
}

impl MockTransport {
    /// Create a transport that connects on the first attempt.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the adapter present/absent.
    pub fn set_available(&self, available: bool) {
        self.lock().available = available;
    }

    /// Fail the next `count` connect attempts with a timeout.
    pub fn fail_connects(&self, count: u32) {
        self.lock().failures_remaining = count;
    }

    /// Control whether a successful connect completes the handshake
    /// immediately (the default) or leaves it to the test.
    pub fn set_auto_handshake(&self, auto: bool) {
        self.lock().auto_handshake = auto;
    }

    /// Every connect attempt issued so far, as `(address, driver_id)` pairs.
    pub fn connect_attempts(&self) -> Vec<(String, String)> {
        self.lock().attempts.clone()
    }

    /// Whether a scan is running.
    pub fn is_scanning(&self) -> bool {
        self.lock().scanning
    }

    /// Inject an advertisement.
    pub fn advertise(&self, address: &str, name: Option<&str>) {
        self.events.send(TransportEvent::Advertisement {
            address: address.to_string(),
            name: name.map(str::to_string),
        });
    }

    /// Inject a completed handshake.
    pub fn complete_handshake(&self, address: &str) {
        self.events.send(TransportEvent::HandshakeComplete {
            address: address.to_string(),
        });
    }

    /// Inject a failed handshake.
    pub fn fail_handshake(&self, address: &str, detail: &str) {
        self.events.send(TransportEvent::HandshakeFailed {
            address: address.to_string(),
            detail: detail.to_string(),
        });
    }

    /// Inject a measurement from the device.
    pub fn emit_measurement(&self, address: &str, measurement: ScaleMeasurement) {
        self.events.send(TransportEvent::Measurement {
            address: address.to_string(),
            measurement,
        });
    }

    /// Inject a driver info message.
    pub fn emit_info(&self, address: &str, code: InfoCode, arg: Option<String>) {
        self.events.send(TransportEvent::Info {
            address: address.to_string(),
            code,
            arg,
        });
    }

    /// Drop the link unexpectedly.
    pub fn drop_link(&self, address: &str) {
        self.lock().connected.remove(address);
        self.events.send(TransportEvent::Disconnected {
            address: address.to_string(),
            unexpected: true,
        });
    }

    /// Inject an arbitrary transport event.
    pub fn inject(&self, event: TransportEvent) {
        self.events.send(event);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl ScaleTransport for MockTransport {
    async fn is_available(&self) -> bool {
        self.lock().available
    }

    async fn start_scan(&self) -> Result<()> {
        let mut state = self.lock();
        if !state.available {
            return Err(Error::transport_unavailable(
                TransportUnavailableReason::NoAdapter,
            ));
        }
        state.scanning = true;
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.lock().scanning = false;
        Ok(())
    }

    async fn connect(&self, address: &str, driver_id: &str, token: u64) -> Result<()> {
        let (failed, auto_handshake) = {
            let mut state = self.lock();
            state
                .attempts
                .push((address.to_string(), driver_id.to_string()));
            if state.failures_remaining > 0 {
                state.failures_remaining -= 1;
                (true, false)
            } else {
                state.connected.insert(address.to_string());
                (false, state.auto_handshake)
            }
        };

        if failed {
            debug!(address, token, "mock connect attempt fails");
            self.events.send(TransportEvent::ConnectFailed {
                address: address.to_string(),
                token,
                reason: ConnectFailureReason::Timeout,
            });
        } else {
            debug!(address, token, "mock connect attempt succeeds");
            self.events.send(TransportEvent::Connected {
                address: address.to_string(),
                token,
            });
            if auto_handshake {
                self.events.send(TransportEvent::HandshakeComplete {
                    address: address.to_string(),
                });
            }
        }
        Ok(())
    }

    async fn disconnect(&self, address: &str) -> Result<()> {
        self.lock().connected.remove(address);
        // Teardown is always confirmed, even with no link up.
        self.events.send(TransportEvent::Disconnected {
            address: address.to_string(),
            unexpected: false,
        });
        Ok(())
    }

    fn events(&self) -> TransportEventReceiver {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_failure_injection() {
        let mock = MockTransport::new();
        mock.fail_connects(1);
        let mut rx = mock.events();

        mock.connect("AA:BB:CC:DD:EE:FF", "mibcs", 4).await.unwrap();
        assert!(matches!(
            rx.recv().await.unwrap(),
            TransportEvent::ConnectFailed { token: 4, .. }
        ));

        mock.connect("AA:BB:CC:DD:EE:FF", "mibcs", 5).await.unwrap();
        assert!(matches!(
            rx.recv().await.unwrap(),
            TransportEvent::Connected { token: 5, .. }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            TransportEvent::HandshakeComplete { .. }
        ));
        assert_eq!(mock.connect_attempts().len(), 2);
    }

    #[tokio::test]
    async fn test_disconnect_always_confirms() {
        let mock = MockTransport::new();
        let mut rx = mock.events();

        // No link was ever up.
        mock.disconnect("AA:BB:CC:DD:EE:FF").await.unwrap();
        assert!(matches!(
            rx.recv().await.unwrap(),
            TransportEvent::Disconnected {
                unexpected: false,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_unavailable_adapter_rejects_scan() {
        let mock = MockTransport::new();
        mock.set_available(false);
        assert!(!mock.is_available().await);
        assert!(matches!(
            mock.start_scan().await,
            Err(Error::TransportUnavailable { .. })
        ));
    }
}
