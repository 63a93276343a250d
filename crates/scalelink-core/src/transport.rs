//! The abstract transport boundary.
//!
//! The core never talks to a BLE stack directly; it consumes a
//! [`ScaleTransport`], which issues scan/connect/disconnect requests and
//! reports every asynchronous outcome as a [`TransportEvent`] on a broadcast
//! channel. Outcomes are never returned as errors across the asynchronous
//! boundary — an `Err` from a trait method means the request itself could not
//! be issued.
//!
//! The production implementation is [`BleTransport`](crate::ble::BleTransport);
//! tests use [`MockTransport`](crate::mock::MockTransport).

use async_trait::async_trait;
use tokio::sync::broadcast;

use scalelink_types::ScaleMeasurement;

use crate::error::{ConnectFailureReason, Result};
use crate::events::InfoCode;

/// Default capacity of the transport event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// An asynchronous notification from the transport, keyed by device address.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum TransportEvent {
    /// An advertisement was observed during scanning.
    Advertisement {
        /// Hardware address of the advertiser.
        address: String,
        /// Advertised local name, if any.
        name: Option<String>,
    },
    /// A connect request completed and the link is up.
    Connected {
        /// Address the link was established to.
        address: String,
        /// Token of the connect request this outcome belongs to.
        token: u64,
    },
    /// A single connect attempt failed.
    ConnectFailed {
        /// Address the attempt targeted.
        address: String,
        /// Token of the connect request this outcome belongs to.
        token: u64,
        /// Why the attempt failed.
        reason: ConnectFailureReason,
    },
    /// The link went down.
    Disconnected {
        /// Address the link belonged to.
        address: String,
        /// `false` when this confirms a requested teardown.
        unexpected: bool,
    },
    /// The device driver finished its protocol handshake.
    HandshakeComplete {
        /// Address of the initialized device.
        address: String,
    },
    /// The device driver could not complete its handshake.
    HandshakeFailed {
        /// Address of the failing device.
        address: String,
        /// Human-readable description.
        detail: String,
    },
    /// The device driver decoded a measurement.
    Measurement {
        /// Address of the reporting device.
        address: String,
        /// The decoded measurement.
        measurement: ScaleMeasurement,
    },
    /// The device driver raised an informational message.
    Info {
        /// Address of the reporting device.
        address: String,
        /// Message code.
        code: InfoCode,
        /// Optional free-form argument.
        arg: Option<String>,
    },
}

impl TransportEvent {
    /// The device address this event concerns.
    #[must_use]
    pub fn address(&self) -> &str {
        match self {
            Self::Advertisement { address, .. }
            | Self::Connected { address, .. }
            | Self::ConnectFailed { address, .. }
            | Self::Disconnected { address, .. }
            | Self::HandshakeComplete { address }
            | Self::HandshakeFailed { address, .. }
            | Self::Measurement { address, .. }
            | Self::Info { address, .. } => address,
        }
    }
}

/// Receiver for transport events.
pub type TransportEventReceiver = broadcast::Receiver<TransportEvent>;

/// Fan-out channel for transport events.
///
/// Both the discovery session and the connection controller subscribe to the
/// same stream; events irrelevant to a subscriber are simply ignored by it.
#[derive(Debug, Clone)]
pub struct TransportEvents {
    sender: broadcast::Sender<TransportEvent>,
}

impl TransportEvents {
    /// Create a new event channel with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> TransportEventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: TransportEvent) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for TransportEvents {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

/// Handle a hosted driver uses to report per-device notifications.
///
/// Scoped to one device address; everything sent through it lands on the
/// shared transport event stream.
#[derive(Debug, Clone)]
pub struct DriverSink {
    address: String,
    events: TransportEvents,
}

impl DriverSink {
    /// Create a sink scoped to the given address.
    pub fn new(address: impl Into<String>, events: TransportEvents) -> Self {
        Self {
            address: address.into(),
            events,
        }
    }

    /// The address this sink reports for.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Report a completed handshake.
    pub fn handshake_complete(&self) {
        self.events.send(TransportEvent::HandshakeComplete {
            address: self.address.clone(),
        });
    }

    /// Report a failed handshake.
    pub fn handshake_failed(&self, detail: impl Into<String>) {
        self.events.send(TransportEvent::HandshakeFailed {
            address: self.address.clone(),
            detail: detail.into(),
        });
    }

    /// Forward a decoded measurement.
    pub fn measurement(&self, measurement: ScaleMeasurement) {
        self.events.send(TransportEvent::Measurement {
            address: self.address.clone(),
            measurement,
        });
    }

    /// Raise an informational message.
    pub fn info(&self, code: InfoCode, arg: Option<String>) {
        self.events.send(TransportEvent::Info {
            address: self.address.clone(),
            code,
            arg,
        });
    }
}

/// Scanning and connection capability of an asynchronous radio transport.
///
/// Requests return quickly; their outcomes arrive on [`events`](Self::events).
/// Implementations must emit a `Disconnected { unexpected: false }` event in
/// response to [`disconnect`](Self::disconnect) even when no link was up, so
/// callers can always await teardown confirmation.
#[async_trait]
pub trait ScaleTransport: Send + Sync {
    /// Whether the local adapter is present and powered.
    async fn is_available(&self) -> bool;

    /// Begin scanning for advertisements.
    async fn start_scan(&self) -> Result<()>;

    /// Stop scanning. Safe to call when not scanning.
    async fn stop_scan(&self) -> Result<()>;

    /// Issue a connect request to the device at `address`, to be driven by
    /// the driver registered under `driver_id` once the link is up.
    ///
    /// `token` is opaque to the transport and must be echoed verbatim on the
    /// `Connected` or `ConnectFailed` event this request produces, so the
    /// caller can tell the outcome of a live request apart from one issued
    /// by an earlier, since-terminated session.
    async fn connect(&self, address: &str, driver_id: &str, token: u64) -> Result<()>;

    /// Issue a teardown request for the device at `address`.
    async fn disconnect(&self, address: &str) -> Result<()>;

    /// Subscribe to the transport event stream.
    fn events(&self) -> TransportEventReceiver;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_address_accessor() {
        let event = TransportEvent::Connected {
            address: "AA:BB:CC:DD:EE:FF".into(),
            token: 7,
        };
        assert_eq!(event.address(), "AA:BB:CC:DD:EE:FF");

        let event = TransportEvent::Measurement {
            address: "11:22:33:44:55:66".into(),
            measurement: ScaleMeasurement::from_weight(80.0),
        };
        assert_eq!(event.address(), "11:22:33:44:55:66");
    }

    #[tokio::test]
    async fn test_driver_sink_reports_on_shared_stream() {
        let events = TransportEvents::default();
        let mut rx = events.subscribe();

        let sink = DriverSink::new("AA:BB:CC:DD:EE:FF", events);
        sink.handshake_complete();
        sink.measurement(ScaleMeasurement::from_weight(72.4));

        assert!(matches!(
            rx.recv().await.unwrap(),
            TransportEvent::HandshakeComplete { .. }
        ));
        match rx.recv().await.unwrap() {
            TransportEvent::Measurement { measurement, .. } => {
                assert!((measurement.weight - 72.4).abs() < 0.01);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
