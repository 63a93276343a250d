//! Lifecycle and discovery event types.
//!
//! Every asynchronous outcome of a connection session is reported as exactly
//! one [`LifecycleEvent`] on an ordered channel with a single consumer. The
//! tagged enum replaces the integer-status callback messages of classic
//! platform BLE APIs: there is no shared mutable message object and no
//! integer-to-variant lookup, and an event is only ever sent after the state
//! transition it reports has taken effect.

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

use scalelink_types::ScaleMeasurement;

/// One discrete, ordered notification about the active connection session.
///
/// All events are serializable for logging and IPC.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum LifecycleEvent {
    /// The driver handshake completed; the device is initialized and the
    /// session is fully connected.
    Init,
    /// The transport-level link came up.
    ConnectionEstablished,
    /// A measurement arrived from the device driver. Only ever emitted while
    /// the session is connected.
    DataReady {
        /// The measurement, forwarded verbatim from the driver.
        measurement: ScaleMeasurement,
    },
    /// A connection attempt failed and another one is about to be issued.
    ConnectionRetrying {
        /// 1-based retry attempt number.
        attempt: u32,
    },
    /// The link dropped unexpectedly mid-session. Terminal; reconnection
    /// requires a fresh connect request.
    ConnectionLost,
    /// The transport confirmed a user-requested teardown. Terminal.
    Disconnected,
    /// All connection attempts were exhausted without a link. Terminal but
    /// non-fatal.
    NoDeviceFound,
    /// An unrecoverable transport or driver error. Terminal.
    UnexpectedError {
        /// Human-readable description of what went wrong.
        detail: String,
    },
    /// An informational message from the device driver, e.g. a prompt to
    /// step on the scale.
    InfoMessage {
        /// What the driver wants the user to know.
        code: InfoCode,
        /// Optional free-form argument, e.g. a user slot name.
        arg: Option<String>,
    },
}

impl LifecycleEvent {
    /// Whether this event ends the session.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ConnectionLost
                | Self::Disconnected
                | Self::NoDeviceFound
                | Self::UnexpectedError { .. }
        )
    }
}

/// Informational message codes drivers can raise during a session.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new codes
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum InfoCode {
    /// The scale is waiting for the user to step on.
    StepOnScale,
    /// The measurement is done; the user can step off.
    RemoveWeight,
    /// The driver assigned the measurement to an on-device user slot.
    UserSlotAssigned,
}

/// A supported device turned up during scanning.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum DiscoveryEvent {
    /// A previously unseen, supported device was discovered.
    DeviceFound {
        /// Hardware address of the device.
        address: String,
        /// Advertised name.
        name: String,
        /// Id of the driver that matched the name.
        driver_id: String,
    },
}

/// Sender half of the per-session lifecycle channel.
pub type LifecycleSender = mpsc::UnboundedSender<LifecycleEvent>;

/// Receiver half of the per-session lifecycle channel.
///
/// Lazy, unbounded and non-restartable: once the controller is dropped the
/// stream ends.
pub type LifecycleReceiver = mpsc::UnboundedReceiver<LifecycleEvent>;

/// Create the lifecycle channel.
///
/// Unbounded by design: the consumer must not block event generation, and
/// lifecycle events are low-frequency.
pub fn lifecycle_channel() -> (LifecycleSender, LifecycleReceiver) {
    mpsc::unbounded_channel()
}

/// Receiver for discovery events.
pub type DiscoveryReceiver = broadcast::Receiver<DiscoveryEvent>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_events() {
        assert!(LifecycleEvent::Disconnected.is_terminal());
        assert!(LifecycleEvent::NoDeviceFound.is_terminal());
        assert!(LifecycleEvent::ConnectionLost.is_terminal());
        assert!(
            LifecycleEvent::UnexpectedError {
                detail: "boom".into()
            }
            .is_terminal()
        );

        assert!(!LifecycleEvent::Init.is_terminal());
        assert!(!LifecycleEvent::ConnectionEstablished.is_terminal());
        assert!(!LifecycleEvent::ConnectionRetrying { attempt: 1 }.is_terminal());
    }

    #[test]
    fn test_event_serialization() {
        let event = LifecycleEvent::DataReady {
            measurement: ScaleMeasurement::from_weight(72.4),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"data_ready\""));

        let event = LifecycleEvent::ConnectionRetrying { attempt: 2 };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"attempt\":2"));
    }

    #[test]
    fn test_discovery_event_serialization() {
        let event = DiscoveryEvent::DeviceFound {
            address: "AA:BB:CC:DD:EE:FF".into(),
            name: "MIBCS".into(),
            driver_id: "mibcs".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let parsed: DiscoveryEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }
}
