//! Error types for scalelink-core.
//!
//! This module defines all error types that can occur while discovering and
//! connecting to Bluetooth scales.
//!
//! # Propagation policy
//!
//! Synchronous input-validation errors ([`Error::InvalidAddress`],
//! [`Error::AlreadyConnecting`], [`Error::RadioDisabled`]) are returned
//! directly to the caller of the offending operation. Everything that happens
//! asynchronously on the radio link — connect failures, handshake failures,
//! unexpected disconnects — is converted into a
//! [`LifecycleEvent`](crate::events::LifecycleEvent) on the session event
//! stream and is never surfaced as an `Err` across the asynchronous boundary.
//!
//! | Error | Strategy |
//! |-------|----------|
//! | [`Error::TransportUnavailable`] | User-actionable, not retried |
//! | [`Error::RadioDisabled`] | User-actionable, not retried |
//! | [`Error::InvalidAddress`] | Caller bug, rejected synchronously |
//! | [`Error::AlreadyConnecting`] | Caller misuse, rejected synchronously |
//! | [`Error::UnsupportedDevice`] | No driver registered, not retried |
//! | `ConnectFailed` transport event | Retried per [`RetryPolicy`](crate::session::RetryPolicy) |
//! | `HandshakeFailed` transport event | Fatal for the session |

use thiserror::Error;

/// Errors that can occur when working with Bluetooth scales.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error from the underlying stack.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// The transport cannot scan or connect right now.
    #[error("transport unavailable: {reason}")]
    TransportUnavailable {
        /// Why the transport is unavailable.
        reason: TransportUnavailableReason,
    },

    /// The local adapter is powered off; the caller must resolve this
    /// out-of-band before connecting.
    #[error("Bluetooth radio is disabled")]
    RadioDisabled,

    /// The hardware address does not have the expected format.
    #[error("invalid hardware address: {0:?}")]
    InvalidAddress(String),

    /// A connection session is already active for another device.
    #[error("already connecting to {active}, rejected connect to {requested}")]
    AlreadyConnecting {
        /// Address of the currently active session.
        active: String,
        /// Address that was rejected.
        requested: String,
    },

    /// No registered driver matches the advertised device name.
    #[error("no driver supports device {0:?}")]
    UnsupportedDevice(String),

    /// No driver with the given id is registered.
    #[error("unknown driver id {0:?}")]
    UnknownDriver(String),

    /// Operation attempted without an established link.
    #[error("not connected to a device")]
    NotConnected,

    /// Operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// Failed to parse data received from the device.
    #[error(transparent)]
    Parse(#[from] scalelink_types::ParseError),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Structured reasons for transport unavailability.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportUnavailableReason {
    /// No Bluetooth adapter present.
    NoAdapter,
    /// The adapter is powered off.
    RadioOff,
    /// The OS denied the required permission.
    PermissionDenied,
    /// Generic BLE error.
    BleError(String),
}

impl std::fmt::Display for TransportUnavailableReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoAdapter => write!(f, "no Bluetooth adapter available"),
            Self::RadioOff => write!(f, "Bluetooth radio is off"),
            Self::PermissionDenied => write!(f, "Bluetooth permission denied"),
            Self::BleError(msg) => write!(f, "BLE error: {msg}"),
        }
    }
}

/// Structured reasons for a single failed connection attempt.
///
/// Carried on `ConnectFailed` transport events; every reason is treated as
/// transient and retried until the attempt bound is exhausted.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[non_exhaustive]
pub enum ConnectFailureReason {
    /// Device is out of range or not advertising.
    OutOfRange,
    /// Device rejected the connection.
    Rejected,
    /// The transport's own connect timeout elapsed.
    Timeout,
    /// Generic BLE error.
    BleError(String),
    /// Other/unknown error.
    Other(String),
}

impl std::fmt::Display for ConnectFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutOfRange => write!(f, "device out of range"),
            Self::Rejected => write!(f, "connection rejected by device"),
            Self::Timeout => write!(f, "connection timed out"),
            Self::BleError(msg) => write!(f, "BLE error: {msg}"),
            Self::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl Error {
    /// Create a transport-unavailable error.
    pub fn transport_unavailable(reason: TransportUnavailableReason) -> Self {
        Self::TransportUnavailable { reason }
    }

    /// Create an invalid-address error.
    pub fn invalid_address(address: impl Into<String>) -> Self {
        Self::InvalidAddress(address.into())
    }
}

/// Result type alias using scalelink-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::invalid_address("nonsense");
        assert!(err.to_string().contains("nonsense"));

        let err = Error::AlreadyConnecting {
            active: "AA:BB:CC:DD:EE:FF".into(),
            requested: "11:22:33:44:55:66".into(),
        };
        assert!(err.to_string().contains("AA:BB:CC:DD:EE:FF"));
        assert!(err.to_string().contains("11:22:33:44:55:66"));

        let err = Error::RadioDisabled;
        assert_eq!(err.to_string(), "Bluetooth radio is disabled");
    }

    #[test]
    fn test_transport_unavailable_reasons() {
        let err = Error::transport_unavailable(TransportUnavailableReason::NoAdapter);
        assert!(err.to_string().contains("no Bluetooth adapter"));

        let err = Error::transport_unavailable(TransportUnavailableReason::PermissionDenied);
        assert!(err.to_string().contains("permission denied"));
    }

    #[test]
    fn test_connect_failure_reason_display() {
        assert_eq!(
            ConnectFailureReason::Timeout.to_string(),
            "connection timed out"
        );
        assert!(
            ConnectFailureReason::BleError("busy".into())
                .to_string()
                .contains("busy")
        );
    }

    #[test]
    fn test_parse_error_conversion() {
        let parse = scalelink_types::ParseError::InsufficientBytes {
            expected: 3,
            actual: 1,
        };
        let err: Error = parse.into();
        assert!(matches!(err, Error::Parse(_)));
    }
}
