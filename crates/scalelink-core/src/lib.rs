//! BLE discovery and connection-lifecycle core for Bluetooth body scales.
//!
//! scalelink finds nearby scales, matches their advertised names against an
//! ordered driver registry, and runs a single-session connection state
//! machine that turns asynchronous radio callbacks into one strictly ordered
//! stream of [`LifecycleEvent`]s.
//!
//! The entry point is [`ScaleCentral`], built over a [`ScaleTransport`]:
//! [`BleTransport`] in production, [`MockTransport`] in tests.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use scalelink_core::{BleTransport, DriverRegistry, LifecycleEvent, ScaleCentral};
//!
//! # async fn run() -> scalelink_core::Result<()> {
//! let registry = Arc::new(DriverRegistry::builtin());
//! let transport = Arc::new(BleTransport::new(registry).await?);
//! let (central, mut events) = ScaleCentral::new(transport);
//!
//! central.connect("FA:A0:F7:11:12:46", "mibcs").await?;
//! while let Some(event) = events.recv().await {
//!     match event {
//!         LifecycleEvent::DataReady { measurement } => {
//!             println!("{measurement}");
//!             break;
//!         }
//!         event if event.is_terminal() => break,
//!         _ => {}
//!     }
//! }
//! central.disconnect().await?;
//! # Ok(())
//! # }
//! ```

pub mod ble;
pub mod central;
pub mod discovery;
pub mod driver;
pub mod drivers;
pub mod error;
pub mod events;
pub mod mock;
pub mod session;
pub mod transport;
pub mod util;

pub use ble::BleTransport;
pub use central::ScaleCentral;
pub use discovery::{DiscoveredDevice, DiscoverySession};
pub use driver::{DeviceLink, DriverDescriptor, DriverRegistry, ScaleDriver};
pub use error::{ConnectFailureReason, Error, Result, TransportUnavailableReason};
pub use events::{
    DiscoveryEvent, DiscoveryReceiver, InfoCode, LifecycleEvent, LifecycleReceiver,
};
pub use mock::MockTransport;
pub use session::{ConnectionController, RetryPolicy, SessionSnapshot, SessionState};
pub use transport::{ScaleTransport, TransportEvent, TransportEventReceiver, TransportEvents};
pub use util::{format_device_name, is_valid_address};

// Re-export the shared data types.
pub use scalelink_types::{
    ActivityLevel, Gender, MeasureUnit, ParseError, ScaleMeasurement, ScaleUser, WeightUnit,
};
