//! Debug driver for exercising the connection lifecycle without real
//! hardware.
//!
//! Never matched against advertisements; it is constructed explicitly via
//! [`ScaleCentral::connect_debug`](crate::central::ScaleCentral::connect_debug)
//! to connect to an arbitrary peripheral, log its service table, and push a
//! synthetic measurement through the full event path.

use async_trait::async_trait;
use tracing::{debug, info};
use uuid::Uuid;

use scalelink_types::ScaleMeasurement;

use crate::driver::{DeviceLink, ScaleDriver};
use crate::error::Result;
use crate::events::InfoCode;
use crate::transport::DriverSink;

const SYNTHETIC_WEIGHT_KG: f32 = 77.7;

/// Driver that completes immediately and emits a synthetic reading.
#[derive(Debug, Default)]
pub struct DebugDriver {
    _priv: (),
}

impl DebugDriver {
    /// Create the driver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScaleDriver for DebugDriver {
    fn id(&self) -> &str {
        "debug"
    }

    async fn start(&self, link: &dyn DeviceLink, sink: &DriverSink) -> Result<()> {
        let services = link.services().await?;
        info!(
            address = link.address(),
            service_count = services.len(),
            "debug driver connected"
        );
        for service in &services {
            debug!(address = link.address(), %service, "discovered service");
        }

        sink.handshake_complete();
        sink.info(InfoCode::StepOnScale, None);

        let mut measurement = ScaleMeasurement::from_weight(SYNTHETIC_WEIGHT_KG);
        measurement.timestamp = Some(time::OffsetDateTime::now_utc());
        sink.measurement(measurement);
        sink.info(InfoCode::RemoveWeight, None);
        Ok(())
    }

    async fn handle_notification(
        &self,
        characteristic: Uuid,
        payload: &[u8],
        _sink: &DriverSink,
    ) -> Result<()> {
        debug!(%characteristic, len = payload.len(), "debug driver notification");
        Ok(())
    }
}
