//! Generic driver for scales speaking the standard Weight Scale profile.
//!
//! Covers the first-generation Mi Scale (`MI_SCALE`) and the Sanitas SBF70,
//! both of which report readings on the standard Weight Measurement
//! characteristic.

use async_trait::async_trait;
use tracing::{debug, trace};
use uuid::Uuid;

use scalelink_types::ScaleMeasurement;

use crate::driver::{DeviceLink, ScaleDriver};
use crate::drivers::WEIGHT_MEASUREMENT;
use crate::error::Result;
use crate::events::InfoCode;
use crate::transport::DriverSink;

/// Weight Scale profile driver, parameterized by descriptor id.
#[derive(Debug)]
pub struct WeightProfileDriver {
    id: &'static str,
}

impl WeightProfileDriver {
    /// Create a driver reporting under the given descriptor id.
    #[must_use]
    pub fn new(id: &'static str) -> Self {
        Self { id }
    }
}

#[async_trait]
impl ScaleDriver for WeightProfileDriver {
    fn id(&self) -> &str {
        self.id
    }

    async fn start(&self, link: &dyn DeviceLink, sink: &DriverSink) -> Result<()> {
        debug!(
            address = link.address(),
            driver = self.id,
            "starting weight-profile handshake"
        );
        link.subscribe(WEIGHT_MEASUREMENT).await?;
        sink.handshake_complete();
        sink.info(InfoCode::StepOnScale, None);
        Ok(())
    }

    async fn handle_notification(
        &self,
        characteristic: Uuid,
        payload: &[u8],
        sink: &DriverSink,
    ) -> Result<()> {
        if characteristic != WEIGHT_MEASUREMENT {
            trace!(%characteristic, "ignoring notification from unrelated characteristic");
            return Ok(());
        }
        let measurement = ScaleMeasurement::from_weight_measurement(payload)?;
        sink.measurement(measurement);
        Ok(())
    }
}
