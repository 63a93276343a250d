//! Driver for the Mi Body Composition Scale (advertises `MIBCS` or `MIBFS`).
//!
//! The scale streams 13-byte frames on the Body Composition Measurement
//! characteristic. Only stabilized frames with the weight still on the
//! platform are reported; interim readings while the value settles are
//! dropped. Impedance-derived body metrics are not decoded, only the weight
//! field and the embedded timestamp.

use async_trait::async_trait;
use time::{Date, Month, Time};
use tracing::{debug, trace};
use uuid::Uuid;

use scalelink_types::{ParseError, ParseResult, ScaleMeasurement, WeightUnit};

use crate::driver::{DeviceLink, ScaleDriver};
use crate::drivers::BODY_COMPOSITION_MEASUREMENT;
use crate::error::Result;
use crate::events::InfoCode;
use crate::transport::DriverSink;

const FRAME_LEN: usize = 13;

/// Mi Body Composition Scale driver.
#[derive(Debug, Default)]
pub struct MibcsDriver {
    _priv: (),
}

impl MibcsDriver {
    /// Create the driver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScaleDriver for MibcsDriver {
    fn id(&self) -> &str {
        "mibcs"
    }

    async fn start(&self, link: &dyn DeviceLink, sink: &DriverSink) -> Result<()> {
        debug!(address = link.address(), "starting MIBCS handshake");
        link.subscribe(BODY_COMPOSITION_MEASUREMENT).await?;
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
        if characteristic != BODY_COMPOSITION_MEASUREMENT {
            trace!(%characteristic, "ignoring notification from unrelated characteristic");
            return Ok(());
        }
        match parse_frame(payload)? {
            Some(measurement) => sink.measurement(measurement),
            None => trace!(address = sink.address(), "dropping non-final frame"),
        }
        Ok(())
    }
}

/// Decode one measurement frame.
///
/// Returns `Ok(None)` for valid frames that carry no final reading (value
/// still settling, or the user already stepped off).
pub(crate) fn parse_frame(payload: &[u8]) -> ParseResult<Option<ScaleMeasurement>> {
    if payload.len() < FRAME_LEN {
        return Err(ParseError::InsufficientBytes {
            expected: FRAME_LEN,
            actual: payload.len(),
        });
    }

    let ctrl0 = payload[0];
    let ctrl1 = payload[1];
    let imperial = ctrl0 & 0x01 != 0;
    let catty = ctrl1 & 0x40 != 0;
    let stabilized = ctrl1 & 0x20 != 0;
    let weight_removed = ctrl1 & 0x80 != 0;

    if !stabilized || weight_removed {
        return Ok(None);
    }

    let raw = u16::from_le_bytes([payload[11], payload[12]]);
    let (weight, unit) = if imperial {
        (f32::from(raw) / 100.0, WeightUnit::Lb)
    } else if catty {
        // Catty frames are half-kilogram units at the same scale factor.
        (f32::from(raw) / 100.0 * 0.5, WeightUnit::Kg)
    } else {
        (f32::from(raw) / 200.0, WeightUnit::Kg)
    };

    let mut measurement = ScaleMeasurement::from_weight(weight);
    measurement.unit = unit;
    measurement.timestamp = parse_timestamp(payload);
    Ok(Some(measurement))
}

/// Decode the embedded wall-clock timestamp; `None` when the scale's clock
/// was never set (year 0) or carries an impossible date.
fn parse_timestamp(payload: &[u8]) -> Option<time::OffsetDateTime> {
    let year = u16::from_le_bytes([payload[2], payload[3]]);
    if year == 0 {
        return None;
    }
    let month = Month::try_from(payload[4]).ok()?;
    let date = Date::from_calendar_date(i32::from(year), month, payload[5]).ok()?;
    let time = Time::from_hms(payload[6], payload[7], payload[8]).ok()?;
    Some(date.with_time(time).assume_utc())
}
