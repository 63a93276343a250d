//! Built-in scale drivers.
//!
//! Each driver implements [`ScaleDriver`](crate::driver::ScaleDriver) for one
//! family of devices. The set registered by
//! [`DriverRegistry::builtin`](crate::driver::DriverRegistry::builtin) covers
//! the Mi Body Composition Scale (`MIBCS`/`MIBFS`), the first-generation Mi
//! Scale (`MI_SCALE`) and the Sanitas SBF70, plus a debug driver that matches
//! no advertisement and is only ever constructed explicitly.

use std::sync::Arc;

use uuid::Uuid;

use crate::driver::{DriverDescriptor, ScaleDriver};

mod debug;
mod mibcs;
mod weight;

pub use debug::DebugDriver;
pub use mibcs::MibcsDriver;
pub use weight::WeightProfileDriver;

/// Expand a 16-bit SIG-assigned number to a full 128-bit UUID.
const fn uuid16(short: u32) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | 0x0000_0000_0000_1000_8000_00805F_9B34FB)
}

/// Weight Scale service (0x181D).
pub const WEIGHT_SCALE_SERVICE: Uuid = uuid16(0x181D);

/// Weight Measurement characteristic (0x2A9D).
pub const WEIGHT_MEASUREMENT: Uuid = uuid16(0x2A9D);

/// Body Composition service (0x181B).
pub const BODY_COMPOSITION_SERVICE: Uuid = uuid16(0x181B);

/// Body Composition Measurement characteristic (0x2A9C).
pub const BODY_COMPOSITION_MEASUREMENT: Uuid = uuid16(0x2A9C);

fn matches_mibcs(name: &str) -> bool {
    name == "MIBCS" || name == "MIBFS"
}

fn matches_mi_scale(name: &str) -> bool {
    name == "MI_SCALE"
}

fn matches_sanitas_sbf70(name: &str) -> bool {
    name.starts_with("SANITAS SBF70")
}

fn matches_nothing(_name: &str) -> bool {
    false
}

fn make_mibcs() -> Arc<dyn ScaleDriver> {
    Arc::new(MibcsDriver::new())
}

fn make_mi_scale() -> Arc<dyn ScaleDriver> {
    Arc::new(WeightProfileDriver::new("mi_scale"))
}

fn make_sanitas_sbf70() -> Arc<dyn ScaleDriver> {
    Arc::new(WeightProfileDriver::new("sanitas_sbf70"))
}

fn make_debug() -> Arc<dyn ScaleDriver> {
    Arc::new(DebugDriver::new())
}

/// The built-in descriptors, in matching priority order.
#[must_use]
pub fn builtin_descriptors() -> Vec<DriverDescriptor> {
    vec![
        DriverDescriptor::new(
            "mibcs",
            "Mi Body Composition Scale",
            matches_mibcs,
            make_mibcs,
        ),
        DriverDescriptor::new("mi_scale", "Mi Scale", matches_mi_scale, make_mi_scale),
        DriverDescriptor::new(
            "sanitas_sbf70",
            "Sanitas SBF70",
            matches_sanitas_sbf70,
            make_sanitas_sbf70,
        ),
        DriverDescriptor::new("debug", "Debug", matches_nothing, make_debug),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid16_expansion() {
        assert_eq!(
            WEIGHT_MEASUREMENT.to_string(),
            "00002a9d-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            BODY_COMPOSITION_SERVICE.to_string(),
            "0000181b-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_debug_descriptor_matches_no_advertisement() {
        let descriptors = builtin_descriptors();
        let debug = descriptors.iter().find(|d| d.id == "debug").unwrap();
        assert!(!debug.matches("MIBCS"));
        assert!(!debug.matches("debug"));
    }
}
