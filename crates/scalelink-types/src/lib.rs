//! Platform-agnostic types for Bluetooth body scales.
//!
//! This crate provides the shared data types used by the scalelink core:
//! scale measurements, user profiles, and the parse errors produced when
//! decoding raw characteristic payloads.
//!
//! # Example
//!
//! ```
//! use scalelink_types::{ScaleMeasurement, WeightUnit};
//!
//! let m = ScaleMeasurement::from_weight(72.4);
//! assert_eq!(m.unit, WeightUnit::Kg);
//! ```

pub mod error;
pub mod types;

pub use error::{ParseError, ParseResult};
pub use types::{
    ActivityLevel, Gender, MeasureUnit, ScaleMeasurement, ScaleUser, WeightUnit,
};
