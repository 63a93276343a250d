//! Core types for scale measurements and users.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time};

use crate::error::ParseError;

/// Weight unit reported by or configured on a scale.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new units
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[non_exhaustive]
#[repr(u8)]
pub enum WeightUnit {
    /// Kilograms.
    Kg = 0,
    /// Pounds.
    Lb = 1,
    /// Stones.
    St = 2,
}

impl fmt::Display for WeightUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WeightUnit::Kg => write!(f, "kg"),
            WeightUnit::Lb => write!(f, "lb"),
            WeightUnit::St => write!(f, "st"),
        }
    }
}

/// Length unit used for body height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[non_exhaustive]
#[repr(u8)]
pub enum MeasureUnit {
    /// Centimetres.
    Cm = 0,
    /// Inches.
    Inch = 1,
}

impl fmt::Display for MeasureUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeasureUnit::Cm => write!(f, "cm"),
            MeasureUnit::Inch => write!(f, "in"),
        }
    }
}

/// User gender as understood by scale body-composition algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum Gender {
    /// Male.
    Male = 0,
    /// Female.
    Female = 1,
}

impl Gender {
    /// Whether this is the male variant.
    #[must_use]
    pub fn is_male(&self) -> bool {
        matches!(self, Gender::Male)
    }
}

/// Physical activity level used by body-composition algorithms.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new levels
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[non_exhaustive]
#[repr(u8)]
pub enum ActivityLevel {
    /// Little or no exercise.
    Sedentary = 0,
    /// Light exercise one to three days a week.
    Mild = 1,
    /// Moderate exercise three to five days a week.
    Moderate = 2,
    /// Hard exercise six to seven days a week.
    Heavy = 3,
    /// Professional athlete level.
    Extreme = 4,
}

/// A single measurement reported by a scale.
///
/// The weight field is always present; body-composition fields are optional
/// because entry-level scales only report weight. Values are carried exactly
/// as the device driver decoded them, without unit conversion.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ScaleMeasurement {
    /// Identifier of the user this measurement belongs to, if known.
    pub user_id: Option<i32>,
    /// When the scale captured the measurement, if the device reports it.
    pub timestamp: Option<OffsetDateTime>,
    /// Weight in the scale's configured unit.
    pub weight: f32,
    /// Unit the weight was reported in.
    pub unit: WeightUnit,
    /// Body fat percentage.
    pub body_fat: Option<f32>,
    /// Body water percentage.
    pub water: Option<f32>,
    /// Muscle percentage.
    pub muscle: Option<f32>,
    /// Bone mass in the scale's configured unit.
    pub bone: Option<f32>,
}

impl ScaleMeasurement {
    /// Create a weight-only measurement in kilograms.
    #[must_use]
    pub fn from_weight(weight: f32) -> Self {
        Self {
            user_id: None,
            timestamp: None,
            weight,
            unit: WeightUnit::Kg,
            body_fat: None,
            water: None,
            muscle: None,
            bone: None,
        }
    }

    /// Parse a Bluetooth SIG Weight Measurement characteristic value (0x2A9D).
    ///
    /// Layout: one flags byte, then a little-endian `u16` weight with a
    /// resolution of 0.005 kg (SI) or 0.01 lb (imperial). An optional
    /// seven-byte timestamp and one-byte user index follow when the
    /// corresponding flag bits are set.
    pub fn from_weight_measurement(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < 3 {
            return Err(ParseError::InsufficientBytes {
                expected: 3,
                actual: data.len(),
            });
        }

        let flags = data[0];
        let imperial = flags & 0x01 != 0;
        let has_timestamp = flags & 0x02 != 0;
        let has_user_id = flags & 0x04 != 0;

        let raw = u16::from_le_bytes([data[1], data[2]]);
        let (weight, unit) = if imperial {
            (f32::from(raw) * 0.01, WeightUnit::Lb)
        } else {
            (f32::from(raw) * 0.005, WeightUnit::Kg)
        };

        let mut offset = 3;
        let timestamp = if has_timestamp {
            if data.len() < offset + 7 {
                return Err(ParseError::InsufficientBytes {
                    expected: offset + 7,
                    actual: data.len(),
                });
            }
            let ts = parse_datetime(&data[offset..offset + 7])?;
            offset += 7;
            ts
        } else {
            None
        };

        let user_id = if has_user_id {
            if data.len() < offset + 1 {
                return Err(ParseError::InsufficientBytes {
                    expected: offset + 1,
                    actual: data.len(),
                });
            }
            Some(i32::from(data[offset]))
        } else {
            None
        };

        Ok(Self {
            user_id,
            timestamp,
            weight,
            unit,
            body_fat: None,
            water: None,
            muscle: None,
            bone: None,
        })
    }
}

impl fmt::Display for ScaleMeasurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} {}", self.weight, self.unit)?;
        if let Some(fat) = self.body_fat {
            write!(f, ", fat {:.1}%", fat)?;
        }
        if let Some(water) = self.water {
            write!(f, ", water {:.1}%", water)?;
        }
        Ok(())
    }
}

/// Parse the seven-byte date-time field used by SIG scale characteristics.
///
/// A year of zero means the scale has no clock; the timestamp is then absent
/// rather than an error.
fn parse_datetime(data: &[u8]) -> Result<Option<OffsetDateTime>, ParseError> {
    let year = u16::from_le_bytes([data[0], data[1]]);
    if year == 0 {
        return Ok(None);
    }

    let month = Month::try_from(data[2])
        .map_err(|_| ParseError::InvalidValue(format!("month {}", data[2])))?;
    let date = Date::from_calendar_date(i32::from(year), month, data[3])
        .map_err(|e| ParseError::InvalidValue(format!("date: {e}")))?;
    let time = Time::from_hms(data[4], data[5], data[6])
        .map_err(|e| ParseError::InvalidValue(format!("time: {e}")))?;

    Ok(Some(PrimitiveDateTime::new(date, time).assume_utc()))
}

/// A scale user profile.
///
/// Carries the attributes body-composition drivers need to select the right
/// on-device user slot and interpret measurements.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ScaleUser {
    /// Stable user identifier.
    pub id: i32,
    /// Display name.
    pub user_name: String,
    /// Date of birth, if configured.
    pub birthday: Option<Date>,
    /// Body height in `measure_unit`.
    pub body_height: f32,
    /// Preferred weight unit.
    pub scale_unit: WeightUnit,
    /// Gender used by composition algorithms.
    pub gender: Gender,
    /// Weight recorded when the user was created.
    pub initial_weight: f32,
    /// Target weight.
    pub goal_weight: f32,
    /// Height unit.
    pub measure_unit: MeasureUnit,
    /// Activity level used by composition algorithms.
    pub activity_level: ActivityLevel,
}

impl Default for ScaleUser {
    fn default() -> Self {
        Self {
            id: 0,
            user_name: String::new(),
            birthday: None,
            body_height: -1.0,
            scale_unit: WeightUnit::Kg,
            gender: Gender::Male,
            initial_weight: -1.0,
            goal_weight: -1.0,
            measure_unit: MeasureUnit::Cm,
            activity_level: ActivityLevel::Sedentary,
        }
    }
}

impl ScaleUser {
    /// Create a user with the given id and name, defaults elsewhere.
    #[must_use]
    pub fn new(id: i32, user_name: impl Into<String>) -> Self {
        Self {
            id,
            user_name: user_name.into(),
            ..Self::default()
        }
    }

    /// Age in whole years at the given date.
    ///
    /// Returns `None` when no birthday is configured.
    #[must_use]
    pub fn age_at(&self, today: Date) -> Option<i32> {
        let birthday = self.birthday?;
        let mut years = today.year() - birthday.year();
        if (today.month() as u8, today.day()) < (birthday.month() as u8, birthday.day()) {
            years -= 1;
        }
        Some(years)
    }

    /// Age in whole years as of now (UTC).
    #[must_use]
    pub fn age(&self) -> Option<i32> {
        self.age_at(OffsetDateTime::now_utc().date())
    }
}
