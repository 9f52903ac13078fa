use std::fmt;

use crate::tza_config::Unit;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum MeasurementError {
    #[error("Raw measurement '{0}' is too short to carry a unit")]
    MissingUnit(String),

    #[error("Raw measurement '{raw}' has unknown unit '{unit}'")]
    UnknownUnit { raw: String, unit: String },

    #[error("Raw measurement '{0}' has no valid amplitude")]
    InvalidAmplitude(String),
}

/// Unit the instrument reports raw readings in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawUnit {
    Nanoampere,
    Microampere,
}

impl RawUnit {
    fn to_nano(self) -> f64 {
        match self {
            RawUnit::Nanoampere => 1.0,
            RawUnit::Microampere => 1_000.0,
        }
    }
}

/// A raw reading such as `1,5nA`: amplitude with decimal comma and a two letter unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawMeasurement {
    pub amplitude: f64,
    pub unit: RawUnit,
}

impl RawMeasurement {
    pub fn parse(raw: &str) -> Result<Self, MeasurementError> {
        let raw = raw.trim();
        let split = raw
            .char_indices()
            .rev()
            .nth(1)
            .map(|(i, _)| i)
            .ok_or_else(|| MeasurementError::MissingUnit(raw.to_string()))?;
        let (number, suffix) = raw.split_at(split);

        let unit = match suffix {
            "nA" => RawUnit::Nanoampere,
            "uA" => RawUnit::Microampere,
            _ => {
                return Err(MeasurementError::UnknownUnit {
                    raw: raw.to_string(),
                    unit: suffix.to_string(),
                })
            }
        };

        let amplitude = number
            .trim()
            .replace(',', ".")
            .parse::<f64>()
            .map_err(|_| MeasurementError::InvalidAmplitude(raw.to_string()))?;

        Ok(Self { amplitude, unit })
    }

    pub fn in_nanoampere(&self) -> f64 {
        self.amplitude * self.unit.to_nano()
    }
}

/// Reading converted into the user's unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub value: f64,
    pub unit: Unit,
}

impl Measurement {
    pub fn unit_label(&self) -> &'static str {
        self.unit.as_str()
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit)
    }
}

/// Round the exact binary value to `decimals` places, ties to even.
fn round_to(value: f64, decimals: usize) -> f64 {
    format!("{:.*}", decimals, value).parse().unwrap_or(value)
}

/// Convert a raw reading into `unit`.
///
/// The reading is taken to nanoampere, divided by `sensitivity` for power
/// units only, then scaled to the unit's prefix and rounded to 3, 6, 9 or 12
/// decimals for nano, micro, milli and base units.
pub fn convert(raw: &str, unit: Unit, sensitivity: f64) -> Result<Measurement, MeasurementError> {
    let reading = RawMeasurement::parse(raw)?;

    let divisor = if unit.is_power() { sensitivity } else { 1.0 };
    let nano = reading.in_nanoampere() / divisor;

    let (scale, precision) = unit.scale().divisor_and_precision();
    let value = round_to(nano / scale, precision);

    Ok(Measurement { value, unit })
}
