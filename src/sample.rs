//! Raw inertial/temperature samples and timestamp normalization.
//!
//! Devices report timestamps in whatever form their clock library produces:
//! RFC 3339 strings, zone-less ISO strings, or epoch numbers. Everything is
//! normalized to a UTC instant with microsecond precision before it reaches a
//! store, so the stores only ever compare one representation.

use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// Epoch values at or above this magnitude are read as milliseconds.
///
/// 1e11 seconds is roughly the year 5138, while 1e11 milliseconds is 1973.
const EPOCH_MILLIS_THRESHOLD: f64 = 1e11;

const MICROS_PER_MINUTE: i64 = 60 * 1_000_000;

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// A stored raw observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Arrival-order key assigned by the store.
    pub sequence_id: i64,
    pub timestamp: DateTime<Utc>,
    pub accel_x: f64,
    pub accel_y: f64,
    pub accel_z: f64,
    pub temperature: f64,
}

impl Sample {
    /// Euclidean norm of the three acceleration axes.
    pub fn accel_magnitude(&self) -> f64 {
        accel_magnitude(self.accel_x, self.accel_y, self.accel_z)
    }

    /// Start of the minute this sample falls into.
    pub fn minute_start(&self) -> DateTime<Utc> {
        minute_floor(self.timestamp)
    }
}

/// A validated sample that has not been assigned a sequence id yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSample {
    pub timestamp: DateTime<Utc>,
    pub accel_x: f64,
    pub accel_y: f64,
    pub accel_z: f64,
    pub temperature: f64,
}

impl NewSample {
    pub fn new(
        timestamp: DateTime<Utc>,
        accel: (f64, f64, f64),
        temperature: f64,
    ) -> Result<Self> {
        let sample = Self {
            timestamp: timestamp.trunc_subsecs(6),
            accel_x: accel.0,
            accel_y: accel.1,
            accel_z: accel.2,
            temperature,
        };
        sample.validate()?;
        Ok(sample)
    }

    fn validate(&self) -> Result<()> {
        let fields = [
            ("accel_x", self.accel_x),
            ("accel_y", self.accel_y),
            ("accel_z", self.accel_z),
            ("temperature", self.temperature),
        ];
        for (name, value) in fields {
            if !value.is_finite() {
                return Err(Error::InvalidSample(format!(
                    "{} must be finite, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }

    /// Attaches the store-assigned sequence id.
    pub fn into_sample(self, sequence_id: i64) -> Sample {
        Sample {
            sequence_id,
            timestamp: self.timestamp,
            accel_x: self.accel_x,
            accel_y: self.accel_y,
            accel_z: self.accel_z,
            temperature: self.temperature,
        }
    }
}

/// A timestamp as supplied by a device, before normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Epoch(f64),
    Text(String),
}

impl RawTimestamp {
    /// Normalizes to a UTC instant truncated to microseconds.
    pub fn normalize(&self) -> Result<DateTime<Utc>> {
        match self {
            RawTimestamp::Epoch(value) => from_epoch(*value),
            RawTimestamp::Text(text) => parse_text(text),
        }
    }
}

/// One upload as it arrives from a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplePacket {
    pub timestamp: RawTimestamp,
    pub accel_x: f64,
    pub accel_y: f64,
    pub accel_z: f64,
    pub temperature: f64,
}

impl TryFrom<SamplePacket> for NewSample {
    type Error = Error;

    fn try_from(packet: SamplePacket) -> Result<Self> {
        let timestamp = packet.timestamp.normalize()?;
        NewSample::new(
            timestamp,
            (packet.accel_x, packet.accel_y, packet.accel_z),
            packet.temperature,
        )
    }
}

fn from_epoch(value: f64) -> Result<DateTime<Utc>> {
    if !value.is_finite() {
        return Err(Error::InvalidTimestamp(format!(
            "epoch value {} is not finite",
            value
        )));
    }
    let micros = if value.abs() >= EPOCH_MILLIS_THRESHOLD {
        (value * 1_000.0).round()
    } else {
        (value * 1_000_000.0).round()
    };
    if micros < i64::MIN as f64 || micros > i64::MAX as f64 {
        return Err(Error::InvalidTimestamp(format!(
            "epoch value {} is out of range",
            value
        )));
    }
    DateTime::from_timestamp_micros(micros as i64)
        .ok_or_else(|| Error::InvalidTimestamp(format!("epoch value {} is out of range", value)))
}

fn parse_text(text: &str) -> Result<DateTime<Utc>> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidTimestamp("empty timestamp".to_string()));
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(ts.with_timezone(&Utc).trunc_subsecs(6));
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(naive.and_utc().trunc_subsecs(6));
        }
    }

    // Some firmware sends the epoch as a quoted number.
    if let Ok(value) = trimmed.parse::<f64>() {
        return from_epoch(value);
    }

    Err(Error::InvalidTimestamp(format!(
        "unrecognized timestamp '{}'",
        trimmed
    )))
}

/// Euclidean norm of an acceleration vector.
pub fn accel_magnitude(x: f64, y: f64, z: f64) -> f64 {
    (x * x + y * y + z * z).sqrt()
}

/// Truncates an instant to the start of its minute.
pub fn minute_floor(ts: DateTime<Utc>) -> DateTime<Utc> {
    let micros = ts.timestamp_micros();
    let floored = micros.div_euclid(MICROS_PER_MINUTE) * MICROS_PER_MINUTE;
    DateTime::from_timestamp_micros(floored).unwrap_or(ts)
}

/// Microseconds since the Unix epoch, the on-disk representation.
pub(crate) fn to_micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

pub(crate) fn from_micros(micros: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros).ok_or_else(|| {
        Error::InvalidTimestamp(format!("stored value {} is out of range", micros))
    })
}
