//! Decoded telemetry payloads as published on the plant MQTT broker.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::baseline::round_to;

/// Decimal places kept on the derived vibration total RMS.
pub const TOTAL_RMS_PRECISION: u32 = 5;

#[derive(Debug, Error)]
pub enum ReadingError {
    #[error("Payload is not valid UTF-8 JSON for this sensor: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Timestamp out of range: {0} ms")]
    InvalidTimestamp(i64),

    #[error("Field {field} is not finite: {value}")]
    NonFinite { field: &'static str, value: f64 },
}

/// Decode one JSON payload into a typed reading.
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, ReadingError> {
    Ok(serde_json::from_slice(payload)?)
}

/// Convert an epoch-millisecond timestamp.
pub fn observed_at(timestamp_ms: i64) -> Result<DateTime<Utc>, ReadingError> {
    DateTime::from_timestamp_millis(timestamp_ms).ok_or(ReadingError::InvalidTimestamp(timestamp_ms))
}

fn finite(field: &'static str, value: f64) -> Result<f64, ReadingError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ReadingError::NonFinite { field, value })
    }
}

// ============================================================================
// Valve timing
// ============================================================================

/// Measured phase of an air valve stroke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeType {
    ExtendCmdTime,
    ExtendTime,
    RetractCmdTime,
    RetractTime,
}

impl TimeType {
    pub const ALL: [TimeType; 4] = [
        TimeType::ExtendCmdTime,
        TimeType::ExtendTime,
        TimeType::RetractCmdTime,
        TimeType::RetractTime,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TimeType::ExtendCmdTime => "ExtendCmdTime",
            TimeType::ExtendTime => "ExtendTime",
            TimeType::RetractCmdTime => "RetractCmdTime",
            TimeType::RetractTime => "RetractTime",
        }
    }
}

impl std::fmt::Display for TimeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Air valve travel-time reading.
///
/// `time_type` is kept as the raw string so that unregistered operation types
/// reach the dispatcher and are rejected there as unknown keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValveTimingReading {
    #[serde(rename = "LineName")]
    pub line_name: String,
    #[serde(rename = "MachineName")]
    pub machine_name: String,
    #[serde(rename = "ValveName")]
    pub valve_name: String,
    #[serde(rename = "TimeType")]
    pub time_type: String,
    /// Milliseconds.
    #[serde(rename = "TimeValue")]
    pub time_value: i64,
    #[serde(rename = "TimeStamp")]
    pub timestamp: i64,
}

// ============================================================================
// Vibration
// ============================================================================

/// Three-axis vibration acceleration RMS reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VibrationReading {
    #[serde(rename = "LineName")]
    pub line_name: String,
    #[serde(rename = "MachineName")]
    pub machine_name: String,
    #[serde(rename = "SensorName")]
    pub sensor_name: String,
    #[serde(rename = "VibAccelTotal_RMS_X")]
    pub rms_x: f64,
    #[serde(rename = "VibAccelTotal_RMS_Y")]
    pub rms_y: f64,
    #[serde(rename = "VibAccelTotal_RMS_Z")]
    pub rms_z: f64,
    #[serde(rename = "TimeStamp")]
    pub timestamp: i64,
}

impl VibrationReading {
    /// `sqrt(x² + y² + z²)` rounded to [`TOTAL_RMS_PRECISION`] decimals.
    pub fn total_rms(&self) -> Result<f64, ReadingError> {
        let x = finite("VibAccelTotal_RMS_X", self.rms_x)?;
        let y = finite("VibAccelTotal_RMS_Y", self.rms_y)?;
        let z = finite("VibAccelTotal_RMS_Z", self.rms_z)?;
        let total = (x * x + y * y + z * z).sqrt();
        finite("total_rms", round_to(total, TOTAL_RMS_PRECISION))
    }
}

// ============================================================================
// Temperature / humidity
// ============================================================================

/// Ambient temperature and relative humidity reading (pass-through only).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TempHumidReading {
    #[serde(rename = "LineName")]
    pub line_name: String,
    #[serde(rename = "MachineName")]
    pub machine_name: String,
    #[serde(rename = "SensorName")]
    pub sensor_name: String,
    #[serde(rename = "Temperature")]
    pub temperature: f64,
    #[serde(rename = "Humidity")]
    pub humidity: f64,
    #[serde(rename = "TimeStamp")]
    pub timestamp: i64,
}

impl TempHumidReading {
    pub fn validated(self) -> Result<Self, ReadingError> {
        finite("Temperature", self.temperature)?;
        finite("Humidity", self.humidity)?;
        Ok(self)
    }
}
