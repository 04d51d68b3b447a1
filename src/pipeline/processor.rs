//! Per-deployment telemetry handlers.
//!
//! Each handler decodes one sensor family's payload, routes the derived value
//! through its dispatcher and builds the outgoing [`Point`]. Handlers are
//! synchronous; the processing loop owns ordering and I/O.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::baseline::{
    round_to, BaselineError, ClassificationResult, DispatchError, Dispatcher, KeySpace,
    ModelSnapshot, ModelStore, ThreeSigmaPolicy, ZScorePolicy,
};
use crate::config::DetectorConfig;
use crate::sink::Point;
use crate::types::{
    decode, observed_at, ReadingError, TempHumidReading, TimeType, ValveTimingReading,
    VibrationReading,
};

/// Decimal places of every float field written to InfluxDB.
pub const OUTPUT_PRECISION: u32 = 4;

pub const VALVE_MEASUREMENT: &str = "AirValve";
pub const VIBRATION_MEASUREMENT: &str = "VibSensor";
pub const TEMP_HUMID_MEASUREMENT: &str = "TempHumidSensor";

#[derive(Debug, Error)]
pub enum HandleError {
    #[error("Malformed reading: {0}")]
    Reading(#[from] ReadingError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// What one payload produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The key's window is still filling; nothing to write.
    Building { key: String },
    /// Classified reading and its point.
    Classified {
        result: ClassificationResult,
        point: Point,
    },
    /// Pass-through reading (no detection).
    Forwarded { point: Point },
}

impl Outcome {
    pub fn point(&self) -> Option<&Point> {
        match self {
            Outcome::Building { .. } => None,
            Outcome::Classified { point, .. } | Outcome::Forwarded { point } => Some(point),
        }
    }

    pub fn into_point(self) -> Option<Point> {
        match self {
            Outcome::Building { .. } => None,
            Outcome::Classified { point, .. } | Outcome::Forwarded { point } => Some(point),
        }
    }

    pub fn is_anomaly(&self) -> bool {
        matches!(self, Outcome::Classified { result, .. } if result.is_anomaly)
    }
}

/// One sensor family's decode / classify / render step.
pub trait TelemetryHandler: Send {
    fn mode(&self) -> Mode;

    fn handle(&mut self, payload: &[u8]) -> Result<Outcome, HandleError>;

    /// Model state for status reporting (empty for pass-through handlers).
    fn snapshot(&self) -> Vec<ModelSnapshot>;

    /// Reset one key's model; `false` when the key is unknown.
    fn reset(&mut self, key: &str) -> bool;

    fn reset_all(&mut self);
}

/// Which sensor family a deployment monitors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// Air valve travel times, 3-sigma band per operation type
    Valve,
    /// Three-axis vibration RMS, z-score on the total
    Vibration,
    /// Temperature and humidity, forwarded without detection
    TempHumid,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Valve => "valve",
            Mode::Vibration => "vibration",
            Mode::TempHumid => "temp-humid",
        }
    }

    /// Build the handler for this mode.
    pub fn handler(self, detector: &DetectorConfig) -> Result<Box<dyn TelemetryHandler>, BaselineError> {
        Ok(match self {
            Mode::Valve => Box::new(ValveTimingHandler::new(detector)?),
            Mode::Vibration => Box::new(VibrationHandler::new(detector)?),
            Mode::TempHumid => Box::new(TempHumidHandler),
        })
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn out(value: f64) -> f64 {
    round_to(value, OUTPUT_PRECISION)
}

fn anomaly_flag(result: &ClassificationResult) -> i64 {
    i64::from(result.is_anomaly)
}

// ============================================================================
// Valve timing (3-sigma, fixed keys)
// ============================================================================

/// Air valve stroke timing: one model per [`TimeType`].
pub struct ValveTimingHandler {
    dispatcher: Dispatcher<ThreeSigmaPolicy>,
}

impl ValveTimingHandler {
    pub fn new(detector: &DetectorConfig) -> Result<Self, BaselineError> {
        let store = ModelStore::new(
            detector.model_window_size,
            detector.anomaly_list_size,
            detector.three_sigma_policy(),
            KeySpace::fixed(TimeType::ALL.iter().map(|t| t.as_str())),
        )?;
        Ok(Self {
            dispatcher: Dispatcher::new(store),
        })
    }

    pub fn dispatcher(&self) -> &Dispatcher<ThreeSigmaPolicy> {
        &self.dispatcher
    }
}

impl TelemetryHandler for ValveTimingHandler {
    fn mode(&self) -> Mode {
        Mode::Valve
    }

    fn handle(&mut self, payload: &[u8]) -> Result<Outcome, HandleError> {
        let reading: ValveTimingReading = decode(payload)?;
        let timestamp = observed_at(reading.timestamp)?;

        #[allow(clippy::cast_precision_loss)]
        let value = reading.time_value as f64;
        let Some(result) = self.dispatcher.route(&reading.time_type, value, timestamp)? else {
            return Ok(Outcome::Building {
                key: reading.time_type,
            });
        };

        let point = Point::new(VALVE_MEASUREMENT)
            .tag("line_name", reading.line_name)
            .tag("machine_name", reading.machine_name)
            .tag("sensor_name", reading.valve_name)
            .tag("operation_type", reading.time_type)
            .field("value", reading.time_value)
            .field("anomaly", anomaly_flag(&result))
            .field("model_avg", out(result.model_mean))
            .field("model_std_dev", out(result.model_std_dev))
            .field("anomaly_ratio", out(result.anomaly_ratio))
            .time(timestamp);
        Ok(Outcome::Classified { result, point })
    }

    fn snapshot(&self) -> Vec<ModelSnapshot> {
        self.dispatcher.snapshot()
    }

    fn reset(&mut self, key: &str) -> bool {
        self.dispatcher.reset(key)
    }

    fn reset_all(&mut self) {
        self.dispatcher.reset_all();
    }
}

// ============================================================================
// Vibration (z-score, dynamic keys)
// ============================================================================

/// Vibration RMS: one model per sensor name, created on first reading.
pub struct VibrationHandler {
    dispatcher: Dispatcher<ZScorePolicy>,
}

impl VibrationHandler {
    pub fn new(detector: &DetectorConfig) -> Result<Self, BaselineError> {
        let store = ModelStore::new(
            detector.model_window_size,
            detector.anomaly_list_size,
            detector.z_score_policy(),
            KeySpace::Dynamic,
        )?;
        Ok(Self {
            dispatcher: Dispatcher::new(store),
        })
    }

    pub fn dispatcher(&self) -> &Dispatcher<ZScorePolicy> {
        &self.dispatcher
    }
}

impl TelemetryHandler for VibrationHandler {
    fn mode(&self) -> Mode {
        Mode::Vibration
    }

    fn handle(&mut self, payload: &[u8]) -> Result<Outcome, HandleError> {
        let reading: VibrationReading = decode(payload)?;
        let timestamp = observed_at(reading.timestamp)?;
        let total = reading.total_rms()?;

        let Some(result) = self.dispatcher.route(&reading.sensor_name, total, timestamp)? else {
            return Ok(Outcome::Building {
                key: reading.sensor_name,
            });
        };

        let point = Point::new(VIBRATION_MEASUREMENT)
            .tag("line_name", reading.line_name)
            .tag("machine_name", reading.machine_name)
            .tag("sensor_name", reading.sensor_name)
            .field("vib_accel_rms_x", out(reading.rms_x))
            .field("vib_accel_rms_y", out(reading.rms_y))
            .field("vib_accel_rms_z", out(reading.rms_z))
            .field("vib_accel_rms_total", out(total))
            .field("anomaly", anomaly_flag(&result))
            .field("avg_window", out(result.model_mean))
            .field("std_window", out(result.model_std_dev))
            .field("anomaly_ratio", out(result.anomaly_ratio))
            .time(timestamp);
        Ok(Outcome::Classified { result, point })
    }

    fn snapshot(&self) -> Vec<ModelSnapshot> {
        self.dispatcher.snapshot()
    }

    fn reset(&mut self, key: &str) -> bool {
        self.dispatcher.reset(key)
    }

    fn reset_all(&mut self) {
        self.dispatcher.reset_all();
    }
}

// ============================================================================
// Temperature / humidity (pass-through)
// ============================================================================

pub struct TempHumidHandler;

impl TelemetryHandler for TempHumidHandler {
    fn mode(&self) -> Mode {
        Mode::TempHumid
    }

    fn handle(&mut self, payload: &[u8]) -> Result<Outcome, HandleError> {
        let reading = decode::<TempHumidReading>(payload)?.validated()?;
        let timestamp = observed_at(reading.timestamp)?;
        let point = Point::new(TEMP_HUMID_MEASUREMENT)
            .tag("line_name", reading.line_name)
            .tag("machine_name", reading.machine_name)
            .tag("sensor_name", reading.sensor_name)
            .field("temperature", out(reading.temperature))
            .field("humidity", out(reading.humidity))
            .time(timestamp);
        Ok(Outcome::Forwarded { point })
    }

    fn snapshot(&self) -> Vec<ModelSnapshot> {
        Vec::new()
    }

    fn reset(&mut self, _key: &str) -> bool {
        false
    }

    fn reset_all(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::FieldValue;

    fn detector(window: usize) -> DetectorConfig {
        DetectorConfig {
            model_window_size: window,
            anomaly_list_size: 10,
            ..DetectorConfig::default()
        }
    }

    fn valve(time_type: &str, value: i64) -> Vec<u8> {
        format!(
            r#"{{"LineName":"L1","MachineName":"Press","ValveName":"V1","TimeType":"{time_type}","TimeValue":{value},"TimeStamp":1700000000000}}"#
        )
        .into_bytes()
    }

    fn vibration(x: f64, y: f64, z: f64) -> Vec<u8> {
        format!(
            r#"{{"LineName":"L1","MachineName":"Press","SensorName":"Vib1","VibAccelTotal_RMS_X":{x},"VibAccelTotal_RMS_Y":{y},"VibAccelTotal_RMS_Z":{z},"TimeStamp":1700000000000}}"#
        )
        .into_bytes()
    }

    #[test]
    fn valve_handler_builds_then_writes_air_valve_points() {
        let mut handler = ValveTimingHandler::new(&detector(3)).unwrap();
        for v in [400, 410, 420] {
            let outcome = handler.handle(&valve("ExtendTime", v)).unwrap();
            assert!(matches!(outcome, Outcome::Building { ref key } if key == "ExtendTime"));
        }

        let outcome = handler.handle(&valve("ExtendTime", 405)).unwrap();
        assert!(!outcome.is_anomaly());
        let point = outcome.into_point().unwrap();
        assert_eq!(point.measurement(), "AirValve");
        assert_eq!(point.tag_value("sensor_name"), Some("V1"));
        assert_eq!(point.tag_value("operation_type"), Some("ExtendTime"));
        assert_eq!(point.field_value("value"), Some(&FieldValue::Integer(405)));
        assert_eq!(point.field_value("anomaly"), Some(&FieldValue::Integer(0)));
        assert_eq!(point.field_value("model_avg"), Some(&FieldValue::Float(410.0)));
        assert_eq!(point.field_value("model_std_dev"), Some(&FieldValue::Float(10.0)));
    }

    #[test]
    fn valve_operation_types_have_separate_models() {
        let mut handler = ValveTimingHandler::new(&detector(2)).unwrap();
        handler.handle(&valve("ExtendTime", 100)).unwrap();
        handler.handle(&valve("RetractTime", 900)).unwrap();
        let snapshots = handler.snapshot();
        assert_eq!(snapshots.len(), 4);
        let extend = snapshots.iter().find(|s| s.key == "ExtendTime").unwrap();
        let retract_cmd = snapshots.iter().find(|s| s.key == "RetractCmdTime").unwrap();
        assert_eq!(extend.window_len, 1);
        assert_eq!(retract_cmd.window_len, 0);
    }

    #[test]
    fn unknown_operation_type_is_rejected() {
        let mut handler = ValveTimingHandler::new(&detector(2)).unwrap();
        let err = handler.handle(&valve("HoldTime", 10)).unwrap_err();
        assert!(matches!(
            err,
            HandleError::Dispatch(DispatchError::UnknownKey(ref k)) if k == "HoldTime"
        ));
        assert_eq!(handler.snapshot().len(), 4);
    }

    #[test]
    fn malformed_payload_is_a_reading_error() {
        let mut handler = ValveTimingHandler::new(&detector(2)).unwrap();
        let err = handler.handle(b"{not json").unwrap_err();
        assert!(matches!(err, HandleError::Reading(_)));
        assert!(handler.snapshot().iter().all(|s| s.window_len == 0));
    }

    #[test]
    fn vibration_handler_classifies_total_rms() {
        let mut handler = VibrationHandler::new(&detector(3)).unwrap();
        for (x, y, z) in [(1.0, 2.0, 2.0), (2.0, 3.0, 6.0), (1.0, 4.0, 8.0)] {
            handler.handle(&vibration(x, y, z)).unwrap();
        }
        // window [3, 7, 9]: mean 6.333, sd 3.055; total 300 is far out
        let outcome = handler.handle(&vibration(100.0, 200.0, 200.0)).unwrap();
        assert!(outcome.is_anomaly());
        let point = outcome.point().unwrap();
        assert_eq!(point.measurement(), "VibSensor");
        assert_eq!(
            point.field_value("vib_accel_rms_total"),
            Some(&FieldValue::Float(300.0))
        );
        assert_eq!(point.field_value("anomaly"), Some(&FieldValue::Integer(1)));
        assert_eq!(point.field_value("avg_window"), Some(&FieldValue::Float(6.3333)));
        assert_eq!(point.field_value("anomaly_ratio"), Some(&FieldValue::Float(0.1)));
    }

    #[test]
    fn vibration_sensors_are_created_on_demand() {
        let mut handler = VibrationHandler::new(&detector(3)).unwrap();
        assert!(handler.snapshot().is_empty());
        handler.handle(&vibration(1.0, 2.0, 2.0)).unwrap();
        let snapshots = handler.snapshot();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].key, "Vib1");
        assert!(handler.reset("Vib1"));
        assert_eq!(handler.snapshot()[0].window_len, 0);
    }

    #[test]
    fn temp_humid_is_forwarded_with_rounding() {
        let mut handler = TempHumidHandler;
        let payload = br#"{"LineName":"L1","MachineName":"Oven","SensorName":"TH1","Temperature":21.123456,"Humidity":45.5,"TimeStamp":1700000000000}"#;
        let outcome = handler.handle(payload).unwrap();
        let point = outcome.into_point().unwrap();
        assert_eq!(point.measurement(), "TempHumidSensor");
        assert_eq!(point.field_value("temperature"), Some(&FieldValue::Float(21.1235)));
        assert_eq!(point.field_value("humidity"), Some(&FieldValue::Float(45.5)));
        assert!(handler.snapshot().is_empty());
        assert!(!handler.reset("TH1"));
    }

    #[test]
    fn mode_builds_matching_handler() {
        for mode in [Mode::Valve, Mode::Vibration, Mode::TempHumid] {
            let handler = mode.handler(&DetectorConfig::default()).unwrap();
            assert_eq!(handler.mode(), mode);
        }
        assert!(Mode::Valve.handler(&detector(0)).is_err());
    }
}
