//! Pipeline Integration Tests
//!
//! Replays recorded payloads through `ProcessingLoop` into a `MemorySink` and
//! asserts on the emitted points and final counters. No broker, no database.

use std::sync::Arc;

use plant_sentinel::config::DetectorConfig;
use plant_sentinel::pipeline::{
    AppState, Mode, PipelineStats, ProcessingLoop, ReplaySource, SharedState, StdinSource,
    TEMP_HUMID_MEASUREMENT, VALVE_MEASUREMENT, VIBRATION_MEASUREMENT,
};
use plant_sentinel::sink::{FieldValue, MemorySink, Point};
use tokio_util::sync::CancellationToken;

const TOPIC: &str = "Line_1/Press_3/Valve_7";

fn detector(window: usize, list: usize) -> DetectorConfig {
    DetectorConfig {
        model_window_size: window,
        anomaly_list_size: list,
        ..DetectorConfig::default()
    }
}

fn valve(time_type: &str, value: i64, ts: i64) -> Vec<u8> {
    format!(
        r#"{{"LineName":"Line_1","MachineName":"Press_3","ValveName":"Valve_7","TimeType":"{time_type}","TimeValue":{value},"TimeStamp":{ts}}}"#
    )
    .into_bytes()
}

fn vibration(sensor: &str, x: f64, y: f64, z: f64) -> Vec<u8> {
    format!(
        r#"{{"LineName":"Line_1","MachineName":"Fan_2","SensorName":"{sensor}","VibAccelTotal_RMS_X":{x},"VibAccelTotal_RMS_Y":{y},"VibAccelTotal_RMS_Z":{z},"TimeStamp":1700000000000}}"#
    )
    .into_bytes()
}

async fn run(
    mode: Mode,
    detector: &DetectorConfig,
    payloads: Vec<Vec<u8>>,
) -> (PipelineStats, Vec<Point>, SharedState) {
    let state = SharedState::new(AppState::new(mode.handler(detector).unwrap()));
    let sink = Arc::new(MemorySink::new());
    let mut source = ReplaySource::on_topic(TOPIC, payloads);

    let stats = ProcessingLoop::new(state.clone(), sink.clone(), CancellationToken::new())
        .run(&mut source)
        .await;
    (stats, sink.points(), state)
}

#[tokio::test]
async fn valve_stream_end_to_end() {
    let payloads = vec![
        valve("ExtendTime", 400, 1_700_000_000_000),
        valve("ExtendTime", 410, 1_700_000_001_000),
        valve("ExtendTime", 420, 1_700_000_002_000),
        valve("ExtendTime", 405, 1_700_000_003_000),
        valve("ExtendTime", 1000, 1_700_000_004_000),
        b"not json".to_vec(),
        valve("HoldTime", 5, 1_700_000_005_000),
    ];
    let (stats, points, _) = run(Mode::Valve, &detector(3, 10), payloads).await;

    assert_eq!(stats.messages_received, 7);
    assert_eq!(stats.readings_building, 3);
    assert_eq!(stats.readings_classified, 2);
    assert_eq!(stats.anomalies, 1);
    assert_eq!(stats.malformed, 1);
    assert_eq!(stats.unknown_keys, 1);
    assert_eq!(stats.points_emitted, 2);
    assert_eq!(points.len(), 2);

    let normal = &points[0];
    assert_eq!(normal.measurement(), VALVE_MEASUREMENT);
    assert_eq!(normal.tag_value("operation_type"), Some("ExtendTime"));
    assert_eq!(normal.tag_value("sensor_name"), Some("Valve_7"));
    assert_eq!(normal.field_value("value"), Some(&FieldValue::Integer(405)));
    assert_eq!(normal.field_value("anomaly"), Some(&FieldValue::Integer(0)));
    assert_eq!(normal.field_value("model_avg"), Some(&FieldValue::Float(410.0)));
    assert_eq!(normal.field_value("model_std_dev"), Some(&FieldValue::Float(10.0)));
    assert_eq!(normal.field_value("anomaly_ratio"), Some(&FieldValue::Float(0.0)));

    let anomaly = &points[1];
    assert_eq!(anomaly.field_value("anomaly"), Some(&FieldValue::Integer(1)));
    assert_eq!(anomaly.field_value("anomaly_ratio"), Some(&FieldValue::Float(0.1)));
    // window slid to [410, 420, 405] after the normal reading
    assert_eq!(anomaly.field_value("model_avg"), Some(&FieldValue::Float(411.6667)));
}

#[tokio::test]
async fn valve_line_protocol_shape() {
    let payloads = vec![
        valve("RetractTime", 300, 1_700_000_000_000),
        valve("RetractTime", 300, 1_700_000_000_500),
    ];
    let (_, points, _) = run(Mode::Valve, &detector(1, 10), payloads).await;
    let line = points[0].to_line_protocol().unwrap();

    assert!(line.starts_with("AirValve,"), "{line}");
    assert!(line.contains("operation_type=RetractTime"), "{line}");
    assert!(line.contains("value=300i"), "{line}");
    assert!(line.contains("anomaly=0i"), "{line}");
    assert!(line.ends_with(" 1700000000500"), "{line}");
}

#[tokio::test]
async fn operation_types_do_not_share_windows() {
    let payloads = vec![
        valve("ExtendCmdTime", 50, 1),
        valve("RetractCmdTime", 900, 2),
        valve("ExtendCmdTime", 52, 3),
        valve("RetractCmdTime", 905, 4),
    ];
    let (stats, points, state) = run(Mode::Valve, &detector(1, 10), payloads).await;

    assert_eq!(stats.readings_building, 2);
    assert_eq!(stats.anomalies, 0);
    assert_eq!(points.len(), 2);

    let snapshot = state.lock().handler.snapshot();
    let complete: Vec<&str> = snapshot
        .iter()
        .filter(|s| s.complete)
        .map(|s| s.key.as_str())
        .collect();
    assert_eq!(complete, ["ExtendCmdTime", "RetractCmdTime"]);
}

#[tokio::test]
async fn vibration_sensors_learn_independently() {
    let payloads = vec![
        vibration("Vib1", 1.0, 2.0, 2.0),
        vibration("Vib2", 10.0, 10.0, 10.0),
        vibration("Vib1", 2.0, 3.0, 6.0),
        vibration("Vib2", 11.0, 10.0, 10.0),
        vibration("Vib1", 1.0, 4.0, 8.0),
        vibration("Vib1", 100.0, 100.0, 100.0),
    ];
    let (stats, points, state) = run(Mode::Vibration, &detector(3, 10), payloads).await;

    assert_eq!(stats.readings_building, 5);
    assert_eq!(stats.readings_classified, 1);
    assert_eq!(stats.anomalies, 1);

    let point = &points[0];
    assert_eq!(point.measurement(), VIBRATION_MEASUREMENT);
    assert_eq!(point.tag_value("sensor_name"), Some("Vib1"));
    assert_eq!(point.field_value("anomaly"), Some(&FieldValue::Integer(1)));
    // totals 3, 7 and 9
    assert_eq!(point.field_value("avg_window"), Some(&FieldValue::Float(6.3333)));

    let keys: Vec<String> = state
        .lock()
        .handler
        .snapshot()
        .into_iter()
        .map(|s| s.key)
        .collect();
    assert_eq!(keys, ["Vib1", "Vib2"]);
}

#[tokio::test]
async fn temp_humid_is_forwarded() {
    let payloads = vec![
        br#"{"LineName":"L","MachineName":"M","SensorName":"TH1","Temperature":23.456789,"Humidity":48.1,"TimeStamp":1700000000000}"#.to_vec(),
        br#"{"LineName":"L","MachineName":"M","SensorName":"TH1","Temperature":"warm","Humidity":48.1,"TimeStamp":1700000000000}"#.to_vec(),
    ];
    let (stats, points, _) = run(Mode::TempHumid, &detector(3, 10), payloads).await;

    assert_eq!(stats.readings_forwarded, 1);
    assert_eq!(stats.malformed, 1);
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].measurement(), TEMP_HUMID_MEASUREMENT);
    // same snake_case tag keys as the other measurements
    assert_eq!(points[0].tag_value("sensor_name"), Some("TH1"));
    assert_eq!(points[0].tag_value("line_name"), Some("L"));
    assert_eq!(points[0].tag_value("sensorName"), None);
    assert_eq!(
        points[0].field_value("temperature"),
        Some(&FieldValue::Float(23.4568))
    );
}

#[tokio::test]
async fn cancelled_loop_processes_nothing() {
    let state = SharedState::new(AppState::new(
        Mode::Valve.handler(&detector(2, 10)).unwrap(),
    ));
    let sink = Arc::new(MemorySink::new());
    let mut source = ReplaySource::on_topic(TOPIC, vec![valve("ExtendTime", 1, 1)]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let stats = ProcessingLoop::new(state, sink.clone(), cancel)
        .run(&mut source)
        .await;
    assert_eq!(stats.messages_received, 0);
    assert_eq!(source.remaining(), 1);
    assert!(sink.points().is_empty());
}

#[tokio::test]
async fn invalid_utf8_line_drops_one_reading() {
    let mut input = Vec::new();
    for (value, ts) in [(400, 1), (410, 2), (405, 3)] {
        input.extend(valve("ExtendTime", value, ts));
        input.push(b'\n');
    }
    input.extend(b"{\"bad\xff\xfe\"}\n");
    for (value, ts) in [(402, 4), (408, 5), (404, 6)] {
        input.extend(valve("ExtendTime", value, ts));
        input.push(b'\n');
    }

    let state = SharedState::new(AppState::new(
        Mode::Valve.handler(&detector(2, 10)).unwrap(),
    ));
    let sink = Arc::new(MemorySink::new());
    let mut source = StdinSource::from_reader(std::io::Cursor::new(input), TOPIC);
    let stats = ProcessingLoop::new(state, sink.clone(), CancellationToken::new())
        .run(&mut source)
        .await;

    assert_eq!(stats.messages_received, 7);
    assert_eq!(stats.malformed, 1);
    assert_eq!(stats.readings_building, 2);
    assert_eq!(stats.readings_classified, 4);
    assert_eq!(sink.points().len(), 4);
}
