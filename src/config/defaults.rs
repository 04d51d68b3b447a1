//! System-wide default constants.
//!
//! Grouped by subsystem for easy discovery.

// ============================================================================
// Site
// ============================================================================

pub const DEFAULT_LINE_NAME: &str = "Line_1";
pub const DEFAULT_MACHINE_NAME: &str = "Machine_1";
pub const DEFAULT_SENSOR_NAME: &str = "Sensor_1";

// ============================================================================
// MQTT
// ============================================================================

pub const DEFAULT_MQTT_HOST: &str = "localhost";
pub const DEFAULT_MQTT_PORT: u16 = 1883;
pub const DEFAULT_MQTT_QOS: u8 = 1;

/// MQTT keep-alive (seconds).
pub const DEFAULT_MQTT_KEEP_ALIVE_SECS: u64 = 30;

/// Capacity of the rumqttc request channel.
pub const MQTT_REQUEST_CHANNEL_CAPACITY: usize = 64;

/// First reconnect delay after an event-loop error (seconds).
pub const MQTT_RECONNECT_INITIAL_SECS: u64 = 2;

/// Reconnect delay ceiling (seconds).
pub const MQTT_RECONNECT_MAX_SECS: u64 = 60;

// ============================================================================
// InfluxDB
// ============================================================================

pub const DEFAULT_INFLUX_HOST: &str = "localhost";
pub const DEFAULT_INFLUX_PORT: u16 = 8086;
pub const DEFAULT_INFLUX_BUCKET: &str = "process";
pub const DEFAULT_INFLUX_ORG: &str = "plant";

/// Points per write request.
pub const DEFAULT_INFLUX_BATCH_SIZE: usize = 100;

/// Flush interval when the batch is not full (milliseconds).
pub const DEFAULT_INFLUX_FLUSH_INTERVAL_MS: u64 = 1_000;

/// Upper bound of the random delay added to each flush (milliseconds).
pub const DEFAULT_INFLUX_JITTER_INTERVAL_MS: u64 = 0;

/// Delay between retries of a failed batch (milliseconds).
pub const INFLUX_RETRY_INTERVAL_MS: u64 = 1_000;

/// Points queued between the processing loop and the writer.
pub const INFLUX_QUEUE_CAPACITY: usize = 10_000;

// ============================================================================
// HTTP server
// ============================================================================

pub const DEFAULT_SERVER_ADDR: &str = "0.0.0.0:8080";
