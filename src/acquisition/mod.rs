//! Sensor data acquisition module
//!
//! Handles telemetry ingestion from the plant MQTT broker.

pub mod mqtt;

pub use mqtt::MqttSource;
