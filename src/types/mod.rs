//! Shared data structures for plant telemetry
//!
//! - Decoded MQTT payloads per sensor family (valve timing, vibration, temperature/humidity)
//! - Payload decoding and timestamp conversion

mod reading;

pub use reading::*;
