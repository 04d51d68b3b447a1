//! plant-sentinel: Streaming anomaly detection for plant telemetry
//!
//! Subscribes to one sensor topic on the plant MQTT broker, learns a rolling
//! baseline per monitored key and writes every classified reading to InfluxDB.
//!
//! ## Architecture
//!
//! - **Acquisition**: MQTT subscriber with reconnect backoff
//! - **Baseline**: per-key rolling windows with three-sigma and z-score policies
//! - **Pipeline**: payload decoding, routing and point rendering per sensor family
//! - **Sink**: batching InfluxDB v2 line-protocol writer
//! - **API**: status endpoints for health, model snapshots and resets

pub mod acquisition;
pub mod api;
pub mod baseline;
pub mod config;
pub mod pipeline;
pub mod sink;
pub mod types;

// Re-export configuration
pub use config::{ConfigError, SentinelConfig};

// Re-export baseline components
pub use baseline::{
    BaselineError, Classification, ClassificationResult, ClassifierPolicy, Dispatcher,
    KeySpace, ModelState, ModelStore, RatioTracker, StreamingModel, ThreeSigmaPolicy,
    ZScorePolicy,
};

// Re-export pipeline entry points
pub use pipeline::{Mode, Outcome, ProcessingLoop, ReadingSource, SharedState, TelemetryHandler};

// Re-export sink components
pub use sink::{Point, PointSink};
