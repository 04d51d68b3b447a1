//! Processing Pipeline Module
//!
//! ```text
//! ReadingSource ──> ProcessingLoop ──> TelemetryHandler ──> Dispatcher ──> PointSink
//!  (MQTT/stdin)      (one at a time)    (decode, render)    (per-key model)  (InfluxDB)
//!                          │
//!                     SharedState ◄── status API (snapshots, resets)
//! ```
//!
//! Readings are processed strictly in arrival order by a single loop. The
//! status API touches the same handler through [`SharedState`] between
//! readings.

pub mod processing_loop;
mod processor;
pub mod source;
mod state;

pub use processing_loop::ProcessingLoop;
pub use processor::*;
pub use source::{ReadingSource, ReplaySource, SourceError, SourceEvent, StdinSource};
pub use state::*;
