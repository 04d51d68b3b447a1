//! Time-series sink for classified readings.
//!
//! The processing loop hands each [`Point`] to a [`PointSink`] and moves on.
//! Emission never blocks and never reports back: batching, retries and
//! failure handling are the sink's concern.
//!
//! - `InfluxSink` / `InfluxWriter`: bounded channel into a batching InfluxDB v2 writer task
//! - `StdoutSink`: line protocol on stdout (`--dry-run`)
//! - `MemorySink`: collects points in memory

mod influx;
mod point;

use std::io::Write;
use std::sync::Mutex;

pub use influx::{InfluxSink, InfluxWriter, SinkError, WriteOptions};
pub use point::{FieldValue, Point};

/// Fire-and-forget destination for points.
pub trait PointSink: Send + Sync {
    fn emit(&self, point: Point);
}

/// Writes line protocol to stdout, one point per line.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl PointSink for StdoutSink {
    fn emit(&self, point: Point) {
        if let Some(line) = point.to_line_protocol() {
            let mut out = std::io::stdout().lock();
            if let Err(e) = writeln!(out, "{line}") {
                tracing::warn!(error = %e, "Failed to write point to stdout");
            }
        }
    }
}

/// Keeps every emitted point.
#[derive(Debug, Default)]
pub struct MemorySink {
    points: Mutex<Vec<Point>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything emitted so far.
    pub fn points(&self) -> Vec<Point> {
        self.points
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl PointSink for MemorySink {
    fn emit(&self, point: Point) {
        self.points
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(point);
    }
}
