//! Application State
//!
//! Shared between the processing loop and the status API. Wrapped in
//! `Arc<std::sync::Mutex<_>>`; the lock is never held across an `.await`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::processor::{Mode, TelemetryHandler};

// ============================================================================
// Pipeline Statistics
// ============================================================================

/// Per-reading counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    /// Payloads received from the source
    pub messages_received: u64,
    /// Readings that filled a model window
    pub readings_building: u64,
    /// Readings classified by a model
    pub readings_classified: u64,
    /// Classified readings flagged anomalous
    pub anomalies: u64,
    /// Pass-through readings
    pub readings_forwarded: u64,
    /// Points handed to the sink
    pub points_emitted: u64,
    /// Undecodable or invalid payloads
    pub malformed: u64,
    /// Readings for keys outside a fixed key space
    pub unknown_keys: u64,
    /// Readings skipped because the window had no spread
    pub degenerate: u64,
}

impl std::fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Pipeline: {} messages, {} classified ({} anomalies), {} building, {} forwarded, {} dropped",
            self.messages_received,
            self.readings_classified,
            self.anomalies,
            self.readings_building,
            self.readings_forwarded,
            self.malformed + self.unknown_keys + self.degenerate,
        )
    }
}

// ============================================================================
// Application State
// ============================================================================

/// State reachable from API handlers and the processing loop.
pub struct AppState {
    pub handler: Box<dyn TelemetryHandler>,
    pub stats: PipelineStats,
    pub started_at: Instant,
    pub last_message_at: Option<DateTime<Utc>>,
}

impl AppState {
    pub fn new(handler: Box<dyn TelemetryHandler>) -> Self {
        Self {
            handler,
            stats: PipelineStats::default(),
            started_at: Instant::now(),
            last_message_at: None,
        }
    }

    pub fn mode(&self) -> Mode {
        self.handler.mode()
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("mode", &self.mode())
            .field("stats", &self.stats)
            .field("last_message_at", &self.last_message_at)
            .finish_non_exhaustive()
    }
}

/// Handle shared across tasks.
#[derive(Debug, Clone)]
pub struct SharedState(Arc<Mutex<AppState>>);

impl SharedState {
    pub fn new(state: AppState) -> Self {
        Self(Arc::new(Mutex::new(state)))
    }

    /// Exclusive access. A poisoned lock is recovered; the state stays usable.
    pub fn lock(&self) -> MutexGuard<'_, AppState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
