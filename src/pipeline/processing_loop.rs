//! Reading processing loop shared across all input modes.
//!
//! Pulls payloads from a [`ReadingSource`], runs them through the deployment's
//! [`TelemetryHandler`] one at a time and hands resulting points to the sink.
//! Per-reading failures are counted and logged; only source errors end the loop.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::processor::{HandleError, Outcome};
use super::source::{ReadingSource, SourceEvent};
use super::state::{PipelineStats, SharedState};
use crate::baseline::{BaselineError, DispatchError};
use crate::sink::PointSink;

/// Owns what the loop needs besides the source.
pub struct ProcessingLoop {
    state: SharedState,
    sink: Arc<dyn PointSink>,
    cancel_token: CancellationToken,
}

impl ProcessingLoop {
    pub fn new(state: SharedState, sink: Arc<dyn PointSink>, cancel_token: CancellationToken) -> Self {
        Self {
            state,
            sink,
            cancel_token,
        }
    }

    /// Run until the source is exhausted, fails, or cancellation.
    ///
    /// Returns final pipeline statistics.
    pub async fn run<S: ReadingSource>(self, source: &mut S) -> PipelineStats {
        info!(source = source.source_name(), "Processing readings");

        loop {
            let event = tokio::select! {
                biased;
                () = self.cancel_token.cancelled() => {
                    info!("[ProcessingLoop] Shutdown signal received");
                    break;
                }
                result = source.next_event() => match result {
                    Ok(ev) => ev,
                    Err(e) => {
                        warn!(error = %e, "[ProcessingLoop] Source error");
                        break;
                    }
                }
            };

            match event {
                SourceEvent::Message { topic, payload } => self.process(&topic, &payload),
                SourceEvent::Eof => {
                    info!("[ProcessingLoop] Source reached end");
                    break;
                }
            }
        }

        let stats = self.state.lock().stats.clone();
        info!("{}", stats);
        stats
    }

    /// Handle one payload. The state lock is released before emitting.
    pub fn process(&self, topic: &str, payload: &[u8]) {
        let point = {
            let mut state = self.state.lock();
            state.stats.messages_received += 1;
            state.last_message_at = Some(chrono::Utc::now());

            let result = state.handler.handle(payload);
            match result {
                Ok(outcome) => {
                    match &outcome {
                        Outcome::Building { .. } => state.stats.readings_building += 1,
                        Outcome::Classified { result, .. } => {
                            state.stats.readings_classified += 1;
                            if result.is_anomaly {
                                state.stats.anomalies += 1;
                            }
                        }
                        Outcome::Forwarded { .. } => state.stats.readings_forwarded += 1,
                    }
                    let point = outcome.into_point();
                    if point.is_some() {
                        state.stats.points_emitted += 1;
                    }
                    point
                }
                Err(e) => {
                    record_failure(&mut state.stats, topic, &e);
                    None
                }
            }
        };

        if let Some(point) = point {
            self.sink.emit(point);
        }
    }
}

fn record_failure(stats: &mut PipelineStats, topic: &str, error: &HandleError) {
    match error {
        HandleError::Reading(e) => {
            stats.malformed += 1;
            warn!(topic = %topic, error = %e, "No valid sensor data in payload, dropped");
        }
        HandleError::Dispatch(DispatchError::UnknownKey(key)) => {
            stats.unknown_keys += 1;
            warn!(topic = %topic, key = %key, "Reading for unregistered key, dropped");
        }
        HandleError::Dispatch(DispatchError::Baseline {
            key,
            source: source @ BaselineError::DegenerateVariance { .. },
        }) => {
            stats.degenerate += 1;
            warn!(key = %key, error = %source, "Model window has no spread, reading skipped");
        }
        HandleError::Dispatch(DispatchError::Baseline { key, source }) => {
            stats.malformed += 1;
            warn!(topic = %topic, key = %key, error = %source, "Reading rejected by model, dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectorConfig;
    use crate::pipeline::processor::Mode;
    use crate::pipeline::source::ReplaySource;
    use crate::pipeline::state::AppState;
    use crate::sink::MemorySink;

    fn state(mode: Mode, window: usize) -> SharedState {
        let detector = DetectorConfig {
            model_window_size: window,
            ..DetectorConfig::default()
        };
        SharedState::new(AppState::new(mode.handler(&detector).unwrap()))
    }

    #[tokio::test]
    async fn counts_every_kind_of_drop() {
        let shared = state(Mode::Valve, 2);
        let sink = Arc::new(MemorySink::new());
        let lp = ProcessingLoop::new(shared.clone(), sink.clone(), CancellationToken::new());

        let ok = |v: i64| {
            format!(
                r#"{{"LineName":"L","MachineName":"M","ValveName":"V","TimeType":"ExtendTime","TimeValue":{v},"TimeStamp":1000}}"#
            )
        };
        let mut source = ReplaySource::on_topic(
            "L/M/V",
            [
                ok(100),
                ok(110),
                ok(105),
                "garbage".to_string(),
                r#"{"LineName":"L","MachineName":"M","ValveName":"V","TimeType":"Other","TimeValue":1,"TimeStamp":1000}"#.to_string(),
            ],
        );
        let stats = lp.run(&mut source).await;

        assert_eq!(stats.messages_received, 5);
        assert_eq!(stats.readings_building, 2);
        assert_eq!(stats.readings_classified, 1);
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.unknown_keys, 1);
        assert_eq!(stats.points_emitted, 1);
        assert_eq!(sink.points().len(), 1);
    }

    #[tokio::test]
    async fn zero_spread_window_is_skipped_for_z_score() {
        let shared = state(Mode::Vibration, 2);
        let sink = Arc::new(MemorySink::new());
        let lp = ProcessingLoop::new(shared.clone(), sink.clone(), CancellationToken::new());

        let reading = r#"{"LineName":"L","MachineName":"M","SensorName":"Vib1","VibAccelTotal_RMS_X":1.0,"VibAccelTotal_RMS_Y":2.0,"VibAccelTotal_RMS_Z":2.0,"TimeStamp":1000}"#;
        let mut source = ReplaySource::on_topic("L/M/Vib1", [reading; 3]);
        let stats = lp.run(&mut source).await;

        assert_eq!(stats.readings_building, 2);
        assert_eq!(stats.degenerate, 1);
        assert!(sink.points().is_empty());
        let snapshot = shared.lock().handler.snapshot();
        assert_eq!(snapshot[0].window_len, 2);
    }

    #[tokio::test]
    async fn cancellation_stops_the_loop() {
        let shared = state(Mode::TempHumid, 2);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let lp = ProcessingLoop::new(shared, Arc::new(MemorySink::new()), cancel);
        let mut source = ReplaySource::on_topic("t", ["{}"]);
        let stats = lp.run(&mut source).await;
        assert_eq!(stats, PipelineStats::default());
    }
}
