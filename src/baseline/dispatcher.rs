//! Routes readings to their key's model and builds enriched results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use super::model::ModelState;
use super::policy::ClassifierPolicy;
use super::store::{ModelSnapshot, ModelStore};
use super::BaselineError;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Unknown model key: {0}")]
    UnknownKey(String),

    #[error("Classification of {key} failed: {source}")]
    Baseline {
        key: String,
        #[source]
        source: BaselineError,
    },
}

/// Enriched per-reading result handed to the sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub key: String,
    pub value: f64,
    pub is_anomaly: bool,
    pub model_mean: f64,
    pub model_std_dev: f64,
    pub lower_threshold: f64,
    pub upper_threshold: f64,
    pub anomaly_ratio: f64,
    pub timestamp: DateTime<Utc>,
}

/// Single-consumer front end over a [`ModelStore`].
///
/// Readings for the same key must arrive in order; the dispatcher is driven
/// through `&mut self` so callers sharing it across tasks need exclusive access.
#[derive(Debug, Clone)]
pub struct Dispatcher<P> {
    store: ModelStore<P>,
}

impl<P: ClassifierPolicy + Clone> Dispatcher<P> {
    pub fn new(store: ModelStore<P>) -> Self {
        Self { store }
    }

    /// Classify `value` for `key`.
    ///
    /// `Ok(None)` while the key's window is still filling.
    pub fn route(
        &mut self,
        key: &str,
        value: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<ClassificationResult>, DispatchError> {
        let tracked = self
            .store
            .resolve(key)
            .ok_or_else(|| DispatchError::UnknownKey(key.to_string()))?;

        let state = tracked
            .model
            .ingest(value)
            .map_err(|source| DispatchError::Baseline {
                key: key.to_string(),
                source,
            })?;

        let ratio = tracked.ratio.record(&state);

        match (state, ratio) {
            (ModelState::Building { collected, needed }, _) => {
                if collected == needed {
                    info!(key = %key, window = needed, "Model window complete, classification active");
                } else {
                    debug!(key = %key, collected, needed, "Building model window");
                }
                Ok(None)
            }
            (
                ModelState::Classified {
                    classification,
                    baseline,
                    thresholds,
                },
                ratio,
            ) => {
                let anomaly_ratio = ratio.unwrap_or_else(|| tracked.ratio.ratio());
                if classification.is_anomaly() {
                    info!(
                        key = %key,
                        value,
                        mean = baseline.mean,
                        std_dev = baseline.std_dev,
                        lower = thresholds.lower,
                        upper = thresholds.upper,
                        anomaly_ratio,
                        "Anomaly detected"
                    );
                }
                Ok(Some(ClassificationResult {
                    key: key.to_string(),
                    value,
                    is_anomaly: classification.is_anomaly(),
                    model_mean: baseline.mean,
                    model_std_dev: baseline.std_dev,
                    lower_threshold: thresholds.lower,
                    upper_threshold: thresholds.upper,
                    anomaly_ratio,
                    timestamp,
                }))
            }
        }
    }

    pub fn reset(&mut self, key: &str) -> bool {
        let found = self.store.reset(key);
        if found {
            info!(key = %key, "Model reset");
        }
        found
    }

    pub fn reset_all(&mut self) {
        self.store.reset_all();
        info!(keys = self.store.len(), "All models reset");
    }

    pub fn snapshot(&self) -> Vec<ModelSnapshot> {
        self.store.snapshot()
    }

    pub fn store(&self) -> &ModelStore<P> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::{KeySpace, ThreeSigmaPolicy, ZScorePolicy};

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_700_000_000_000).unwrap()
    }

    #[test]
    fn route_returns_none_while_building() {
        let store = ModelStore::new(3, 3, ThreeSigmaPolicy::new(1.0), KeySpace::Dynamic).unwrap();
        let mut dispatcher = Dispatcher::new(store);
        for v in [1.0, 2.0, 3.0] {
            assert!(dispatcher.route("k", v, now()).unwrap().is_none());
        }
        let result = dispatcher.route("k", 2.0, now()).unwrap().unwrap();
        assert!(!result.is_anomaly);
        assert_eq!(result.key, "k");
        assert_eq!(result.timestamp, now());
        assert!((result.model_mean - 2.0).abs() < 1e-12);
    }

    #[test]
    fn unknown_fixed_key_is_rejected() {
        let store = ModelStore::new(
            3,
            3,
            ThreeSigmaPolicy::default(),
            KeySpace::fixed(["ExtendTime"]),
        )
        .unwrap();
        let mut dispatcher = Dispatcher::new(store);
        let err = dispatcher.route("Bogus", 1.0, now()).unwrap_err();
        assert!(matches!(err, DispatchError::UnknownKey(k) if k == "Bogus"));
    }

    #[test]
    fn degenerate_variance_surfaces_as_baseline_error() {
        let store = ModelStore::new(2, 4, ZScorePolicy::default(), KeySpace::Dynamic).unwrap();
        let mut dispatcher = Dispatcher::new(store);
        dispatcher.route("vib", 3.0, now()).unwrap();
        dispatcher.route("vib", 3.0, now()).unwrap();
        let err = dispatcher.route("vib", 3.5, now()).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Baseline {
                source: BaselineError::DegenerateVariance { .. },
                ..
            }
        ));
        let tracked = dispatcher.store().get("vib").unwrap();
        assert!(tracked.ratio.is_empty());
    }

    #[test]
    fn keys_are_independent() {
        let store = ModelStore::new(2, 2, ThreeSigmaPolicy::new(1.0), KeySpace::Dynamic).unwrap();
        let mut dispatcher = Dispatcher::new(store);
        dispatcher.route("a", 10.0, now()).unwrap();
        dispatcher.route("a", 10.0, now()).unwrap();
        dispatcher.route("b", 50.0, now()).unwrap();

        let a = dispatcher.route("a", 100.0, now()).unwrap().unwrap();
        assert!(a.is_anomaly);
        let b_state = dispatcher.store().get("b").unwrap();
        assert_eq!(b_state.model.len(), 1);
        assert!(b_state.ratio.is_empty());
    }

    #[test]
    fn reset_returns_key_to_building() {
        let store = ModelStore::new(2, 2, ThreeSigmaPolicy::new(1.0), KeySpace::Dynamic).unwrap();
        let mut dispatcher = Dispatcher::new(store);
        for _ in 0..3 {
            dispatcher.route("a", 10.0, now()).unwrap();
        }
        assert!(dispatcher.reset("a"));
        assert!(!dispatcher.reset("nope"));
        let snap = &dispatcher.snapshot()[0];
        assert_eq!(snap.window_len, 0);
        assert_eq!(snap.history_len, 0);
        assert!(dispatcher.route("a", 10.0, now()).unwrap().is_none());
    }
}
