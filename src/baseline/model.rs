//! Rolling-window baseline for a single key.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use super::policy::{Baseline, ClassifierPolicy, Thresholds};
use super::BaselineError;

/// Outcome of classifying a value against a complete window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    Normal,
    Anomalous,
}

impl Classification {
    pub fn is_anomaly(self) -> bool {
        matches!(self, Classification::Anomalous)
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Classification::Normal => write!(f, "NORMAL"),
            Classification::Anomalous => write!(f, "ANOMALOUS"),
        }
    }
}

/// Result of [`StreamingModel::ingest`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ModelState {
    /// Window still filling; no classification was made.
    Building { collected: usize, needed: usize },
    /// Value was classified against the complete window.
    Classified {
        classification: Classification,
        baseline: Baseline,
        thresholds: Thresholds,
    },
}

impl ModelState {
    pub fn classification(&self) -> Option<Classification> {
        match self {
            ModelState::Building { .. } => None,
            ModelState::Classified { classification, .. } => Some(*classification),
        }
    }
}

/// Streaming baseline over the last `capacity` accepted values.
///
/// Only values classified as normal enter the window once it is complete, so
/// the window length stays exactly `capacity` from then on.
#[derive(Debug, Clone)]
pub struct StreamingModel<P> {
    window: VecDeque<f64>,
    capacity: usize,
    baseline: Baseline,
    thresholds: Thresholds,
    policy: P,
}

impl<P: ClassifierPolicy> StreamingModel<P> {
    /// Create an empty model. `capacity` must be non-zero.
    pub fn new(capacity: usize, policy: P) -> Result<Self, BaselineError> {
        if capacity == 0 {
            return Err(BaselineError::InvalidCapacity("model window"));
        }
        Ok(Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            baseline: Baseline::default(),
            thresholds: Thresholds::default(),
            policy,
        })
    }

    /// Feed one value.
    ///
    /// On error the window, baseline and thresholds are exactly as before the call.
    pub fn ingest(&mut self, value: f64) -> Result<ModelState, BaselineError> {
        if !value.is_finite() {
            return Err(BaselineError::NonFiniteValue(value));
        }

        if !self.is_complete() {
            self.window.push_back(value);
            return Ok(ModelState::Building {
                collected: self.window.len(),
                needed: self.capacity,
            });
        }

        let baseline = self.window_baseline();
        let thresholds = self.policy.thresholds(&baseline)?;
        self.baseline = baseline;
        self.thresholds = thresholds;

        let classification = if self.policy.is_normal(&baseline, &thresholds, value) {
            self.window.pop_front();
            self.window.push_back(value);
            Classification::Normal
        } else {
            Classification::Anomalous
        };

        Ok(ModelState::Classified {
            classification,
            baseline,
            thresholds,
        })
    }

    fn window_baseline(&self) -> Baseline {
        debug_assert!(self.is_complete(), "statistics on an undersized window");
        let mean = self.window.iter().mean();
        let std_dev = if self.window.len() > 1 {
            self.window.iter().std_dev()
        } else {
            0.0
        };
        self.policy.baseline(mean, std_dev)
    }

    /// Back to the empty building state.
    pub fn reset(&mut self) {
        self.window.clear();
        self.baseline = Baseline::default();
        self.thresholds = Thresholds::default();
    }

    pub fn is_complete(&self) -> bool {
        self.window.len() == self.capacity
    }

    /// Fill level in whole percent.
    pub fn completeness(&self) -> u8 {
        // len <= capacity, so this is at most 100
        u8::try_from(100 * self.window.len() / self.capacity).unwrap_or(100)
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn baseline(&self) -> Baseline {
        self.baseline
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn window(&self) -> impl Iterator<Item = f64> + '_ {
        self.window.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::{ThreeSigmaPolicy, ZScorePolicy};

    fn filled<P: ClassifierPolicy>(policy: P, values: &[f64]) -> StreamingModel<P> {
        let mut model = StreamingModel::new(values.len(), policy).unwrap();
        for v in values {
            let state = model.ingest(*v).unwrap();
            assert!(matches!(state, ModelState::Building { .. }));
        }
        model
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = StreamingModel::new(0, ThreeSigmaPolicy::default()).unwrap_err();
        assert!(matches!(err, BaselineError::InvalidCapacity(_)));
    }

    #[test]
    fn building_reports_progress_and_keeps_stats_zero() {
        let mut model = StreamingModel::new(4, ThreeSigmaPolicy::default()).unwrap();
        let state = model.ingest(10.0).unwrap();
        assert_eq!(state, ModelState::Building { collected: 1, needed: 4 });
        assert_eq!(model.completeness(), 25);
        assert_eq!(model.baseline(), Baseline::default());
        assert!(state.classification().is_none());
    }

    #[test]
    fn sample_std_dev_over_window() {
        let mut model = filled(ThreeSigmaPolicy::new(0.0), &[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        model.ingest(5.0).unwrap();
        let b = model.baseline();
        assert!((b.mean - 5.0).abs() < 1e-12);
        // sum of squared deviations 32, n-1 = 7
        assert!((b.std_dev - (32.0_f64 / 7.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn normal_value_slides_window() {
        let mut model = filled(ThreeSigmaPolicy::new(5.0), &[10.0, 10.0, 10.0]);
        let state = model.ingest(12.0).unwrap();
        assert_eq!(state.classification(), Some(Classification::Normal));
        assert_eq!(model.window().collect::<Vec<_>>(), vec![10.0, 10.0, 12.0]);
    }

    #[test]
    fn anomalous_value_freezes_window() {
        let mut model = filled(ThreeSigmaPolicy::new(5.0), &[10.0, 10.0, 10.0]);
        let state = model.ingest(16.0).unwrap();
        assert_eq!(state.classification(), Some(Classification::Anomalous));
        assert_eq!(model.window().collect::<Vec<_>>(), vec![10.0, 10.0, 10.0]);
        assert_eq!(model.len(), 3);
    }

    #[test]
    fn non_finite_values_never_enter_window() {
        let mut model = StreamingModel::new(2, ThreeSigmaPolicy::default()).unwrap();
        assert!(matches!(
            model.ingest(f64::NAN),
            Err(BaselineError::NonFiniteValue(_))
        ));
        assert!(model.is_empty());
    }

    #[test]
    fn degenerate_variance_preserves_prior_state() {
        let mut model = filled(ZScorePolicy::default(), &[1.0, 2.0, 3.0]);
        // slide the window down to [2, 2, 2] through accepted readings
        for _ in 0..3 {
            let state = model.ingest(2.0).unwrap();
            assert_eq!(state.classification(), Some(Classification::Normal));
        }
        let before_baseline = model.baseline();
        let before_thresholds = model.thresholds();
        assert!(before_baseline.std_dev > 0.0);

        let err = model.ingest(2.0).unwrap_err();
        assert!(matches!(err, BaselineError::DegenerateVariance { .. }));
        assert_eq!(model.baseline(), before_baseline);
        assert_eq!(model.thresholds(), before_thresholds);
        assert_eq!(model.window().collect::<Vec<_>>(), vec![2.0, 2.0, 2.0]);
    }

    #[test]
    fn reset_returns_to_building() {
        let mut model = filled(ThreeSigmaPolicy::default(), &[1.0, 2.0]);
        model.ingest(1.5).unwrap();
        model.reset();
        assert!(model.is_empty());
        assert!(!model.is_complete());
        assert_eq!(model.completeness(), 0);
        assert_eq!(model.baseline(), Baseline::default());
        assert_eq!(model.thresholds(), Thresholds::default());
        assert!(matches!(model.ingest(1.0).unwrap(), ModelState::Building { .. }));
    }
}
