//! Bounded history of recent classification outcomes.

use std::collections::VecDeque;

use super::model::ModelState;
use super::BaselineError;

/// Fraction of anomalous outcomes over the last `capacity` classifications.
///
/// The ratio is always divided by the full capacity, so it ramps up from zero
/// while the history is still filling.
#[derive(Debug, Clone)]
pub struct RatioTracker {
    history: VecDeque<bool>,
    capacity: usize,
    anomalies: usize,
    ratio: f64,
    precision: Option<u32>,
}

impl RatioTracker {
    pub fn new(capacity: usize, precision: Option<u32>) -> Result<Self, BaselineError> {
        if capacity == 0 {
            return Err(BaselineError::InvalidCapacity("anomaly list"));
        }
        Ok(Self {
            history: VecDeque::with_capacity(capacity),
            capacity,
            anomalies: 0,
            ratio: 0.0,
            precision,
        })
    }

    /// Record the outcome carried by `state`.
    ///
    /// Returns the updated ratio, or `None` if the model is still building.
    pub fn record(&mut self, state: &ModelState) -> Option<f64> {
        let outcome = state.classification()?.is_anomaly();

        if self.history.len() == self.capacity {
            if let Some(true) = self.history.pop_front() {
                self.anomalies -= 1;
            }
        }
        self.history.push_back(outcome);
        if outcome {
            self.anomalies += 1;
        }

        #[allow(clippy::cast_precision_loss)]
        let raw = self.anomalies as f64 / self.capacity as f64;
        self.ratio = match self.precision {
            Some(places) => round_to(raw, places),
            None => raw,
        };
        Some(self.ratio)
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.anomalies = 0;
        self.ratio = 0.0;
    }
}

/// Round half away from zero to `places` decimals.
pub fn round_to(value: f64, places: u32) -> f64 {
    let factor = 10_f64.powi(i32::try_from(places).unwrap_or(i32::MAX));
    (value * factor).round() / factor
}
