//! Decision policies applied to a complete model window.
//!
//! A policy turns the raw window statistics into the reported baseline, derives
//! the decision band from it, and decides whether an incoming value is accepted.
//! The FIFO window mechanics live in [`StreamingModel`](super::StreamingModel)
//! and are shared by every policy.

use serde::{Deserialize, Serialize};

use super::BaselineError;

/// Default variance floor for the 3σ policy.
pub const DEFAULT_FLOOR_LIMIT: f64 = 20.0;

/// Default z-score threshold.
pub const DEFAULT_Z_SCORE_THRESHOLD: f64 = 2.0;

/// Sigma multiplier of the 3σ policy.
const THREE_SIGMA: f64 = 3.0;

/// Baseline statistics as reported downstream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub mean: f64,
    pub std_dev: f64,
}

/// Inclusive decision band.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub lower: f64,
    pub upper: f64,
}

impl Thresholds {
    /// True if `value` lies inside `[lower, upper]`.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }
}

/// Capability shared by both classifier families.
pub trait ClassifierPolicy: Send + Sync + 'static {
    /// Short name used in logs and snapshots.
    fn name(&self) -> &'static str;

    /// Map raw window mean/stddev to the reported baseline.
    fn baseline(&self, mean: f64, std_dev: f64) -> Baseline {
        Baseline { mean, std_dev }
    }

    /// Decision band for the given baseline.
    fn thresholds(&self, baseline: &Baseline) -> Result<Thresholds, BaselineError>;

    /// Whether `value` is accepted as normal.
    fn is_normal(&self, baseline: &Baseline, thresholds: &Thresholds, value: f64) -> bool;

    /// Decimal places the anomaly ratio is rounded to, if any.
    fn ratio_precision(&self) -> Option<u32> {
        None
    }
}

// ============================================================================
// 3σ with variance floor
// ============================================================================

/// `mean ± 3σ`, widened to `mean ± floor` when σ drops below the floor.
///
/// The floor keeps a near-constant baseline (e.g. timings quantised to whole
/// milliseconds) from collapsing the band onto the mean.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThreeSigmaPolicy {
    pub floor_limit: f64,
}

impl ThreeSigmaPolicy {
    pub fn new(floor_limit: f64) -> Self {
        Self { floor_limit }
    }
}

impl Default for ThreeSigmaPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_FLOOR_LIMIT)
    }
}

impl ClassifierPolicy for ThreeSigmaPolicy {
    fn name(&self) -> &'static str {
        "three_sigma"
    }

    fn thresholds(&self, baseline: &Baseline) -> Result<Thresholds, BaselineError> {
        let half_width = if baseline.std_dev < self.floor_limit && self.floor_limit > 0.0 {
            self.floor_limit
        } else {
            THREE_SIGMA * baseline.std_dev
        };
        Ok(Thresholds {
            lower: baseline.mean - half_width,
            upper: baseline.mean + half_width,
        })
    }

    fn is_normal(&self, _baseline: &Baseline, thresholds: &Thresholds, value: f64) -> bool {
        thresholds.contains(value)
    }

    fn ratio_precision(&self) -> Option<u32> {
        Some(3)
    }
}

// ============================================================================
// Z-score
// ============================================================================

/// `|z| > threshold` where `z = (|value| - |mean|) / |σ|`.
///
/// The absolute value is taken on the aggregates, not on the samples, so
/// reported magnitudes are always non-negative.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZScorePolicy {
    pub threshold: f64,
}

impl ZScorePolicy {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Z-score of `value`; `None` on zero spread.
    pub fn z_score(&self, baseline: &Baseline, value: f64) -> Option<f64> {
        if baseline.std_dev == 0.0 || !baseline.std_dev.is_finite() {
            return None;
        }
        Some((value.abs() - baseline.mean) / baseline.std_dev)
    }
}

impl Default for ZScorePolicy {
    fn default() -> Self {
        Self::new(DEFAULT_Z_SCORE_THRESHOLD)
    }
}

impl ClassifierPolicy for ZScorePolicy {
    fn name(&self) -> &'static str {
        "z_score"
    }

    fn baseline(&self, mean: f64, std_dev: f64) -> Baseline {
        Baseline {
            mean: mean.abs(),
            std_dev: std_dev.abs(),
        }
    }

    fn thresholds(&self, baseline: &Baseline) -> Result<Thresholds, BaselineError> {
        if baseline.std_dev == 0.0 || !baseline.std_dev.is_finite() {
            return Err(BaselineError::DegenerateVariance {
                mean: baseline.mean,
                std_dev: baseline.std_dev,
            });
        }
        let half_width = self.threshold * baseline.std_dev;
        Ok(Thresholds {
            lower: baseline.mean - half_width,
            upper: baseline.mean + half_width,
        })
    }

    fn is_normal(&self, baseline: &Baseline, _thresholds: &Thresholds, value: f64) -> bool {
        // thresholds() has already rejected zero spread
        self.z_score(baseline, value)
            .is_some_and(|z| z.abs() <= self.threshold)
    }
}
