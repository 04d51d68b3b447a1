//! Online Baseline Module - Rolling Windows & Anomaly Classification
//!
//! Every monitored key owns a [`StreamingModel`] that learns a rolling
//! baseline from its accepted (non-anomalous) history and a [`RatioTracker`]
//! that reports how often recent readings were anomalous.
//!
//! ## Architecture
//!
//! - `StreamingModel<P>`: FIFO window of accepted values, generic over the decision policy
//! - `ThreeSigmaPolicy` / `ZScorePolicy`: the two interchangeable decision rules
//! - `RatioTracker`: bounded outcome history and anomaly ratio
//! - `ModelStore` / `Dispatcher`: per-key routing and result construction
//!
//! ## Lifecycle
//!
//! ```text
//! [Building] --(window fills to N)--> [Complete]
//! [Complete] --(value in bounds)--> [Complete]      (window slides)
//! [Complete] --(value out of bounds)--> [Complete]  (window frozen, anomaly flagged)
//! [Complete] --(explicit reset)--> [Building]
//! ```
//!
//! Anomalous values never enter the window, so the baseline does not follow
//! a permanent shift of the process mean.
//!
//! ## Usage
//!
//! ```ignore
//! let store = ModelStore::new(100, 100, ThreeSigmaPolicy::new(20.0), KeySpace::Dynamic)?;
//! let mut dispatcher = Dispatcher::new(store);
//!
//! match dispatcher.route("ExtendTime", 412.0, timestamp)? {
//!     Some(result) if result.is_anomaly => { /* flag it */ }
//!     Some(_) => { /* normal */ }
//!     None => { /* still learning */ }
//! }
//! ```

mod dispatcher;
mod model;
mod policy;
mod ratio;
mod store;

use thiserror::Error;

pub use dispatcher::{ClassificationResult, DispatchError, Dispatcher};
pub use model::{Classification, ModelState, StreamingModel};
pub use policy::{
    Baseline, ClassifierPolicy, ThreeSigmaPolicy, Thresholds, ZScorePolicy, DEFAULT_FLOOR_LIMIT,
    DEFAULT_Z_SCORE_THRESHOLD,
};
pub use ratio::{round_to, RatioTracker};
pub use store::{KeySpace, ModelSnapshot, ModelStore, TrackedModel};

/// Default number of accepted values before a model is complete.
pub const DEFAULT_MODEL_WINDOW_SIZE: usize = 100;

/// Default number of outcomes kept for the anomaly ratio.
pub const DEFAULT_ANOMALY_LIST_SIZE: usize = 100;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BaselineError {
    #[error("Degenerate variance: std dev {std_dev} around mean {mean}, z-score undefined")]
    DegenerateVariance { mean: f64, std_dev: f64 },

    #[error("Non-finite value rejected: {0}")]
    NonFiniteValue(f64),

    #[error("Invalid {0} size: must be > 0")]
    InvalidCapacity(&'static str),
}
