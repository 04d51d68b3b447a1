//! Keyed collection of models and their ratio trackers.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::model::StreamingModel;
use super::policy::ClassifierPolicy;
use super::ratio::RatioTracker;
use super::BaselineError;

/// Which keys a store accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeySpace {
    /// Only pre-registered keys; anything else is rejected.
    Fixed(BTreeSet<String>),
    /// Keys are created on first sight.
    Dynamic,
}

impl KeySpace {
    pub fn fixed<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        KeySpace::Fixed(keys.into_iter().map(Into::into).collect())
    }
}

/// Model plus the ratio tracker paired with it.
#[derive(Debug, Clone)]
pub struct TrackedModel<P> {
    pub model: StreamingModel<P>,
    pub ratio: RatioTracker,
}

impl<P: ClassifierPolicy> TrackedModel<P> {
    /// Clear both halves back to the empty state.
    pub fn reset(&mut self) {
        self.model.reset();
        self.ratio.reset();
    }
}

/// Serializable view of one key, for status reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub key: String,
    pub policy: String,
    pub completeness: u8,
    pub window_len: usize,
    pub window_size: usize,
    pub complete: bool,
    pub mean: f64,
    pub std_dev: f64,
    pub lower_threshold: f64,
    pub upper_threshold: f64,
    pub anomaly_ratio: f64,
    pub history_len: usize,
}

/// Per-key storage of [`TrackedModel`]s sharing one policy and sizing.
#[derive(Debug, Clone)]
pub struct ModelStore<P> {
    models: HashMap<String, TrackedModel<P>>,
    key_space: KeySpace,
    window_size: usize,
    list_size: usize,
    policy: P,
}

impl<P: ClassifierPolicy + Clone> ModelStore<P> {
    /// Build a store; fixed keys are registered immediately.
    pub fn new(
        window_size: usize,
        list_size: usize,
        policy: P,
        key_space: KeySpace,
    ) -> Result<Self, BaselineError> {
        let mut store = Self {
            models: HashMap::new(),
            key_space,
            window_size,
            list_size,
            policy,
        };
        // validates both sizes even when no key is pre-registered
        let template = store.new_tracked()?;
        if let KeySpace::Fixed(keys) = &store.key_space {
            for key in keys {
                store.models.insert(key.clone(), template.clone());
            }
            info!(
                policy = store.policy.name(),
                keys = store.models.len(),
                window_size,
                list_size,
                "Registered fixed model keys"
            );
        }
        Ok(store)
    }

    fn new_tracked(&self) -> Result<TrackedModel<P>, BaselineError> {
        Ok(TrackedModel {
            model: StreamingModel::new(self.window_size, self.policy.clone())?,
            ratio: RatioTracker::new(self.list_size, self.policy.ratio_precision())?,
        })
    }

    /// Look up `key`, creating it in a dynamic key space.
    ///
    /// Returns `None` for a key outside a fixed key space.
    pub fn resolve(&mut self, key: &str) -> Option<&mut TrackedModel<P>> {
        if !self.models.contains_key(key) {
            if matches!(self.key_space, KeySpace::Fixed(_)) {
                return None;
            }
            // sizes were validated in new()
            let tracked = self.new_tracked().ok()?;
            debug!(key = %key, policy = self.policy.name(), "Created model for new key");
            self.models.insert(key.to_string(), tracked);
        }
        self.models.get_mut(key)
    }

    pub fn get(&self, key: &str) -> Option<&TrackedModel<P>> {
        self.models.get(key)
    }

    pub fn reset(&mut self, key: &str) -> bool {
        match self.models.get_mut(key) {
            Some(tracked) => {
                tracked.reset();
                true
            }
            None => false,
        }
    }

    pub fn reset_all(&mut self) {
        for tracked in self.models.values_mut() {
            tracked.reset();
        }
    }

    /// Snapshots sorted by key.
    pub fn snapshot(&self) -> Vec<ModelSnapshot> {
        let mut out: Vec<ModelSnapshot> = self
            .models
            .iter()
            .map(|(key, tracked)| {
                let baseline = tracked.model.baseline();
                let thresholds = tracked.model.thresholds();
                ModelSnapshot {
                    key: key.clone(),
                    policy: self.policy.name().to_string(),
                    completeness: tracked.model.completeness(),
                    window_len: tracked.model.len(),
                    window_size: tracked.model.capacity(),
                    complete: tracked.model.is_complete(),
                    mean: baseline.mean,
                    std_dev: baseline.std_dev,
                    lower_threshold: thresholds.lower,
                    upper_threshold: thresholds.upper,
                    anomaly_ratio: tracked.ratio.ratio(),
                    history_len: tracked.ratio.len(),
                }
            })
            .collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        out
    }

    pub fn key_space(&self) -> &KeySpace {
        &self.key_space
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
