//! Value estimator interface.
//!
//! The pipeline never sees the model architecture. A replica is anything
//! that maps observations to player-0 values, trains on
//! `(observation, target)` pairs and can save and load its parameters.

use std::fmt;
use std::ops::AddAssign;

use serde::{Deserialize, Serialize};

use crate::core::Result;
use crate::training::TrainingExample;

/// Identifies a saved checkpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CheckpointId {
    /// Reserved slot overwritten after every step.
    MostRecent,
    /// Numbered snapshot kept for later analysis.
    Step(u64),
}

impl CheckpointId {
    /// Numeric form used in file names; `MostRecent` is -1.
    #[must_use]
    pub fn as_i64(self) -> i64 {
        match self {
            Self::MostRecent => -1,
            Self::Step(step) => step as i64,
        }
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_i64())
    }
}

/// Losses accumulated over one or more learn calls.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LossInfo {
    value_sum: f64,
    l2_sum: f64,
    batches: u64,
}

impl LossInfo {
    /// Loss of a single batch.
    pub fn new(value: f64, l2: f64) -> Self {
        Self {
            value_sum: value,
            l2_sum: l2,
            batches: 1,
        }
    }

    /// Mean value loss.
    #[must_use]
    pub fn value(&self) -> f64 {
        if self.batches == 0 {
            0.0
        } else {
            self.value_sum / self.batches as f64
        }
    }

    /// Mean regularization loss.
    #[must_use]
    pub fn l2(&self) -> f64 {
        if self.batches == 0 {
            0.0
        } else {
            self.l2_sum / self.batches as f64
        }
    }

    #[must_use]
    pub fn total(&self) -> f64 {
        self.value() + self.l2()
    }

    /// Number of learn calls accumulated.
    #[must_use]
    pub fn batches(&self) -> u64 {
        self.batches
    }
}

impl AddAssign for LossInfo {
    fn add_assign(&mut self, other: Self) {
        self.value_sum += other.value_sum;
        self.l2_sum += other.l2_sum;
        self.batches += other.batches;
    }
}

/// One model replica bound to one device.
///
/// All methods take `&self`; implementations synchronize internally.
/// Callers must not overlap `learn` with `evaluate` on the same replica;
/// `DeviceManager` loans enforce that.
pub trait ValueEstimator: Send + Sync {
    /// Device identifier, for logs.
    fn device(&self) -> &str;

    /// Player-0 value of each observation, in `[-1, 1]`.
    fn evaluate(&self, observations: &[Vec<f32>]) -> Vec<f32>;

    /// One gradient step on a mini-batch.
    fn learn(&self, batch: &[TrainingExample]) -> LossInfo;

    /// Persist current parameters and return a locator for `load_checkpoint`.
    fn save_checkpoint(&self, id: CheckpointId) -> Result<String>;

    /// Replace current parameters with a saved checkpoint.
    fn load_checkpoint(&self, locator: &str) -> Result<()>;

    /// Locator that `save_checkpoint(id)` would return.
    fn checkpoint_locator(&self, id: CheckpointId) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_id_display() {
        assert_eq!(CheckpointId::MostRecent.to_string(), "-1");
        assert_eq!(CheckpointId::Step(42).to_string(), "42");
    }

    #[test]
    fn test_loss_info_default_is_zero() {
        let loss = LossInfo::default();
        assert_eq!(loss.value(), 0.0);
        assert_eq!(loss.l2(), 0.0);
        assert_eq!(loss.batches(), 0);
    }

    #[test]
    fn test_loss_info_accumulates_means() {
        let mut loss = LossInfo::default();
        loss += LossInfo::new(1.0, 0.1);
        loss += LossInfo::new(3.0, 0.3);

        assert_eq!(loss.batches(), 2);
        assert!((loss.value() - 2.0).abs() < 1e-12);
        assert!((loss.l2() - 0.2).abs() < 1e-12);
        assert!((loss.total() - 2.2).abs() < 1e-12);
    }

    #[test]
    fn test_loss_info_serialization() {
        let loss = LossInfo::new(0.5, 0.01);
        let json = serde_json::to_string(&loss).unwrap();
        let back: LossInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(loss, back);
    }
}
