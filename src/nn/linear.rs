//! Reference value estimator: `tanh(w · x + b)` trained with SGD and L2.
//!
//! Small enough to train on a CPU inside tests, real enough that learning,
//! checkpointing and propagation have observable effects.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::traits::{CheckpointId, LossInfo, ValueEstimator};
use crate::core::{Result, TrainError};
use crate::training::TrainingExample;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Params {
    weights: Vec<f32>,
    bias: f32,
}

impl Params {
    fn predict(&self, observation: &[f32]) -> f32 {
        let z: f32 = self
            .weights
            .iter()
            .zip(observation)
            .map(|(w, x)| w * x)
            .sum::<f32>()
            + self.bias;
        z.tanh()
    }
}

/// Linear value model with a tanh squashing.
#[derive(Debug)]
pub struct LinearValueModel {
    device: String,
    checkpoint_dir: PathBuf,
    learning_rate: f32,
    weight_decay: f32,
    params: RwLock<Params>,
}

impl LinearValueModel {
    /// Zero-initialised model for `inputs` features, checkpointing into
    /// `checkpoint_dir`.
    pub fn new(device: impl Into<String>, checkpoint_dir: impl Into<PathBuf>, inputs: usize) -> Self {
        Self {
            device: device.into(),
            checkpoint_dir: checkpoint_dir.into(),
            learning_rate: 0.05,
            weight_decay: 1e-4,
            params: RwLock::new(Params {
                weights: vec![0.0; inputs],
                bias: 0.0,
            }),
        }
    }

    pub fn with_learning_rate(mut self, learning_rate: f32) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_weight_decay(mut self, weight_decay: f32) -> Self {
        self.weight_decay = weight_decay;
        self
    }

    /// Copy of the current weights and bias.
    pub fn parameters(&self) -> (Vec<f32>, f32) {
        let params = self.params.read();
        (params.weights.clone(), params.bias)
    }
}

impl ValueEstimator for LinearValueModel {
    fn device(&self) -> &str {
        &self.device
    }

    fn evaluate(&self, observations: &[Vec<f32>]) -> Vec<f32> {
        let params = self.params.read();
        observations.iter().map(|o| params.predict(o)).collect()
    }

    fn learn(&self, batch: &[TrainingExample]) -> LossInfo {
        if batch.is_empty() {
            return LossInfo::default();
        }
        let mut params = self.params.write();
        let n = batch.len() as f32;

        let mut grad_w = vec![0.0f32; params.weights.len()];
        let mut grad_b = 0.0f32;
        let mut value_loss = 0.0f32;
        for example in batch {
            let v = params.predict(&example.observation);
            let err = v - example.value;
            value_loss += err * err;
            // d/dz of (tanh(z) - t)^2
            let dz = 2.0 * err * (1.0 - v * v) / n;
            for (g, x) in grad_w.iter_mut().zip(&example.observation) {
                *g += dz * x;
            }
            grad_b += dz;
        }

        let l2: f32 = params.weights.iter().map(|w| w * w).sum::<f32>() * self.weight_decay;
        let (lr, decay) = (self.learning_rate, self.weight_decay);
        for (w, g) in params.weights.iter_mut().zip(&grad_w) {
            *w -= lr * (g + 2.0 * decay * *w);
        }
        params.bias -= lr * grad_b;

        LossInfo::new(f64::from(value_loss / n), f64::from(l2))
    }

    fn save_checkpoint(&self, id: CheckpointId) -> Result<String> {
        fs::create_dir_all(&self.checkpoint_dir)
            .map_err(|e| TrainError::io(&self.checkpoint_dir, e))?;
        let locator = self.checkpoint_locator(id);
        let path = PathBuf::from(&locator);
        let tmp = path.with_extension("bin.tmp");

        {
            let params = self.params.read();
            let file = File::create(&tmp).map_err(|e| TrainError::io(&tmp, e))?;
            let mut writer = BufWriter::new(file);
            bincode::serialize_into(&mut writer, &*params)?;
            writer.flush().map_err(|e| TrainError::io(&tmp, e))?;
        }
        fs::rename(&tmp, &path).map_err(|e| TrainError::io(&path, e))?;
        Ok(locator)
    }

    fn load_checkpoint(&self, locator: &str) -> Result<()> {
        let path = PathBuf::from(locator);
        let file = File::open(&path).map_err(|e| TrainError::io(&path, e))?;
        let loaded: Params = bincode::deserialize_from(BufReader::new(file))?;

        let mut params = self.params.write();
        if loaded.weights.len() != params.weights.len() {
            return Err(TrainError::Corrupt {
                path,
                reason: format!(
                    "checkpoint has {} inputs, model has {}",
                    loaded.weights.len(),
                    params.weights.len()
                ),
            });
        }
        *params = loaded;
        Ok(())
    }

    fn checkpoint_locator(&self, id: CheckpointId) -> String {
        self.checkpoint_dir
            .join(format!("checkpoint-{id}.bin"))
            .to_string_lossy()
            .into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn examples() -> Vec<TrainingExample> {
        vec![
            TrainingExample::new(vec![1.0, 0.0], 0.8),
            TrainingExample::new(vec![0.0, 1.0], -0.8),
        ]
    }

    #[test]
    fn test_zero_model_predicts_zero() {
        let model = LinearValueModel::new("cpu:0", "unused", 3);
        assert_eq!(model.evaluate(&[vec![1.0, 2.0, 3.0]]), vec![0.0]);
    }

    #[test]
    fn test_learning_reduces_loss() {
        let model = LinearValueModel::new("cpu:0", "unused", 2).with_learning_rate(0.5);
        let first = model.learn(&examples());
        let mut last = first;
        for _ in 0..200 {
            last = model.learn(&examples());
        }
        assert!(last.value() < first.value() / 4.0);

        let values = model.evaluate(&[vec![1.0, 0.0], vec![0.0, 1.0]]);
        assert!(values[0] > 0.5);
        assert!(values[1] < -0.5);
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let model = LinearValueModel::new("cpu:0", "unused", 2);
        assert_eq!(model.learn(&[]).batches(), 0);
    }

    #[test]
    fn test_checkpoint_round_trip() {
        let dir = TempDir::new().unwrap();
        let trained = LinearValueModel::new("cpu:0", dir.path(), 2).with_learning_rate(0.5);
        for _ in 0..10 {
            trained.learn(&examples());
        }

        let locator = trained.save_checkpoint(CheckpointId::MostRecent).unwrap();
        assert!(locator.ends_with("checkpoint--1.bin"));
        assert_eq!(locator, trained.checkpoint_locator(CheckpointId::MostRecent));

        let fresh = LinearValueModel::new("cpu:1", dir.path(), 2);
        fresh.load_checkpoint(&locator).unwrap();
        assert_eq!(fresh.parameters(), trained.parameters());
    }

    #[test]
    fn test_numbered_checkpoint_name() {
        let model = LinearValueModel::new("cpu:0", "/exp", 1);
        assert!(model
            .checkpoint_locator(CheckpointId::Step(300))
            .ends_with("checkpoint-300.bin"));
    }

    #[test]
    fn test_load_wrong_shape_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let small = LinearValueModel::new("cpu:0", dir.path(), 2);
        let locator = small.save_checkpoint(CheckpointId::Step(0)).unwrap();

        let big = LinearValueModel::new("cpu:0", dir.path(), 5);
        assert!(matches!(
            big.load_checkpoint(&locator),
            Err(TrainError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_load_missing_is_io_error() {
        let model = LinearValueModel::new("cpu:0", "unused", 1);
        assert!(matches!(
            model.load_checkpoint("/nonexistent/checkpoint-1.bin"),
            Err(TrainError::Io { .. })
        ));
    }
}
