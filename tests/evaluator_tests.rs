//! Integration tests for batched, cached inference.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use selfplay_trainer::core::Result;
use selfplay_trainer::games::dice_race::DiceRace;
use selfplay_trainer::nn::{
    BatchedEvaluator, CheckpointId, DeviceManager, EvaluatorConfig, LossInfo, LruCache, ValueEstimator,
};
use selfplay_trainer::rules::{Game, GameState};
use selfplay_trainer::training::TrainingExample;

/// Returns the sum of each observation and counts calls and rows.
#[derive(Default)]
struct Summing {
    calls: AtomicUsize,
    rows: AtomicUsize,
}

impl Summing {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn rows(&self) -> usize {
        self.rows.load(Ordering::SeqCst)
    }
}

impl ValueEstimator for Summing {
    fn device(&self) -> &str {
        "mock"
    }
    fn evaluate(&self, observations: &[Vec<f32>]) -> Vec<f32> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.rows.fetch_add(observations.len(), Ordering::SeqCst);
        observations.iter().map(|o| o.iter().sum::<f32>()).collect()
    }
    fn learn(&self, _batch: &[TrainingExample]) -> LossInfo {
        LossInfo::default()
    }
    fn save_checkpoint(&self, id: CheckpointId) -> Result<String> {
        Ok(self.checkpoint_locator(id))
    }
    fn load_checkpoint(&self, _locator: &str) -> Result<()> {
        Ok(())
    }
    fn checkpoint_locator(&self, id: CheckpointId) -> String {
        id.to_string()
    }
}

fn evaluator(replicas: usize, config: EvaluatorConfig) -> (Vec<Arc<Summing>>, Arc<DeviceManager>, BatchedEvaluator) {
    let models: Vec<_> = (0..replicas).map(|_| Arc::new(Summing::default())).collect();
    let mut devices = DeviceManager::new();
    for model in &models {
        devices.add_device(Arc::clone(model) as Arc<dyn ValueEstimator>);
    }
    let devices = Arc::new(devices);
    let evaluator = BatchedEvaluator::new(Arc::clone(&devices), config).unwrap();
    (models, devices, evaluator)
}

// =============================================================================
// Cache
// =============================================================================

#[test]
fn test_cache_hit_does_not_invoke_model() {
    let (models, _, evaluator) = evaluator(1, EvaluatorConfig::default());
    let state = DiceRace::new().new_initial_state().child(1).child(0);

    let first = evaluator.evaluate(&state);
    let second = evaluator.evaluate(&state);
    assert_eq!(first, second);
    assert_eq!(models[0].calls(), 1);

    let info = evaluator.cache_info();
    assert_eq!(info.hits, 1);
    assert_eq!(info.misses, 1);
    assert_eq!(info.size, 1);
}

#[test]
fn test_equal_positions_share_cache_entry() {
    let (models, _, evaluator) = evaluator(1, EvaluatorConfig::default());
    let game = DiceRace::new();
    let a = game.new_initial_state().child(2);
    let b = game.new_initial_state().child(2);
    assert_eq!(a.cache_key(), b.cache_key());

    evaluator.evaluate(&a);
    evaluator.evaluate(&b);
    assert_eq!(models[0].calls(), 1);
}

#[test]
fn test_lru_eviction_through_evaluator() {
    let config = EvaluatorConfig::default().with_cache(2, 1);
    let (models, _, evaluator) = evaluator(1, config);

    evaluator.evaluate_keyed("a", vec![1.0]);
    evaluator.evaluate_keyed("b", vec![2.0]);
    evaluator.evaluate_keyed("a", vec![1.0]); // refresh a
    evaluator.evaluate_keyed("c", vec![3.0]); // evicts b
    assert_eq!(models[0].calls(), 3);

    evaluator.evaluate_keyed("a", vec![1.0]);
    assert_eq!(models[0].calls(), 3);
    assert_eq!(evaluator.evaluate_keyed("b", vec![2.0]), 2.0);
    assert_eq!(models[0].calls(), 4);
}

#[test]
fn test_lru_cache_recency_order() {
    let mut cache = LruCache::new(3);
    cache.insert("x", 1);
    cache.insert("y", 2);
    cache.insert("z", 3);
    assert_eq!(cache.get("x"), Some(1));
    cache.insert("w", 4);

    assert!(!cache.contains("y"));
    assert_eq!(cache.keys_by_recency(), vec!["w", "x", "z"]);
}

// =============================================================================
// Batching
// =============================================================================

#[test]
fn test_concurrent_callers_get_their_own_values() {
    let config = EvaluatorConfig::default()
        .with_batch_size(8)
        .with_threads(2)
        .with_flush_after(Duration::from_millis(5));
    let (models, _, evaluator) = evaluator(1, config);
    let evaluator = Arc::new(evaluator);

    let callers: Vec<_> = (0..8)
        .map(|t| {
            let evaluator = Arc::clone(&evaluator);
            thread::spawn(move || {
                for i in 0..25 {
                    let x = (t * 100 + i) as f32;
                    let value = evaluator.evaluate_keyed(&format!("{t}-{i}"), vec![x, 1.0]);
                    assert_eq!(value, x + 1.0);
                }
            })
        })
        .collect();
    for caller in callers {
        caller.join().unwrap();
    }

    assert_eq!(models[0].rows(), 200);
    let stats = evaluator.batch_size_stats();
    assert!(stats.num() >= 1);
    assert!(stats.max() <= 8.0);
    assert_eq!(evaluator.batch_size_histogram().total(), stats.num());
}

#[test]
fn test_duplicate_requests_are_coalesced() {
    let config = EvaluatorConfig::default()
        .with_batch_size(4)
        .with_threads(1)
        .with_flush_after(Duration::from_millis(200));
    let (models, _, evaluator) = evaluator(1, config);
    let evaluator = Arc::new(evaluator);

    let callers: Vec<_> = (0..4)
        .map(|_| {
            let evaluator = Arc::clone(&evaluator);
            thread::spawn(move || evaluator.evaluate_keyed("same", vec![0.25]))
        })
        .collect();
    for caller in callers {
        assert_eq!(caller.join().unwrap(), 0.25);
    }
    // However the requests were split into batches, no batch evaluates the
    // same position twice.
    assert_eq!(models[0].rows(), models[0].calls());
}

#[test]
fn test_inference_moves_off_primary_while_learning() {
    let (models, devices, evaluator) = evaluator(2, EvaluatorConfig::default().with_cache(0, 1));
    devices.set_learning(true);

    for i in 0..10 {
        evaluator.evaluate_keyed(&i.to_string(), vec![1.0]);
    }
    assert_eq!(models[0].calls(), 0);
    assert_eq!(models[1].calls(), 10);
    devices.set_learning(false);
}

#[test]
fn test_reset_batch_stats() {
    let (_, _, evaluator) = evaluator(1, EvaluatorConfig::default());
    evaluator.evaluate_keyed("k", vec![1.0]);
    assert_eq!(evaluator.batch_size_stats().num(), 1);

    evaluator.reset_batch_size_stats();
    assert_eq!(evaluator.batch_size_stats().num(), 0);
    assert_eq!(evaluator.batch_size_histogram().total(), 0);
}
