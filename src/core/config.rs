//! Training run configuration.
//!
//! `TrainerConfig` is consumed, not owned, by the orchestration core: the
//! caller builds it (in code via the `with_*` builders, or from a
//! `config.json` written by a previous run) and the orchestrator validates
//! and normalises it once at startup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::{Result, TrainError};

/// What an actor does when the trajectory queue stays full.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Wait up to `push_timeout_ms`, then log and drop the trajectory.
    Drop,
    /// Wait until there is room or the queue is closed.
    Block,
}

/// Full configuration of a training run.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// Experiment directory: checkpoints, replay snapshot, telemetry, config.
    pub path: PathBuf,

    /// Primary devices, one model replica each. Device 0 hosts the learner.
    pub devices: Vec<String>,

    /// Optional auxiliary devices dedicated to actor/evaluator inference.
    /// When non-empty, workers never borrow a primary replica.
    pub inference_devices: Vec<String>,

    /// Keep device 0 free of inference while a training step runs.
    /// Requires at least two primary devices.
    pub explicit_learning: bool,

    /// Number of self-play actor threads.
    pub actors: usize,

    /// Number of benchmark evaluator threads.
    pub evaluators: usize,

    /// Maximum requests per inference call.
    pub inference_batch_size: usize,

    /// Number of inference dispatch threads.
    pub inference_threads: usize,

    /// Total entries of the position cache (0 disables caching).
    pub inference_cache: usize,

    /// Number of independently locked cache shards. Eviction is LRU within
    /// a shard, not across the whole cache.
    pub inference_cache_shards: usize,

    /// Longest a partial batch waits for more requests before dispatch.
    pub inference_flush_ms: u64,

    /// Replay buffer capacity, in training examples.
    pub replay_buffer_size: usize,

    /// How many times, on average, each example is trained on.
    pub replay_buffer_reuse: usize,

    /// Mini-batch size of one learn call.
    pub train_batch_size: usize,

    /// Keep a numbered checkpoint every this many steps.
    pub checkpoint_freq: u64,

    /// Rolling window (games) of each benchmark tier.
    pub evaluation_window: usize,

    /// Number of benchmark difficulty tiers.
    pub eval_levels: usize,

    /// Base simulation budget of the benchmark opponent.
    pub max_simulations: usize,

    /// Stop after this many learner steps (0 = unlimited).
    pub max_steps: u64,

    /// TD-lambda blending factor in `[0, 1]`.
    pub td_lambda: f64,

    /// TD-lambda truncation horizon (0 = until the end of the game).
    pub td_n_steps: i64,

    /// Probability that a self-play game may end early on a decisive value.
    pub cutoff_probability: f64,

    /// Absolute value beyond which a cutoff game ends.
    pub cutoff_value: f64,

    /// Probability that an actor plays a random legal move instead of the
    /// search's choice.
    pub exploration: f64,

    /// Bound on how long an actor waits to enqueue a trajectory.
    pub push_timeout_ms: u64,

    /// Behaviour when the queue stays full.
    pub backpressure: BackpressurePolicy,

    /// Root seed of every worker RNG stream.
    pub seed: u64,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("experiment"),
            devices: vec!["cpu:0".to_owned()],
            inference_devices: Vec::new(),
            explicit_learning: false,
            actors: 2,
            evaluators: 1,
            inference_batch_size: 1,
            inference_threads: 1,
            inference_cache: 262_144,
            inference_cache_shards: 1,
            inference_flush_ms: 1,
            replay_buffer_size: 65_536,
            replay_buffer_reuse: 3,
            train_batch_size: 128,
            checkpoint_freq: 100,
            evaluation_window: 100,
            eval_levels: 7,
            max_simulations: 300,
            max_steps: 0,
            td_lambda: 1.0,
            td_n_steps: 0,
            cutoff_probability: 0.8,
            cutoff_value: 0.95,
            exploration: 0.1,
            push_timeout_ms: 10_000,
            backpressure: BackpressurePolicy::Drop,
            seed: 0,
        }
    }
}

impl TrainerConfig {
    /// Default configuration rooted at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Set the primary devices.
    pub fn with_devices<S: Into<String>>(mut self, devices: impl IntoIterator<Item = S>) -> Self {
        self.devices = devices.into_iter().map(Into::into).collect();
        self
    }

    /// Set the auxiliary inference devices.
    pub fn with_inference_devices<S: Into<String>>(
        mut self,
        devices: impl IntoIterator<Item = S>,
    ) -> Self {
        self.inference_devices = devices.into_iter().map(Into::into).collect();
        self
    }

    /// Enable or disable explicit learning on device 0.
    pub fn with_explicit_learning(mut self, explicit: bool) -> Self {
        self.explicit_learning = explicit;
        self
    }

    /// Set actor and evaluator thread counts.
    pub fn with_workers(mut self, actors: usize, evaluators: usize) -> Self {
        self.actors = actors;
        self.evaluators = evaluators;
        self
    }

    /// Set inference batch size, dispatch threads and cache size.
    pub fn with_inference(mut self, batch_size: usize, threads: usize, cache: usize) -> Self {
        self.inference_batch_size = batch_size;
        self.inference_threads = threads;
        self.inference_cache = cache;
        self
    }

    /// Set replay capacity and reuse factor.
    pub fn with_replay(mut self, size: usize, reuse: usize) -> Self {
        self.replay_buffer_size = size;
        self.replay_buffer_reuse = reuse;
        self
    }

    /// Set the learn mini-batch size.
    pub fn with_train_batch_size(mut self, size: usize) -> Self {
        self.train_batch_size = size;
        self
    }

    /// Set the TD-lambda parameters.
    pub fn with_td(mut self, lambda: f64, n_steps: i64) -> Self {
        self.td_lambda = lambda;
        self.td_n_steps = n_steps;
        self
    }

    /// Set the maximum number of learner steps.
    pub fn with_max_steps(mut self, steps: u64) -> Self {
        self.max_steps = steps;
        self
    }

    /// Set the numbered-checkpoint frequency.
    pub fn with_checkpoint_freq(mut self, freq: u64) -> Self {
        self.checkpoint_freq = freq;
        self
    }

    /// Set benchmark tiers and window.
    pub fn with_eval(mut self, levels: usize, window: usize, max_simulations: usize) -> Self {
        self.eval_levels = levels;
        self.evaluation_window = window;
        self.max_simulations = max_simulations;
        self
    }

    /// Set early-cutoff parameters.
    pub fn with_cutoff(mut self, probability: f64, value: f64) -> Self {
        self.cutoff_probability = probability;
        self.cutoff_value = value;
        self
    }

    /// Set the queue backpressure policy and push timeout.
    pub fn with_backpressure(mut self, policy: BackpressurePolicy, timeout_ms: u64) -> Self {
        self.backpressure = policy;
        self.push_timeout_ms = timeout_ms;
        self
    }

    /// Set the root seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Capacity of the actor → learner trajectory queue.
    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        (self.replay_buffer_size / self.replay_buffer_reuse.max(1)).max(1)
    }

    /// States the learner collects before each training step.
    #[must_use]
    pub fn learn_rate(&self) -> usize {
        self.queue_capacity()
    }

    #[must_use]
    pub fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.push_timeout_ms)
    }

    #[must_use]
    pub fn flush_after(&self) -> Duration {
        Duration::from_millis(self.inference_flush_ms)
    }

    /// Check the configuration for values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(TrainError::Config(msg.to_owned()));

        if self.devices.is_empty() {
            return fail("no devices specified");
        }
        if self.explicit_learning && self.devices.len() <= 1 {
            return fail("explicit learning can only be used with multiple devices");
        }
        if self.actors == 0 {
            return fail("at least one actor is required");
        }
        if self.replay_buffer_reuse == 0 {
            return fail("replay_buffer_reuse must be positive");
        }
        if self.replay_buffer_size < self.replay_buffer_reuse {
            return fail("replay_buffer_size must be at least replay_buffer_reuse");
        }
        if self.train_batch_size == 0 {
            return fail("train_batch_size must be positive");
        }
        if self.checkpoint_freq == 0 {
            return fail("checkpoint_freq must be positive");
        }
        if self.evaluators > 0 && (self.eval_levels == 0 || self.evaluation_window == 0) {
            return fail("evaluators need at least one level and a non-empty window");
        }
        if self.inference_cache_shards == 0 {
            return fail("inference_cache_shards must be positive");
        }
        if self.inference_cache > 0 && self.inference_cache < self.inference_cache_shards {
            return fail("inference_cache must hold at least one entry per shard");
        }
        if !(0.0..=1.0).contains(&self.td_lambda) {
            return fail("td_lambda must lie in [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.cutoff_probability) {
            return fail("cutoff_probability must lie in [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.exploration) {
            return fail("exploration must lie in [0, 1]");
        }
        Ok(())
    }

    /// Clamp inference parameters to what the worker counts can use.
    ///
    /// Batch size is bounded by the number of concurrent callers, dispatch
    /// threads by half of all threads.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        let callers = self.actors + self.evaluators;
        self.inference_batch_size = self.inference_batch_size.min(callers).max(1);
        self.inference_threads = self.inference_threads.min((1 + callers) / 2).max(1);
        self
    }

    /// Read a configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| TrainError::io(path, e))?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Write this configuration as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text + "\n").map_err(|e| TrainError::io(path, e))
    }
}
