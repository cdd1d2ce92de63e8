//! Cache-augmented batched inference.
//!
//! `BatchedEvaluator` gives any number of worker threads a synchronous
//! `evaluate(state)` call. Behind it:
//!
//! 1. A sharded LRU cache keyed by `GameState::cache_key`. Hits never reach
//!    the model.
//! 2. A request queue drained by `threads` dispatch threads. Each dispatch
//!    thread waits for the first request, then up to `flush_after` for the
//!    batch to fill, so a lone caller is never starved.
//! 3. One inference call per batch on a loan from the `DeviceManager`.
//!    Duplicate keys inside a batch are evaluated once.
//!
//! With `batch_size <= 1` there is nothing to batch, and a miss is evaluated
//! on the calling thread.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, trace};
use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;

use super::cache::{CacheInfo, ShardedCache};
use super::device::DeviceManager;
use crate::core::{Result, TrainError, TrainerConfig};
use crate::rules::GameState;
use crate::search::PositionEvaluator;
use crate::training::stats::{BasicStats, HistogramNumbered};

/// Evaluator tuning.
#[derive(Clone, Debug, PartialEq)]
pub struct EvaluatorConfig {
    /// Maximum requests per inference call.
    pub batch_size: usize,
    /// Dispatch threads.
    pub threads: usize,
    /// Total cache entries (0 disables the cache).
    pub cache_size: usize,
    pub cache_shards: usize,
    /// Longest a partial batch waits for more requests.
    pub flush_after: Duration,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            batch_size: 1,
            threads: 1,
            cache_size: 1 << 16,
            cache_shards: 1,
            flush_after: Duration::from_millis(1),
        }
    }
}

impl EvaluatorConfig {
    /// Inference settings of a training run.
    pub fn from_trainer(config: &TrainerConfig) -> Self {
        Self {
            batch_size: config.inference_batch_size,
            threads: config.inference_threads,
            cache_size: config.inference_cache,
            cache_shards: config.inference_cache_shards,
            flush_after: config.flush_after(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_cache(mut self, size: usize, shards: usize) -> Self {
        self.cache_size = size;
        self.cache_shards = shards;
        self
    }

    pub fn with_flush_after(mut self, flush_after: Duration) -> Self {
        self.flush_after = flush_after;
        self
    }

    fn is_batched(&self) -> bool {
        self.batch_size > 1 && self.threads > 0
    }
}

#[derive(Clone, Copy, Default)]
enum SlotState {
    #[default]
    Pending,
    Ready(f32),
    Failed,
}

/// One caller's pending result.
#[derive(Default)]
struct ResultSlot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

impl ResultSlot {
    fn fill(&self, value: f32) {
        *self.state.lock() = SlotState::Ready(value);
        self.ready.notify_one();
    }

    fn fail(&self) {
        *self.state.lock() = SlotState::Failed;
        self.ready.notify_one();
    }

    /// # Panics
    /// Panics if the batch holding this request failed.
    fn wait(&self) -> f32 {
        let mut state = self.state.lock();
        loop {
            match *state {
                SlotState::Ready(v) => return v,
                SlotState::Failed => panic!("{POISONED}"),
                SlotState::Pending => self.ready.wait(&mut state),
            }
        }
    }
}

const POISONED: &str = "batched evaluator is poisoned: a previous inference call panicked";

struct Request {
    key: String,
    observation: Vec<f32>,
    slot: Arc<ResultSlot>,
}

#[derive(Default)]
struct RequestQueue {
    requests: VecDeque<Request>,
    closed: bool,
    poisoned: bool,
}

#[derive(Clone, Debug)]
struct BatchStats {
    sizes: BasicStats,
    histogram: HistogramNumbered,
}

struct Shared {
    devices: Arc<DeviceManager>,
    cache: ShardedCache<f32>,
    queue: Mutex<RequestQueue>,
    pending: Condvar,
    stats: Mutex<BatchStats>,
    config: EvaluatorConfig,
}

impl Shared {
    /// Evaluate a batch on one loan, fill the cache, return one value per
    /// observation.
    fn infer(&self, observations: &[Vec<f32>]) -> Vec<f32> {
        let values = {
            let loan = self.devices.get(observations.len(), None);
            loan.evaluate(observations)
        };
        assert_eq!(
            values.len(),
            observations.len(),
            "estimator returned {} values for {} observations",
            values.len(),
            observations.len()
        );

        let mut stats = self.stats.lock();
        stats.sizes.add(observations.len() as f64);
        stats.histogram.add(observations.len());
        values
    }

    /// Block until a batch is ready. `None` once closed and drained.
    fn next_batch(&self) -> Option<Vec<Request>> {
        let mut queue = self.queue.lock();
        while queue.requests.is_empty() {
            if queue.closed {
                return None;
            }
            self.pending.wait(&mut queue);
        }

        let deadline = Instant::now() + self.config.flush_after;
        while queue.requests.len() < self.config.batch_size && !queue.closed {
            if self.pending.wait_until(&mut queue, deadline).timed_out() {
                break;
            }
        }

        let n = queue.requests.len().min(self.config.batch_size);
        if n == 0 {
            // Another dispatch thread took them while we waited.
            return Some(Vec::new());
        }
        Some(queue.requests.drain(..n).collect())
    }

    fn run_batch(&self, batch: Vec<Request>) {
        // Coalesce duplicate positions.
        let mut index: FxHashMap<&str, usize> = FxHashMap::default();
        let mut observations = Vec::with_capacity(batch.len());
        let mut targets = Vec::with_capacity(batch.len());
        for request in &batch {
            let next = observations.len();
            let i = *index.entry(request.key.as_str()).or_insert_with(|| {
                observations.push(request.observation.clone());
                next
            });
            targets.push(i);
        }

        trace!(
            "dispatching batch of {} ({} unique)",
            batch.len(),
            observations.len()
        );
        let mut guard = BatchGuard {
            shared: self,
            batch: &batch,
            done: false,
        };
        let values = self.infer(&observations);

        for (key, &i) in index.iter() {
            self.cache.insert((*key).to_owned(), values[i]);
        }
        for (request, &i) in batch.iter().zip(&targets) {
            request.slot.fill(values[i]);
        }
        guard.done = true;
    }

    /// Stop serving: fail every queued request and refuse new ones.
    fn poison(&self) {
        let mut queue = self.queue.lock();
        queue.poisoned = true;
        queue.closed = true;
        for request in queue.requests.drain(..) {
            request.slot.fail();
        }
        drop(queue);
        self.pending.notify_all();
    }

    fn dispatch_loop(&self) {
        while let Some(batch) = self.next_batch() {
            if !batch.is_empty() {
                self.run_batch(batch);
            }
        }
    }
}

/// Fails the batch's callers if inference unwinds before they are served.
struct BatchGuard<'a> {
    shared: &'a Shared,
    batch: &'a [Request],
    done: bool,
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        error!(
            "{}: inference failed, failing {} waiting callers",
            thread::current().name().unwrap_or("inference"),
            self.batch.len()
        );
        for request in self.batch {
            request.slot.fail();
        }
        self.shared.poison();
    }
}

/// Synchronous, cached, batched position evaluation for many callers.
pub struct BatchedEvaluator {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl BatchedEvaluator {
    /// Start the dispatch threads (none when batching is disabled).
    pub fn new(devices: Arc<DeviceManager>, config: EvaluatorConfig) -> Result<Self> {
        let bins = config.batch_size.max(1) + 1;
        let shared = Arc::new(Shared {
            devices,
            cache: ShardedCache::new(config.cache_size, config.cache_shards),
            queue: Mutex::new(RequestQueue::default()),
            pending: Condvar::new(),
            stats: Mutex::new(BatchStats {
                sizes: BasicStats::new(),
                histogram: HistogramNumbered::new(bins),
            }),
            config,
        });

        let mut evaluator = Self {
            shared: Arc::clone(&shared),
            workers: Vec::new(),
        };
        if shared.config.is_batched() {
            for i in 0..shared.config.threads {
                let name = format!("inference-{i}");
                let worker = Arc::clone(&shared);
                let handle = thread::Builder::new()
                    .name(name.clone())
                    .spawn(move || worker.dispatch_loop())
                    .map_err(|e| TrainError::spawn(name, e))?;
                evaluator.workers.push(handle);
            }
        }
        debug!(
            "batched evaluator: batch {}, {} dispatch threads, cache {} in {} shards",
            shared.config.batch_size,
            evaluator.workers.len(),
            shared.config.cache_size,
            shared.cache.shard_count()
        );
        Ok(evaluator)
    }

    /// Player-0 value of `state`.
    ///
    /// # Panics
    /// Panics if the estimator panicked or returned the wrong number of
    /// values, for this call or any earlier batched call.
    pub fn evaluate<S: GameState>(&self, state: &S) -> f32 {
        let key = state.cache_key();
        if let Some(value) = self.shared.cache.get(&key) {
            return value;
        }
        self.evaluate_miss(key, state.observation())
    }

    /// Player-0 value of a position given its key and observation.
    pub fn evaluate_keyed(&self, key: &str, observation: Vec<f32>) -> f32 {
        if let Some(value) = self.shared.cache.get(key) {
            return value;
        }
        self.evaluate_miss(key.to_owned(), observation)
    }

    fn evaluate_miss(&self, key: String, observation: Vec<f32>) -> f32 {
        if !self.shared.config.is_batched() {
            let value = self.shared.infer(std::slice::from_ref(&observation))[0];
            self.shared.cache.insert(key, value);
            return value;
        }

        let slot = Arc::new(ResultSlot::default());
        {
            let mut queue = self.shared.queue.lock();
            assert!(!queue.poisoned, "{POISONED}");
            queue.requests.push_back(Request {
                key,
                observation,
                slot: Arc::clone(&slot),
            });
        }
        self.shared.pending.notify_all();
        slot.wait()
    }

    /// Statistics of realised batch sizes since the last reset.
    pub fn batch_size_stats(&self) -> BasicStats {
        self.shared.stats.lock().sizes.clone()
    }

    pub fn batch_size_histogram(&self) -> HistogramNumbered {
        self.shared.stats.lock().histogram.clone()
    }

    pub fn reset_batch_size_stats(&self) {
        let mut stats = self.shared.stats.lock();
        stats.sizes.reset();
        stats.histogram.reset();
    }

    pub fn cache_info(&self) -> CacheInfo {
        self.shared.cache.info()
    }

    /// Drop every cached value, e.g. after the model changed.
    pub fn clear_cache(&self) {
        self.shared.cache.clear();
    }

    #[must_use]
    pub fn config(&self) -> &EvaluatorConfig {
        &self.shared.config
    }
}

impl Drop for BatchedEvaluator {
    fn drop(&mut self) {
        self.shared.queue.lock().closed = true;
        self.shared.pending.notify_all();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl<S: GameState> PositionEvaluator<S> for BatchedEvaluator {
    fn value(&self, state: &S) -> f32 {
        self.evaluate(state)
    }
}
