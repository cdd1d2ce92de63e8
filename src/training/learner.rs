//! The learner: drains trajectories, trains, checkpoints and reports.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info};
use serde_json::{json, Map, Value};

use super::benchmark::EvalResults;
use super::queue::BoundedQueue;
use super::replay::ReplayBuffer;
use super::stats::{BasicStats, HistogramNamed, HistogramNumbered};
use super::telemetry::{DataLogger, StartInfo, LEARNER_LOG};
use super::trajectory::{OutcomeClass, Trajectory, TrainingExample};
use crate::core::{Result, StopToken, TrainRng, TrainerConfig};
use crate::nn::{BatchedEvaluator, CacheInfo, CheckpointId, DeviceManager, LossInfo, ValueEstimator};

/// File name of the replay snapshot inside the experiment directory.
pub const REPLAY_FILE: &str = "replay_buffer.data";

/// Evenly spaced points in each game where value quality is measured.
const VALUE_STAGES: usize = 7;

/// How often an idle learner re-checks the stop token.
const QUEUE_POLL: Duration = Duration::from_millis(100);

/// Per-step statistics of the collected games.
#[derive(Debug)]
struct StepStats {
    trajectories: u64,
    states: usize,
    game_lengths: BasicStats,
    game_length_hist: HistogramNumbered,
    outcomes: HistogramNamed,
    value_accuracy: Vec<BasicStats>,
    value_prediction: Vec<BasicStats>,
}

impl StepStats {
    fn new(max_game_length: usize) -> Self {
        Self {
            trajectories: 0,
            states: 0,
            game_lengths: BasicStats::new(),
            game_length_hist: HistogramNumbered::new(max_game_length + 1),
            outcomes: HistogramNamed::new(OutcomeClass::NAMES),
            value_accuracy: vec![BasicStats::new(); VALUE_STAGES],
            value_prediction: vec![BasicStats::new(); VALUE_STAGES],
        }
    }

    fn record(&mut self, trajectory: &Trajectory) {
        let len = trajectory.len();
        self.trajectories += 1;
        self.states += len;
        self.game_lengths.add(len as f64);
        self.game_length_hist.add(len);
        self.outcomes.add(trajectory.outcome_class().index());
        if len == 0 {
            return;
        }

        // Did the recorded value at each stage predict the mover's result?
        for stage in 0..VALUE_STAGES {
            let s = &trajectory.states[(len - 1) * stage / (VALUE_STAGES - 1)];
            let won = trajectory.returns.get(s.player).copied().unwrap_or(0.0) >= 0.0;
            let correct = (s.value >= 0.0) == won;
            self.value_accuracy[stage].add(if correct { 1.0 } else { 0.0 });
            self.value_prediction[stage].add(s.value.abs());
        }
    }
}

/// What a learner run accomplished.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LearnerSummary {
    /// Training steps completed by this run.
    pub steps: u64,
    /// Last completed step number (0 if none ever).
    pub last_step: u64,
    /// Trajectories consumed, including those before a resume.
    pub total_trajectories: u64,
    /// Examples ever added to the replay buffer.
    pub total_states: u64,
    /// Losses of the last training step.
    pub last_loss: LossInfo,
}

/// Single consumer of the trajectory queue and sole trainer of replica 0.
pub struct Learner {
    config: TrainerConfig,
    devices: Arc<DeviceManager>,
    auxiliary: Option<Arc<DeviceManager>>,
    inference: Vec<Arc<BatchedEvaluator>>,
    eval_results: Option<Arc<EvalResults>>,
    queue: Arc<BoundedQueue<Trajectory>>,
    stop: StopToken,
    start: StartInfo,
    replay: ReplayBuffer<TrainingExample>,
    logger: DataLogger,
    rng: TrainRng,
    max_game_length: usize,
}

impl Learner {
    /// Open the telemetry log and, when resuming, restore the replay buffer.
    ///
    /// A missing or corrupt replay snapshot on resume is an error.
    pub fn new(
        config: &TrainerConfig,
        devices: Arc<DeviceManager>,
        queue: Arc<BoundedQueue<Trajectory>>,
        stop: StopToken,
        start: StartInfo,
        max_game_length: usize,
    ) -> Result<Self> {
        let replay = ReplayBuffer::new(config.replay_buffer_size);
        if start.is_resume() {
            let path = config.path.join(REPLAY_FILE);
            replay.load(&path)?;
            info!(
                "Loaded replay buffer: {} examples, {} seen",
                replay.len(),
                replay.total_added()
            );
        }
        let logger = DataLogger::new(&config.path, LEARNER_LOG, start.start_time)?;

        Ok(Self {
            config: config.clone(),
            devices,
            auxiliary: None,
            inference: Vec::new(),
            eval_results: None,
            queue,
            stop,
            start,
            replay,
            logger,
            rng: TrainRng::new(config.seed).for_worker("learner", 0),
            max_game_length,
        })
    }

    /// Replicas that must also receive every new checkpoint.
    pub fn with_auxiliary_devices(mut self, devices: Arc<DeviceManager>) -> Self {
        self.auxiliary = Some(devices);
        self
    }

    /// Evaluator whose cache is invalidated after each step. The first one
    /// added also has its batch statistics reported.
    pub fn with_inference(mut self, evaluator: Arc<BatchedEvaluator>) -> Self {
        if !self.inference.iter().any(|e| Arc::ptr_eq(e, &evaluator)) {
            self.inference.push(evaluator);
        }
        self
    }

    pub fn with_eval_results(mut self, results: Arc<EvalResults>) -> Self {
        self.eval_results = Some(results);
        self
    }

    #[must_use]
    pub fn replay(&self) -> &ReplayBuffer<TrainingExample> {
        &self.replay
    }

    /// Run training steps until stopped, the step limit is reached, or the
    /// queue is closed.
    pub fn run(mut self) -> Result<LearnerSummary> {
        let learn_rate = self.config.learn_rate();
        let max_steps = self.config.max_steps;
        let mut summary = LearnerSummary {
            last_step: self.start.start_step.saturating_sub(1),
            total_trajectories: self.start.total_trajectories,
            total_states: self.replay.total_added(),
            ..LearnerSummary::default()
        };
        let mut last = Instant::now()
            .checked_sub(Duration::from_secs(60))
            .unwrap_or_else(Instant::now);

        let mut step = self.start.start_step;
        while !self.stop.is_stopped() && (max_steps == 0 || step <= max_steps) {
            let mut stats = StepStats::new(self.max_game_length);
            let queue_size = self.queue.len();
            let mut exhausted = false;

            while !self.stop.is_stopped() && stats.states < learn_rate {
                match self.queue.pop_timeout(QUEUE_POLL) {
                    Some(trajectory) => {
                        stats.record(&trajectory);
                        self.replay.extend(
                            trajectory.training_examples(self.config.td_lambda, self.config.td_n_steps),
                        );
                    }
                    None if self.queue.is_closed() => {
                        exhausted = true;
                        break;
                    }
                    None => {}
                }
            }
            summary.total_trajectories += stats.trajectories;

            let now = Instant::now();
            let seconds = now.duration_since(last).as_secs_f64().max(f64::EPSILON);
            last = now;
            let states_per_s = stats.states as f64 / seconds;
            let actors = self.config.actors.max(1) as f64;

            info!("Step: {step}");
            info!(
                "Collected {:5} states from {:3} games, {:.1} states/s, {:.1} states/(s*actor), game length: {:.1}",
                stats.states,
                stats.trajectories,
                states_per_s,
                states_per_s / actors,
                stats.game_lengths.avg()
            );
            info!(
                "Queue size: {}. Buffer size: {}. States seen: {}",
                queue_size,
                self.replay.len(),
                self.replay.total_added()
            );

            if self.stop.is_stopped() || exhausted {
                break;
            }

            let replay_path = self.config.path.join(REPLAY_FILE);
            self.replay.save(&replay_path)?;
            debug!("Replay buffer saved to {}", replay_path.display());

            info!("Training");
            let losses = self.learn_step(step)?;
            info!(
                "Loss: value {:.4}, l2 {:.4} over {} batches",
                losses.value(),
                losses.l2(),
                losses.batches()
            );

            let record = self.step_record(StepRecordInputs {
                step,
                seconds,
                queue_size,
                total_trajectories: summary.total_trajectories,
                stats: &stats,
                losses,
            });
            self.logger.write(record)?;

            for evaluator in &self.inference {
                evaluator.reset_batch_size_stats();
                if evaluator.cache_info().size > 0 {
                    evaluator.clear_cache();
                }
            }

            summary.steps += 1;
            summary.last_step = step;
            summary.total_states = self.replay.total_added();
            summary.last_loss = losses;
            step += 1;
        }

        info!(
            "Learner finished after {} steps (last step {})",
            summary.steps, summary.last_step
        );
        Ok(summary)
    }

    /// Train replica 0 and propagate the resulting checkpoint.
    ///
    /// Replica 0 stays learning-exclusive (when configured) until every other
    /// replica has loaded the new weights.
    fn learn_step(&mut self, step: u64) -> Result<LossInfo> {
        let devices = Arc::clone(&self.devices);
        let loan = devices.learn(self.config.train_batch_size);
        devices.set_learning(self.config.explicit_learning);

        let result = self.train_and_propagate(&*loan, step);

        drop(loan);
        devices.set_learning(false);
        result
    }

    fn train_and_propagate(&mut self, model: &dyn ValueEstimator, step: u64) -> Result<LossInfo> {
        let batch_size = self.config.train_batch_size;
        let mut losses = LossInfo::default();
        for _ in 0..self.replay.len() / batch_size {
            let batch = self.replay.sample(&mut self.rng, batch_size)?;
            losses += model.learn(&batch);
        }

        let locator = model.save_checkpoint(CheckpointId::MostRecent)?;
        if step % self.config.checkpoint_freq == 0 {
            let numbered = model.save_checkpoint(CheckpointId::Step(step))?;
            info!("Checkpoint saved: {numbered}");
        }

        self.devices.load_checkpoint_all(&locator, true)?;
        if let Some(auxiliary) = &self.auxiliary {
            auxiliary.load_checkpoint_all(&locator, false)?;
        }
        debug!("Checkpoint {locator} loaded on every replica");
        Ok(losses)
    }

    fn step_record(&self, inputs: StepRecordInputs<'_>) -> Map<String, Value> {
        let StepRecordInputs {
            step,
            seconds,
            queue_size,
            total_trajectories,
            stats,
            losses,
        } = inputs;
        let states_per_s = stats.states as f64 / seconds;

        let (batch_size, batch_size_hist, cache) = match self.inference.first() {
            Some(evaluator) => (
                evaluator.batch_size_stats().to_json(),
                evaluator.batch_size_histogram().to_json(),
                evaluator.cache_info(),
            ),
            None => (
                BasicStats::new().to_json(),
                HistogramNumbered::new(0).to_json(),
                CacheInfo::default(),
            ),
        };
        let eval = match &self.eval_results {
            Some(results) => results.to_json(),
            None => json!({ "count": 0, "results": [] }),
        };

        let record = json!({
            "step": step,
            "total_states": self.replay.total_added(),
            "states_per_s": states_per_s,
            "states_per_s_actor": states_per_s / self.config.actors.max(1) as f64,
            "total_trajectories": total_trajectories,
            "trajectories_per_s": stats.trajectories as f64 / seconds,
            "queue_size": queue_size,
            "game_length": stats.game_lengths.to_json(),
            "game_length_hist": stats.game_length_hist.to_json(),
            "outcomes": stats.outcomes.to_json(),
            "value_accuracy": stats.value_accuracy.iter().map(BasicStats::to_json).collect::<Vec<_>>(),
            "value_prediction": stats.value_prediction.iter().map(BasicStats::to_json).collect::<Vec<_>>(),
            "eval": eval,
            "batch_size": batch_size,
            "batch_size_hist": batch_size_hist,
            "loss": {
                "value": losses.value(),
                "l2reg": losses.l2(),
                "sum": losses.total(),
            },
            "cache": {
                "size": cache.size,
                "max_size": cache.max_size,
                "usage": cache.usage(),
                "requests": cache.total(),
                "requests_per_s": cache.total() as f64 / seconds,
                "hits": cache.hits,
                "misses": cache.misses,
                "misses_per_s": cache.misses as f64 / seconds,
                "hit_rate": cache.hit_rate(),
            },
        });
        match record {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}

struct StepRecordInputs<'a> {
    step: u64,
    seconds: f64,
    queue_size: usize,
    total_trajectories: u64,
    stats: &'a StepStats,
    losses: LossInfo,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::LinearValueModel;
    use crate::training::trajectory::StepRecord;
    use tempfile::TempDir;

    fn step(player: usize, value: f64) -> StepRecord {
        StepRecord {
            observation: vec![1.0, 0.0],
            player,
            action: 0,
            value,
            accumulated_luck: 0.0,
        }
    }

    fn trajectory(len: usize, p0_return: f64) -> Trajectory {
        Trajectory {
            states: (0..len).map(|i| step(i % 2, 0.5)).collect(),
            returns: vec![p0_return, -p0_return],
        }
    }

    fn config(dir: &TempDir) -> TrainerConfig {
        TrainerConfig::new(dir.path())
            .with_replay(8, 2)
            .with_train_batch_size(2)
            .with_checkpoint_freq(1)
            .with_max_steps(1)
    }

    fn devices(dir: &TempDir) -> Arc<DeviceManager> {
        let mut devices = DeviceManager::new();
        devices.add_device(Arc::new(LinearValueModel::new("cpu:0", dir.path(), 2)));
        Arc::new(devices)
    }

    #[test]
    fn test_step_stats_stages() {
        let mut stats = StepStats::new(10);
        // Player 0 wins; player 0's positive values are right, player 1's wrong.
        stats.record(&trajectory(7, 1.0));

        assert_eq!(stats.trajectories, 1);
        assert_eq!(stats.states, 7);
        assert_eq!(stats.game_length_hist.counts()[7], 1);
        assert_eq!(stats.outcomes.count(OutcomeClass::Player1Win.index()), 1);
        // Stage k looks at state k: even states belong to player 0.
        assert_eq!(stats.value_accuracy[0].avg(), 1.0);
        assert_eq!(stats.value_accuracy[1].avg(), 0.0);
        assert_eq!(stats.value_prediction[3].avg(), 0.5);
    }

    #[test]
    fn test_step_stats_empty_trajectory() {
        let mut stats = StepStats::new(4);
        stats.record(&Trajectory {
            states: Vec::new(),
            returns: vec![0.0, 0.0],
        });
        assert_eq!(stats.outcomes.count(OutcomeClass::Draw.index()), 1);
        assert_eq!(stats.value_accuracy[0].num(), 0);
    }

    #[test]
    fn test_one_step_trains_and_logs() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let queue = Arc::new(BoundedQueue::new(config.queue_capacity()));
        for len in [2, 3] {
            assert!(queue.push(trajectory(len, 1.0), Duration::ZERO));
        }

        let learner = Learner::new(
            &config,
            devices(&dir),
            Arc::clone(&queue),
            StopToken::new(),
            StartInfo::fresh(),
            10,
        )
        .unwrap();
        let summary = learner.run().unwrap();

        assert_eq!(summary.steps, 1);
        assert_eq!(summary.last_step, 1);
        assert_eq!(summary.total_trajectories, 2);
        assert_eq!(summary.total_states, 5);
        assert_eq!(summary.last_loss.batches(), 2);

        assert!(dir.path().join(REPLAY_FILE).exists());
        assert!(dir.path().join("checkpoint--1.bin").exists());
        assert!(dir.path().join("checkpoint-1.bin").exists());

        let log = std::fs::read_to_string(dir.path().join("learner.jsonl")).unwrap();
        let record: Value = serde_json::from_str(log.lines().last().unwrap()).unwrap();
        assert_eq!(record["step"], 1);
        assert_eq!(record["total_trajectories"], 2);
        assert_eq!(record["outcomes"]["counts"][0], 2);
        assert_eq!(record["value_accuracy"].as_array().unwrap().len(), VALUE_STAGES);
        assert!(record["loss"]["sum"].as_f64().is_some());
    }

    #[test]
    fn test_stop_during_collection_skips_training() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let queue = Arc::new(BoundedQueue::new(4));
        let stop = StopToken::new();

        let learner = Learner::new(
            &config,
            devices(&dir),
            Arc::clone(&queue),
            stop.clone(),
            StartInfo::fresh(),
            10,
        )
        .unwrap();
        let handle = std::thread::spawn(move || learner.run());
        std::thread::sleep(Duration::from_millis(20));
        stop.stop();

        let summary = handle.join().unwrap().unwrap();
        assert_eq!(summary.steps, 0);
        assert!(!dir.path().join(REPLAY_FILE).exists());
    }

    #[test]
    fn test_closed_queue_ends_run() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir).with_max_steps(0);
        let queue: Arc<BoundedQueue<Trajectory>> = Arc::new(BoundedQueue::new(4));
        queue.close();

        let learner =
            Learner::new(&config, devices(&dir), queue, StopToken::new(), StartInfo::fresh(), 10).unwrap();
        assert_eq!(learner.run().unwrap().steps, 0);
    }

    #[test]
    fn test_resume_restores_replay() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let saved = ReplayBuffer::new(8);
        saved.extend(trajectory(3, 1.0).training_examples(1.0, 0));
        saved.save(dir.path().join(REPLAY_FILE)).unwrap();

        let start = StartInfo {
            start_step: 5,
            model_checkpoint: CheckpointId::MostRecent,
            total_trajectories: 10,
            ..StartInfo::fresh()
        };
        let learner = Learner::new(
            &config,
            devices(&dir),
            Arc::new(BoundedQueue::new(4)),
            StopToken::new(),
            start,
            10,
        )
        .unwrap();
        assert_eq!(learner.replay().len(), 3);
    }

    #[test]
    fn test_resume_without_snapshot_fails() {
        let dir = TempDir::new().unwrap();
        let start = StartInfo {
            start_step: 2,
            ..StartInfo::fresh()
        };
        let result = Learner::new(
            &config(&dir),
            devices(&dir),
            Arc::new(BoundedQueue::new(4)),
            StopToken::new(),
            start,
            10,
        );
        assert!(result.is_err());
    }
}
