//! Wiring and lifecycle of a training run.
//!
//! ## Startup
//!
//! 1. Normalise the configuration and write `config.json`
//! 2. Find the start point: fresh, or the step after the last `learner.jsonl`
//!    record
//! 3. Build the primary replicas (and auxiliary ones if configured), then
//!    load the start checkpoint into all of them
//! 4. Start the evaluators, the actor and benchmark threads, and run the
//!    learner on the calling thread
//!
//! ## Shutdown
//!
//! Stop token, then close and clear the queue so no producer stays blocked,
//! then join every worker.

use std::fs;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{error, info};

use super::actor::{Actor, ActorReport};
use super::benchmark::{BenchmarkWorker, EvalResults};
use super::learner::{Learner, LearnerSummary};
use super::queue::BoundedQueue;
use super::telemetry::StartInfo;
use super::trajectory::Trajectory;
use crate::core::{Result, StopToken, TrainError, TrainerConfig};
use crate::nn::{BatchedEvaluator, DeviceManager, EvaluatorConfig, ValueEstimator};
use crate::rules::Game;
use crate::search::PositionEvaluator;

/// File name of the normalised configuration inside the experiment directory.
pub const CONFIG_FILE: &str = "config.json";

/// What a finished run did.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunSummary {
    pub learner: LearnerSummary,
    /// Per-actor game and drop counts, in actor order.
    pub actors: Vec<ActorReport>,
    /// Benchmark games played by all evaluator threads.
    pub benchmark_games: u64,
}

impl RunSummary {
    /// Self-play games over all actors.
    #[must_use]
    pub fn games(&self) -> u64 {
        self.actors.iter().map(|r| r.games).sum()
    }

    /// Trajectories lost to backpressure over all actors.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.actors.iter().map(|r| r.dropped).sum()
    }
}

#[derive(Default)]
struct Workers {
    actors: Vec<JoinHandle<ActorReport>>,
    benchmarks: Vec<JoinHandle<u64>>,
}

/// Owns the configuration, the game and the run's stop token.
pub struct Orchestrator<G: Game> {
    config: TrainerConfig,
    game: Arc<G>,
    stop: StopToken,
}

impl<G: Game> Orchestrator<G> {
    /// Check the configuration and the game before anything starts.
    pub fn new(config: TrainerConfig, game: G) -> Result<Self> {
        config.validate()?;
        game.properties().check_supported(game.name())?;
        Ok(Self {
            config,
            game: Arc::new(game),
            stop: StopToken::new(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Handle for stopping the run from another thread. The token stays
    /// stopped once the run ends.
    #[must_use]
    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }

    /// Run training to completion.
    ///
    /// `model_factory` builds one replica per device name. With `resuming`
    /// the run continues from the experiment directory's learner log, replay
    /// snapshot and most recent checkpoint.
    pub fn run<F>(&self, mut model_factory: F, resuming: bool) -> Result<RunSummary>
    where
        F: FnMut(&str) -> Result<Arc<dyn ValueEstimator>>,
    {
        let config = self.config.clone().normalized();
        config.validate()?;
        fs::create_dir_all(&config.path).map_err(|e| TrainError::io(&config.path, e))?;
        config.save(config.path.join(CONFIG_FILE))?;

        let start = if resuming {
            StartInfo::from_learner_log(&config.path)?
        } else {
            StartInfo::fresh()
        };
        info!(
            "Starting {} at step {} from checkpoint {} in {}",
            self.game.name(),
            start.start_step,
            start.model_checkpoint,
            config.path.display()
        );

        let devices = Arc::new(build_devices(&config.devices, &mut model_factory)?);
        let auxiliary = if config.inference_devices.is_empty() {
            None
        } else {
            Some(Arc::new(build_devices(&config.inference_devices, &mut model_factory)?))
        };
        info!(
            "Devices: {:?}, inference devices: {:?}",
            devices.device_names(),
            auxiliary.as_ref().map(|a| a.device_names()).unwrap_or_default()
        );

        let locator = {
            let primary = devices.get(0, Some(0));
            if !start.is_resume() {
                primary.save_checkpoint(start.model_checkpoint)?;
            }
            primary.checkpoint_locator(start.model_checkpoint)
        };
        devices.load_checkpoint_all(&locator, false)?;
        if let Some(auxiliary) = &auxiliary {
            auxiliary.load_checkpoint_all(&locator, false)?;
        }
        info!("Replicas synchronised on {locator}");

        let eval_config = EvaluatorConfig::from_trainer(&config);
        let learner_eval = Arc::new(BatchedEvaluator::new(Arc::clone(&devices), eval_config.clone())?);
        let worker_eval = match &auxiliary {
            Some(auxiliary) => Arc::new(BatchedEvaluator::new(Arc::clone(auxiliary), eval_config)?),
            None => Arc::clone(&learner_eval),
        };

        let queue = Arc::new(BoundedQueue::new(config.queue_capacity()));
        let eval_results = Arc::new(EvalResults::new(
            config.eval_levels.max(1),
            config.evaluation_window,
        ));

        let mut learner = Learner::new(
            &config,
            Arc::clone(&devices),
            Arc::clone(&queue),
            self.stop.clone(),
            start,
            self.game.max_game_length(),
        )?
        .with_inference(Arc::clone(&worker_eval))
        .with_inference(Arc::clone(&learner_eval))
        .with_eval_results(Arc::clone(&eval_results));
        if let Some(auxiliary) = &auxiliary {
            learner = learner.with_auxiliary_devices(Arc::clone(auxiliary));
        }

        let mut workers = Workers::default();
        let result = self
            .spawn_workers(&config, &worker_eval, &queue, &eval_results, &mut workers)
            .and_then(|()| learner.run());

        let (actors, benchmark_games) = self.shutdown(&queue, workers);
        let learner = result?;
        info!(
            "Run finished: {} steps, {} self-play games, {} benchmark games",
            learner.steps,
            actors.iter().map(|r| r.games).sum::<u64>(),
            benchmark_games
        );
        Ok(RunSummary {
            learner,
            actors,
            benchmark_games,
        })
    }

    fn spawn_workers(
        &self,
        config: &TrainerConfig,
        worker_eval: &Arc<BatchedEvaluator>,
        queue: &Arc<BoundedQueue<Trajectory>>,
        eval_results: &Arc<EvalResults>,
        workers: &mut Workers,
    ) -> Result<()> {
        for i in 0..config.actors {
            let evaluator: Arc<dyn PositionEvaluator<G::State>> = Arc::clone(worker_eval) as _;
            let actor = Actor::new(
                i,
                Arc::clone(&self.game),
                evaluator,
                Arc::clone(queue),
                self.stop.clone(),
                config,
            );
            let name = format!("actor-{i}");
            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || actor.run())
                .map_err(|e| TrainError::spawn(name, e))?;
            workers.actors.push(handle);
        }

        for i in 0..config.evaluators {
            let evaluator: Arc<dyn PositionEvaluator<G::State>> = Arc::clone(worker_eval) as _;
            let worker = BenchmarkWorker::new(
                i,
                Arc::clone(&self.game),
                evaluator,
                Arc::clone(eval_results),
                self.stop.clone(),
                config,
            );
            let name = format!("evaluator-{i}");
            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker.run())
                .map_err(|e| TrainError::spawn(name, e))?;
            workers.benchmarks.push(handle);
        }
        info!(
            "Started {} actors and {} evaluators",
            workers.actors.len(),
            workers.benchmarks.len()
        );
        Ok(())
    }

    fn shutdown(&self, queue: &BoundedQueue<Trajectory>, workers: Workers) -> (Vec<ActorReport>, u64) {
        info!("Shutting down");
        self.stop.stop();
        queue.close();
        queue.clear();

        let mut actors = Vec::with_capacity(workers.actors.len());
        for (i, handle) in workers.actors.into_iter().enumerate() {
            match handle.join() {
                Ok(report) => actors.push(report),
                Err(_) => error!("actor-{i} panicked"),
            }
        }
        let mut benchmark_games = 0;
        for (i, handle) in workers.benchmarks.into_iter().enumerate() {
            match handle.join() {
                Ok(games) => benchmark_games += games,
                Err(_) => error!("evaluator-{i} panicked"),
            }
        }
        info!("All workers joined");
        (actors, benchmark_games)
    }
}

fn build_devices<F>(names: &[String], model_factory: &mut F) -> Result<DeviceManager>
where
    F: FnMut(&str) -> Result<Arc<dyn ValueEstimator>>,
{
    let mut devices = DeviceManager::new();
    for name in names {
        devices.add_device(model_factory(name)?);
    }
    Ok(devices)
}
