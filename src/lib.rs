//! # selfplay-trainer
//!
//! Self-play training orchestration for value networks on two-player,
//! zero-sum games with chance.
//!
//! ## Design Principles
//!
//! 1. **Game-Agnostic**: The pipeline only talks to `Game`/`GameState`.
//!    Rules, observations and cache keys belong to the game.
//!
//! 2. **Model-Agnostic**: Replicas are `ValueEstimator` trait objects. The
//!    pipeline never sees an architecture, only observations, targets and
//!    checkpoint locators.
//!
//! 3. **Explicit Workers**: Actors, benchmark workers, inference threads and
//!    the learner are plain structs owning `Arc` handles, run on named OS
//!    threads and stopped cooperatively through a `StopToken`.
//!
//! ## Architecture
//!
//! - **Producer/consumer**: actors push trajectories into a bounded queue;
//!   a single learner drains it into a replay buffer.
//!
//! - **Shared inference**: every worker evaluates positions through one
//!   `BatchedEvaluator`, which batches, deduplicates and caches requests.
//!
//! - **Device loans**: replica 0 is lent to the learner for training and may
//!   be kept free of inference until the new checkpoint has reached every
//!   other replica.
//!
//! ## Modules
//!
//! - `core`: Configuration, errors, RNG streams, cancellation
//! - `rules`: `Game`/`GameState` traits
//! - `games`: Reference game (`DiceRace`)
//! - `nn`: Estimator trait, device manager, batched evaluator, cache
//! - `search`: Move selection (`OnePlySearch`, `RolloutSearch`)
//! - `training`: Trajectories, TD-lambda, queue, replay, workers, learner,
//!   orchestrator

pub mod core;
pub mod games;
pub mod nn;
pub mod rules;
pub mod search;
pub mod training;

// Re-export commonly used types
pub use crate::core::{BackpressurePolicy, Result, StopToken, TrainError, TrainRng, TrainerConfig};

pub use crate::rules::{Action, Game, GameProperties, GameState, Turn};

pub use crate::nn::{
    BatchedEvaluator, CheckpointId, DeviceManager, EvaluatorConfig, LinearValueModel, LossInfo,
    ValueEstimator,
};

pub use crate::search::{OnePlySearch, PositionEvaluator, RolloutSearch, SearchProcedure, SearchResult};

pub use crate::training::{
    BoundedQueue, Orchestrator, ReplayBuffer, RunSummary, Trajectory, TrainingExample,
};
