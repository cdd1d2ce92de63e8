//! Self-play training pipeline.
//!
//! ## Overview
//!
//! - **Actors** play games against themselves and push `Trajectory`s into a
//!   `BoundedQueue`
//! - The **Learner** drains the queue, turns trajectories into TD-lambda
//!   targets in a `ReplayBuffer`, trains replica 0, checkpoints and
//!   propagates the new weights
//! - **Benchmark workers** keep playing the learned model against rollout
//!   opponents and report rolling results in `EvalResults`
//! - The **Orchestrator** wires everything up and shuts it down in order
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use selfplay_trainer::core::TrainerConfig;
//! use selfplay_trainer::games::dice_race::DiceRace;
//! use selfplay_trainer::nn::{LinearValueModel, ValueEstimator};
//! use selfplay_trainer::rules::Game;
//! use selfplay_trainer::training::Orchestrator;
//!
//! let config = TrainerConfig::new("experiment").with_max_steps(10);
//! let game = DiceRace::new();
//! let inputs = game.observation_size();
//!
//! let orchestrator = Orchestrator::new(config, game).unwrap();
//! let summary = orchestrator
//!     .run(
//!         |device| {
//!             Ok(Arc::new(LinearValueModel::new(device, "experiment", inputs))
//!                 as Arc<dyn ValueEstimator>)
//!         },
//!         false,
//!     )
//!     .unwrap();
//! println!("trained {} steps", summary.learner.steps);
//! ```

pub mod actor;
pub mod benchmark;
pub mod learner;
pub mod orchestrator;
pub mod queue;
pub mod replay;
pub mod stats;
pub mod telemetry;
pub mod trajectory;

// Re-export main types
pub use actor::{evaluate_luck, play_game, Actor, ActorReport};
pub use benchmark::{opponent_simulations, BenchmarkWorker, EvalResults};
pub use learner::{Learner, LearnerSummary, REPLAY_FILE};
pub use orchestrator::{Orchestrator, RunSummary, CONFIG_FILE};
pub use queue::BoundedQueue;
pub use replay::ReplayBuffer;
pub use stats::{BasicStats, CircularBuffer, HistogramNamed, HistogramNumbered};
pub use telemetry::{DataLogger, StartInfo, LEARNER_LOG};
pub use trajectory::{td_lambda_return, OutcomeClass, StepRecord, Trajectory, TrainingExample};
