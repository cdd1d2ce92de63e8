//! Core pipeline types: errors, cancellation, RNG streams, configuration.
//!
//! Everything here is independent of the game, the model and the search;
//! the rest of the crate builds on these.

pub mod config;
pub mod error;
pub mod rng;
pub mod stop;

pub use config::{BackpressurePolicy, TrainerConfig};
pub use error::{Result, TrainError};
pub use rng::TrainRng;
pub use stop::StopToken;
