//! Game rules interface.
//!
//! Games implement `Game` and `GameState` to define:
//! - Turn order, including chance nodes
//! - Legal actions and how they modify state
//! - Returns, observations and canonical position keys
//!
//! The training pipeline calls into these traits but never interprets
//! game-specific concepts directly.

pub mod engine;

pub use engine::{Action, ChanceOutcomes, Game, GameProperties, GameState, Turn};
