//! "Dice race": a small two-player stochastic game for exercising the pipeline.
//!
//! - Each player has two runners at position 0 on a track of length `goal`
//! - Every turn starts with a chance node: a die roll of `1..=die_faces`
//! - The player then advances one unfinished runner by the roll
//! - Landing exactly on an opposing runner sends it back to 0
//! - First player with both runners at or past `goal` wins (+1 / -1)
//! - After `max_moves` decisions the game is a draw
//!
//! Small enough that a linear value model learns something within a few
//! steps, random enough that luck accounting matters.

mod game;

pub use game::{DiceRace, DiceRaceState, RUNNERS};
