//! Reference game implementations.

pub mod dice_race;
