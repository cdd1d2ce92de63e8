//! Game and state traits consumed by the training pipeline.
//!
//! The pipeline never interprets game-specific concepts. It needs:
//! - an initial state and a few static properties (`Game`)
//! - turn classification, legal actions, chance distributions, returns,
//!   a fixed-length observation and a canonical position key (`GameState`)
//!
//! Simulation is clone-per-trial: callers clone a state, apply an action to
//! the clone and drop it. Every clone is owned by whoever made it.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::core::{Result, TrainError};

/// A move or chance outcome, encoded as a game-specific integer.
pub type Action = u32;

/// Chance outcomes with their probabilities. Most games have a handful.
pub type ChanceOutcomes = SmallVec<[(Action, f64); 8]>;

/// Who acts next.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Turn {
    /// Nature draws from `chance_outcomes`.
    Chance,
    /// The given player chooses from `legal_actions`.
    Player(usize),
    /// The game is over; `returns` is final.
    Terminal,
}

/// Static properties used to reject games the pipeline cannot train on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameProperties {
    pub num_players: usize,
    pub zero_sum: bool,
    pub sequential: bool,
    pub terminal_rewards: bool,
}

impl GameProperties {
    /// Two-player, zero-sum, sequential, terminal-reward.
    #[must_use]
    pub const fn two_player_zero_sum() -> Self {
        Self {
            num_players: 2,
            zero_sum: true,
            sequential: true,
            terminal_rewards: true,
        }
    }

    /// Check that a single scalar value estimator can learn this game.
    pub fn check_supported(&self, name: &str) -> Result<()> {
        let reject = |why: &str| Err(TrainError::UnsupportedGame(format!("{name}: {why}")));

        if self.num_players != 2 {
            return reject("only 2-player games are supported");
        }
        if !self.zero_sum {
            return reject("game must be zero-sum");
        }
        if !self.sequential {
            return reject("game must have sequential turns");
        }
        if !self.terminal_rewards {
            return reject("game must have terminal rewards");
        }
        Ok(())
    }
}

/// One position of a game.
///
/// Values, returns and luck are always expressed from player 0's perspective
/// unless a method says otherwise.
pub trait GameState: Clone + Send + Sync + 'static {
    /// Who acts next.
    fn turn(&self) -> Turn;

    /// Legal actions of the acting player. Empty at chance and terminal nodes.
    fn legal_actions(&self) -> Vec<Action>;

    /// Outcome distribution at a chance node. Empty elsewhere.
    fn chance_outcomes(&self) -> ChanceOutcomes;

    /// Apply a move or chance outcome in place.
    fn apply_action(&mut self, action: Action);

    /// Per-player payoff. All zeros before the game ends.
    fn returns(&self) -> Vec<f64>;

    /// Fixed-length numeric encoding used as estimator input.
    fn observation(&self) -> Vec<f32>;

    /// Canonical serialization of everything the value depends on.
    ///
    /// Two states with equal keys must have equal values; the inference cache
    /// relies on it.
    fn cache_key(&self) -> String;

    /// Human-readable action, for logs.
    fn action_to_string(&self, action: Action) -> String {
        action.to_string()
    }

    fn is_terminal(&self) -> bool {
        self.turn() == Turn::Terminal
    }

    fn is_chance_node(&self) -> bool {
        self.turn() == Turn::Chance
    }

    /// Clone with `action` applied.
    #[must_use]
    fn child(&self, action: Action) -> Self {
        let mut next = self.clone();
        next.apply_action(action);
        next
    }
}

/// A game definition: static properties and the initial state.
pub trait Game: Send + Sync + 'static {
    type State: GameState;

    /// Short name, for logs.
    fn name(&self) -> &str;

    fn properties(&self) -> GameProperties;

    fn new_initial_state(&self) -> Self::State;

    /// Length of `GameState::observation`.
    fn observation_size(&self) -> usize;

    /// Largest absolute return a player can receive.
    fn max_utility(&self) -> f64;

    /// Upper bound on decisions per game, used to size histograms.
    fn max_game_length(&self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_player_zero_sum_supported() {
        assert!(GameProperties::two_player_zero_sum().check_supported("x").is_ok());
    }

    #[test]
    fn test_rejects_multiplayer() {
        let props = GameProperties {
            num_players: 3,
            ..GameProperties::two_player_zero_sum()
        };
        let err = props.check_supported("hearts").unwrap_err();
        assert!(matches!(err, TrainError::UnsupportedGame(_)));
        assert!(err.to_string().contains("hearts"));
    }

    #[test]
    fn test_rejects_simultaneous() {
        let props = GameProperties {
            sequential: false,
            ..GameProperties::two_player_zero_sum()
        };
        assert!(props.check_supported("rps").is_err());
    }

    #[test]
    fn test_rejects_intermediate_rewards() {
        let props = GameProperties {
            terminal_rewards: false,
            ..GameProperties::two_player_zero_sum()
        };
        assert!(props.check_supported("catch").is_err());
    }
}
