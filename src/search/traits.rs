//! Search and leaf-evaluation interfaces.

use std::sync::Arc;

use crate::core::TrainRng;
use crate::rules::{Action, GameState};

// =============================================================================
// Leaf evaluation
// =============================================================================

/// Value of a position, from player 0's perspective, in `[-1, 1]`.
pub trait PositionEvaluator<S>: Send + Sync {
    fn value(&self, state: &S) -> f32;
}

impl<S, E: PositionEvaluator<S> + ?Sized> PositionEvaluator<S> for Arc<E> {
    fn value(&self, state: &S) -> f32 {
        (**self).value(state)
    }
}

// =============================================================================
// Search procedure
// =============================================================================

/// Outcome of one search at a decision node.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SearchResult {
    /// Action to play.
    pub action: Action,
    /// Estimated value of the position after `action`, from the acting
    /// player's perspective.
    pub value: f64,
    /// The position after `action` is a chance node.
    pub leads_to_chance: bool,
}

/// Chooses a move at a decision node.
///
/// One instance per worker; implementations may keep per-game state.
pub trait SearchProcedure<S: GameState>: Send {
    fn search(&mut self, state: &S, rng: &mut TrainRng) -> SearchResult;
}

/// Expected player-0 value of `state`: exact at terminal nodes, averaged over
/// outcomes at chance nodes, estimated elsewhere.
pub fn expected_value<S: GameState>(state: &S, evaluator: &dyn PositionEvaluator<S>) -> f64 {
    if state.is_terminal() {
        return state.returns()[0];
    }
    if state.is_chance_node() {
        return state
            .chance_outcomes()
            .iter()
            .map(|&(outcome, p)| p * expected_value(&state.child(outcome), evaluator))
            .sum();
    }
    f64::from(evaluator.value(state))
}

/// Flip a player-0 value to `player`'s perspective.
#[inline]
#[must_use]
pub fn for_player(value: f64, player: usize) -> f64 {
    if player == 0 {
        value
    } else {
        -value
    }
}
