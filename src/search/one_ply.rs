//! One-ply expectimax guided by a position evaluator.
//!
//! Scores every legal action by the expected value of its child (averaging
//! over the chance node that follows, if any) and plays the best one. With
//! probability `exploration` a uniformly random legal action is played
//! instead; the recorded value is always the chosen child's value.

use std::sync::Arc;

use super::traits::{expected_value, for_player, PositionEvaluator, SearchProcedure, SearchResult};
use crate::core::TrainRng;
use crate::rules::{GameState, Turn};

pub struct OnePlySearch<S> {
    evaluator: Arc<dyn PositionEvaluator<S>>,
    exploration: f64,
}

impl<S: GameState> OnePlySearch<S> {
    /// Greedy search over `evaluator`.
    pub fn new(evaluator: Arc<dyn PositionEvaluator<S>>) -> Self {
        Self {
            evaluator,
            exploration: 0.0,
        }
    }

    /// Play a random legal move with this probability.
    pub fn with_exploration(mut self, exploration: f64) -> Self {
        self.exploration = exploration.clamp(0.0, 1.0);
        self
    }

    /// Each legal action with its value for the acting player.
    pub fn action_values(&self, state: &S) -> Vec<(crate::rules::Action, f64)> {
        let player = match state.turn() {
            Turn::Player(p) => p,
            other => panic!("OnePlySearch called at a {other:?} node"),
        };
        state
            .legal_actions()
            .into_iter()
            .map(|action| {
                let child = state.child(action);
                let v = expected_value(&child, self.evaluator.as_ref());
                (action, for_player(v, player))
            })
            .collect()
    }
}

impl<S: GameState> SearchProcedure<S> for OnePlySearch<S> {
    fn search(&mut self, state: &S, rng: &mut TrainRng) -> SearchResult {
        let values = self.action_values(state);
        assert!(!values.is_empty(), "No legal actions at a decision node");

        let chosen = if self.exploration > 0.0 && rng.gen_unit() < self.exploration {
            rng.gen_index(values.len())
        } else {
            values
                .iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
                .map_or(0, |(i, _)| i)
        };

        let (action, value) = values[chosen];
        SearchResult {
            action,
            value,
            leads_to_chance: state.child(action).is_chance_node(),
        }
    }
}
