//! Random-rollout baseline.
//!
//! Spreads a fixed simulation budget over the legal actions and plays each
//! simulation out with uniformly random moves and sampled chance outcomes.
//! Does not use a learned model; strength grows with the budget, which is
//! what the benchmark tiers scale.

use super::traits::{for_player, SearchProcedure, SearchResult};
use crate::core::TrainRng;
use crate::rules::{GameState, Turn};

#[derive(Clone, Debug)]
pub struct RolloutSearch {
    simulations: usize,
}

impl RolloutSearch {
    /// Baseline with `simulations` rollouts per move (at least one per action).
    pub fn new(simulations: usize) -> Self {
        Self { simulations }
    }

    #[must_use]
    pub fn simulations(&self) -> usize {
        self.simulations
    }
}

/// Play `state` to the end at random; player-0 return.
pub fn random_playout<S: GameState>(state: &S, rng: &mut TrainRng) -> f64 {
    let mut state = state.clone();
    loop {
        match state.turn() {
            Turn::Terminal => return state.returns()[0],
            Turn::Chance => {
                let outcomes = state.chance_outcomes();
                let weights: Vec<f64> = outcomes.iter().map(|&(_, p)| p).collect();
                let i = rng.choose_weighted(&weights).unwrap_or(0);
                state.apply_action(outcomes[i].0);
            }
            Turn::Player(_) => {
                let actions = state.legal_actions();
                let action = actions[rng.gen_index(actions.len())];
                state.apply_action(action);
            }
        }
    }
}

impl<S: GameState> SearchProcedure<S> for RolloutSearch {
    fn search(&mut self, state: &S, rng: &mut TrainRng) -> SearchResult {
        let player = match state.turn() {
            Turn::Player(p) => p,
            other => panic!("RolloutSearch called at a {other:?} node"),
        };
        let actions = state.legal_actions();
        assert!(!actions.is_empty(), "No legal actions at a decision node");

        let per_action = (self.simulations / actions.len()).max(1);
        let mut best = (actions[0], f64::NEG_INFINITY);
        for &action in &actions {
            let child = state.child(action);
            let total: f64 = (0..per_action).map(|_| random_playout(&child, rng)).sum();
            let value = for_player(total / per_action as f64, player);
            if value > best.1 {
                best = (action, value);
            }
        }

        SearchResult {
            action: best.0,
            value: best.1,
            leads_to_chance: state.child(best.0).is_chance_node(),
        }
    }
}
