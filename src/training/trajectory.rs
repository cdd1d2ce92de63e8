//! Self-play records and the TD-lambda target transform.
//!
//! A trajectory records one complete game:
//! - the observation at each decision point and who acted
//! - the estimator's value of the position after the chosen action
//! - the luck accumulated so far from chance outcomes
//! - the final (or early cutoff) returns
//!
//! `td_lambda_return` is the only path from records to training targets.

use serde::{Deserialize, Serialize};

use crate::rules::Action;
use crate::search::for_player;

/// Tolerance for treating lambda as exactly 0 or 1.
const LAMBDA_EPS: f64 = 1e-9;

/// One decision point.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Observation of the position before the action.
    pub observation: Vec<f32>,

    /// Player who acted.
    pub player: usize,

    pub action: Action,

    /// Value of the position after `action`, from `player`'s perspective.
    pub value: f64,

    /// Running sum of chance luck, from player 0's perspective.
    pub accumulated_luck: f64,
}

impl StepRecord {
    /// `value` from player 0's perspective.
    #[inline]
    #[must_use]
    pub fn value_for_player0(&self) -> f64 {
        for_player(self.value, self.player)
    }
}

/// Outcome class of a finished game, from player 0's return.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OutcomeClass {
    Player1Win,
    Player2Win,
    Draw,
}

impl OutcomeClass {
    /// Index into the `["Player1", "Player2", "Draw"]` histogram.
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Self::Player1Win => 0,
            Self::Player2Win => 1,
            Self::Draw => 2,
        }
    }

    pub const NAMES: [&'static str; 3] = ["Player1", "Player2", "Draw"];
}

/// One completed self-play game.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    /// Decision points, in move order.
    pub states: Vec<StepRecord>,

    /// Per-player payoff. Exactly one entry per player once finished.
    pub returns: Vec<f64>,
}

impl Trajectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of decision points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn push(&mut self, step: StepRecord) {
        self.states.push(step);
    }

    #[must_use]
    pub fn outcome_class(&self) -> OutcomeClass {
        let p0 = self.returns.first().copied().unwrap_or(0.0);
        if p0 > 0.0 {
            OutcomeClass::Player1Win
        } else if p0 < 0.0 {
            OutcomeClass::Player2Win
        } else {
            OutcomeClass::Draw
        }
    }

    /// TD-lambda target of every step, as training examples.
    pub fn training_examples(&self, lambda: f64, n_steps: i64) -> Vec<TrainingExample> {
        (0..self.states.len())
            .map(|i| {
                TrainingExample::new(
                    self.states[i].observation.clone(),
                    td_lambda_return(self, i, lambda, n_steps),
                )
            })
            .collect()
    }
}

/// An `(observation, target)` pair stored in the replay buffer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainingExample {
    pub observation: Vec<f32>,
    /// Player-0 target in `[-1, 1]`.
    pub value: f32,
}

impl TrainingExample {
    /// Build an example, clamping the target to `[-1, 1]`.
    pub fn new(observation: Vec<f32>, value: f64) -> Self {
        Self {
            observation,
            value: value.clamp(-1.0, 1.0) as f32,
        }
    }
}

/// Lambda-discounted target of step `index`, from player 0's perspective.
///
/// Blends the step's own value, the luck-corrected values of later steps and
/// the luck-corrected outcome. Later values have the luck accumulated since
/// `index` subtracted, so the target reflects play, not dice. `n_steps > 0`
/// truncates the blend after that many future steps.
///
/// # Panics
/// Panics if `index` is out of range or `returns` is empty.
#[must_use]
pub fn td_lambda_return(trajectory: &Trajectory, index: usize, lambda: f64, n_steps: i64) -> f64 {
    let states = &trajectory.states;
    let start = &states[index];
    let luck = start.accumulated_luck;
    let last_luck = states.last().map_or(luck, |s| s.accumulated_luck);
    let outcome = (trajectory.returns[0] - (last_luck - luck)).clamp(-1.0, 1.0);

    let corrected = |step: &StepRecord| step.value_for_player0() - (step.accumulated_luck - luck);

    if lambda >= 1.0 || (lambda - 1.0).abs() < LAMBDA_EPS {
        if n_steps <= 0 {
            return outcome;
        }
        return match states.get(index + n_steps as usize) {
            Some(step) => corrected(step),
            None => outcome,
        };
    }

    let mut target = start.value_for_player0();
    if lambda <= 0.0 || lambda.abs() < LAMBDA_EPS {
        return target;
    }

    let inv = 1.0 - lambda;
    let mut weight = lambda;
    target *= inv;
    for (j, step) in states.iter().enumerate().skip(index + 1) {
        let value = corrected(step);
        if n_steps > 0 && j == index + n_steps as usize {
            return target + weight * value;
        }
        target += inv * weight * value;
        weight *= lambda;
    }
    target + weight * outcome
}
