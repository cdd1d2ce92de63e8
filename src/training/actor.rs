//! Self-play: the shared game driver and the actor worker.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, trace, warn};

use super::queue::BoundedQueue;
use super::trajectory::{StepRecord, Trajectory};
use crate::core::{BackpressurePolicy, StopToken, TrainRng, TrainerConfig};
use crate::rules::{Action, Game, GameState, Turn};
use crate::search::{expected_value, OnePlySearch, PositionEvaluator, SearchProcedure};

// =============================================================================
// Game driver
// =============================================================================

/// Value swing of chance outcome `outcome` at `state`, from player 0's view:
/// the outcome's value minus the probability-weighted mean over all outcomes.
///
/// # Panics
/// Panics if `state` is not a chance node or `outcome` is not one of its
/// outcomes.
pub fn evaluate_luck<S: GameState>(
    state: &S,
    outcome: Action,
    evaluator: &dyn PositionEvaluator<S>,
) -> f64 {
    assert!(state.is_chance_node(), "evaluate_luck needs a chance node");
    let mut mean = 0.0;
    let mut chosen = None;
    for &(candidate, p) in state.chance_outcomes().iter() {
        let value = expected_value(&state.child(candidate), evaluator);
        if candidate == outcome {
            assert!(chosen.is_none(), "Duplicate chance outcome {candidate}");
            chosen = Some(value);
        }
        mean += p * value;
    }
    match chosen {
        Some(value) => value - mean,
        None => panic!("Outcome {outcome} is not a chance outcome of this state"),
    }
}

/// Play one game from the initial state.
///
/// Chance nodes are sampled and their luck accumulated. At decision nodes the
/// acting player's search picks the move, recorded with the value it
/// reported. The game ends at a terminal state, or early once a recorded
/// value's magnitude exceeds `cutoff_value`, in which case that value becomes
/// the mover's return.
pub fn play_game<G: Game>(
    game: &G,
    players: &mut [Box<dyn SearchProcedure<G::State>>],
    luck_evaluator: &dyn PositionEvaluator<G::State>,
    rng: &mut TrainRng,
    cutoff_value: f64,
) -> Trajectory {
    let mut state = game.new_initial_state();
    let mut trajectory = Trajectory::new();
    let mut luck = 0.0;

    loop {
        match state.turn() {
            Turn::Terminal => {
                trajectory.returns = state.returns();
                break;
            }
            Turn::Chance => {
                let outcomes = state.chance_outcomes();
                let weights: Vec<f64> = outcomes.iter().map(|&(_, p)| p).collect();
                let i = rng.choose_weighted(&weights).unwrap_or(0);
                let outcome = outcomes[i].0;
                luck += evaluate_luck(&state, outcome, luck_evaluator);
                state.apply_action(outcome);
            }
            Turn::Player(player) => {
                let result = players[player].search(&state, rng);
                trace!(
                    "player {player}: {} value {:.3} luck {:.3}{}",
                    state.action_to_string(result.action),
                    result.value,
                    luck,
                    if result.leads_to_chance { " (chance)" } else { "" }
                );
                trajectory.push(StepRecord {
                    observation: state.observation(),
                    player,
                    action: result.action,
                    value: result.value,
                    accumulated_luck: luck,
                });
                state.apply_action(result.action);

                if state.is_terminal() {
                    trajectory.returns = state.returns();
                    break;
                }
                if result.value.abs() > cutoff_value {
                    let mut returns = vec![0.0; 2];
                    returns[player] = result.value;
                    returns[1 - player] = -result.value;
                    trajectory.returns = returns;
                    break;
                }
            }
        }
    }
    trajectory
}

// =============================================================================
// Actor
// =============================================================================

/// Games played and trajectories lost by one actor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ActorReport {
    pub games: u64,
    pub dropped: u64,
}

/// Self-play worker. Owns handles to everything it touches.
pub struct Actor<G: Game> {
    id: usize,
    game: Arc<G>,
    evaluator: Arc<dyn PositionEvaluator<G::State>>,
    queue: Arc<BoundedQueue<Trajectory>>,
    stop: StopToken,
    rng: TrainRng,
    players: Vec<Box<dyn SearchProcedure<G::State>>>,
    cutoff_probability: f64,
    cutoff_value: f64,
    backpressure: BackpressurePolicy,
    push_timeout: Duration,
}

impl<G: Game> Actor<G> {
    pub fn new(
        id: usize,
        game: Arc<G>,
        evaluator: Arc<dyn PositionEvaluator<G::State>>,
        queue: Arc<BoundedQueue<Trajectory>>,
        stop: StopToken,
        config: &TrainerConfig,
    ) -> Self {
        let players = (0..2)
            .map(|_| {
                Box::new(
                    OnePlySearch::new(Arc::clone(&evaluator)).with_exploration(config.exploration),
                ) as Box<dyn SearchProcedure<G::State>>
            })
            .collect();
        Self {
            id,
            game,
            evaluator,
            queue,
            stop,
            rng: TrainRng::new(config.seed).for_worker("actor", id),
            players,
            cutoff_probability: config.cutoff_probability,
            cutoff_value: config.cutoff_value,
            backpressure: config.backpressure,
            push_timeout: config.push_timeout(),
        }
    }

    /// Play one self-play game.
    pub fn play_one(&mut self) -> Trajectory {
        let cutoff = if self.rng.gen_unit() < self.cutoff_probability {
            self.cutoff_value
        } else {
            self.game.max_utility() + 1.0
        };
        play_game(
            self.game.as_ref(),
            &mut self.players,
            self.evaluator.as_ref(),
            &mut self.rng,
            cutoff,
        )
    }

    /// Play and enqueue games until stopped. The stop token is checked
    /// between games only.
    pub fn run(mut self) -> ActorReport {
        let mut report = ActorReport::default();
        while !self.stop.is_stopped() {
            let trajectory = self.play_one();
            report.games += 1;
            debug!(
                "actor-{} game {}: {} moves, returns {:?}",
                self.id,
                report.games,
                trajectory.len(),
                trajectory.returns
            );

            let pushed = match self.backpressure {
                BackpressurePolicy::Drop => self.queue.push(trajectory, self.push_timeout),
                BackpressurePolicy::Block => self.queue.push_blocking(trajectory),
            };
            if !pushed {
                report.dropped += 1;
                if !self.stop.is_stopped() {
                    warn!(
                        "actor-{}: failed to push a trajectory after {:?}, dropped",
                        self.id, self.push_timeout
                    );
                }
            }
        }
        info!(
            "actor-{} stopping after {} games ({} dropped)",
            self.id, report.games, report.dropped
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::dice_race::{DiceRace, DiceRaceState};
    use crate::search::RolloutSearch;

    /// Player 0 does better the more its runners have advanced.
    struct Progress;

    impl PositionEvaluator<DiceRaceState> for Progress {
        fn value(&self, state: &DiceRaceState) -> f32 {
            let mine: u8 = state.runners(0).iter().sum();
            let theirs: u8 = state.runners(1).iter().sum();
            (f32::from(mine) - f32::from(theirs)) / 20.0
        }
    }

    struct Zero;

    impl PositionEvaluator<DiceRaceState> for Zero {
        fn value(&self, _state: &DiceRaceState) -> f32 {
            0.0
        }
    }

    fn searchers() -> Vec<Box<dyn SearchProcedure<DiceRaceState>>> {
        vec![Box::new(RolloutSearch::new(2)), Box::new(RolloutSearch::new(2))]
    }

    #[test]
    fn test_luck_is_zero_for_flat_evaluator() {
        let state = DiceRace::new().new_initial_state();
        assert_eq!(evaluate_luck(&state, 1, &Zero), 0.0);
    }

    #[test]
    fn test_luck_sums_to_zero_over_outcomes() {
        let game = DiceRace::new();
        // Player 0 rolled 2 and moved; player 1 is about to roll.
        let state = game.new_initial_state().child(1).child(0);
        assert!(state.is_chance_node());

        let outcomes = state.chance_outcomes();
        let total: f64 = outcomes
            .iter()
            .map(|&(o, p)| p * evaluate_luck(&state, o, &Progress))
            .sum();
        assert!(total.abs() < 1e-9);
    }

    #[test]
    fn test_roll_alone_carries_no_luck() {
        let game = DiceRace::new();
        // A roll moves nothing until the runner is chosen, so a positional
        // evaluator sees every outcome as equal.
        let state = game.new_initial_state();
        assert_eq!(evaluate_luck(&state, 2, &Progress), 0.0);
    }

    #[test]
    #[should_panic(expected = "not a chance outcome")]
    fn test_luck_rejects_unknown_outcome() {
        let state = DiceRace::new().new_initial_state();
        evaluate_luck(&state, 9, &Zero);
    }

    #[test]
    fn test_play_game_to_terminal() {
        let game = DiceRace::new().with_goal(4);
        let mut players = searchers();
        let mut rng = TrainRng::new(11);

        let t = play_game(&game, &mut players, &Zero, &mut rng, f64::INFINITY);

        assert_eq!(t.returns.len(), 2);
        assert!(!t.is_empty());
        assert_eq!(t.returns[0], -t.returns[1]);
        for (i, s) in t.states.iter().enumerate() {
            assert_eq!(s.observation.len(), game.observation_size());
            // Players alternate.
            assert_eq!(s.player, i % 2);
            assert_eq!(s.accumulated_luck, 0.0);
        }
    }

    #[test]
    fn test_play_game_cutoff() {
        let game = DiceRace::new();
        let mut players = searchers();
        let mut rng = TrainRng::new(1);

        // Every recorded value beats a negative cutoff.
        let t = play_game(&game, &mut players, &Zero, &mut rng, -1.0);
        assert_eq!(t.len(), 1);
        let v = t.states[0].value;
        assert_eq!(t.returns, vec![v, -v]);
    }

    #[test]
    fn test_actor_run_stops_and_reports() {
        let game = Arc::new(DiceRace::new().with_goal(3));
        let queue = Arc::new(BoundedQueue::new(64));
        let stop = StopToken::new();
        let config = TrainerConfig::default().with_cutoff(0.0, 0.95);

        let actor = Actor::new(
            0,
            game,
            Arc::new(Progress),
            Arc::clone(&queue),
            stop.clone(),
            &config,
        );
        let handle = std::thread::spawn(move || actor.run());
        while queue.len() < 3 {
            std::thread::sleep(Duration::from_millis(1));
        }
        stop.stop();

        let report = handle.join().unwrap();
        assert!(report.games >= 3);
        assert_eq!(report.dropped, 0);
        let t = queue.pop().unwrap();
        assert_eq!(t.returns.len(), 2);
    }

    #[test]
    fn test_actor_drops_when_queue_full() {
        let game = Arc::new(DiceRace::new().with_goal(2));
        let queue = Arc::new(BoundedQueue::new(1));
        let stop = StopToken::new();
        let config = TrainerConfig::default().with_backpressure(BackpressurePolicy::Drop, 1);

        let mut actor = Actor::new(0, game, Arc::new(Zero), Arc::clone(&queue), stop.clone(), &config);
        let first = actor.play_one();
        assert!(queue.push(first, Duration::ZERO));

        // Queue is full: one more game is played and dropped.
        let handle = std::thread::spawn(move || actor.run());
        std::thread::sleep(Duration::from_millis(20));
        stop.stop();
        let report = handle.join().unwrap();

        assert!(report.games >= 1);
        assert_eq!(report.dropped, report.games);
        assert_eq!(queue.len(), 1);
    }
}
