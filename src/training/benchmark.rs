//! Benchmark evaluation against rollout opponents of increasing strength.

use std::sync::Arc;

use log::{debug, info};
use parking_lot::Mutex;
use serde_json::{json, Value};

use super::actor::play_game;
use super::stats::CircularBuffer;
use crate::core::{StopToken, TrainRng, TrainerConfig};
use crate::rules::Game;
use crate::search::{OnePlySearch, PositionEvaluator, RolloutSearch, SearchProcedure};

#[derive(Debug)]
struct Tiers {
    results: Vec<CircularBuffer<f64>>,
    eval_num: u64,
}

/// Rolling benchmark results, one window per difficulty tier.
///
/// Assignments cycle through every (tier, seat) pair so each tier sees the
/// learned player moving first and second equally often.
#[derive(Debug)]
pub struct EvalResults {
    tiers: Mutex<Tiers>,
}

impl EvalResults {
    /// # Panics
    /// Panics if `levels` is zero.
    pub fn new(levels: usize, window: usize) -> Self {
        assert!(levels > 0, "EvalResults needs at least one level");
        Self {
            tiers: Mutex::new(Tiers {
                results: (0..levels).map(|_| CircularBuffer::new(window)).collect(),
                eval_num: 0,
            }),
        }
    }

    #[must_use]
    pub fn levels(&self) -> usize {
        self.tiers.lock().results.len()
    }

    /// Next assignment: `(difficulty, learned_player_moves_first)`.
    pub fn next(&self) -> (usize, bool) {
        let mut tiers = self.tiers.lock();
        let slots = (tiers.results.len() * 2) as u64;
        let n = (tiers.eval_num % slots) as usize;
        tiers.eval_num += 1;
        (n / 2, n % 2 == 1)
    }

    /// Record the learned player's return in a game at `difficulty`.
    ///
    /// # Panics
    /// Panics if `difficulty` is not a valid tier.
    pub fn add(&self, difficulty: usize, value: f64) {
        self.tiers.lock().results[difficulty].push(value);
    }

    /// Completed passes over all tiers.
    #[must_use]
    pub fn eval_count(&self) -> u64 {
        let tiers = self.tiers.lock();
        tiers.eval_num / tiers.results.len() as u64
    }

    /// Mean return per tier over its window.
    pub fn avg_results(&self) -> Vec<f64> {
        self.tiers.lock().results.iter().map(CircularBuffer::avg).collect()
    }

    /// `{count, results}` as written to the learner log.
    pub fn to_json(&self) -> Value {
        json!({
            "count": self.eval_count(),
            "results": self.avg_results(),
        })
    }
}

/// Simulation budget of the opponent at `difficulty`: the base budget scaled
/// by `10^(difficulty / 2)`.
#[must_use]
pub fn opponent_simulations(max_simulations: usize, difficulty: usize) -> usize {
    let scale = 10f64.powf(difficulty as f64 / 2.0);
    ((max_simulations as f64) * scale).round().max(1.0) as usize
}

/// Plays the greedy learned player against rollout opponents until stopped.
pub struct BenchmarkWorker<G: Game> {
    id: usize,
    game: Arc<G>,
    evaluator: Arc<dyn PositionEvaluator<G::State>>,
    results: Arc<EvalResults>,
    stop: StopToken,
    rng: TrainRng,
    max_simulations: usize,
}

impl<G: Game> BenchmarkWorker<G> {
    pub fn new(
        id: usize,
        game: Arc<G>,
        evaluator: Arc<dyn PositionEvaluator<G::State>>,
        results: Arc<EvalResults>,
        stop: StopToken,
        config: &TrainerConfig,
    ) -> Self {
        Self {
            id,
            game,
            evaluator,
            results,
            stop,
            rng: TrainRng::new(config.seed).for_worker("evaluator", id),
            max_simulations: config.max_simulations,
        }
    }

    /// Play one benchmark game and return the learned player's result.
    pub fn play_one(&mut self, difficulty: usize, learned_first: bool) -> f64 {
        let learned: Box<dyn SearchProcedure<G::State>> =
            Box::new(OnePlySearch::new(Arc::clone(&self.evaluator)));
        let opponent: Box<dyn SearchProcedure<G::State>> = Box::new(RolloutSearch::new(
            opponent_simulations(self.max_simulations, difficulty),
        ));
        let (mut players, learned_seat) = if learned_first {
            (vec![learned, opponent], 0)
        } else {
            (vec![opponent, learned], 1)
        };

        // Benchmark games always run to the end.
        let no_cutoff = self.game.max_utility() + 1.0;
        let trajectory = play_game(
            self.game.as_ref(),
            &mut players,
            self.evaluator.as_ref(),
            &mut self.rng,
            no_cutoff,
        );
        trajectory.returns[learned_seat]
    }

    /// Play benchmark games until stopped. Returns the number played.
    pub fn run(mut self) -> u64 {
        let mut games = 0;
        while !self.stop.is_stopped() {
            let (difficulty, learned_first) = self.results.next();
            let value = self.play_one(difficulty, learned_first);
            self.results.add(difficulty, value);
            games += 1;
            debug!(
                "evaluator-{}: difficulty {} first {} result {:+.2}",
                self.id, difficulty, learned_first, value
            );
        }
        info!("evaluator-{} stopping after {} games", self.id, games);
        games
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::dice_race::{DiceRace, DiceRaceState};

    struct Zero;

    impl PositionEvaluator<DiceRaceState> for Zero {
        fn value(&self, _state: &DiceRaceState) -> f32 {
            0.0
        }
    }

    #[test]
    fn test_next_cycles_tiers_and_seats() {
        let results = EvalResults::new(2, 10);
        let seen: Vec<_> = (0..5).map(|_| results.next()).collect();
        assert_eq!(
            seen,
            vec![(0, false), (0, true), (1, false), (1, true), (0, false)]
        );
        // Five assignments over two tiers.
        assert_eq!(results.eval_count(), 2);
    }

    #[test]
    fn test_avg_results_per_tier() {
        let results = EvalResults::new(3, 2);
        results.add(0, 1.0);
        results.add(0, -1.0);
        results.add(1, 1.0);
        results.add(1, 1.0);
        // Window of two: the first 1.0 falls out.
        results.add(1, 0.0);

        assert_eq!(results.avg_results(), vec![0.0, 0.5, 0.0]);
    }

    #[test]
    fn test_to_json_shape() {
        let results = EvalResults::new(1, 4);
        results.next();
        results.add(0, 1.0);
        let json = results.to_json();
        assert_eq!(json["count"], 1);
        assert_eq!(json["results"][0], 1.0);
    }

    #[test]
    fn test_opponent_budget_grows_with_difficulty() {
        assert_eq!(opponent_simulations(10, 0), 10);
        assert_eq!(opponent_simulations(10, 2), 100);
        assert_eq!(opponent_simulations(10, 1), 32);
        assert_eq!(opponent_simulations(0, 0), 1);
    }

    #[test]
    fn test_play_one_returns_learned_result() {
        let config = TrainerConfig::default().with_eval(2, 10, 2);
        let mut worker = BenchmarkWorker::new(
            0,
            Arc::new(DiceRace::new().with_goal(3)),
            Arc::new(Zero),
            Arc::new(EvalResults::new(2, 10)),
            StopToken::new(),
            &config,
        );
        for first in [true, false] {
            let value = worker.play_one(0, first);
            assert!([-1.0, 0.0, 1.0].contains(&value));
        }
    }

    #[test]
    fn test_run_records_results_until_stopped() {
        let config = TrainerConfig::default().with_eval(1, 10, 1);
        let results = Arc::new(EvalResults::new(1, 10));
        let stop = StopToken::new();
        let worker = BenchmarkWorker::new(
            0,
            Arc::new(DiceRace::new().with_goal(2)),
            Arc::new(Zero),
            Arc::clone(&results),
            stop.clone(),
            &config,
        );

        let handle = std::thread::spawn(move || worker.run());
        while results.eval_count() < 2 {
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        stop.stop();
        let games = handle.join().unwrap();
        assert!(games >= 2);
    }
}
