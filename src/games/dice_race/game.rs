//! Dice race implementation.

use crate::rules::{Action, ChanceOutcomes, Game, GameProperties, GameState, Turn};

/// Runners per player.
pub const RUNNERS: usize = 2;

/// Dice race rules. Cheap to clone; shared by every worker.
#[derive(Clone, Debug)]
pub struct DiceRace {
    goal: u8,
    die_faces: u8,
    max_moves: u16,
}

impl Default for DiceRace {
    fn default() -> Self {
        Self {
            goal: 10,
            die_faces: 3,
            max_moves: 200,
        }
    }
}

impl DiceRace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track length a runner has to reach.
    pub fn with_goal(mut self, goal: u8) -> Self {
        assert!(goal > 0, "Goal must be positive");
        self.goal = goal;
        self
    }

    pub fn with_die_faces(mut self, faces: u8) -> Self {
        assert!(faces > 0, "Die needs at least one face");
        self.die_faces = faces;
        self
    }

    /// Decisions after which the game is declared a draw.
    pub fn with_max_moves(mut self, moves: u16) -> Self {
        self.max_moves = moves;
        self
    }
}

impl Game for DiceRace {
    type State = DiceRaceState;

    fn name(&self) -> &str {
        "dice_race"
    }

    fn properties(&self) -> GameProperties {
        GameProperties::two_player_zero_sum()
    }

    fn new_initial_state(&self) -> DiceRaceState {
        DiceRaceState {
            goal: self.goal,
            die_faces: self.die_faces,
            max_moves: self.max_moves,
            runners: [[0; RUNNERS]; 2],
            to_move: 0,
            roll: None,
            moves: 0,
            winner: None,
            drawn: false,
        }
    }

    fn observation_size(&self) -> usize {
        2 * RUNNERS + 1 + self.die_faces as usize
    }

    fn max_utility(&self) -> f64 {
        1.0
    }

    fn max_game_length(&self) -> usize {
        self.max_moves as usize
    }
}

/// A dice race position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiceRaceState {
    goal: u8,
    die_faces: u8,
    max_moves: u16,
    runners: [[u8; RUNNERS]; 2],
    to_move: usize,
    roll: Option<u8>,
    moves: u16,
    winner: Option<usize>,
    drawn: bool,
}

impl DiceRaceState {
    /// Runner positions of `player`.
    pub fn runners(&self, player: usize) -> [u8; RUNNERS] {
        self.runners[player]
    }

    /// Pending die roll, if the acting player has rolled.
    pub fn roll(&self) -> Option<u8> {
        self.roll
    }

    /// Decisions made so far.
    pub fn moves(&self) -> u16 {
        self.moves
    }

    fn finished(&self, player: usize) -> bool {
        self.runners[player].iter().all(|&pos| pos >= self.goal)
    }

    fn move_runner(&mut self, runner: usize, steps: u8) {
        let player = self.to_move;
        let target = self.runners[player][runner].saturating_add(steps);
        self.runners[player][runner] = target;

        // Landing on an opposing runner still on the track sends it home.
        if target < self.goal {
            for pos in self.runners[1 - player].iter_mut() {
                if *pos == target {
                    *pos = 0;
                }
            }
        }

        self.moves += 1;
        self.roll = None;
        if self.finished(player) {
            self.winner = Some(player);
        } else if self.moves >= self.max_moves {
            self.drawn = true;
        } else {
            self.to_move = 1 - player;
        }
    }
}

impl GameState for DiceRaceState {
    fn turn(&self) -> Turn {
        if self.winner.is_some() || self.drawn {
            Turn::Terminal
        } else if self.roll.is_none() {
            Turn::Chance
        } else {
            Turn::Player(self.to_move)
        }
    }

    fn legal_actions(&self) -> Vec<Action> {
        match self.turn() {
            Turn::Player(player) => (0..RUNNERS)
                .filter(|&r| self.runners[player][r] < self.goal)
                .map(|r| r as Action)
                .collect(),
            _ => Vec::new(),
        }
    }

    fn chance_outcomes(&self) -> ChanceOutcomes {
        if self.turn() != Turn::Chance {
            return ChanceOutcomes::new();
        }
        let p = 1.0 / f64::from(self.die_faces);
        (0..self.die_faces).map(|face| (Action::from(face), p)).collect()
    }

    fn apply_action(&mut self, action: Action) {
        match self.turn() {
            Turn::Chance => {
                assert!(action < Action::from(self.die_faces), "Invalid die face {action}");
                self.roll = Some(action as u8 + 1);
            }
            Turn::Player(player) => {
                let runner = action as usize;
                assert!(
                    runner < RUNNERS && self.runners[player][runner] < self.goal,
                    "Illegal runner {action}"
                );
                let steps = self.roll.unwrap_or(1);
                self.move_runner(runner, steps);
            }
            Turn::Terminal => panic!("Cannot apply action to a finished game"),
        }
    }

    fn returns(&self) -> Vec<f64> {
        match self.winner {
            Some(0) => vec![1.0, -1.0],
            Some(_) => vec![-1.0, 1.0],
            None => vec![0.0, 0.0],
        }
    }

    fn observation(&self) -> Vec<f32> {
        let goal = f32::from(self.goal);
        let mut obs = Vec::with_capacity(2 * RUNNERS + 1 + self.die_faces as usize);
        for player in 0..2 {
            for &pos in &self.runners[player] {
                obs.push(f32::from(pos.min(self.goal)) / goal);
            }
        }
        obs.push(self.to_move as f32);
        for face in 1..=self.die_faces {
            obs.push(if self.roll == Some(face) { 1.0 } else { 0.0 });
        }
        obs
    }

    fn cache_key(&self) -> String {
        let [a, b] = self.runners;
        let roll = self.roll.map_or_else(|| "-".to_owned(), |r| r.to_string());
        format!(
            "{}:{},{}|{},{}:{}:{}",
            self.to_move, a[0], a[1], b[0], b[1], roll, self.moves
        )
    }

    fn action_to_string(&self, action: Action) -> String {
        match self.turn() {
            Turn::Chance => format!("roll{}", action + 1),
            _ => format!("r{}+{}", action, self.roll.unwrap_or(0)),
        }
    }
}
