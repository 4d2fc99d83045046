//! [`TetrisEnv`] – the simulated game behind the [`Environment`] trait.
//!
//! One step places the current piece with a *grouped* action:
//!
//! | action            | meaning                                   |
//! |-------------------|-------------------------------------------|
//! | `rotation * 10 + column` | rotate `rotation` quarter turns, then hard-drop with the leftmost cell in `column` |
//!
//! A placement that does not fit at the top of the board is illegal; taking
//! one ends the episode.  The episode also ends when the next piece has no
//! legal placement left.
//!
//! Rewards are shaped on top of the classic line-clear table:
//!
//! ```text
//! shaped = base * clear_bonus_multiplier
//!        + new_holes * hole_penalty
//!        + max_height_increase * height_penalty
//!        + game_over_penalty            (terminating step only)
//! ```

use tetra_types::{
    Board, EngineError, Environment, Observation, RewardShaping, StepInfo, Transition,
};
use tracing::trace;

use crate::board::{BoardStats, HEIGHT, PieceBag, PieceKind, Playfield, WIDTH};

pub const ROTATIONS: usize = 4;
pub const ACTION_COUNT: usize = ROTATIONS * WIDTH;
/// Length of every feature vector (state and afterstate).
pub const FEATURE_COUNT: usize = 5;

/// Base reward for clearing 0..=4 lines in one placement.
const LINE_REWARDS: [f64; 5] = [0.0, 1.0, 3.0, 5.0, 8.0];

/// Normalised `[lines, holes, bumpiness, aggregate height, max height]`.
pub fn features(cleared: u32, stats: &BoardStats) -> Vec<f32> {
    let cells = (WIDTH * HEIGHT) as f32;
    vec![
        cleared as f32 / 4.0,
        stats.holes as f32 / cells,
        stats.bumpiness as f32 / ((WIDTH - 1) * HEIGHT) as f32,
        stats.aggregate_height as f32 / cells,
        stats.max_height as f32 / HEIGHT as f32,
    ]
}

pub struct TetrisEnv {
    field: Playfield,
    bag: PieceBag,
    current: PieceKind,
    shaping: RewardShaping,
    lines: u32,
    prev: BoardStats,
}

impl TetrisEnv {
    pub fn new(shaping: RewardShaping, seed: u64) -> Self {
        let mut bag = PieceBag::with_seed(seed);
        let current = bag.next_piece();
        Self {
            field: Playfield::new(),
            bag,
            current,
            shaping,
            lines: 0,
            prev: BoardStats::default(),
        }
    }

    pub fn current_piece(&self) -> PieceKind {
        self.current
    }

    fn decode(action: usize) -> (usize, usize) {
        (action / WIDTH, action % WIDTH)
    }

    fn observe(&self) -> Observation {
        let candidates = (0..ACTION_COUNT)
            .map(|action| {
                let (rotation, column) = Self::decode(action);
                self.field
                    .place(self.current, rotation, column)
                    .map(|(next, cleared)| features(cleared, &next.stats()))
            })
            .collect();
        Observation {
            features: features(0, &self.field.stats()),
            candidates,
        }
    }

    fn shaped_reward(&self, cleared: u32, stats: &BoardStats, terminated: bool) -> f64 {
        let s = &self.shaping;
        let base = LINE_REWARDS[cleared.min(4) as usize];
        let new_holes = stats.holes.saturating_sub(self.prev.holes);
        let height_increase = stats.max_height.saturating_sub(self.prev.max_height);

        let mut reward = base * s.clear_bonus_multiplier
            + f64::from(new_holes) * s.hole_penalty
            + f64::from(height_increase) * s.height_penalty;
        if terminated {
            reward += s.game_over_penalty;
        }
        reward
    }
}

impl Environment for TetrisEnv {
    fn reset(&mut self) -> Result<(Observation, StepInfo), EngineError> {
        self.field = Playfield::new();
        self.current = self.bag.next_piece();
        self.lines = 0;
        self.prev = self.field.stats();
        Ok((self.observe(), StepInfo::default()))
    }

    fn step(&mut self, action: usize) -> Result<Transition, EngineError> {
        if action >= ACTION_COUNT {
            return Err(EngineError::ActionOutOfRange {
                action,
                size: ACTION_COUNT,
            });
        }
        let (rotation, column) = Self::decode(action);

        let (cleared, terminated, observation) =
            match self.field.place(self.current, rotation, column) {
                Some((next, cleared)) => {
                    self.field = next;
                    self.lines += cleared;
                    self.current = self.bag.next_piece();
                    let observation = self.observe();
                    let stuck = observation.legal_actions().next().is_none();
                    (cleared, stuck, observation)
                }
                None => {
                    trace!(action, piece = ?self.current, "illegal placement ends the episode");
                    (0, true, self.observe())
                }
            };

        let stats = self.field.stats();
        let reward = self.shaped_reward(cleared, &stats, terminated);
        self.prev = stats;

        Ok(Transition {
            observation,
            reward,
            terminated,
            truncated: false,
            info: StepInfo {
                lines_cleared: self.lines,
            },
        })
    }

    fn board(&self) -> Board {
        self.field.to_board()
    }
}
