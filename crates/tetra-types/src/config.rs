//! Training session configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::TetraError;

/// Reward shaping applied by the environment on top of the line-clear reward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardShaping {
    /// Added once per newly created hole (should be negative).
    pub hole_penalty: f64,
    /// Added once per row of max-height increase (should be negative).
    pub height_penalty: f64,
    /// Multiplier on the base line-clear reward.
    pub clear_bonus_multiplier: f64,
    /// Added on the terminating step (should be negative).
    pub game_over_penalty: f64,
}

impl Default for RewardShaping {
    fn default() -> Self {
        Self {
            hole_penalty: -0.5,
            height_penalty: -0.1,
            clear_bonus_multiplier: 1.0,
            game_over_penalty: -10.0,
        }
    }
}

/// Hyperparameters and session limits for one training run.
///
/// Every field has a default, so clients may send a partial object such as
/// `{"target_lines": 10, "max_timesteps": 50000}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    // ── Learner ──────────────────────────────────────────────────────────────
    pub learning_rate: f64,
    pub buffer_size: usize,
    pub batch_size: usize,
    pub gamma: f64,

    // ── Exploration schedule ─────────────────────────────────────────────────
    /// Fraction of `max_timesteps` over which epsilon decays linearly.
    pub exploration_fraction: f64,
    pub exploration_initial_eps: f64,
    pub exploration_final_eps: f64,

    // ── Update cadence ───────────────────────────────────────────────────────
    pub target_update_interval: u64,
    pub train_freq: u64,
    pub gradient_steps: u32,
    pub learning_starts: u64,

    // ── Session limits ───────────────────────────────────────────────────────
    /// Stop early once a single episode clears this many lines.
    pub target_lines: Option<u32>,
    pub max_timesteps: u64,

    // ── Persistence ──────────────────────────────────────────────────────────
    pub checkpoint_dir: PathBuf,
    /// Rewrite the `latest` checkpoint every N training steps.
    pub checkpoint_freq: u64,

    // ── Telemetry cadence ────────────────────────────────────────────────────
    /// Emit a `metrics` message every N steps.
    pub metrics_every: u64,
    /// Emit a `board` message every N steps.
    pub board_every: u64,

    /// Seed for the environment and the engine. `None` draws from the OS.
    pub seed: Option<u64>,
    pub reward: RewardShaping,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-4,
            buffer_size: 100_000,
            batch_size: 64,
            gamma: 0.99,
            exploration_fraction: 0.2,
            exploration_initial_eps: 1.0,
            exploration_final_eps: 0.05,
            target_update_interval: 1_000,
            train_freq: 4,
            gradient_steps: 1,
            learning_starts: 10_000,
            target_lines: None,
            max_timesteps: 500_000,
            checkpoint_dir: PathBuf::from("./checkpoints"),
            checkpoint_freq: 10_000,
            metrics_every: 100,
            board_every: 10,
            seed: None,
            reward: RewardShaping::default(),
        }
    }
}

impl TrainingConfig {
    /// Reject configurations the worker could not run.
    ///
    /// # Errors
    ///
    /// Returns [`TetraError::InvalidConfig`] naming the first offending field.
    pub fn validate(&self) -> Result<(), TetraError> {
        let invalid = |reason: &str| Err(TetraError::InvalidConfig(reason.to_string()));

        if !(self.learning_rate > 0.0) {
            return invalid("learning_rate must be positive");
        }
        if self.batch_size == 0 {
            return invalid("batch_size must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.gamma) {
            return invalid("gamma must lie in [0, 1]");
        }
        if !(self.exploration_fraction > 0.0 && self.exploration_fraction <= 1.0) {
            return invalid("exploration_fraction must lie in (0, 1]");
        }
        for (name, eps) in [
            ("exploration_initial_eps", self.exploration_initial_eps),
            ("exploration_final_eps", self.exploration_final_eps),
        ] {
            if !(0.0..=1.0).contains(&eps) {
                return Err(TetraError::InvalidConfig(format!("{name} must lie in [0, 1]")));
            }
        }
        if self.train_freq == 0 {
            return invalid("train_freq must be at least 1");
        }
        if self.max_timesteps == 0 {
            return invalid("max_timesteps must be at least 1");
        }
        if self.metrics_every == 0 || self.board_every == 0 {
            return invalid("metrics_every and board_every must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(TrainingConfig::default().validate().is_ok());
    }

    #[test]
    fn board_updates_more_often_than_metrics_by_default() {
        let cfg = TrainingConfig::default();
        assert!(cfg.board_every < cfg.metrics_every);
    }

    #[test]
    fn zero_metrics_interval_is_rejected() {
        let cfg = TrainingConfig {
            metrics_every: 0,
            ..TrainingConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(TetraError::InvalidConfig(_))));
    }

    #[test]
    fn out_of_range_epsilon_names_the_field() {
        let cfg = TrainingConfig {
            exploration_final_eps: 1.5,
            ..TrainingConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("exploration_final_eps"));
    }

    #[test]
    fn nan_learning_rate_is_rejected() {
        let cfg = TrainingConfig {
            learning_rate: f64::NAN,
            ..TrainingConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
