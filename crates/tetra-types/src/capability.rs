//! Capability interfaces for the learning engine and the simulated game.
//!
//! The worker loop depends only on these traits.  A [`Backend`] hands out
//! fresh or restored instances; the worker then owns them exclusively for
//! the lifetime of one session.

use std::path::Path;

use thiserror::Error;

use crate::config::TrainingConfig;
use crate::protocol::Board;

/// Errors raised by an [`Engine`], an [`Environment`] or a [`Backend`].
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed {what}: {reason}")]
    Malformed { what: &'static str, reason: String },

    #[error("Action {action} is out of range (action space: {size})")]
    ActionOutOfRange { action: usize, size: usize },

    #[error("{0}")]
    Other(String),
}

/// What an observation exposes to the engine.
///
/// `features` describe the current state.  `candidates[a]` holds the
/// features of the state that action `a` would lead to, or `None` when the
/// action is illegal in the current state.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Observation {
    pub features: Vec<f32>,
    pub candidates: Vec<Option<Vec<f32>>>,
}

impl Observation {
    /// Indices of the legal actions.
    pub fn legal_actions(&self) -> impl Iterator<Item = usize> + '_ {
        self.candidates
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.as_ref().map(|_| i))
    }
}

/// Side information returned alongside an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StepInfo {
    /// Lines cleared so far in the current episode.
    pub lines_cleared: u32,
}

/// Result of one environment step.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub observation: Observation,
    pub reward: f64,
    pub terminated: bool,
    pub truncated: bool,
    pub info: StepInfo,
}

impl Transition {
    /// `true` when the episode is over and the environment must be reset.
    pub fn is_done(&self) -> bool {
        self.terminated || self.truncated
    }
}

/// How much engine state to write or restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistScope {
    /// Weights plus replay/optimizer state: exact resume.
    Full,
    /// Weights only: inference, comparison and export.
    WeightsOnly,
}

/// The simulated game.
pub trait Environment: Send {
    /// Start a new episode.
    fn reset(&mut self) -> Result<(Observation, StepInfo), EngineError>;

    /// Apply `action` and advance the game by one decision.
    fn step(&mut self, action: usize) -> Result<Transition, EngineError>;

    /// Snapshot of the playfield for visualisation.
    fn board(&self) -> Board;
}

/// The learning engine.
pub trait Engine: Send {
    /// Advance learning by one unit of experience: choose an action for
    /// `observation` (exploring as the engine sees fit), step `env`, store the
    /// experience and run any due updates.
    fn train(
        &mut self,
        env: &mut dyn Environment,
        observation: &Observation,
    ) -> Result<Transition, EngineError>;

    /// Deterministic action selection; never learns.
    fn predict(&self, observation: &Observation) -> usize;

    /// Write the engine's blobs into `dir`, which already exists.
    fn save(&self, dir: &Path, scope: PersistScope) -> Result<(), EngineError>;

    /// Total training steps across every session this engine has lived through.
    fn steps_trained(&self) -> u64;

    /// Current exploration rate (or equivalent).
    fn exploration_rate(&self) -> f64;
}

/// Factory for engines and environments.
///
/// `load_engine` restores through the engine's own loader so that internal
/// state (replay buffer, optimizer counters, target weights) survives a
/// resume.
pub trait Backend: Send + Sync {
    fn create_environment(&self, config: &TrainingConfig) -> Result<Box<dyn Environment>, EngineError>;

    fn create_engine(&self, config: &TrainingConfig) -> Result<Box<dyn Engine>, EngineError>;

    fn load_engine(
        &self,
        dir: &Path,
        config: &TrainingConfig,
        scope: PersistScope,
    ) -> Result<Box<dyn Engine>, EngineError>;
}
