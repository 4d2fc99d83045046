//! `tetra-sim` – reference backend for the training control plane.
//!
//! A self-contained Tetris simulation and a small value-based learner, so a
//! control plane can be run end to end without an external ML stack.
//!
//! # Modules
//!
//! - [`board`] – the 10×20 playfield, tetromino shapes and the 7-bag.
//! - [`env`] – [`TetrisEnv`], grouped placement actions and shaped rewards.
//! - [`engine`] – [`LinearEngine`], an ε-greedy afterstate-value learner
//!   with a replay buffer and target weights.
//! - [`backend`] – [`SimBackend`], the [`tetra_types::Backend`] factory.

pub mod backend;
pub mod board;
pub mod engine;
pub mod env;

pub use backend::SimBackend;
pub use engine::LinearEngine;
pub use env::{ACTION_COUNT, FEATURE_COUNT, TetrisEnv};
