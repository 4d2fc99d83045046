//! `tetra-store` – Durable Session State
//!
//! All-or-nothing persistence for the training control plane, backed by
//! plain directories on the local filesystem.
//!
//! # Modules
//!
//! - [`checkpoint`] – [`CheckpointStore`][checkpoint::CheckpointStore]: writes
//!   and restores full resumable bundles (engine weights, engine internal
//!   state, metadata) under the well-known `latest`, `final` and `best`
//!   locations.
//! - [`slots`] – [`ModelSlotRegistry`][slots::ModelSlotRegistry]: named,
//!   user-facing copies of checkpoints (weights + metadata only) for listing,
//!   comparison, demo and export.
//!
//! Every bundle is assembled in a hidden staging directory next to its final
//! location and renamed into place, so readers see either the previous
//! complete bundle or the new complete bundle.

use std::path::PathBuf;

use tetra_types::{EngineError, TetraError};
use thiserror::Error;

mod atomic;
pub mod checkpoint;
pub mod slots;

#[cfg(test)]
pub(crate) mod test_support;

pub use checkpoint::{CheckpointStore, read_metadata};
pub use slots::{ModelSlotRegistry, validate_slot_name};

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from checkpoint and slot operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Metadata encoding error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Engine failed to persist: {0}")]
    Engine(#[from] EngineError),
    #[error("Checkpoint at {} is corrupt: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },
    #[error("Checkpoint not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("Invalid slot name {0:?}")]
    InvalidSlotName(String),
    #[error("Model slot not found: {0}")]
    SlotNotFound(String),
}

impl From<StoreError> for TetraError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Corrupt { path, reason } => TetraError::CheckpointCorrupt {
                path: path.display().to_string(),
                reason,
            },
            StoreError::NotFound(path) => TetraError::CheckpointNotFound(path.display().to_string()),
            StoreError::InvalidSlotName(name) => TetraError::InvalidSlotName(name),
            StoreError::SlotNotFound(name) => TetraError::SlotNotFound(name),
            StoreError::Json(e) => TetraError::Serialization(e.to_string()),
            other @ (StoreError::Io(_) | StoreError::Engine(_)) => TetraError::Io(other.to_string()),
        }
    }
}
