//! `tetra-types` – The Control Protocol
//!
//! Shared vocabulary of the training control plane.  Every other crate in the
//! workspace speaks in these types; nothing here performs I/O.
//!
//! # Modules
//!
//! - [`protocol`] – the [`Command`] and [`Message`] envelopes exchanged with
//!   clients, the [`SessionStatus`] state machine labels, checkpoint metadata
//!   and the on-disk layout constants.
//! - [`config`] – [`TrainingConfig`] with the defaults used when a client
//!   omits a field.
//! - [`capability`] – the narrow [`Engine`], [`Environment`] and [`Backend`]
//!   interfaces through which the worker drives the learning engine and the
//!   simulated game without knowing their concrete types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod capability;
pub mod config;
pub mod protocol;

pub use capability::{
    Backend, Engine, EngineError, Environment, Observation, PersistScope, StepInfo, Transition,
};
pub use config::{RewardShaping, TrainingConfig};
pub use protocol::{
    Board, CheckpointMetadata, CheckpointSource, Command, ControlResponse, Message,
    MetricsSnapshot, SessionStatus, SlotSummary, StatusSnapshot, clamp_speed,
};

/// Protocol-wide error type.
///
/// The variants follow the failure taxonomy of the control plane: every
/// operation a client can trigger fails with exactly one of these, carrying a
/// human-readable reason that is forwarded verbatim to the client.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TetraError {
    #[error("Worker crashed: {0}")]
    WorkerCrash(String),

    #[error("Serialization Error: {0}")]
    Serialization(String),

    #[error("Telemetry backlog: drain capped at {0} messages this tick")]
    ChannelBackpressure(usize),

    #[error("Checkpoint at {path} is corrupt: {reason}")]
    CheckpointCorrupt { path: String, reason: String },

    #[error("Checkpoint not found: {0}")]
    CheckpointNotFound(String),

    #[error("Invalid slot name {0:?}: only letters, digits, '_' and '-' are allowed")]
    InvalidSlotName(String),

    #[error("Model slot not found: {0}")]
    SlotNotFound(String),

    #[error("Another session is already active (status: {0})")]
    ConcurrentSession(SessionStatus),

    #[error("Cannot {action} while {status}")]
    InvalidTransition {
        action: String,
        status: SessionStatus,
    },

    #[error("Invalid training config: {0}")]
    InvalidConfig(String),

    #[error("Failed to launch worker: {0}")]
    Spawn(String),

    #[error("Storage I/O error: {0}")]
    Io(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrent_session_names_the_blocking_status() {
        let err = TetraError::ConcurrentSession(SessionStatus::DemoRunning);
        assert_eq!(
            err.to_string(),
            "Another session is already active (status: demo_running)"
        );
    }

    #[test]
    fn invalid_transition_display() {
        let err = TetraError::InvalidTransition {
            action: "pause".to_string(),
            status: SessionStatus::Stopped,
        };
        assert_eq!(err.to_string(), "Cannot pause while stopped");
    }

    #[test]
    fn invalid_slot_name_quotes_the_name() {
        let err = TetraError::InvalidSlotName("../etc".to_string());
        assert!(err.to_string().contains("\"../etc\""));
    }
}
