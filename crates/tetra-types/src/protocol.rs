//! Wire envelopes and durable-state records.
//!
//! # Telemetry messages
//!
//! Every [`Message`] serialises as a JSON object carrying a `type`
//! discriminator:
//!
//! | type | fields |
//! |---|---|
//! | `metrics` | steps, episode_count, current_score, objective_metric, avg_reward, best_objective, exploration_rate |
//! | `board` | board (rows × columns of cell values) |
//! | `episode` | episode_index, reward, objective_metric |
//! | `status` | status, visual_mode, speed_factor, message? |
//! | `info` | message |
//! | `error` | error, trace? |
//! | `ping` | – |
//! | `response` | success, message, slots?, path? |
//!
//! # Commands
//!
//! A [`Command`] is tagged by `command`, e.g. `{"command":"set_speed","speed":0.5}`.
//!
//! # Checkpoint layout
//!
//! ```text
//! <checkpoint_dir>/
//!   latest/{weights, internal_state, metadata.json}
//!   final/{weights, internal_state, metadata.json}
//!   best/{weights, internal_state, metadata.json}
//!   slots/<name>/{weights, metadata.json}
//! ```

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::TrainingConfig;

/// Engine weights blob inside a checkpoint or slot directory.
pub const WEIGHTS_FILE: &str = "weights";
/// Engine replay/optimizer state blob inside a checkpoint directory.
pub const INTERNAL_STATE_FILE: &str = "internal_state";
/// JSON-encoded [`CheckpointMetadata`].
pub const METADATA_FILE: &str = "metadata.json";

/// Resume point, rewritten periodically and at every clean session end.
pub const LATEST_DIR: &str = "latest";
/// Snapshot written at clean session end.
pub const FINAL_DIR: &str = "final";
/// Snapshot of the best episode seen in a session.
pub const BEST_DIR: &str = "best";
/// Parent directory of the named model slots.
pub const SLOTS_DIR: &str = "slots";

/// Lower bound of the visualisation speed factor.
pub const MIN_SPEED: f64 = 0.1;
/// Upper bound of the visualisation speed factor.
pub const MAX_SPEED: f64 = 1.0;

/// Clamp a requested speed factor into `[MIN_SPEED, MAX_SPEED]`.
///
/// NaN is treated as "full speed".
pub fn clamp_speed(factor: f64) -> f64 {
    if factor.is_nan() {
        return MAX_SPEED;
    }
    factor.clamp(MIN_SPEED, MAX_SPEED)
}

/// A 2D snapshot of the playfield, row-major, top row first.
pub type Board = Vec<Vec<u8>>;

// ─────────────────────────────────────────────────────────────────────────────
// Session status
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle label of the single active session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Stopped,
    Running,
    Paused,
    Stopping,
    DemoRunning,
}

impl SessionStatus {
    /// `true` while a worker owns the engine (training, paused training or demo).
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SessionStatus::Running | SessionStatus::Paused | SessionStatus::DemoRunning
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Stopped => "stopped",
            SessionStatus::Running => "running",
            SessionStatus::Paused => "paused",
            SessionStatus::Stopping => "stopping",
            SessionStatus::DemoRunning => "demo_running",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a reconnecting client needs to resynchronise its controls.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub status: SessionStatus,
    pub visual_mode: bool,
    pub speed_factor: f64,
}

impl StatusSnapshot {
    /// Wrap the snapshot in a `status` telemetry message.
    pub fn into_message(self, message: Option<String>) -> Message {
        Message::Status {
            status: self.status,
            visual_mode: self.visual_mode,
            speed_factor: self.speed_factor,
            message,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Telemetry
// ─────────────────────────────────────────────────────────────────────────────

/// Periodic training counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub steps: u64,
    pub episode_count: u64,
    /// Reward accumulated so far in the current episode.
    pub current_score: f64,
    /// Lines cleared so far in the current episode.
    pub objective_metric: u32,
    /// Mean reward over the last 100 completed episodes.
    pub avg_reward: f64,
    /// Best single-episode objective of this session.
    pub best_objective: u32,
    pub exploration_rate: f64,
}

/// Telemetry envelope. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    Metrics(MetricsSnapshot),
    Board {
        board: Board,
    },
    Episode {
        episode_index: u64,
        reward: f64,
        objective_metric: u32,
    },
    Status {
        status: SessionStatus,
        visual_mode: bool,
        speed_factor: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Info {
        message: String,
    },
    Error {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        trace: Option<String>,
    },
    /// Heartbeat; clients answer with `{"command":"pong"}`.
    Ping,
    Response(ControlResponse),
}

impl Message {
    pub fn info(message: impl Into<String>) -> Self {
        Message::Info {
            message: message.into(),
        }
    }

    pub fn error(error: impl Into<String>, trace: Option<String>) -> Self {
        Message::Error {
            error: error.into(),
            trace,
        }
    }

    /// The `type` discriminator, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Metrics(_) => "metrics",
            Message::Board { .. } => "board",
            Message::Episode { .. } => "episode",
            Message::Status { .. } => "status",
            Message::Info { .. } => "info",
            Message::Error { .. } => "error",
            Message::Ping => "ping",
            Message::Response(_) => "response",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

/// Which checkpoint a slot is copied from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointSource {
    #[default]
    Best,
    Latest,
    Final,
}

impl CheckpointSource {
    /// Directory name of the source under the checkpoint root.
    pub fn dir_name(self) -> &'static str {
        match self {
            CheckpointSource::Best => BEST_DIR,
            CheckpointSource::Latest => LATEST_DIR,
            CheckpointSource::Final => FINAL_DIR,
        }
    }
}

/// Client request.
///
/// `start` without a `config` uses the server's configured defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Start {
        #[serde(default)]
        config: Option<TrainingConfig>,
    },
    Stop,
    Pause,
    Resume,
    SetMode {
        visual: bool,
    },
    SetSpeed {
        speed: f64,
    },
    DemoStart {
        slot_name: String,
    },
    DemoStop,
    Status,
    Pong,
    ListSlots,
    SaveSlot {
        #[serde(default)]
        source: CheckpointSource,
        slot_name: String,
    },
    DeleteSlot {
        slot_name: String,
    },
    ExportSlot {
        slot_name: String,
        destination: PathBuf,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Durable records
// ─────────────────────────────────────────────────────────────────────────────

/// Scalar record stored next to the engine blobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub steps_trained: u64,
    #[serde(default)]
    pub episodes: u64,
    pub exploration_rate: f64,
    #[serde(default)]
    pub best_lines: u32,
    pub config: TrainingConfig,
    pub timestamp: DateTime<Utc>,
}

/// One entry of the model slot listing.
///
/// The metadata fields are `None` when the slot's metadata is missing or
/// unreadable; such slots are still listed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotSummary {
    pub name: String,
    pub path: PathBuf,
    pub steps_trained: Option<u64>,
    pub best_lines: Option<u32>,
    pub exploration_rate: Option<f64>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl SlotSummary {
    pub fn new(name: String, path: PathBuf, metadata: Option<&CheckpointMetadata>) -> Self {
        Self {
            name,
            path,
            steps_trained: metadata.map(|m| m.steps_trained),
            best_lines: metadata.map(|m| m.best_lines),
            exploration_rate: metadata.map(|m| m.exploration_rate),
            timestamp: metadata.map(|m| m.timestamp),
        }
    }
}

/// Transport-agnostic reply to a control request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slots: Option<Vec<SlotSummary>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl ControlResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            slots: None,
            path: None,
        }
    }

    pub fn fail(reason: impl fmt::Display) -> Self {
        Self {
            success: false,
            message: reason.to_string(),
            slots: None,
            path: None,
        }
    }

    pub fn with_slots(mut self, slots: Vec<SlotSummary>) -> Self {
        self.slots = Some(slots);
        self
    }

    pub fn with_path(mut self, path: PathBuf) -> Self {
        self.path = Some(path);
        self
    }
}
