//! `tetra-runtime` – The Training Control Plane
//!
//! Isolates the CPU-bound learning loop on its own thread and coordinates it
//! from async control code through two channels and two flags.
//!
//! # Modules
//!
//! - [`flags`] – [`PauseGate`][flags::PauseGate] and
//!   [`ControlFlags`][flags::ControlFlags]: the only mutable state shared
//!   across the worker boundary.
//! - [`context`] – [`ControlContext`][context::ControlContext]: flags, the
//!   command channel and the telemetry channel, bundled into one object built
//!   at startup and passed to both sides.  No global state.
//! - [`worker`] – the worker loop: drives an
//!   [`Engine`][tetra_types::Engine] and an
//!   [`Environment`][tetra_types::Environment] in train or demo mode,
//!   honours pause/stop with bounded latency, emits telemetry and writes
//!   checkpoints.
//! - [`supervisor`] – [`Supervisor`][supervisor::Supervisor]: the session
//!   state machine and every session-control operation.
//!
//! # Data flow
//!
//! ```text
//! client ─▶ Supervisor ─▶ command channel ─▶ worker
//!                                              │
//! clients ◀─ telemetry bridge ◀─ telemetry channel
//! ```

pub mod context;
pub mod flags;
pub mod supervisor;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;

pub use context::{ControlContext, WorkerCommand};
pub use flags::{ControlFlags, PauseGate};
pub use supervisor::{DEFAULT_STOP_TIMEOUT, Supervisor, SupervisorConfig};
pub use worker::{SessionMode, WorkerExit, WorkerLaunch, frame_delay, spawn_worker};
