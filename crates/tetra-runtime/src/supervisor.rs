//! [`Supervisor`] – session lifecycle on the control side.
//!
//! The supervisor owns the worker's join handle and the [`ControlContext`]
//! and exposes the session-control operations.  It never runs engine code
//! itself: starting a session spawns a worker thread, and every other
//! operation either flips a flag, enqueues a command or waits (bounded) for
//! the worker to exit.
//!
//! # State machine
//!
//! ```text
//!             start_training               pause_training
//!   stopped ───────────────▶ running ◀──────────────────▶ paused
//!      ▲                       │        resume_training     │
//!      │                       ▼ stop_training              │
//!      └──────────────────── stopping ◀─────────────────────┘
//!      │
//!      │ start_demo                stop_demo
//!      └──────────▶ demo_running ────────────▶ stopping ──▶ stopped
//! ```
//!
//! Every transition publishes a `status` message on the telemetry channel.
//! Training and demo are mutually exclusive: `start_demo` stops any active
//! session first and `start_training` stops a running demo first.

use std::any::Any;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tetra_store::{CheckpointStore, ModelSlotRegistry};
use tetra_types::{
    Backend, Message, SessionStatus, StatusSnapshot, TetraError, TrainingConfig, clamp_speed,
};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, instrument, warn};

use crate::context::{ControlContext, WorkerCommand};
use crate::worker::{SessionMode, WorkerExit, WorkerLaunch, spawn_worker};

/// Default bound on how long `stop` waits for the worker before detaching it.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Construction parameters for [`Supervisor`].
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Root of `latest/`, `final/`, `best/` and `slots/`.
    pub checkpoint_dir: PathBuf,
    /// Used for `start` requests that carry no config.
    pub default_training: TrainingConfig,
    pub stop_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        let default_training = TrainingConfig::default();
        Self {
            checkpoint_dir: default_training.checkpoint_dir.clone(),
            default_training,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal state
// ─────────────────────────────────────────────────────────────────────────────

struct ActiveWorker {
    handle: JoinHandle<WorkerExit>,
    generation: u64,
    demo: bool,
}

struct SupervisorState {
    status: SessionStatus,
    visual_mode: bool,
    speed_factor: f64,
    worker: Option<ActiveWorker>,
}

impl SupervisorState {
    fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            status: self.status,
            visual_mode: self.visual_mode,
            speed_factor: self.speed_factor,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Supervisor
// ─────────────────────────────────────────────────────────────────────────────

/// Owns the single training or demo session.
///
/// Cheap to share behind an `Arc`; every operation takes `&self`.
pub struct Supervisor {
    ctx: Arc<ControlContext>,
    backend: Arc<dyn Backend>,
    slots: ModelSlotRegistry,
    default_training: TrainingConfig,
    stop_timeout: Duration,
    state: Mutex<SupervisorState>,
}

impl Supervisor {
    pub fn new(backend: Arc<dyn Backend>, config: SupervisorConfig) -> Self {
        let mut default_training = config.default_training;
        default_training.checkpoint_dir = config.checkpoint_dir.clone();
        Self {
            ctx: Arc::new(ControlContext::new()),
            backend,
            slots: ModelSlotRegistry::new(CheckpointStore::new(config.checkpoint_dir)),
            default_training,
            stop_timeout: config.stop_timeout,
            state: Mutex::new(SupervisorState {
                status: SessionStatus::Stopped,
                visual_mode: false,
                speed_factor: 1.0,
                worker: None,
            }),
        }
    }

    /// The channels and flags shared with the worker.
    pub fn context(&self) -> &Arc<ControlContext> {
        &self.ctx
    }

    pub fn slots(&self) -> &ModelSlotRegistry {
        &self.slots
    }

    pub fn default_training(&self) -> &TrainingConfig {
        &self.default_training
    }

    pub async fn status(&self) -> StatusSnapshot {
        self.state.lock().await.snapshot()
    }

    fn publish_status(&self, state: &SupervisorState, message: impl Into<String>) {
        self.ctx
            .publish(state.snapshot().into_message(Some(message.into())));
    }

    // ── Training ─────────────────────────────────────────────────────────────

    /// Launch a training session.
    ///
    /// # Errors
    ///
    /// - [`TetraError::ConcurrentSession`] if training is running or paused,
    ///   or a stop is still in progress.
    /// - [`TetraError::InvalidConfig`] if `config` fails validation.
    /// - [`TetraError::Spawn`] if the worker thread cannot be created.
    ///
    /// A running demo is stopped first.
    #[instrument(skip_all)]
    pub async fn start_training(&self, config: Option<TrainingConfig>) -> Result<(), TetraError> {
        let mut config = config.unwrap_or_else(|| self.default_training.clone());
        config.validate()?;
        // Checkpoints always live under the root the slot registry reads from.
        config.checkpoint_dir.clone_from(&self.default_training.checkpoint_dir);

        let mut state = self.state.lock().await;
        self.reap(&mut state);
        let status = state.status;
        match status {
            SessionStatus::Running | SessionStatus::Paused | SessionStatus::Stopping => {
                return Err(TetraError::ConcurrentSession(status));
            }
            SessionStatus::DemoRunning => state = self.stop_and_wait(state).await,
            SessionStatus::Stopped => {}
        }

        let launch = WorkerLaunch {
            mode: SessionMode::Train,
            config,
            visual_mode: state.visual_mode,
            speed_factor: state.speed_factor,
            backend: Arc::clone(&self.backend),
        };
        self.launch(&mut state, launch, SessionStatus::Running, "Training started".to_string())
    }

    /// Stop whatever session is active.  Idempotent; returns at once while
    /// another stop is already waiting on the worker.
    #[instrument(skip_all)]
    pub async fn stop_training(&self) -> Result<(), TetraError> {
        let mut state = self.state.lock().await;
        self.reap(&mut state);
        self.stop_and_wait(state).await;
        Ok(())
    }

    /// `running` → `paused`.
    pub async fn pause_training(&self) -> Result<(), TetraError> {
        let mut state = self.state.lock().await;
        self.reap(&mut state);
        if state.status != SessionStatus::Running {
            return Err(TetraError::InvalidTransition {
                action: "pause".to_string(),
                status: state.status,
            });
        }
        self.ctx.flags().pause.clear();
        state.status = SessionStatus::Paused;
        info!("training paused");
        self.publish_status(&state, "Training paused");
        Ok(())
    }

    /// `paused` → `running`.
    pub async fn resume_training(&self) -> Result<(), TetraError> {
        let mut state = self.state.lock().await;
        self.reap(&mut state);
        if state.status != SessionStatus::Paused {
            return Err(TetraError::InvalidTransition {
                action: "resume".to_string(),
                status: state.status,
            });
        }
        self.ctx.flags().pause.set();
        state.status = SessionStatus::Running;
        info!("training resumed");
        self.publish_status(&state, "Training resumed");
        Ok(())
    }

    // ── Visualisation ────────────────────────────────────────────────────────

    /// Record and forward the visual/headless switch.
    pub async fn set_mode(&self, visual: bool) -> Result<(), TetraError> {
        let mut state = self.state.lock().await;
        state.visual_mode = visual;
        self.ctx.send_command(WorkerCommand::SetMode { visual });
        Ok(())
    }

    /// Record and forward the speed factor.  Returns the clamped value.
    pub async fn set_speed(&self, factor: f64) -> Result<f64, TetraError> {
        let speed = clamp_speed(factor);
        let mut state = self.state.lock().await;
        state.speed_factor = speed;
        self.ctx.send_command(WorkerCommand::SetSpeed(speed));
        Ok(speed)
    }

    // ── Demo ─────────────────────────────────────────────────────────────────

    /// Play model slot `slot_name` without learning.
    ///
    /// The slot is loaded before the active session is touched, so a missing
    /// or invalid slot leaves everything as it was.  Fails with
    /// [`TetraError::ConcurrentSession`] while a stop is in progress.
    #[instrument(skip(self))]
    pub async fn start_demo(&self, slot_name: &str) -> Result<(), TetraError> {
        let slots = self.slots.clone();
        let backend = Arc::clone(&self.backend);
        let name = slot_name.to_string();
        let (engine, metadata) =
            tokio::task::spawn_blocking(move || slots.load(&name, backend.as_ref()))
                .await
                .map_err(|e| TetraError::Io(format!("slot loader failed: {e}")))??;

        let mut state = self.state.lock().await;
        self.reap(&mut state);
        let status = state.status;
        match status {
            SessionStatus::Stopping => {
                return Err(TetraError::ConcurrentSession(status));
            }
            SessionStatus::Stopped => {}
            _ => state = self.stop_and_wait(state).await,
        }

        let launch = WorkerLaunch {
            mode: SessionMode::Demo {
                engine,
                slot_name: slot_name.to_string(),
            },
            config: metadata.config,
            visual_mode: state.visual_mode,
            speed_factor: state.speed_factor,
            backend: Arc::clone(&self.backend),
        };
        self.launch(
            &mut state,
            launch,
            SessionStatus::DemoRunning,
            format!("Demo started: {slot_name}"),
        )
    }

    /// Stop a running demo.  Idempotent when nothing is running.
    ///
    /// # Errors
    ///
    /// [`TetraError::InvalidTransition`] when the active session is training.
    pub async fn stop_demo(&self) -> Result<(), TetraError> {
        let mut state = self.state.lock().await;
        self.reap(&mut state);
        if matches!(state.status, SessionStatus::Running | SessionStatus::Paused) {
            return Err(TetraError::InvalidTransition {
                action: "stop demo".to_string(),
                status: state.status,
            });
        }
        self.stop_and_wait(state).await;
        Ok(())
    }

    // ── Liveness ─────────────────────────────────────────────────────────────

    /// Reap a worker that has exited on its own.
    ///
    /// Returns `true` if a worker was reaped.  Called by the telemetry
    /// bridge on every tick.
    pub async fn check_liveness(&self) -> bool {
        let mut state = self.state.lock().await;
        self.reap(&mut state)
    }

    fn reap(&self, state: &mut SupervisorState) -> bool {
        let finished = state
            .worker
            .as_ref()
            .is_some_and(|w| w.handle.is_finished());
        if !finished {
            return false;
        }
        if let Some(worker) = state.worker.take() {
            let demo = worker.demo;
            let outcome = worker.handle.join();
            self.finish(state, demo, outcome);
        }
        true
    }

    /// Turn a joined worker's outcome into telemetry and reset the status.
    fn finish(
        &self,
        state: &mut SupervisorState,
        demo: bool,
        outcome: Result<WorkerExit, Box<dyn Any + Send>>,
    ) {
        let label = if demo { "Demo" } else { "Training" };
        let note = match outcome {
            Ok(WorkerExit::Stopped) => format!("{label} stopped"),
            Ok(WorkerExit::Completed(reason)) => format!("{label} complete: {reason}"),
            Ok(WorkerExit::Failed(reason)) => format!("{label} failed: {reason}"),
            Err(_) => {
                let crash = TetraError::WorkerCrash("worker thread exited abnormally".to_string());
                warn!(error = %crash, "worker crashed");
                self.ctx.publish(Message::error(crash.to_string(), None));
                format!("{label} crashed")
            }
        };
        info!(note = %note, "session ended");
        self.ctx.flags().pause.set();
        state.status = SessionStatus::Stopped;
        self.publish_status(state, note);
    }

    // ── Internals ────────────────────────────────────────────────────────────

    /// Announce `status`, then spawn the worker.
    ///
    /// The status goes out first so that it precedes any worker telemetry.
    fn launch(
        &self,
        state: &mut SupervisorState,
        launch: WorkerLaunch,
        status: SessionStatus,
        note: String,
    ) -> Result<(), TetraError> {
        let demo = launch.mode.is_demo();
        let generation = self.ctx.begin_session();
        state.status = status;
        self.publish_status(state, note);

        match spawn_worker(Arc::clone(&self.ctx), generation, launch) {
            Ok(handle) => {
                info!(generation, demo, "worker launched");
                state.worker = Some(ActiveWorker {
                    handle,
                    generation,
                    demo,
                });
                Ok(())
            }
            Err(e) => {
                self.ctx.abandon_session();
                let err = TetraError::Spawn(e.to_string());
                warn!(error = %err, "worker launch failed");
                state.status = SessionStatus::Stopped;
                self.publish_status(state, err.to_string());
                Err(err)
            }
        }
    }

    /// Signal stop, wait up to the timeout, detach on expiry.
    ///
    /// The state lock is released for the wait, with the status at
    /// `stopping`; the re-acquired guard is returned.
    async fn stop_and_wait<'a>(
        &'a self,
        mut state: MutexGuard<'a, SupervisorState>,
    ) -> MutexGuard<'a, SupervisorState> {
        let Some(worker) = state.worker.take() else {
            // `stopping` without a worker: another caller owns the wait.
            if !matches!(state.status, SessionStatus::Stopped | SessionStatus::Stopping) {
                state.status = SessionStatus::Stopped;
                self.publish_status(&state, "Stopped");
            }
            return state;
        };

        state.status = SessionStatus::Stopping;
        self.publish_status(&state, "Stopping");
        self.ctx.request_stop();
        drop(state);

        let deadline = Instant::now() + self.stop_timeout;
        while !worker.handle.is_finished() && Instant::now() < deadline {
            tokio::time::sleep(JOIN_POLL_INTERVAL).await;
        }

        let mut state = self.state.lock().await;
        if worker.handle.is_finished() {
            let outcome = worker.handle.join();
            self.finish(&mut state, worker.demo, outcome);
        } else {
            warn!(
                generation = worker.generation,
                timeout_ms = self.stop_timeout.as_millis() as u64,
                "worker did not stop in time; detaching"
            );
            // Dropping the handle detaches the thread; the generation bump
            // makes it exit at its next check without touching shared state.
            self.ctx.abandon_session();
            drop(worker.handle);
            self.ctx.publish(Message::info(format!(
                "Worker did not stop within {:.1}s and was terminated",
                self.stop_timeout.as_secs_f64()
            )));
            state.status = SessionStatus::Stopped;
            self.publish_status(&state, if worker.demo { "Demo stopped" } else { "Training stopped" });
        }
        state
    }
}
