//! The worker loop.
//!
//! Runs on a dedicated OS thread and is the only code that drives the engine
//! and the environment.  Each iteration:
//!
//! 1. check stop;
//! 2. drain the command queue (mode, speed, stop);
//! 3. wait on the pause gate; if it blocked, check stop and drain again;
//! 4. check stop a second time, then the step limit;
//! 5. take one step (train: `Engine::train`, demo: `Engine::predict`);
//! 6. emit board / metrics on their step intervals, write the periodic
//!    `latest` checkpoint, and on an episode boundary emit the episode
//!    summary, save `best` on improvement and reset;
//! 7. in visual mode, sleep `(1 - speed) * 500 ms`.
//!
//! Errors and panics are caught at the top: the worker emits an `error`
//! message and exits with [`WorkerExit::Failed`].  It never restarts itself.

use std::collections::VecDeque;
use std::error::Error as _;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Utc;
use tetra_store::{CheckpointStore, StoreError};
use tetra_types::{
    Backend, CheckpointMetadata, CheckpointSource, Engine, EngineError, Environment, Message,
    MetricsSnapshot, Observation, StepInfo, TetraError, TrainingConfig, Transition, clamp_speed,
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::context::{ControlContext, WorkerCommand};

/// Pacing delay at the slowest speed factor.
pub const MAX_FRAME_DELAY: Duration = Duration::from_millis(500);

/// Window of completed episodes behind `avg_reward`.
const REWARD_WINDOW: usize = 100;

// ─────────────────────────────────────────────────────────────────────────────
// Launch parameters
// ─────────────────────────────────────────────────────────────────────────────

/// Train or demo.
pub enum SessionMode {
    /// Learn; resume from `latest` if one exists.
    Train,
    /// Inference only, with an engine already restored from a model slot.
    Demo {
        engine: Box<dyn Engine>,
        slot_name: String,
    },
}

impl SessionMode {
    pub fn is_demo(&self) -> bool {
        matches!(self, SessionMode::Demo { .. })
    }
}

/// Everything a worker needs, passed by value into its thread.
pub struct WorkerLaunch {
    pub mode: SessionMode,
    pub config: TrainingConfig,
    pub visual_mode: bool,
    pub speed_factor: f64,
    pub backend: Arc<dyn Backend>,
}

/// How a worker ended.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerExit {
    /// The stop flag (or a `stop` command) ended the session.
    Stopped,
    /// The session reached a natural end (step limit, line target).
    Completed(String),
    /// An error or panic ended the session; already reported as telemetry.
    Failed(String),
}

#[derive(Error, Debug)]
enum WorkerError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Start a worker thread named `tetra-worker-<generation>`.
///
/// # Errors
///
/// Returns the OS error if the thread cannot be created.
pub fn spawn_worker(
    ctx: Arc<ControlContext>,
    generation: u64,
    launch: WorkerLaunch,
) -> io::Result<JoinHandle<WorkerExit>> {
    thread::Builder::new()
        .name(format!("tetra-worker-{generation}"))
        .spawn(move || run_guarded(ctx, generation, launch))
}

fn run_guarded(ctx: Arc<ControlContext>, generation: u64, launch: WorkerLaunch) -> WorkerExit {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        Worker::start(Arc::clone(&ctx), generation, launch).and_then(|mut w| w.run())
    }));

    match outcome {
        Ok(Ok(exit)) => {
            info!(generation, ?exit, "worker finished");
            exit
        }
        Ok(Err(e)) => {
            let trace = e.source().map(|s| s.to_string());
            error!(generation, error = %e, "worker failed");
            ctx.emit(generation, Message::error(e.to_string(), trace));
            WorkerExit::Failed(e.to_string())
        }
        Err(payload) => {
            let reason = panic_message(payload.as_ref());
            error!(generation, reason = %reason, "worker panicked");
            let crash = TetraError::WorkerCrash(reason.clone());
            ctx.emit(
                generation,
                Message::error(crash.to_string(), Some(format!("panic in tetra-worker-{generation}"))),
            );
            WorkerExit::Failed(reason)
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Episode bookkeeping
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct EpisodeStats {
    episodes: u64,
    reward: f64,
    lines: u32,
    /// Best single-episode lines in this session.
    session_best: u32,
    /// Best lines recorded by the checkpoint this session resumed from.
    resumed_best: u32,
    recent: VecDeque<f64>,
}

impl EpisodeStats {
    fn record_step(&mut self, t: &Transition) {
        self.reward += t.reward;
        self.lines = t.info.lines_cleared;
    }

    /// Close the current episode. Returns `true` when it beats every
    /// episode of this run, including those before the resume.
    fn finish_episode(&mut self) -> bool {
        self.episodes += 1;
        if self.recent.len() == REWARD_WINDOW {
            self.recent.pop_front();
        }
        self.recent.push_back(self.reward);
        let improved = self.lines > self.best_overall();
        self.session_best = self.session_best.max(self.lines);
        improved
    }

    fn reset_episode(&mut self) {
        self.reward = 0.0;
        self.lines = 0;
    }

    fn avg_reward(&self) -> f64 {
        if self.recent.is_empty() {
            0.0
        } else {
            self.recent.iter().sum::<f64>() / self.recent.len() as f64
        }
    }

    fn best_overall(&self) -> u32 {
        self.session_best.max(self.resumed_best)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Worker
// ─────────────────────────────────────────────────────────────────────────────

struct Worker {
    ctx: Arc<ControlContext>,
    generation: u64,
    demo: bool,
    config: TrainingConfig,
    visual_mode: bool,
    speed_factor: f64,
    env: Box<dyn Environment>,
    engine: Box<dyn Engine>,
    store: CheckpointStore,
    observation: Observation,
    /// Steps taken by this worker; the step counter in demo mode.
    local_steps: u64,
    stats: EpisodeStats,
    stop_command: bool,
}

impl Worker {
    fn start(
        ctx: Arc<ControlContext>,
        generation: u64,
        launch: WorkerLaunch,
    ) -> Result<Self, WorkerError> {
        let WorkerLaunch {
            mode,
            config,
            visual_mode,
            speed_factor,
            backend,
        } = launch;
        let store = CheckpointStore::new(config.checkpoint_dir.clone());
        let mut stats = EpisodeStats::default();
        let demo = mode.is_demo();

        let engine = match mode {
            SessionMode::Demo { engine, slot_name } => {
                info!(generation, slot = %slot_name, "demo worker starting");
                engine
            }
            SessionMode::Train => {
                let resumed = resume(&ctx, generation, &store, backend.as_ref());
                match resumed {
                    Some((engine, metadata)) => {
                        stats.episodes = metadata.episodes;
                        stats.resumed_best = metadata.best_lines;
                        engine
                    }
                    None => backend.create_engine(&config)?,
                }
            }
        };

        let mut env = backend.create_environment(&config)?;
        let (observation, _) = env.reset()?;

        Ok(Self {
            ctx,
            generation,
            demo,
            config,
            visual_mode,
            speed_factor: clamp_speed(speed_factor),
            env,
            engine,
            store,
            observation,
            local_steps: 0,
            stats,
            stop_command: false,
        })
    }

    fn emit(&self, message: Message) {
        self.ctx.emit(self.generation, message);
    }

    fn should_stop(&self) -> bool {
        self.stop_command
            || self.ctx.flags().stop_requested()
            || !self.ctx.is_current(self.generation)
    }

    fn steps(&self) -> u64 {
        if self.demo {
            self.local_steps
        } else {
            self.engine.steps_trained()
        }
    }

    fn run(&mut self) -> Result<WorkerExit, WorkerError> {
        let exit = self.run_loop()?;
        if !self.demo && self.ctx.is_current(self.generation) {
            self.save_final()?;
        }
        Ok(exit)
    }

    fn run_loop(&mut self) -> Result<WorkerExit, WorkerError> {
        if !self.demo && self.steps() >= self.config.max_timesteps {
            let note = format!("Already trained {} steps; nothing to do", self.steps());
            self.emit(Message::info(note.clone()));
            return Ok(WorkerExit::Completed(note));
        }

        loop {
            if self.should_stop() {
                return Ok(WorkerExit::Stopped);
            }
            self.apply_commands();

            if self.ctx.flags().pause.wait() {
                // Anything sent while paused lands before the next step.
                if self.should_stop() {
                    return Ok(WorkerExit::Stopped);
                }
                self.apply_commands();
            }
            if self.should_stop() {
                return Ok(WorkerExit::Stopped);
            }

            if let Some(exit) = self.step()? {
                return Ok(exit);
            }

            if self.visual_mode {
                thread::sleep(frame_delay(self.speed_factor));
            }
        }
    }

    fn apply_commands(&mut self) {
        for command in self.ctx.drain_commands(self.generation) {
            match command {
                WorkerCommand::SetMode { visual } => {
                    self.visual_mode = visual;
                    let label = if visual { "visual" } else { "headless" };
                    self.emit(Message::info(format!("Mode: {label}")));
                }
                WorkerCommand::SetSpeed(speed) => {
                    self.speed_factor = clamp_speed(speed);
                    self.emit(Message::info(format!("Speed set to {:.1}x", self.speed_factor)));
                }
                WorkerCommand::Stop => self.stop_command = true,
            }
        }
    }

    /// One engine/environment step plus its telemetry.
    fn step(&mut self) -> Result<Option<WorkerExit>, WorkerError> {
        if !self.demo && self.steps() >= self.config.max_timesteps {
            let note = format!("Reached max_timesteps ({})", self.config.max_timesteps);
            self.emit(Message::info(note.clone()));
            return Ok(Some(WorkerExit::Completed(note)));
        }

        let transition = if self.demo {
            let action = self.engine.predict(&self.observation);
            self.env.step(action)?
        } else {
            self.engine.train(self.env.as_mut(), &self.observation)?
        };
        self.local_steps += 1;
        self.stats.record_step(&transition);
        let steps = self.steps();

        if steps % self.config.board_every == 0 {
            self.emit(Message::Board {
                board: self.env.board(),
            });
        }
        if steps % self.config.metrics_every == 0 {
            self.emit(Message::Metrics(self.metrics(steps, transition.info)));
        }
        if !self.demo && self.config.checkpoint_freq > 0 && steps % self.config.checkpoint_freq == 0 {
            self.save(CheckpointSource::Latest)?;
        }

        let done = transition.is_done();
        self.observation = transition.observation;
        if done {
            if let Some(exit) = self.end_episode()? {
                return Ok(Some(exit));
            }
        }
        Ok(None)
    }

    fn metrics(&self, steps: u64, info: StepInfo) -> MetricsSnapshot {
        MetricsSnapshot {
            steps,
            episode_count: self.stats.episodes,
            current_score: self.stats.reward,
            objective_metric: info.lines_cleared,
            avg_reward: self.stats.avg_reward(),
            best_objective: self.stats.session_best,
            exploration_rate: if self.demo {
                0.0
            } else {
                self.engine.exploration_rate()
            },
        }
    }

    fn end_episode(&mut self) -> Result<Option<WorkerExit>, WorkerError> {
        let reward = self.stats.reward;
        let lines = self.stats.lines;
        let improved = self.stats.finish_episode();
        self.emit(Message::Episode {
            episode_index: self.stats.episodes,
            reward,
            objective_metric: lines,
        });
        debug!(episode = self.stats.episodes, reward, lines, "episode finished");

        if improved && !self.demo {
            self.save(CheckpointSource::Best)?;
            self.emit(Message::info(format!("New best: {lines} lines (saved)")));
        }

        let (observation, _) = self.env.reset()?;
        self.observation = observation;
        self.stats.reset_episode();

        match self.config.target_lines {
            Some(target) if !self.demo && self.stats.session_best >= target => {
                let note = format!("Target of {target} lines reached");
                self.emit(Message::info(note.clone()));
                Ok(Some(WorkerExit::Completed(note)))
            }
            _ => Ok(None),
        }
    }

    fn metadata(&self) -> CheckpointMetadata {
        CheckpointMetadata {
            steps_trained: self.engine.steps_trained(),
            episodes: self.stats.episodes,
            exploration_rate: self.engine.exploration_rate(),
            best_lines: self.stats.best_overall(),
            config: self.config.clone(),
            timestamp: Utc::now(),
        }
    }

    /// Write a checkpoint.  An abandoned worker writes nothing.
    fn save(&self, source: CheckpointSource) -> Result<(), StoreError> {
        if !self.ctx.is_current(self.generation) {
            debug!(generation = self.generation, ?source, "stale worker; checkpoint skipped");
            return Ok(());
        }
        let dir = self
            .store
            .save_to(source, self.engine.as_ref(), &self.metadata())?;
        debug!(dir = %dir.display(), "checkpoint saved");
        Ok(())
    }

    fn save_final(&self) -> Result<(), StoreError> {
        self.save(CheckpointSource::Latest)?;
        self.save(CheckpointSource::Final)?;
        self.emit(Message::info(format!(
            "Final checkpoint saved at step {}",
            self.engine.steps_trained()
        )));
        Ok(())
    }
}

/// Restore from `latest` if it holds a complete bundle.
///
/// A corrupt bundle is reported and the session starts fresh.
fn resume(
    ctx: &ControlContext,
    generation: u64,
    store: &CheckpointStore,
    backend: &dyn Backend,
) -> Option<(Box<dyn Engine>, CheckpointMetadata)> {
    let dir = store.resume_point()?;
    match store.load(&dir, backend) {
        Ok((engine, metadata)) => {
            info!(
                steps = engine.steps_trained(),
                episodes = metadata.episodes,
                "resuming from latest checkpoint"
            );
            ctx.emit(
                generation,
                Message::info(format!(
                    "Resumed from checkpoint at step {} ({} episodes)",
                    engine.steps_trained(),
                    metadata.episodes
                )),
            );
            Some((engine, metadata))
        }
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "checkpoint unusable; starting fresh");
            let err = TetraError::from(e);
            ctx.emit(generation, Message::error(err.to_string(), None));
            None
        }
    }
}

/// Pacing delay for a speed factor in `[0.1, 1.0]`.
pub fn frame_delay(speed_factor: f64) -> Duration {
    MAX_FRAME_DELAY.mul_f64(1.0 - clamp_speed(speed_factor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedBackend, collect_until, kinds};
    use std::time::Instant;
    use tetra_types::protocol::INTERNAL_STATE_FILE;

    fn config(dir: &std::path::Path) -> TrainingConfig {
        TrainingConfig {
            checkpoint_dir: dir.to_path_buf(),
            metrics_every: 1,
            board_every: 1,
            checkpoint_freq: 1_000_000,
            max_timesteps: 20,
            ..TrainingConfig::default()
        }
    }

    fn launch(config: TrainingConfig, backend: ScriptedBackend) -> WorkerLaunch {
        WorkerLaunch {
            mode: SessionMode::Train,
            config,
            visual_mode: false,
            speed_factor: 1.0,
            backend: Arc::new(backend),
        }
    }

    #[test]
    fn frame_delay_scales_with_speed() {
        assert_eq!(frame_delay(1.0), Duration::ZERO);
        assert_eq!(frame_delay(0.5), Duration::from_millis(250));
        // Clamped to the minimum speed of 0.1.
        assert!((frame_delay(0.0).as_secs_f64() - 0.45).abs() < 1e-6);
    }

    #[test]
    fn stats_track_average_over_window() {
        let mut stats = EpisodeStats::default();
        for r in 0..150 {
            stats.reward = r as f64;
            stats.finish_episode();
        }
        assert_eq!(stats.recent.len(), REWARD_WINDOW);
        assert!((stats.avg_reward() - 99.5).abs() < 1e-9);
    }

    #[test]
    fn resumed_best_must_be_beaten() {
        let mut stats = EpisodeStats {
            resumed_best: 10,
            ..EpisodeStats::default()
        };
        stats.lines = 7;
        assert!(!stats.finish_episode());
        assert_eq!(stats.session_best, 7);
        stats.lines = 11;
        assert!(stats.finish_episode());
        assert_eq!(stats.best_overall(), 11);
    }

    #[test]
    fn runs_to_max_timesteps_and_writes_final() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Arc::new(ControlContext::new());
        let generation = ctx.begin_session();

        let handle = spawn_worker(
            Arc::clone(&ctx),
            generation,
            launch(config(dir.path()), ScriptedBackend::default()),
        )
        .unwrap();
        let exit = handle.join().unwrap();

        assert!(matches!(exit, WorkerExit::Completed(_)), "{exit:?}");
        let steps: Vec<u64> = ctx
            .drain_telemetry(usize::MAX)
            .into_iter()
            .filter_map(|m| match m {
                Message::Metrics(s) => Some(s.steps),
                _ => None,
            })
            .collect();
        assert_eq!(steps, (1..=20).collect::<Vec<_>>());
        assert!(dir.path().join("final").join(INTERNAL_STATE_FILE).is_file());
        assert!(dir.path().join("latest").join(INTERNAL_STATE_FILE).is_file());
    }

    #[test]
    fn second_session_resumes_step_count() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Arc::new(ControlContext::new());

        let g1 = ctx.begin_session();
        spawn_worker(Arc::clone(&ctx), g1, launch(config(dir.path()), ScriptedBackend::default()))
            .unwrap()
            .join()
            .unwrap();
        ctx.drain_telemetry(usize::MAX);

        let g2 = ctx.begin_session();
        let cfg = TrainingConfig {
            max_timesteps: 25,
            ..config(dir.path())
        };
        spawn_worker(Arc::clone(&ctx), g2, launch(cfg, ScriptedBackend::default()))
            .unwrap()
            .join()
            .unwrap();

        let messages = ctx.drain_telemetry(usize::MAX);
        let first_steps = messages.iter().find_map(|m| match m {
            Message::Metrics(s) => Some(s.steps),
            _ => None,
        });
        assert_eq!(first_steps, Some(21));
        assert!(messages.iter().any(|m| matches!(
            m,
            Message::Info { message } if message.starts_with("Resumed from checkpoint at step 20")
        )));
    }

    #[test]
    fn corrupt_latest_reports_error_and_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Arc::new(ControlContext::new());
        let g1 = ctx.begin_session();
        spawn_worker(Arc::clone(&ctx), g1, launch(config(dir.path()), ScriptedBackend::default()))
            .unwrap()
            .join()
            .unwrap();
        ctx.drain_telemetry(usize::MAX);
        std::fs::write(dir.path().join("latest").join(INTERNAL_STATE_FILE), b"garbage").unwrap();

        let g2 = ctx.begin_session();
        spawn_worker(Arc::clone(&ctx), g2, launch(config(dir.path()), ScriptedBackend::default()))
            .unwrap()
            .join()
            .unwrap();

        let messages = ctx.drain_telemetry(usize::MAX);
        assert_eq!(messages.first().map(Message::kind), Some("error"));
        let first_steps = messages.iter().find_map(|m| match m {
            Message::Metrics(s) => Some(s.steps),
            _ => None,
        });
        assert_eq!(first_steps, Some(1));
    }

    #[test]
    fn episode_boundary_emits_summary_and_saves_best() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Arc::new(ControlContext::new());
        let generation = ctx.begin_session();
        let backend = ScriptedBackend {
            episode_len: 5,
            lines_per_step: 1,
            ..ScriptedBackend::default()
        };
        spawn_worker(Arc::clone(&ctx), generation, launch(config(dir.path()), backend))
            .unwrap()
            .join()
            .unwrap();

        let messages = ctx.drain_telemetry(usize::MAX);
        let episodes: Vec<(u64, u32)> = messages
            .iter()
            .filter_map(|m| match m {
                Message::Episode {
                    episode_index,
                    objective_metric,
                    ..
                } => Some((*episode_index, *objective_metric)),
                _ => None,
            })
            .collect();
        assert_eq!(episodes, vec![(1, 5), (2, 5), (3, 5), (4, 5)]);
        // Only the first episode is a strict improvement.
        let bests = messages
            .iter()
            .filter(|m| matches!(m, Message::Info { message } if message.starts_with("New best")))
            .count();
        assert_eq!(bests, 1);
        let best = tetra_store::read_metadata(&dir.path().join("best")).unwrap();
        assert_eq!(best.best_lines, 5);
    }

    #[test]
    fn target_lines_ends_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Arc::new(ControlContext::new());
        let generation = ctx.begin_session();
        let backend = ScriptedBackend {
            episode_len: 4,
            lines_per_step: 1,
            ..ScriptedBackend::default()
        };
        let cfg = TrainingConfig {
            target_lines: Some(3),
            max_timesteps: 1_000,
            ..config(dir.path())
        };
        let exit = spawn_worker(Arc::clone(&ctx), generation, launch(cfg, backend))
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(exit, WorkerExit::Completed("Target of 3 lines reached".to_string()));
    }

    #[test]
    fn stop_command_ends_the_loop() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Arc::new(ControlContext::new());
        let generation = ctx.begin_session();
        let cfg = TrainingConfig {
            max_timesteps: u64::MAX,
            ..config(dir.path())
        };
        let backend = ScriptedBackend {
            step_delay: Duration::from_millis(1),
            ..ScriptedBackend::default()
        };
        let handle = spawn_worker(Arc::clone(&ctx), generation, launch(cfg, backend)).unwrap();
        collect_until(&ctx, Duration::from_secs(5), |m| matches!(m, Message::Metrics(_)));
        ctx.send_command(WorkerCommand::Stop);
        assert_eq!(handle.join().unwrap(), WorkerExit::Stopped);
    }

    #[test]
    fn panic_inside_engine_is_reported_as_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Arc::new(ControlContext::new());
        let generation = ctx.begin_session();
        let backend = ScriptedBackend {
            panic_at: Some(3),
            ..ScriptedBackend::default()
        };
        let exit = spawn_worker(Arc::clone(&ctx), generation, launch(config(dir.path()), backend))
            .unwrap()
            .join()
            .unwrap();

        assert!(matches!(exit, WorkerExit::Failed(ref r) if r.contains("scripted panic")));
        let messages = ctx.drain_telemetry(usize::MAX);
        assert_eq!(messages.last().map(Message::kind), Some("error"));
    }

    #[test]
    fn demo_never_writes_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Arc::new(ControlContext::new());
        let generation = ctx.begin_session();
        let backend = ScriptedBackend {
            episode_len: 3,
            lines_per_step: 2,
            step_delay: Duration::from_millis(1),
            ..ScriptedBackend::default()
        };
        let engine = backend.create_engine(&TrainingConfig::default()).unwrap();
        let handle = spawn_worker(
            Arc::clone(&ctx),
            generation,
            WorkerLaunch {
                mode: SessionMode::Demo {
                    engine,
                    slot_name: "demo".to_string(),
                },
                config: config(dir.path()),
                visual_mode: false,
                speed_factor: 1.0,
                backend: Arc::new(backend),
            },
        )
        .unwrap();

        let seen = collect_until(&ctx, Duration::from_secs(5), |m| matches!(m, Message::Episode { .. }));
        ctx.request_stop();
        assert_eq!(handle.join().unwrap(), WorkerExit::Stopped);
        assert!(kinds(&seen).contains(&"board"));
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[test]
    fn visual_mode_paces_the_loop() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Arc::new(ControlContext::new());
        let generation = ctx.begin_session();
        let cfg = TrainingConfig {
            max_timesteps: 4,
            ..config(dir.path())
        };
        let mut l = launch(cfg, ScriptedBackend::default());
        l.visual_mode = true;
        l.speed_factor = 0.9;

        let started = Instant::now();
        spawn_worker(Arc::clone(&ctx), generation, l).unwrap().join().unwrap();
        // Four paced steps at ~50 ms each.
        assert!(started.elapsed() >= Duration::from_millis(190));
    }
}
