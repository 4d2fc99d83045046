//! Deterministic backend for worker and supervisor tests.

use std::fs;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use serde_json::{Value, json};
use tetra_types::protocol::{INTERNAL_STATE_FILE, WEIGHTS_FILE};
use tetra_types::{
    Backend, Board, Engine, EngineError, Environment, Message, Observation, PersistScope, StepInfo,
    TrainingConfig, Transition,
};

use crate::context::ControlContext;

/// Scripted game: every step clears `lines_per_step` lines and yields a
/// reward of 1; the episode terminates after `episode_len` steps.
#[derive(Debug, Clone)]
pub(crate) struct ScriptedBackend {
    pub episode_len: u32,
    pub lines_per_step: u32,
    pub step_delay: Duration,
    /// Panic inside `train` when the engine reaches this step count.
    pub panic_at: Option<u64>,
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self {
            episode_len: 1_000,
            lines_per_step: 0,
            step_delay: Duration::ZERO,
            panic_at: None,
        }
    }
}

pub(crate) struct ScriptedEnv {
    episode_len: u32,
    lines_per_step: u32,
    t: u32,
}

fn observation() -> Observation {
    Observation {
        features: vec![0.0],
        candidates: vec![Some(vec![0.0])],
    }
}

impl Environment for ScriptedEnv {
    fn reset(&mut self) -> Result<(Observation, StepInfo), EngineError> {
        self.t = 0;
        Ok((observation(), StepInfo::default()))
    }

    fn step(&mut self, _action: usize) -> Result<Transition, EngineError> {
        self.t += 1;
        Ok(Transition {
            observation: observation(),
            reward: 1.0,
            terminated: self.t >= self.episode_len,
            truncated: false,
            info: StepInfo {
                lines_cleared: self.t * self.lines_per_step,
            },
        })
    }

    fn board(&self) -> Board {
        vec![vec![(self.t % 8) as u8; 4]; 2]
    }
}

pub(crate) struct ScriptedEngine {
    steps: u64,
    step_delay: Duration,
    panic_at: Option<u64>,
}

impl ScriptedEngine {
    fn eps(&self) -> f64 {
        1.0 / (1.0 + self.steps as f64)
    }
}

impl Engine for ScriptedEngine {
    fn train(
        &mut self,
        env: &mut dyn Environment,
        _observation: &Observation,
    ) -> Result<Transition, EngineError> {
        if !self.step_delay.is_zero() {
            thread::sleep(self.step_delay);
        }
        self.steps += 1;
        if self.panic_at == Some(self.steps) {
            panic!("scripted panic at step {}", self.steps);
        }
        env.step(0)
    }

    fn predict(&self, _observation: &Observation) -> usize {
        if !self.step_delay.is_zero() {
            thread::sleep(self.step_delay);
        }
        0
    }

    fn save(&self, dir: &Path, scope: PersistScope) -> Result<(), EngineError> {
        fs::write(dir.join(WEIGHTS_FILE), json!({"steps": self.steps}).to_string())?;
        if scope == PersistScope::Full {
            fs::write(
                dir.join(INTERNAL_STATE_FILE),
                json!({"replay_len": self.steps}).to_string(),
            )?;
        }
        Ok(())
    }

    fn steps_trained(&self) -> u64 {
        self.steps
    }

    fn exploration_rate(&self) -> f64 {
        self.eps()
    }
}

fn read_json(dir: &Path, file: &'static str) -> Result<Value, EngineError> {
    serde_json::from_slice(&fs::read(dir.join(file))?).map_err(|e| EngineError::Malformed {
        what: file,
        reason: e.to_string(),
    })
}

impl ScriptedBackend {
    fn engine(&self, steps: u64) -> ScriptedEngine {
        ScriptedEngine {
            steps,
            step_delay: self.step_delay,
            panic_at: self.panic_at,
        }
    }
}

impl Backend for ScriptedBackend {
    fn create_environment(
        &self,
        _config: &TrainingConfig,
    ) -> Result<Box<dyn Environment>, EngineError> {
        Ok(Box::new(ScriptedEnv {
            episode_len: self.episode_len,
            lines_per_step: self.lines_per_step,
            t: 0,
        }))
    }

    fn create_engine(&self, _config: &TrainingConfig) -> Result<Box<dyn Engine>, EngineError> {
        Ok(Box::new(self.engine(0)))
    }

    fn load_engine(
        &self,
        dir: &Path,
        _config: &TrainingConfig,
        scope: PersistScope,
    ) -> Result<Box<dyn Engine>, EngineError> {
        let weights = read_json(dir, WEIGHTS_FILE)?;
        if scope == PersistScope::Full {
            read_json(dir, INTERNAL_STATE_FILE)?;
        }
        let steps = weights["steps"].as_u64().ok_or(EngineError::Malformed {
            what: WEIGHTS_FILE,
            reason: "missing steps".to_string(),
        })?;
        Ok(Box::new(self.engine(steps)))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Telemetry helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Drain telemetry until `stop` matches (inclusive) or `timeout` elapses.
pub(crate) fn collect_until(
    ctx: &ControlContext,
    timeout: Duration,
    mut stop: impl FnMut(&Message) -> bool,
) -> Vec<Message> {
    let deadline = Instant::now() + timeout;
    let mut seen = Vec::new();
    while Instant::now() < deadline {
        while let Some(msg) = ctx.drain_telemetry(1).pop() {
            let hit = stop(&msg);
            seen.push(msg);
            if hit {
                return seen;
            }
        }
        thread::sleep(Duration::from_millis(2));
    }
    panic!("timed out; saw {:?}", kinds(&seen));
}

/// Async twin of [`collect_until`].
pub(crate) async fn collect_until_async(
    ctx: &ControlContext,
    timeout: Duration,
    mut stop: impl FnMut(&Message) -> bool,
) -> Vec<Message> {
    let deadline = Instant::now() + timeout;
    let mut seen = Vec::new();
    while Instant::now() < deadline {
        while let Some(msg) = ctx.drain_telemetry(1).pop() {
            let hit = stop(&msg);
            seen.push(msg);
            if hit {
                return seen;
            }
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("timed out; saw {:?}", kinds(&seen));
}

pub(crate) fn kinds(messages: &[Message]) -> Vec<&'static str> {
    messages.iter().map(Message::kind).collect()
}
