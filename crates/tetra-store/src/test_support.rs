//! Minimal engine double whose persisted state is easy to inspect.

use std::fs;
use std::path::Path;

use chrono::Utc;
use serde_json::{Value, json};
use tetra_types::protocol::{INTERNAL_STATE_FILE, WEIGHTS_FILE};
use tetra_types::{
    Backend, CheckpointMetadata, Engine, EngineError, Environment, Observation, PersistScope,
    TrainingConfig, Transition,
};

pub(crate) struct CountingEngine {
    steps: u64,
    eps: f64,
    fail_save: bool,
}

impl CountingEngine {
    pub(crate) fn new(steps: u64, eps: f64) -> Self {
        Self {
            steps,
            eps,
            fail_save: false,
        }
    }

    pub(crate) fn failing_save(steps: u64, eps: f64) -> Self {
        Self {
            steps,
            eps,
            fail_save: true,
        }
    }
}

impl Engine for CountingEngine {
    fn train(
        &mut self,
        env: &mut dyn Environment,
        _observation: &Observation,
    ) -> Result<Transition, EngineError> {
        self.steps += 1;
        env.step(0)
    }

    fn predict(&self, _observation: &Observation) -> usize {
        0
    }

    fn save(&self, dir: &Path, scope: PersistScope) -> Result<(), EngineError> {
        fs::write(
            dir.join(WEIGHTS_FILE),
            json!({"steps": self.steps, "eps": self.eps}).to_string(),
        )?;
        if self.fail_save {
            return Err(EngineError::Other("disk full".to_string()));
        }
        if scope == PersistScope::Full {
            fs::write(dir.join(INTERNAL_STATE_FILE), json!({"replay": []}).to_string())?;
        }
        Ok(())
    }

    fn steps_trained(&self) -> u64 {
        self.steps
    }

    fn exploration_rate(&self) -> f64 {
        self.eps
    }
}

pub(crate) struct CountingBackend;

fn parse(dir: &Path, file: &'static str) -> Result<Value, EngineError> {
    let raw = fs::read(dir.join(file))?;
    serde_json::from_slice(&raw).map_err(|e| EngineError::Malformed {
        what: file,
        reason: e.to_string(),
    })
}

impl Backend for CountingBackend {
    fn create_environment(
        &self,
        _config: &TrainingConfig,
    ) -> Result<Box<dyn Environment>, EngineError> {
        Err(EngineError::Other("no environment in store tests".to_string()))
    }

    fn create_engine(&self, _config: &TrainingConfig) -> Result<Box<dyn Engine>, EngineError> {
        Ok(Box::new(CountingEngine::new(0, 1.0)))
    }

    fn load_engine(
        &self,
        dir: &Path,
        _config: &TrainingConfig,
        scope: PersistScope,
    ) -> Result<Box<dyn Engine>, EngineError> {
        let weights = parse(dir, WEIGHTS_FILE)?;
        if scope == PersistScope::Full {
            parse(dir, INTERNAL_STATE_FILE)?;
        }
        Ok(Box::new(CountingEngine::new(
            weights["steps"].as_u64().unwrap_or_default(),
            weights["eps"].as_f64().unwrap_or_default(),
        )))
    }
}

pub(crate) fn metadata(steps: u64, eps: f64, best_lines: u32) -> CheckpointMetadata {
    CheckpointMetadata {
        steps_trained: steps,
        episodes: steps / 100,
        exploration_rate: eps,
        best_lines,
        config: TrainingConfig::default(),
        timestamp: Utc::now(),
    }
}
