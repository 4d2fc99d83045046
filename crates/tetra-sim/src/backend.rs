//! [`SimBackend`] – wires [`TetrisEnv`] and [`LinearEngine`] into the
//! runtime through the [`Backend`] trait.

use std::path::Path;

use rand::Rng;
use tetra_types::{Backend, Engine, EngineError, Environment, PersistScope, TrainingConfig};
use tracing::debug;

use crate::engine::LinearEngine;
use crate::env::TetrisEnv;

/// Seed from the config, or fresh OS-backed entropy when none is set.
fn resolve_seed(config: &TrainingConfig) -> u64 {
    config.seed.unwrap_or_else(|| rand::rng().random())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SimBackend;

impl SimBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Backend for SimBackend {
    fn create_environment(
        &self,
        config: &TrainingConfig,
    ) -> Result<Box<dyn Environment>, EngineError> {
        let seed = resolve_seed(config);
        debug!(seed, "creating tetris environment");
        Ok(Box::new(TetrisEnv::new(config.reward.clone(), seed)))
    }

    fn create_engine(&self, config: &TrainingConfig) -> Result<Box<dyn Engine>, EngineError> {
        Ok(Box::new(LinearEngine::new(config, resolve_seed(config))))
    }

    fn load_engine(
        &self,
        dir: &Path,
        config: &TrainingConfig,
        scope: PersistScope,
    ) -> Result<Box<dyn Engine>, EngineError> {
        let engine = LinearEngine::load(dir, config, resolve_seed(config), scope)?;
        Ok(Box::new(engine))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn seeded() -> TrainingConfig {
        TrainingConfig {
            seed: Some(11),
            ..TrainingConfig::default()
        }
    }

    #[test]
    fn seeded_environments_deal_the_same_game() {
        let backend = SimBackend::new();
        let mut a = backend.create_environment(&seeded()).unwrap();
        let mut b = backend.create_environment(&seeded()).unwrap();
        let (oa, _) = a.reset().unwrap();
        let (ob, _) = b.reset().unwrap();
        assert_eq!(oa, ob);

        let action = oa.legal_actions().next().unwrap();
        assert_eq!(a.step(action).unwrap(), b.step(action).unwrap());
        assert_eq!(a.board(), b.board());
    }

    #[test]
    fn engine_round_trips_through_the_backend() {
        let backend = SimBackend::new();
        let config = seeded();
        let mut engine = backend.create_engine(&config).unwrap();
        let mut env = backend.create_environment(&config).unwrap();
        let (mut obs, _) = env.reset().unwrap();
        for _ in 0..30 {
            let t = engine.train(env.as_mut(), &obs).unwrap();
            obs = if t.is_done() { env.reset().unwrap().0 } else { t.observation };
        }

        let dir = TempDir::new().unwrap();
        engine.save(dir.path(), PersistScope::Full).unwrap();
        let loaded = backend
            .load_engine(dir.path(), &config, PersistScope::Full)
            .unwrap();
        assert_eq!(loaded.steps_trained(), 30);
        assert_eq!(loaded.exploration_rate(), engine.exploration_rate());
        assert_eq!(loaded.predict(&obs), engine.predict(&obs));
    }

    #[test]
    fn load_from_empty_dir_fails() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            SimBackend::new().load_engine(dir.path(), &seeded(), PersistScope::WeightsOnly),
            Err(EngineError::Io(_))
        ));
    }
}
