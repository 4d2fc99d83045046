//! [`LinearEngine`] – a linear afterstate-value learner.
//!
//! The value of a placement is `V(x) = w · x + b`, where `x` is the
//! afterstate feature vector the environment offers for that placement.
//! Acting picks the best afterstate (ε-greedy while training); learning
//! regresses `V(x_t)` towards `r_t + γ · V_target(x_{t+1})`, where `x_{t+1}`
//! is the greedy afterstate of the following observation.
//!
//! # Persistence
//!
//! | file             | contents                                          |
//! |------------------|---------------------------------------------------|
//! | `weights`        | online weights and the step counter               |
//! | `internal_state` | target weights, replay buffer, update counter, seed |

use std::collections::VecDeque;
use std::fs;
use std::path::Path;

use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng as _};
use rand_pcg::Pcg32;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tetra_types::protocol::{INTERNAL_STATE_FILE, WEIGHTS_FILE};
use tetra_types::{
    Engine, EngineError, Environment, Observation, PersistScope, TrainingConfig, Transition,
};
use tracing::debug;

use crate::env::FEATURE_COUNT;

/// One stored experience.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Experience {
    afterstate: Vec<f32>,
    reward: f64,
    done: bool,
    /// Greedy afterstate of the next observation; absent when `done`.
    next: Option<Vec<f32>>,
}

/// Learner hyperparameters lifted from a [`TrainingConfig`].
#[derive(Debug, Clone, PartialEq)]
struct Hyper {
    learning_rate: f64,
    gamma: f64,
    buffer_size: usize,
    batch_size: usize,
    exploration_initial_eps: f64,
    exploration_final_eps: f64,
    /// Steps over which epsilon decays.
    exploration_steps: f64,
    target_update_interval: u64,
    train_freq: u64,
    gradient_steps: u32,
    learning_starts: u64,
}

impl From<&TrainingConfig> for Hyper {
    fn from(c: &TrainingConfig) -> Self {
        Self {
            learning_rate: c.learning_rate,
            gamma: c.gamma,
            buffer_size: c.buffer_size.max(1),
            batch_size: c.batch_size.max(1),
            exploration_initial_eps: c.exploration_initial_eps,
            exploration_final_eps: c.exploration_final_eps,
            exploration_steps: (c.exploration_fraction * c.max_timesteps as f64).max(1.0),
            target_update_interval: c.target_update_interval.max(1),
            train_freq: c.train_freq.max(1),
            gradient_steps: c.gradient_steps,
            learning_starts: c.learning_starts,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct WeightsDoc {
    /// `FEATURE_COUNT` weights followed by the bias.
    weights: Vec<f64>,
    steps_trained: u64,
}

#[derive(Serialize, Deserialize)]
struct InternalStateDoc {
    target: Vec<f64>,
    updates: u64,
    seed: u64,
    replay: VecDeque<Experience>,
}

pub struct LinearEngine {
    hyper: Hyper,
    weights: Vec<f64>,
    target: Vec<f64>,
    replay: VecDeque<Experience>,
    steps: u64,
    updates: u64,
    seed: u64,
    rng: Pcg32,
}

fn value(weights: &[f64], x: &[f32]) -> f64 {
    let bias = weights.last().copied().unwrap_or(0.0);
    weights.iter().zip(x).map(|(w, &f)| w * f64::from(f)).sum::<f64>() + bias
}

/// Index and features of the highest-valued legal candidate; ties go to the
/// lowest index.
fn best_candidate<'a>(weights: &[f64], obs: &'a Observation) -> Option<(usize, &'a [f32])> {
    let mut best: Option<(usize, &[f32], f64)> = None;
    for (i, c) in obs.candidates.iter().enumerate() {
        let Some(x) = c else { continue };
        let v = value(weights, x);
        if best.is_none_or(|(_, _, bv)| v > bv) {
            best = Some((i, x, v));
        }
    }
    best.map(|(i, x, _)| (i, x))
}

impl LinearEngine {
    pub fn new(config: &TrainingConfig, seed: u64) -> Self {
        let weights = vec![0.0; FEATURE_COUNT + 1];
        Self {
            hyper: Hyper::from(config),
            target: weights.clone(),
            weights,
            replay: VecDeque::new(),
            steps: 0,
            updates: 0,
            seed,
            rng: Pcg32::seed_from_u64(seed),
        }
    }

    /// Restore an engine written by [`Engine::save`].
    ///
    /// With [`PersistScope::WeightsOnly`] the target weights start as a copy
    /// of the online weights and the replay buffer starts empty.
    ///
    /// # Errors
    ///
    /// [`EngineError::Io`] when a file cannot be read and
    /// [`EngineError::Malformed`] when one does not parse.
    pub fn load(
        dir: &Path,
        config: &TrainingConfig,
        seed: u64,
        scope: PersistScope,
    ) -> Result<Self, EngineError> {
        let doc: WeightsDoc = read_doc(dir, WEIGHTS_FILE)?;
        check_len(&doc.weights, WEIGHTS_FILE)?;

        let mut engine = Self::new(config, seed);
        engine.target = doc.weights.clone();
        engine.weights = doc.weights;
        engine.steps = doc.steps_trained;

        if scope == PersistScope::Full {
            let state: InternalStateDoc = read_doc(dir, INTERNAL_STATE_FILE)?;
            check_len(&state.target, INTERNAL_STATE_FILE)?;
            engine.target = state.target;
            engine.updates = state.updates;
            engine.seed = state.seed;
            engine.replay = state.replay;
            let excess = engine.replay.len().saturating_sub(engine.hyper.buffer_size);
            engine.replay.drain(..excess);
        }
        engine.rng = Pcg32::seed_from_u64(engine.seed.wrapping_add(engine.steps));
        debug!(
            steps = engine.steps,
            replay = engine.replay.len(),
            "linear engine restored"
        );
        Ok(engine)
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn replay_len(&self) -> usize {
        self.replay.len()
    }

    fn epsilon(&self) -> f64 {
        let h = &self.hyper;
        let progress = (self.steps as f64 / h.exploration_steps).min(1.0);
        h.exploration_initial_eps + (h.exploration_final_eps - h.exploration_initial_eps) * progress
    }

    fn choose(&mut self, obs: &Observation) -> usize {
        if self.rng.random::<f64>() < self.epsilon() {
            let legal: Vec<usize> = obs.legal_actions().collect();
            if let Some(&a) = legal.choose(&mut self.rng) {
                return a;
            }
        }
        self.predict(obs)
    }

    fn remember(&mut self, experience: Experience) {
        if self.replay.len() >= self.hyper.buffer_size {
            self.replay.pop_front();
        }
        self.replay.push_back(experience);
    }

    /// One minibatch SGD step on the squared TD error.
    fn gradient_step(&mut self) {
        let n = self.replay.len();
        if n == 0 {
            return;
        }
        let batch = self.hyper.batch_size.min(n);
        let mut grad = vec![0.0; self.weights.len()];
        for _ in 0..batch {
            let idx = self.rng.random_range(0..n);
            let e = &self.replay[idx];
            let bootstrap = match (&e.next, e.done) {
                (Some(next), false) => self.hyper.gamma * value(&self.target, next),
                _ => 0.0,
            };
            let err = e.reward + bootstrap - value(&self.weights, &e.afterstate);
            for (g, &f) in grad.iter_mut().zip(&e.afterstate) {
                *g += err * f64::from(f);
            }
            if let Some(b) = grad.last_mut() {
                *b += err;
            }
        }
        let scale = self.hyper.learning_rate / batch as f64;
        for (w, g) in self.weights.iter_mut().zip(&grad) {
            *w += scale * g;
        }
        self.updates += 1;
    }
}

impl Engine for LinearEngine {
    fn train(
        &mut self,
        env: &mut dyn Environment,
        observation: &Observation,
    ) -> Result<Transition, EngineError> {
        let action = self.choose(observation);
        let transition = env.step(action)?;
        self.steps += 1;

        if let Some(Some(afterstate)) = observation.candidates.get(action) {
            let next = if transition.is_done() {
                None
            } else {
                best_candidate(&self.weights, &transition.observation).map(|(_, x)| x.to_vec())
            };
            self.remember(Experience {
                afterstate: afterstate.clone(),
                reward: transition.reward,
                done: transition.terminated,
                next,
            });
        }

        let (starts, freq) = (self.hyper.learning_starts, self.hyper.train_freq);
        if self.steps > starts && self.steps % freq == 0 {
            for _ in 0..self.hyper.gradient_steps {
                self.gradient_step();
            }
        }
        if self.steps % self.hyper.target_update_interval == 0 {
            self.target.clone_from(&self.weights);
        }
        Ok(transition)
    }

    fn predict(&self, observation: &Observation) -> usize {
        best_candidate(&self.weights, observation).map_or(0, |(i, _)| i)
    }

    fn save(&self, dir: &Path, scope: PersistScope) -> Result<(), EngineError> {
        write_doc(
            dir,
            WEIGHTS_FILE,
            &WeightsDoc {
                weights: self.weights.clone(),
                steps_trained: self.steps,
            },
        )?;
        if scope == PersistScope::Full {
            write_doc(
                dir,
                INTERNAL_STATE_FILE,
                &InternalStateDoc {
                    target: self.target.clone(),
                    updates: self.updates,
                    seed: self.seed,
                    replay: self.replay.clone(),
                },
            )?;
        }
        Ok(())
    }

    fn steps_trained(&self) -> u64 {
        self.steps
    }

    fn exploration_rate(&self) -> f64 {
        self.epsilon()
    }
}

// ── Blob helpers ─────────────────────────────────────────────────────────────

fn read_doc<T: DeserializeOwned>(dir: &Path, file: &'static str) -> Result<T, EngineError> {
    let bytes = fs::read(dir.join(file))?;
    serde_json::from_slice(&bytes).map_err(|e| EngineError::Malformed {
        what: file,
        reason: e.to_string(),
    })
}

fn write_doc<T: Serialize>(dir: &Path, file: &'static str, doc: &T) -> Result<(), EngineError> {
    let bytes = serde_json::to_vec(doc).map_err(|e| EngineError::Other(e.to_string()))?;
    fs::write(dir.join(file), bytes)?;
    Ok(())
}

fn check_len(weights: &[f64], file: &'static str) -> Result<(), EngineError> {
    if weights.len() != FEATURE_COUNT + 1 {
        return Err(EngineError::Malformed {
            what: file,
            reason: format!(
                "expected {} weights, found {}",
                FEATURE_COUNT + 1,
                weights.len()
            ),
        });
    }
    Ok(())
}
