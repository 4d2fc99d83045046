//! Full, resumable checkpoints.
//!
//! A checkpoint directory holds three files: the engine's weights blob, the
//! engine's internal state blob (replay buffer, optimizer counters, target
//! weights) and `metadata.json`.  A directory missing any of them is
//! incomplete and is never offered as a resume point.

use std::fs;
use std::path::{Path, PathBuf};

use tetra_types::protocol::{INTERNAL_STATE_FILE, METADATA_FILE, WEIGHTS_FILE};
use tetra_types::{Backend, CheckpointMetadata, CheckpointSource, Engine, PersistScope};
use tracing::{debug, info};

use crate::StoreError;
use crate::atomic::write_dir_atomically;

/// Writes and restores checkpoints below a single root directory.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    root: PathBuf,
}

impl CheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of one of the well-known checkpoints.
    pub fn location(&self, source: CheckpointSource) -> PathBuf {
        self.root.join(source.dir_name())
    }

    /// Persist `engine` and `metadata` into `dir`, replacing any previous
    /// checkpoint there as a whole.
    ///
    /// # Errors
    ///
    /// On any failure the previous contents of `dir` are left untouched.
    pub fn save(
        &self,
        dir: &Path,
        engine: &dyn Engine,
        metadata: &CheckpointMetadata,
    ) -> Result<(), StoreError> {
        write_dir_atomically(dir, |staging| {
            engine.save(staging, PersistScope::Full)?;
            let encoded = serde_json::to_vec_pretty(metadata)?;
            fs::write(staging.join(METADATA_FILE), encoded)?;
            Ok(())
        })?;
        debug!(dir = %dir.display(), steps = metadata.steps_trained, "checkpoint written");
        Ok(())
    }

    /// Shorthand for [`save`](Self::save) into a well-known location.
    pub fn save_to(
        &self,
        source: CheckpointSource,
        engine: &dyn Engine,
        metadata: &CheckpointMetadata,
    ) -> Result<PathBuf, StoreError> {
        let dir = self.location(source);
        self.save(&dir, engine, metadata)?;
        Ok(dir)
    }

    /// Restore an engine with its replay and optimizer state from `dir`.
    ///
    /// The engine is rebuilt with the configuration recorded in the
    /// checkpoint's metadata.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] when `dir` does not exist,
    /// [`StoreError::Corrupt`] when a file is missing or unreadable.
    pub fn load(
        &self,
        dir: &Path,
        backend: &dyn Backend,
    ) -> Result<(Box<dyn Engine>, CheckpointMetadata), StoreError> {
        load_with_scope(dir, backend, PersistScope::Full)
    }

    /// The `latest` checkpoint, if a complete one exists.
    pub fn resume_point(&self) -> Option<PathBuf> {
        let latest = self.location(CheckpointSource::Latest);
        if is_complete(&latest, PersistScope::Full) {
            Some(latest)
        } else {
            None
        }
    }
}

/// `true` when `dir` holds every file `scope` requires.
pub fn is_complete(dir: &Path, scope: PersistScope) -> bool {
    let required: &[&str] = match scope {
        PersistScope::Full => &[WEIGHTS_FILE, INTERNAL_STATE_FILE, METADATA_FILE],
        PersistScope::WeightsOnly => &[WEIGHTS_FILE, METADATA_FILE],
    };
    required.iter().all(|f| dir.join(f).is_file())
}

/// Read and decode `metadata.json` from a checkpoint or slot directory.
pub fn read_metadata(dir: &Path) -> Result<CheckpointMetadata, StoreError> {
    let path = dir.join(METADATA_FILE);
    let raw = fs::read(&path).map_err(|e| StoreError::Corrupt {
        path: dir.to_path_buf(),
        reason: format!("cannot read {METADATA_FILE}: {e}"),
    })?;
    serde_json::from_slice(&raw).map_err(|e| StoreError::Corrupt {
        path: dir.to_path_buf(),
        reason: format!("invalid {METADATA_FILE}: {e}"),
    })
}

/// Shared by checkpoint resume (full scope) and slot demo (weights only).
pub(crate) fn load_with_scope(
    dir: &Path,
    backend: &dyn Backend,
    scope: PersistScope,
) -> Result<(Box<dyn Engine>, CheckpointMetadata), StoreError> {
    if !dir.is_dir() {
        return Err(StoreError::NotFound(dir.to_path_buf()));
    }
    let metadata = read_metadata(dir)?;
    if !is_complete(dir, scope) {
        return Err(StoreError::Corrupt {
            path: dir.to_path_buf(),
            reason: "missing engine files".to_string(),
        });
    }
    let engine = backend
        .load_engine(dir, &metadata.config, scope)
        .map_err(|e| StoreError::Corrupt {
            path: dir.to_path_buf(),
            reason: e.to_string(),
        })?;
    info!(
        dir = %dir.display(),
        steps = engine.steps_trained(),
        "engine restored from checkpoint"
    );
    Ok((engine, metadata))
}
