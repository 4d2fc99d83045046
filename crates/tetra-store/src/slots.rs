//! Named model slots.
//!
//! A slot is `slots/<name>/{weights, metadata.json}`: enough to replay or
//! share a model, without the replay buffer and optimizer state that only a
//! training resume needs.

use std::fs;
use std::path::{Path, PathBuf};

use tetra_types::protocol::{METADATA_FILE, SLOTS_DIR, WEIGHTS_FILE};
use tetra_types::{Backend, CheckpointMetadata, CheckpointSource, Engine, PersistScope, SlotSummary};
use tracing::{debug, info, warn};

use crate::atomic::{copy_file, write_dir_atomically};
use crate::checkpoint::{self, CheckpointStore};
use crate::StoreError;

/// Reject anything outside `[A-Za-z0-9_-]+`.
pub fn validate_slot_name(name: &str) -> Result<(), StoreError> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidSlotName(name.to_string()))
    }
}

/// Copy attempts before giving up on a source that keeps being republished.
const SNAPSHOT_ATTEMPTS: usize = 5;

/// Copy weights and metadata that belong to the same published bundle.
///
/// A running session may republish `source_dir` at any time.  The metadata
/// is read before and after the weights are copied; if it changed, the copy
/// is retried.  The metadata written is the one read before the copy.
fn copy_snapshot(source_dir: &Path, staging: &Path) -> Result<(), StoreError> {
    let metadata_path = source_dir.join(METADATA_FILE);
    let mut last_error = None;

    for attempt in 1..=SNAPSHOT_ATTEMPTS {
        let result = (|| -> Result<bool, StoreError> {
            let before = fs::read(&metadata_path)?;
            copy_file(&source_dir.join(WEIGHTS_FILE), &staging.join(WEIGHTS_FILE))?;
            if fs::read(&metadata_path)? != before {
                return Ok(false);
            }
            fs::write(staging.join(METADATA_FILE), &before)?;
            Ok(true)
        })();
        match result {
            Ok(true) => return Ok(()),
            Ok(false) => debug!(attempt, source = %source_dir.display(), "source republished during copy"),
            Err(e) => {
                debug!(attempt, error = %e, "source unreadable during copy");
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| StoreError::Corrupt {
        path: source_dir.to_path_buf(),
        reason: format!("changed during each of {SNAPSHOT_ATTEMPTS} copy attempts"),
    }))
}

/// Lists, creates, deletes and exports model slots.
#[derive(Debug, Clone)]
pub struct ModelSlotRegistry {
    store: CheckpointStore,
}

impl ModelSlotRegistry {
    pub fn new(store: CheckpointStore) -> Self {
        Self { store }
    }

    pub fn slots_root(&self) -> PathBuf {
        self.store.root().join(SLOTS_DIR)
    }

    /// Directory of slot `name`, after validating the name.
    pub fn slot_dir(&self, name: &str) -> Result<PathBuf, StoreError> {
        validate_slot_name(name)?;
        Ok(self.slots_root().join(name))
    }

    /// Every slot, sorted by name.
    ///
    /// Slots whose metadata is missing or unreadable are still listed, with
    /// empty metadata fields.  Entries that are not valid slot names (e.g.
    /// leftover staging directories) are skipped.
    pub fn list(&self) -> Result<Vec<SlotSummary>, StoreError> {
        let root = self.slots_root();
        if !root.is_dir() {
            return Ok(Vec::new());
        }

        let mut slots = Vec::new();
        for entry in fs::read_dir(&root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if validate_slot_name(&name).is_err() {
                continue;
            }
            let path = entry.path();
            let metadata = match checkpoint::read_metadata(&path) {
                Ok(m) => Some(m),
                Err(e) => {
                    warn!(slot = %name, error = %e, "slot metadata unreadable");
                    None
                }
            };
            slots.push(SlotSummary::new(name, path, metadata.as_ref()));
        }
        slots.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(slots)
    }

    /// Copy the weights and metadata of `source` into slot `name`,
    /// overwriting an existing slot of that name.
    ///
    /// The name is validated before anything touches the filesystem.
    pub fn save(&self, source: CheckpointSource, name: &str) -> Result<PathBuf, StoreError> {
        let target = self.slot_dir(name)?;
        let source_dir = self.store.location(source);
        self.save_from_dir(&source_dir, name, &target)?;
        Ok(target)
    }

    fn save_from_dir(&self, source_dir: &Path, name: &str, target: &Path) -> Result<(), StoreError> {
        if !source_dir.is_dir() {
            return Err(StoreError::NotFound(source_dir.to_path_buf()));
        }
        if !checkpoint::is_complete(source_dir, PersistScope::WeightsOnly) {
            return Err(StoreError::Corrupt {
                path: source_dir.to_path_buf(),
                reason: "missing weights or metadata".to_string(),
            });
        }
        write_dir_atomically(target, |staging| copy_snapshot(source_dir, staging))?;
        info!(slot = name, source = %source_dir.display(), "model slot saved");
        Ok(())
    }

    /// Remove slot `name`.
    ///
    /// # Errors
    ///
    /// [`StoreError::SlotNotFound`] when no such slot exists.
    pub fn delete(&self, name: &str) -> Result<(), StoreError> {
        let dir = self.slot_dir(name)?;
        if !dir.is_dir() {
            return Err(StoreError::SlotNotFound(name.to_string()));
        }
        fs::remove_dir_all(&dir)?;
        info!(slot = name, "model slot deleted");
        Ok(())
    }

    /// Copy the slot's weights to `destination`.
    ///
    /// When `destination` is an existing directory the file is written inside
    /// it as `<name>.weights`.  Blocking; callers on an async runtime should
    /// move this onto a blocking thread.
    pub fn export(&self, name: &str, destination: &Path) -> Result<PathBuf, StoreError> {
        let dir = self.slot_dir(name)?;
        let weights = dir.join(WEIGHTS_FILE);
        if !weights.is_file() {
            return Err(StoreError::SlotNotFound(name.to_string()));
        }

        let out = if destination.is_dir() {
            destination.join(format!("{name}.{WEIGHTS_FILE}"))
        } else {
            destination.to_path_buf()
        };
        if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        copy_file(&weights, &out)?;
        info!(slot = name, destination = %out.display(), "model slot exported");
        Ok(out)
    }

    /// Load slot `name` for inference only.
    pub fn load(
        &self,
        name: &str,
        backend: &dyn Backend,
    ) -> Result<(Box<dyn Engine>, CheckpointMetadata), StoreError> {
        let dir = self.slot_dir(name)?;
        if !dir.is_dir() {
            return Err(StoreError::SlotNotFound(name.to_string()));
        }
        checkpoint::load_with_scope(&dir, backend, PersistScope::WeightsOnly)
    }
}
