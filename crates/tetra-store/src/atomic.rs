//! Directory-level atomic replacement.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use tracing::warn;
use uuid::Uuid;

use crate::StoreError;

/// Build a directory at `target` through `fill`, then publish it in one step.
///
/// `fill` receives an empty staging directory that lives next to `target`
/// (same filesystem, so the final rename is atomic).  If `fill` fails the
/// staging directory is removed and `target` is left untouched.  If `target`
/// already exists it is retired by rename before the staging directory takes
/// its place, and deleted afterwards.
pub(crate) fn write_dir_atomically<F>(target: &Path, fill: F) -> Result<(), StoreError>
where
    F: FnOnce(&Path) -> Result<(), StoreError>,
{
    let (parent, name) = split(target)?;
    fs::create_dir_all(&parent)?;

    let staging = parent.join(format!(".{name}.staging-{}", Uuid::new_v4().simple()));
    fs::create_dir(&staging)?;

    let filled = fill(&staging).and_then(|()| sync_files(&staging));
    if let Err(e) = filled {
        if let Err(cleanup) = fs::remove_dir_all(&staging) {
            warn!(staging = %staging.display(), error = %cleanup, "failed to remove staging directory");
        }
        return Err(e);
    }

    publish(&staging, target, &parent, &name)
}

/// Copy `src` to `dst`, creating nothing else.
pub(crate) fn copy_file(src: &Path, dst: &Path) -> Result<(), StoreError> {
    fs::copy(src, dst)?;
    Ok(())
}

fn split(target: &Path) -> Result<(PathBuf, String), StoreError> {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| StoreError::NotFound(target.to_path_buf()))?;
    let parent = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((parent, name))
}

fn sync_files(dir: &Path) -> Result<(), StoreError> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            File::open(&path)?.sync_all()?;
        }
    }
    Ok(())
}

fn publish(staging: &Path, target: &Path, parent: &Path, name: &str) -> Result<(), StoreError> {
    if !target.exists() {
        fs::rename(staging, target)?;
        return Ok(());
    }

    let retired = parent.join(format!(".{name}.retired-{}", Uuid::new_v4().simple()));
    fs::rename(target, &retired)?;

    if let Err(e) = fs::rename(staging, target) {
        // Put the previous bundle back so the location is never left empty.
        if let Err(restore) = fs::rename(&retired, target) {
            warn!(target = %target.display(), error = %restore, "failed to restore retired bundle");
        }
        let _ = fs::remove_dir_all(staging);
        return Err(e.into());
    }

    if let Err(e) = fs::remove_dir_all(&retired) {
        warn!(retired = %retired.display(), error = %e, "failed to delete retired bundle");
    }
    Ok(())
}
