use crate::errors::OrchestrationError;
use crate::orchestration_paths;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// Exclusive advisory lock on `<planDir>/.orchestration/orchestration.lock`.
///
/// Held for as long as one process drives a plan. Released on drop.
#[derive(Debug)]
pub struct OrchestrationLock {
    file: File,
    path: PathBuf,
}

impl OrchestrationLock {
    /// Takes the lock without blocking.
    pub fn acquire(plan_path: &Path) -> Result<Self, OrchestrationError> {
        let path = orchestration_paths::lock_path(plan_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| OrchestrationError::LogWrite {
                path: path.clone(),
                source,
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| OrchestrationError::LogWrite {
                path: path.clone(),
                source,
            })?;

        if let Err(e) = file.try_lock_exclusive() {
            tracing::warn!(lock = %path.display(), "Orchestration lock is held elsewhere: {}", e);
            return Err(OrchestrationError::Locked { path });
        }

        tracing::debug!(lock = %path.display(), "Acquired orchestration lock");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for OrchestrationLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(lock = %self.path.display(), "Failed to release orchestration lock: {}", e);
        }
    }
}
