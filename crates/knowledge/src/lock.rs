use crate::{KnowledgeError, Result};
use fs2::FileExt;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Advisory exclusive lock on a file, released on drop
pub(crate) struct FileLock {
    file: std::fs::File,
    path: PathBuf,
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(err) = self.file.unlock() {
            log::warn!("Failed to release lock {}: {err}", self.path.display());
        }
    }
}

/// Block (off the runtime) until `path` is exclusively locked by this process
pub(crate) async fn acquire_exclusive(path: &Path) -> Result<FileLock> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<FileLock> {
        use std::fs::OpenOptions;

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|err| KnowledgeError::Other(format!("open lock {}: {err}", path.display())))?;

        let start = Instant::now();
        file.lock_exclusive().map_err(|err| {
            KnowledgeError::Other(format!("acquire lock {}: {err}", path.display()))
        })?;
        let waited = start.elapsed().as_millis();
        if waited > 0 {
            log::debug!("Waited {waited}ms for lock {}", path.display());
        }

        Ok(FileLock { file, path })
    })
    .await
    .map_err(|err| KnowledgeError::Other(format!("join lock task: {err}")))?
}

/// Open (creating if needed) and lock `path` without waiting. `None` while
/// another handle holds the lock, so a file left by a crashed writer can be
/// taken over.
pub(crate) async fn try_claim(path: &Path) -> Result<Option<FileLock>> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<Option<FileLock>> {
        use std::fs::OpenOptions;

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(FileLock { file, path })),
            Err(err) if err.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(err) => Err(KnowledgeError::Other(format!(
                "lock {}: {err}",
                path.display()
            ))),
        }
    })
    .await
    .map_err(|err| KnowledgeError::Other(format!("join lock task: {err}")))?
}
