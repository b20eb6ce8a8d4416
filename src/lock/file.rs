// src/lock/file.rs

use super::{LockHandle, LockProvider, lock_file_name};
use crate::error::{Error, Result};
use async_trait::async_trait;
use fs4::fs_std::FileExt;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Cross-process locks backed by OS advisory file locks
///
/// Lock files live in one directory, `<name>.lock` each. The OS drops the
/// lock when the holding process dies, so `max_occupation` is only recorded
/// for diagnostics: a live holder is never preempted.
#[derive(Debug)]
pub struct FileLockProvider {
    dir: PathBuf,
    acquisition_timeout: Duration,
    poll_interval: Duration,
    open: Mutex<HashMap<u64, Arc<File>>>,
    next_token: AtomicU64,
}

impl FileLockProvider {
    pub async fn new(
        dir: impl Into<PathBuf>,
        acquisition_timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            acquisition_timeout,
            poll_interval,
            open: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn open_files(&self) -> MutexGuard<'_, HashMap<u64, Arc<File>>> {
        self.open.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn blocking_error(e: tokio::task::JoinError) -> Error {
    Error::Io(std::io::Error::other(e))
}

#[async_trait]
impl LockProvider for FileLockProvider {
    async fn acquire(&self, name: &str, max_occupation: Duration) -> Result<LockHandle> {
        let path = self.dir.join(lock_file_name(name));
        let open_path = path.clone();
        let file = tokio::task::spawn_blocking(move || {
            OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(false)
                .open(&open_path)
        })
        .await
        .map_err(blocking_error)??;
        let file = Arc::new(file);

        let start = Instant::now();
        loop {
            let attempt = Arc::clone(&file);
            let locked = tokio::task::spawn_blocking(move || attempt.try_lock_exclusive())
                .await
                .map_err(blocking_error)?;

            match locked {
                Ok(true) => {
                    let token = self.next_token.fetch_add(1, Ordering::Relaxed);
                    self.open_files().insert(token, file);
                    debug!(
                        "Acquired file lock {} after {:?} (max occupation {:?})",
                        path.display(),
                        start.elapsed(),
                        max_occupation
                    );
                    return Ok(LockHandle::new(name, token, max_occupation));
                }
                Ok(false) => {}
                Err(e) => debug!("Lock attempt on {} failed: {}", path.display(), e),
            }

            let remaining = self.acquisition_timeout.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                return Err(Error::InstallLockTimeout(name.to_string()));
            }
            tokio::time::sleep(self.poll_interval.min(remaining)).await;
        }
    }

    async fn release(&self, handle: LockHandle) -> Result<()> {
        let removed = self.open_files().remove(&handle.token());
        let Some(file) = removed else {
            warn!("Release of unknown lock handle for '{}'", handle.name());
            return Ok(());
        };

        if handle.is_expired() {
            warn!(
                "Lock '{}' held for {:?}, longer than allowed",
                handle.name(),
                handle.held_for()
            );
        }

        tokio::task::spawn_blocking(move || FileExt::unlock(&*file))
            .await
            .map_err(blocking_error)??;
        debug!("Released file lock '{}'", handle.name());
        Ok(())
    }
}
