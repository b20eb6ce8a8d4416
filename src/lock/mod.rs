// src/lock/mod.rs

//! Named install locks
//!
//! Installs of one machine name are serialized through a [`LockProvider`].
//! Two implementations ship:
//!
//! - [`MemoryLockProvider`]: in-process, with forced expiry of holders that
//!   overstay `max_occupation`
//! - [`FileLockProvider`]: OS advisory locks on files in a lock directory, for
//!   several processes sharing one repository

mod file;
mod memory;

pub use file::FileLockProvider;
pub use memory::MemoryLockProvider;

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

/// Proof of holding a named lock; give it back through [`LockProvider::release`]
#[derive(Debug)]
pub struct LockHandle {
    name: String,
    token: u64,
    acquired_at: Instant,
    max_occupation: Duration,
}

impl LockHandle {
    pub(crate) fn new(name: impl Into<String>, token: u64, max_occupation: Duration) -> Self {
        Self {
            name: name.into(),
            token,
            acquired_at: Instant::now(),
            max_occupation,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    /// Whether the holder has exceeded its allowed occupation time
    pub fn is_expired(&self) -> bool {
        self.held_for() >= self.max_occupation
    }
}

#[async_trait]
pub trait LockProvider: Send + Sync {
    /// Wait for the named lock
    ///
    /// Fails with [`crate::Error::InstallLockTimeout`] when the provider's
    /// acquisition timeout passes first.
    async fn acquire(&self, name: &str, max_occupation: Duration) -> Result<LockHandle>;

    /// Give the lock back; releasing a lock that already expired is not an error
    async fn release(&self, handle: LockHandle) -> Result<()>;
}

/// Characters allowed in lock names map one-to-one onto file names
pub(crate) fn lock_file_name(name: &str) -> String {
    let safe: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}.lock", safe.trim_start_matches('.'))
}
