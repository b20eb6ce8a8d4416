// src/lock/memory.rs

use super::{LockHandle, LockProvider};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
struct Holder {
    token: u64,
    expires_at: Instant,
}

/// In-process named locks
///
/// A holder that stays longer than its `max_occupation` is treated as crashed
/// and the next waiter takes the lock over.
#[derive(Debug)]
pub struct MemoryLockProvider {
    holders: Mutex<HashMap<String, Holder>>,
    released: Notify,
    acquisition_timeout: Duration,
    next_token: AtomicU64,
}

impl MemoryLockProvider {
    pub fn new(acquisition_timeout: Duration) -> Self {
        Self {
            holders: Mutex::new(HashMap::new()),
            released: Notify::new(),
            acquisition_timeout,
            next_token: AtomicU64::new(1),
        }
    }

    fn holders(&self) -> MutexGuard<'_, HashMap<String, Holder>> {
        // The map stays consistent even if a holder panicked mid-update
        self.holders.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether `name` is currently held by a live holder
    pub fn is_locked(&self, name: &str) -> bool {
        let now = Instant::now();
        self.holders()
            .get(name)
            .is_some_and(|holder| holder.expires_at > now)
    }
}

impl Default for MemoryLockProvider {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl LockProvider for MemoryLockProvider {
    async fn acquire(&self, name: &str, max_occupation: Duration) -> Result<LockHandle> {
        let deadline = Instant::now() + self.acquisition_timeout;

        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wake_at = {
                let mut holders = self.holders();
                let now = Instant::now();
                let busy_until = holders
                    .get(name)
                    .map(|holder| holder.expires_at)
                    .filter(|expires_at| *expires_at > now);

                match busy_until {
                    Some(expires_at) => expires_at.min(deadline),
                    None => {
                        if holders.contains_key(name) {
                            warn!("Lock '{}' exceeded its occupation time, taking over", name);
                        }
                        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
                        holders.insert(
                            name.to_string(),
                            Holder {
                                token,
                                expires_at: now + max_occupation,
                            },
                        );
                        debug!("Acquired lock '{}' (token {})", name, token);
                        return Ok(LockHandle::new(name, token, max_occupation));
                    }
                }
            };

            if Instant::now() >= deadline {
                return Err(Error::InstallLockTimeout(name.to_string()));
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn release(&self, handle: LockHandle) -> Result<()> {
        {
            let mut holders = self.holders();
            match holders.get(handle.name()) {
                Some(holder) if holder.token == handle.token() => {
                    holders.remove(handle.name());
                    debug!(
                        "Released lock '{}' after {:?}",
                        handle.name(),
                        handle.held_for()
                    );
                }
                _ => warn!(
                    "Lock '{}' was taken over before release (held {:?})",
                    handle.name(),
                    handle.held_for()
                ),
            }
        }
        self.released.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_acquire_release() {
        let locks = MemoryLockProvider::default();
        let handle = locks.acquire("Foo", Duration::from_secs(10)).await.unwrap();
        assert!(locks.is_locked("Foo"));
        assert!(!locks.is_locked("Bar"));
        locks.release(handle).await.unwrap();
        assert!(!locks.is_locked("Foo"));
    }

    #[tokio::test]
    async fn test_timeout_while_held() {
        let locks = MemoryLockProvider::new(Duration::from_millis(50));
        let _held = locks.acquire("Foo", Duration::from_secs(10)).await.unwrap();

        let err = locks.acquire("Foo", Duration::from_secs(10)).await.unwrap_err();
        assert!(matches!(err, Error::InstallLockTimeout(ref name) if name == "Foo"));
        assert!(err.is_retryable());

        // Other names are independent
        locks.acquire("Bar", Duration::from_secs(10)).await.unwrap();
    }

    #[tokio::test]
    async fn test_waiter_wakes_on_release() {
        let locks = Arc::new(MemoryLockProvider::new(Duration::from_secs(5)));
        let first = locks.acquire("Foo", Duration::from_secs(10)).await.unwrap();

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move { locks.acquire("Foo", Duration::from_secs(10)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        locks.release(first).await.unwrap();

        let second = waiter.await.unwrap().unwrap();
        assert_eq!(second.name(), "Foo");
    }

    #[tokio::test]
    async fn test_expired_holder_is_taken_over() {
        let locks = MemoryLockProvider::new(Duration::from_secs(5));
        let stale = locks.acquire("Foo", Duration::from_millis(20)).await.unwrap();

        let fresh = locks.acquire("Foo", Duration::from_secs(10)).await.unwrap();
        assert_ne!(stale.token(), fresh.token());

        // Releasing the stale handle must not free the new holder
        locks.release(stale).await.unwrap();
        assert!(locks.is_locked("Foo"));
        locks.release(fresh).await.unwrap();
        assert!(!locks.is_locked("Foo"));
    }
}
