//! Store-wide mutual exclusion for mutating batches.
//!
//! The lock is a handle owned by the [`crate::engine::Tracker`] and passed to
//! whoever needs to write. Acquisition waits a bounded amount of time and
//! either yields a scoped guard or fails fast; release happens when the guard
//! drops, which covers early returns and unwinding alike.

use parking_lot::{Mutex, MutexGuard};
use std::time::Duration;

use crate::error::TrackerError;

/// Default bounded wait for the store lock.
pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(5);

#[derive(Default)]
pub struct StoreLock {
    inner: Mutex<()>,
}

/// Proof of exclusive write access. Functions that mutate the store take a
/// `&StoreLockGuard` so they cannot be called without holding the lock.
pub struct StoreLockGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl StoreLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, wait: Duration) -> Result<StoreLockGuard<'_>, TrackerError> {
        match self.inner.try_lock_for(wait) {
            Some(guard) => Ok(StoreLockGuard { _guard: guard }),
            None => {
                tracing::warn!(wait_ms = wait.as_millis() as u64, "store lock busy");
                Err(TrackerError::LockUnavailable(wait.as_millis() as u64))
            }
        }
    }

    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}
