//! Table Lock
//!
//! One advisory lock per table, stored in the coordination backend.
//!
//! ## Concurrency Model
//!
//! - **Writes** take the lock with a single non-blocking attempt. Losing the
//!   race is an immediate `Lock` error; writers never queue.
//! - **Reads** never take the lock. They poll `is_held` until it clears,
//!   bounded by [`ReadRetry`] and interruptible through a [`CancelToken`].
//!
//! The lock carries a TTL in the backend so a writer that dies mid-write
//! cannot wedge the table. A live writer releases it through [`LockGuard`]
//! as soon as its write returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::backend::Coordination;
use crate::config::ReadRetry;
use crate::error::{BackendError, ModelError, Result};

/// Cooperative cancellation flag for waiting reads
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Acquires and inspects the lock of one table
pub struct LockCoordinator {
    coordination: Arc<dyn Coordination>,

    /// Lock key, e.g. `recordgate:lock:users`
    name: String,

    /// Backend-side expiry of an acquired lock
    ttl: Duration,
}

impl LockCoordinator {
    pub fn new(coordination: Arc<dyn Coordination>, name: impl Into<String>, ttl: Duration) -> Self {
        Self {
            coordination,
            name: name.into(),
            ttl,
        }
    }

    /// Try once to take the lock
    ///
    /// Returns:
    /// - `Ok(Some(guard))`: lock taken, released when the guard drops
    /// - `Ok(None)`: another writer holds it
    /// - `Err(Coordination)`: backend unreachable
    pub fn acquire(&self) -> Result<Option<LockGuard<'_>>> {
        let acquired = self
            .coordination
            .acquire_lock(&self.name, self.ttl)
            .map_err(|e| lock_failure("acquire", e))?;

        if acquired {
            tracing::trace!("Acquired lock {}", self.name);
            Ok(Some(LockGuard { lock: self }))
        } else {
            Ok(None)
        }
    }

    /// Whether a writer currently holds the lock
    pub fn is_held(&self) -> Result<bool> {
        self.coordination
            .is_lock_held(&self.name)
            .map_err(|e| lock_failure("inspect", e))
    }

    /// Block until the lock is free
    ///
    /// Returns the number of polls it took. Gives up with a `Lock` error
    /// once `retry.max_attempts` polls or `retry.timeout` are used up, and
    /// with `Cancelled` when `cancel` fires.
    pub fn wait_until_free(&self, retry: &ReadRetry, cancel: &CancelToken) -> Result<u32> {
        let started = Instant::now();

        for attempt in 1..=retry.max_attempts {
            if cancel.is_cancelled() {
                return Err(ModelError::Cancelled);
            }
            if !self.is_held()? {
                if attempt > 1 {
                    tracing::debug!("Lock {} cleared after {} polls", self.name, attempt);
                }
                return Ok(attempt);
            }
            if started.elapsed() >= retry.timeout {
                break;
            }
            if retry.delay.is_zero() {
                thread::yield_now();
            } else {
                thread::sleep(retry.delay);
            }
        }

        tracing::warn!(
            "Gave up waiting for lock {} after {:?}",
            self.name,
            started.elapsed()
        );
        Err(ModelError::Lock(format!(
            "lock {} still held after {:?}",
            self.name,
            started.elapsed()
        )))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn release(&self) {
        if let Err(e) = self.coordination.release_lock(&self.name) {
            // The backend TTL will clear it
            tracing::warn!("Failed to release lock {}: {}", self.name, e);
        }
    }
}

/// Proof of a held table lock; releases it on drop
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard<'a> {
    lock: &'a LockCoordinator,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

/// Unreachable backend → `Coordination`; a rejected lock command → `Lock`
fn lock_failure(action: &str, err: BackendError) -> ModelError {
    if err.is_unavailable() {
        ModelError::Coordination(format!("cannot {} lock: {}", action, err))
    } else {
        ModelError::Lock(format!("cannot {} lock: {}", action, err))
    }
}
