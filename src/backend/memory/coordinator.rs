//! In-memory coordination store

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::backend::Coordination;
use crate::error::{BackendError, BackendResult};
use crate::record::RowId;

/// `Coordination` over a single mutex-guarded keyspace
///
/// Keys hold a counter, a lock flag or a list, never more than one kind.
/// Expired keys are dropped the next time anything touches them.
#[derive(Default)]
pub struct MemoryCoordinator {
    keys: Mutex<HashMap<String, Slot>>,
    offline: AtomicBool,
}

struct Slot {
    value: SlotValue,
    expires_at: Option<Instant>,
}

enum SlotValue {
    Counter(u64),
    Lock,
    List(Vec<String>),
}

impl Slot {
    fn new(value: SlotValue) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

impl MemoryCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the backend going away (or coming back)
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Remaining lifetime of `key`; `None` when missing or without expiry
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let mut keys = self.keys.lock();
        let now = Instant::now();
        Self::live(&mut keys, key, now)?
            .expires_at
            .map(|at| at.saturating_duration_since(now))
    }

    /// Length of the list at `key` (0 when missing)
    pub fn list_len(&self, key: &str) -> usize {
        let mut keys = self.keys.lock();
        match Self::live(&mut keys, key, Instant::now()) {
            Some(Slot {
                value: SlotValue::List(items),
                ..
            }) => items.len(),
            _ => 0,
        }
    }

    fn check_online(&self) -> BackendResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable(
                "memory coordinator is offline".to_string(),
            ));
        }
        Ok(())
    }

    /// The slot at `key`, dropping it first if it has expired
    fn live<'a>(
        keys: &'a mut HashMap<String, Slot>,
        key: &str,
        now: Instant,
    ) -> Option<&'a mut Slot> {
        if keys.get(key).is_some_and(|slot| slot.is_expired(now)) {
            keys.remove(key);
        }
        keys.get_mut(key)
    }
}

fn wrong_type(key: &str) -> BackendError {
    BackendError::Rejected(format!("key {} holds a different kind of value", key))
}

impl Coordination for MemoryCoordinator {
    fn next_id(&self, counter: &str) -> BackendResult<RowId> {
        self.check_online()?;
        let mut keys = self.keys.lock();

        match Self::live(&mut keys, counter, Instant::now()) {
            Some(Slot {
                value: SlotValue::Counter(n),
                ..
            }) => {
                *n += 1;
                Ok(*n)
            }
            Some(_) => Err(wrong_type(counter)),
            None => {
                keys.insert(counter.to_string(), Slot::new(SlotValue::Counter(1)));
                Ok(1)
            }
        }
    }

    fn acquire_lock(&self, name: &str, ttl: Duration) -> BackendResult<bool> {
        self.check_online()?;
        let mut keys = self.keys.lock();
        let now = Instant::now();

        if Self::live(&mut keys, name, now).is_some() {
            return Ok(false);
        }
        let mut slot = Slot::new(SlotValue::Lock);
        if !ttl.is_zero() {
            slot.expires_at = Some(now + ttl);
        }
        keys.insert(name.to_string(), slot);
        Ok(true)
    }

    fn release_lock(&self, name: &str) -> BackendResult<()> {
        self.check_online()?;
        let mut keys = self.keys.lock();
        match Self::live(&mut keys, name, Instant::now()) {
            Some(Slot {
                value: SlotValue::Lock,
                ..
            }) => {
                keys.remove(name);
                Ok(())
            }
            Some(_) => Err(wrong_type(name)),
            None => Ok(()),
        }
    }

    fn is_lock_held(&self, name: &str) -> BackendResult<bool> {
        self.check_online()?;
        let mut keys = self.keys.lock();
        Ok(matches!(
            Self::live(&mut keys, name, Instant::now()),
            Some(Slot {
                value: SlotValue::Lock,
                ..
            })
        ))
    }

    fn key_exists(&self, key: &str) -> BackendResult<bool> {
        self.check_online()?;
        let mut keys = self.keys.lock();
        Ok(Self::live(&mut keys, key, Instant::now()).is_some())
    }

    fn delete_key(&self, key: &str) -> BackendResult<()> {
        self.check_online()?;
        self.keys.lock().remove(key);
        Ok(())
    }

    fn list_slice(&self, key: &str, start: usize, end: usize) -> BackendResult<Vec<String>> {
        self.check_online()?;
        let mut keys = self.keys.lock();

        match Self::live(&mut keys, key, Instant::now()) {
            Some(Slot {
                value: SlotValue::List(items),
                ..
            }) => {
                if start >= items.len() || start > end {
                    return Ok(Vec::new());
                }
                let end = end.min(items.len() - 1);
                Ok(items[start..=end].to_vec())
            }
            Some(_) => Err(wrong_type(key)),
            None => Ok(Vec::new()),
        }
    }

    fn list_push(&self, key: &str, values: &[String]) -> BackendResult<()> {
        self.check_online()?;
        let mut keys = self.keys.lock();

        match Self::live(&mut keys, key, Instant::now()) {
            Some(Slot {
                value: SlotValue::List(items),
                ..
            }) => {
                items.extend_from_slice(values);
                Ok(())
            }
            Some(_) => Err(wrong_type(key)),
            None => {
                keys.insert(key.to_string(), Slot::new(SlotValue::List(values.to_vec())));
                Ok(())
            }
        }
    }

    fn set_expiry(&self, key: &str, ttl: Duration) -> BackendResult<()> {
        self.check_online()?;
        let mut keys = self.keys.lock();
        let now = Instant::now();
        if let Some(slot) = Self::live(&mut keys, key, now) {
            slot.expires_at = Some(now + ttl);
        }
        Ok(())
    }
}
