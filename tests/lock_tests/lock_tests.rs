//! Tests for the table lock and row id allocation
//!
//! These tests verify:
//! - Single-attempt acquire and guard release
//! - Lock expiry through the backend TTL
//! - Bounded, cancellable waiting
//! - Counter-backed row id allocation

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use recordgate::backend::memory::MemoryCoordinator;
use recordgate::backend::Coordination;
use recordgate::lock::LockCoordinator;
use recordgate::rowid::RowIdAllocator;
use recordgate::{CancelToken, ModelError, ReadRetry};

fn coordinator() -> Arc<MemoryCoordinator> {
    Arc::new(MemoryCoordinator::new())
}

fn table_lock(coordinator: &Arc<MemoryCoordinator>, ttl: Duration) -> LockCoordinator {
    LockCoordinator::new(coordinator.clone(), "test:lock:items", ttl)
}

fn quick_retry() -> ReadRetry {
    ReadRetry {
        delay: Duration::from_millis(1),
        max_attempts: 1_000,
        timeout: Duration::from_millis(200),
    }
}

// =============================================================================
// Acquire / Release Tests
// =============================================================================

#[test]
fn test_acquire_and_release_on_drop() {
    let c = coordinator();
    let lock = table_lock(&c, Duration::from_secs(5));

    {
        let guard = lock.acquire().unwrap();
        assert!(guard.is_some());
        assert!(lock.is_held().unwrap());
    }

    assert!(!lock.is_held().unwrap());
}

#[test]
fn test_second_acquire_fails_fast() {
    let c = coordinator();
    let first = table_lock(&c, Duration::from_secs(5));
    let second = table_lock(&c, Duration::from_secs(5));

    let _guard = first.acquire().unwrap().unwrap();

    assert!(second.acquire().unwrap().is_none());
    assert!(first.is_held().unwrap());
}

#[test]
fn test_locks_are_per_table() {
    let c = coordinator();
    let items = table_lock(&c, Duration::from_secs(5));
    let users = LockCoordinator::new(c.clone(), "test:lock:users", Duration::from_secs(5));

    let _items = items.acquire().unwrap().unwrap();

    assert!(users.acquire().unwrap().is_some());
}

#[test]
fn test_lock_expires_after_ttl() {
    let c = coordinator();
    let lock = table_lock(&c, Duration::from_millis(30));

    let guard = lock.acquire().unwrap().unwrap();
    // A crashed writer never drops its guard
    std::mem::forget(guard);
    assert!(lock.is_held().unwrap());

    thread::sleep(Duration::from_millis(60));

    assert!(!lock.is_held().unwrap());
    assert!(lock.acquire().unwrap().is_some());
}

#[test]
fn test_acquire_unreachable_is_coordination_error() {
    let c = coordinator();
    let lock = table_lock(&c, Duration::from_secs(5));
    c.set_offline(true);

    assert!(matches!(lock.acquire(), Err(ModelError::Coordination(_))));
    assert!(matches!(lock.is_held(), Err(ModelError::Coordination(_))));
}

#[test]
fn test_lock_key_holding_other_value_refuses_acquire() {
    let c = coordinator();
    // The lock key already holds a list
    c.list_push("test:lock:items", &["1".to_string()]).unwrap();
    let lock = table_lock(&c, Duration::from_secs(5));

    assert!(lock.acquire().unwrap().is_none());
    assert!(!lock.is_held().unwrap());
    assert!(matches!(
        c.release_lock("test:lock:items"),
        Err(recordgate::BackendError::Rejected(_))
    ));
}

// =============================================================================
// Wait Tests
// =============================================================================

#[test]
fn test_wait_on_free_lock_returns_immediately() {
    let c = coordinator();
    let lock = table_lock(&c, Duration::from_secs(5));

    let polls = lock.wait_until_free(&quick_retry(), &CancelToken::new()).unwrap();

    assert_eq!(polls, 1);
}

#[test]
fn test_wait_returns_after_release() {
    let c = coordinator();
    let lock = table_lock(&c, Duration::from_secs(5));
    c.acquire_lock(lock.name(), Duration::from_secs(5)).unwrap();

    let releaser = {
        let c = c.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            c.release_lock("test:lock:items").unwrap();
        })
    };

    let polls = lock.wait_until_free(&quick_retry(), &CancelToken::new()).unwrap();
    releaser.join().unwrap();

    assert!(polls > 1);
}

#[test]
fn test_wait_bounded_by_attempts() {
    let c = coordinator();
    let lock = table_lock(&c, Duration::from_secs(5));
    c.acquire_lock(lock.name(), Duration::from_secs(5)).unwrap();

    let retry = ReadRetry {
        delay: Duration::ZERO,
        max_attempts: 5,
        timeout: Duration::from_secs(60),
    };
    let err = lock.wait_until_free(&retry, &CancelToken::new()).unwrap_err();

    assert!(matches!(err, ModelError::Lock(_)));
}

#[test]
fn test_wait_bounded_by_timeout() {
    let c = coordinator();
    let lock = table_lock(&c, Duration::from_secs(5));
    c.acquire_lock(lock.name(), Duration::from_secs(5)).unwrap();

    let retry = ReadRetry {
        delay: Duration::from_millis(5),
        max_attempts: u32::MAX,
        timeout: Duration::from_millis(50),
    };
    let err = lock.wait_until_free(&retry, &CancelToken::new()).unwrap_err();

    assert!(matches!(err, ModelError::Lock(_)));
}

#[test]
fn test_wait_cancelled_up_front() {
    let c = coordinator();
    let lock = table_lock(&c, Duration::from_secs(5));
    c.acquire_lock(lock.name(), Duration::from_secs(5)).unwrap();

    let token = CancelToken::new();
    token.cancel();

    assert!(token.is_cancelled());
    assert!(matches!(
        lock.wait_until_free(&quick_retry(), &token),
        Err(ModelError::Cancelled)
    ));
}

#[test]
fn test_wait_ends_when_holder_lock_expires() {
    let c = coordinator();
    let lock = table_lock(&c, Duration::from_secs(5));
    c.acquire_lock(lock.name(), Duration::from_millis(20)).unwrap();

    let polls = lock.wait_until_free(&quick_retry(), &CancelToken::new()).unwrap();

    assert!(polls > 1);
}

// =============================================================================
// Row Id Allocation Tests
// =============================================================================

#[test]
fn test_allocator_counts_from_one() {
    let c = coordinator();
    let allocator = RowIdAllocator::new(c.clone(), "test:rowid:items");

    assert_eq!(allocator.next_id().unwrap(), 1);
    assert_eq!(allocator.next_id().unwrap(), 2);
    assert!(c.key_exists("test:rowid:items").unwrap());
}

#[test]
fn test_allocators_share_counter() {
    let c = coordinator();
    let a = RowIdAllocator::new(c.clone(), "test:rowid:items");
    let b = RowIdAllocator::new(c.clone(), "test:rowid:items");
    let other = RowIdAllocator::new(c.clone(), "test:rowid:users");

    assert_eq!(a.next_id().unwrap(), 1);
    assert_eq!(b.next_id().unwrap(), 2);
    assert_eq!(other.next_id().unwrap(), 1);
}

#[test]
fn test_concurrent_allocation_is_distinct() {
    let c = coordinator();
    let threads = 8;
    let per_thread = 250;

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let allocator = RowIdAllocator::new(c.clone(), "test:rowid:items");
            thread::spawn(move || {
                (0..per_thread)
                    .map(|_| allocator.next_id().unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        for id in handle.join().unwrap() {
            assert!(seen.insert(id), "duplicate rowid {}", id);
        }
    }

    assert_eq!(seen.len(), threads * per_thread);
    assert_eq!(seen.iter().max(), Some(&((threads * per_thread) as u64)));
}

#[test]
fn test_allocator_unreachable_is_allocation_error() {
    let c = coordinator();
    let allocator = RowIdAllocator::new(c.clone(), "test:rowid:items");
    c.set_offline(true);

    assert!(matches!(allocator.next_id(), Err(ModelError::Allocation(_))));
}
