//! Tests for cached list reads
//!
//! These tests verify:
//! - A path-carrying request caches its matching ids once
//! - Later pages are served from the cached ids
//! - Large-page capping of what gets cached
//! - Refresh, TTL expiry and stale snapshots
//! - Cache key derivation

#[path = "../common/mod.rs"]
mod common;

use std::thread;
use std::time::Duration;

use common::{rowids, test_retry, Harness};
use recordgate::backend::{Coordination, Persistence};
use recordgate::record::record;
use recordgate::{FindOptions, ListRequest, ModelConfig, ModelError};
use serde_json::json;

fn users_request() -> ListRequest {
    ListRequest::new().path("/users").limit(10)
}

fn cache_key(h: &Harness, request: &ListRequest, large_page: usize) -> String {
    h.users()
        .list_cache()
        .key_for(request, large_page)
        .unwrap()
        .unwrap()
}

// =============================================================================
// Basic Caching Tests
// =============================================================================

#[test]
fn test_first_page_populates_cache() {
    let h = Harness::new();
    h.seed_users(23);
    let users = h.users();
    let request = users_request();

    let page = users.find_list(&request).unwrap();

    assert_eq!(page.count, 23);
    assert_eq!(rowids(&page.list), (1..=10).collect::<Vec<_>>());

    let key = cache_key(&h, &request, 1);
    assert_eq!(h.coordinator.list_len(&key), 23);

    let ttl = h.coordinator.ttl(&key).unwrap();
    assert!(ttl <= Duration::from_secs(60));
    assert!(ttl > Duration::from_secs(50));
}

#[test]
fn test_cache_hit_restricts_by_cached_ids() {
    let h = Harness::new();
    h.seed_users(23);
    let users = h.users();
    let request = users_request().page(2);

    users.find_list(&request).unwrap();
    let query = h.collection("users").last_query().unwrap();

    assert_eq!(query.row_ids(), Some(&(11..=20).collect::<Vec<_>>()[..]));
    assert_eq!(query.skip(), 0);
    assert_eq!(query.request(), Some(&request));
}

#[test]
fn test_later_pages_share_one_entry() {
    let h = Harness::new();
    h.seed_users(23);
    let users = h.users();

    let second = users.find_list(&users_request().page(2)).unwrap();
    let third = users.find_list(&users_request().page(3)).unwrap();

    assert_eq!(rowids(&second.list), (11..=20).collect::<Vec<_>>());
    assert_eq!(rowids(&third.list), vec![21, 22, 23]);
    assert_eq!(third.count, 23);

    // Page size is not part of the key either
    let key = cache_key(&h, &users_request(), 1);
    let wide = users
        .find_list(&ListRequest::new().path("/users").limit(5).page(2))
        .unwrap();
    assert_eq!(rowids(&wide.list), (6..=10).collect::<Vec<_>>());
    assert_eq!(h.coordinator.list_len(&key), 23);
}

#[test]
fn test_page_past_cached_ids_is_empty() {
    let h = Harness::new();
    h.seed_users(23);
    let users = h.users();

    let page = users.find_list(&users_request().page(4)).unwrap();

    assert_eq!(page.count, 23);
    assert!(page.list.is_empty());
}

#[test]
fn test_cached_list_keeps_projection() {
    let h = Harness::new();
    h.seed_users(3);
    let users = h
        .users()
        .with_projection(recordgate::Projection::Exclude(vec!["age".to_string()]));

    let page = users.find_list(&users_request()).unwrap();

    assert_eq!(page.list.len(), 3);
    assert!(page.list.iter().all(|r| r.get("age").is_none()));
    assert!(page.list.iter().all(|r| r.get("name").is_some()));
}

#[test]
fn test_filtered_requests_cache_separately() {
    let h = Harness::new();
    h.seed_users(20);
    let users = h.users();
    let active = users_request().where_field("status", json!("active"));

    let page = users.find_list(&active).unwrap();

    assert_eq!(page.count, 10);
    assert_eq!(rowids(&page.list), vec![2, 4, 6, 8, 10, 12, 14, 16, 18, 20]);
    assert_eq!(h.coordinator.list_len(&cache_key(&h, &active, 1)), 10);
    assert_eq!(h.coordinator.list_len(&cache_key(&h, &users_request(), 1)), 0);
}

#[test]
fn test_no_results_leaves_no_entry() {
    let h = Harness::new();
    h.seed_users(5);
    let users = h.users();
    let request = users_request().where_field("status", json!("nobody"));

    let page = users.find_list(&request).unwrap();

    assert_eq!(page.count, 0);
    assert!(page.list.is_empty());
    let key = cache_key(&h, &request, 1);
    assert!(!h.coordinator.key_exists(&key).unwrap());
}

// =============================================================================
// Staleness Tests
// =============================================================================

#[test]
fn test_cached_ids_are_a_snapshot() {
    let h = Harness::new();
    h.seed_users(23);
    let users = h.users();
    users.find_list(&users_request()).unwrap();

    // New records after the entry was built
    let collection = h.collection("users");
    for i in 24..=30u64 {
        collection
            .create(record([("rowid", json!(i)), ("name", json!(format!("user-{}", i)))]))
            .unwrap();
    }

    let third = users.find_list(&users_request().page(3)).unwrap();

    assert_eq!(rowids(&third.list), vec![21, 22, 23]);
    assert_eq!(third.count, 30);
}

#[test]
fn test_refresh_rebuilds_entry() {
    let h = Harness::new();
    h.seed_users(23);
    let users = h.users();
    users.find_list(&users_request()).unwrap();

    let collection = h.collection("users");
    for i in 24..=30u64 {
        collection
            .create(record([("rowid", json!(i)), ("name", json!(format!("user-{}", i)))]))
            .unwrap();
    }

    let third = users
        .find_list_with(&users_request().page(3), &FindOptions::refresh())
        .unwrap();

    assert_eq!(rowids(&third.list), (21..=30).collect::<Vec<_>>());
    assert_eq!(h.coordinator.list_len(&cache_key(&h, &users_request(), 1)), 30);
}

#[test]
fn test_entry_expires_after_ttl() {
    let config = ModelConfig::builder()
        .list_cache_ttl(Duration::from_millis(50))
        .read_retry(test_retry())
        .build()
        .unwrap();
    let h = Harness::with_config(config);
    h.seed_users(5);
    let users = h.users();
    let key = cache_key(&h, &users_request(), 1);

    users.find_list(&users_request()).unwrap();
    assert!(h.coordinator.key_exists(&key).unwrap());

    thread::sleep(Duration::from_millis(100));
    assert!(!h.coordinator.key_exists(&key).unwrap());

    h.collection("users")
        .create(record([("rowid", json!(6)), ("name", json!("late"))]))
        .unwrap();
    let page = users.find_list(&users_request()).unwrap();

    assert_eq!(rowids(&page.list), (1..=6).collect::<Vec<_>>());
    assert_eq!(h.coordinator.list_len(&key), 6);
}

#[test]
fn test_writes_do_not_invalidate_entry() {
    let h = Harness::new();
    h.seed_users(3);
    let mut users = h.users();
    users.find_list(&users_request()).unwrap();

    users.create(record([("name", json!("fresh"))])).unwrap();
    let key = cache_key(&h, &users_request(), 1);

    assert_eq!(h.coordinator.list_len(&key), 3);
}

// =============================================================================
// Large Page Tests
// =============================================================================

fn seed_many(h: &Harness, n: u64) {
    let collection = h.collection("users");
    for i in 1..=n {
        collection
            .create(record([("rowid", json!(i)), ("name", json!("bulk"))]))
            .unwrap();
    }
}

#[test]
fn test_large_page_caps_cached_ids() {
    let h = Harness::new();
    seed_many(&h, 25_000);
    let users = h.users();
    let request = ListRequest::new().path("/bulk").limit(100);

    let page = users.find_list(&request).unwrap();

    assert_eq!(page.count, 25_000);
    assert_eq!(rowids(&page.list), (1..=100).collect::<Vec<_>>());

    let key = cache_key(&h, &request, 1);
    assert_eq!(h.coordinator.list_len(&key), 20_000);
    let tail = users.list_cache().slice(&key, 19_990, 10).unwrap();
    assert_eq!(tail, (19_991..=20_000).collect::<Vec<_>>());
}

#[test]
fn test_second_large_page_caches_remaining_ids() {
    let h = Harness::new();
    seed_many(&h, 25_000);
    let users = h.users();
    let request = ListRequest::new().path("/bulk").limit(100).large_page(2);

    let page = users.find_list(&request).unwrap();

    assert_eq!(page.count, 25_000);
    assert_eq!(rowids(&page.list), (20_001..=20_100).collect::<Vec<_>>());

    let key = cache_key(&h, &request, 2);
    assert_eq!(h.coordinator.list_len(&key), 5_000);
    assert_ne!(key, cache_key(&h, &request, 1));
}

#[test]
fn test_huge_large_page_returns_empty_page() {
    let config = ModelConfig::builder()
        .large_limit(2)
        .read_retry(test_retry())
        .build()
        .unwrap();
    let h = Harness::with_config(config);
    h.seed_users(3);
    let users = h.users();
    let request = ListRequest::new().path("/p").limit(1).large_page(usize::MAX);

    let page = users.find_list(&request).unwrap();

    assert_eq!(page.count, 3);
    assert!(page.list.is_empty());
    let key = cache_key(&h, &request, usize::MAX);
    assert_eq!(h.coordinator.list_len(&key), 0);
}

// =============================================================================
// Key Tests
// =============================================================================

#[test]
fn test_key_requires_path() {
    let h = Harness::new();
    let users = h.users();

    let key = users.list_cache().key_for(&ListRequest::new().limit(10), 1).unwrap();

    assert!(key.is_none());
}

#[test]
fn test_key_ignores_page_and_limit() {
    let h = Harness::new();

    let a = cache_key(&h, &ListRequest::new().path("/users").limit(10).page(1), 1);
    let b = cache_key(&h, &ListRequest::new().path("/users").limit(50).page(7), 1);

    assert_eq!(a, b);
    assert!(a.starts_with("recordgate:list:users:"));
}

#[test]
fn test_key_depends_on_path_filter_and_table() {
    let h = Harness::new();
    let base = ListRequest::new().path("/users");

    let plain = cache_key(&h, &base, 1);
    let other_path = cache_key(&h, &ListRequest::new().path("/admins"), 1);
    let filtered = cache_key(&h, &base.clone().where_field("status", json!("idle")), 1);
    let other_table = h
        .model("admins", common::user_schema())
        .list_cache()
        .key_for(&base, 1)
        .unwrap()
        .unwrap();

    assert_ne!(plain, other_path);
    assert_ne!(plain, filtered);
    assert_ne!(plain, other_table);
    assert_eq!(plain, cache_key(&h, &base, 1));
}

// =============================================================================
// Failure Tests
// =============================================================================

#[test]
fn test_corrupt_entry_is_coordination_error() {
    let h = Harness::new();
    h.seed_users(3);
    let users = h.users();
    let key = cache_key(&h, &users_request(), 1);
    h.coordinator
        .list_push(&key, &["1".to_string(), "not-a-rowid".to_string()])
        .unwrap();

    let err = users.find_list(&users_request()).unwrap_err();

    assert!(matches!(err, ModelError::Coordination(_)));
}

#[test]
fn test_cache_unreachable_is_coordination_error() {
    let h = Harness::new();
    h.seed_users(3);
    let users = h.users();
    h.coordinator.set_offline(true);

    let options = FindOptions {
        wait_for_lock: false,
        ..FindOptions::default()
    };
    let err = users.find_list_with(&users_request(), &options).unwrap_err();

    assert!(matches!(err, ModelError::Coordination(_)));
}
