//! Property-Based Tests for Cache Module
//!
//! Uses proptest to check key derivation and the store contract against a
//! plain map model.

use std::collections::HashMap;

use axum::http::{HeaderMap, HeaderValue, Method};
use bytes::Bytes;
use chrono::Utc;
use proptest::prelude::*;
use url::Url;

use crate::cache::{CacheEntry, CacheKey, CacheStore, DiskStore, HeaderList, MemoryStore, Vary};

// == Strategies ==
/// Header values without leading/trailing whitespace
fn header_value_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9,;=]{0,16}"
}

fn path_strategy() -> impl Strategy<Value = String> {
    "(/[a-z0-9]{1,8}){1,4}"
}

/// Small key space so operations collide often
fn key_strategy() -> impl Strategy<Value = CacheKey> {
    (0u8..8).prop_map(|n| CacheKey::from(format!("GET http://example.com/{}", n).as_str()))
}

#[derive(Debug, Clone)]
enum StoreOp {
    Set { key: CacheKey, body: Vec<u8> },
    Get { key: CacheKey },
    Delete { key: CacheKey },
}

fn store_op_strategy() -> impl Strategy<Value = StoreOp> {
    prop_oneof![
        (key_strategy(), prop::collection::vec(any::<u8>(), 0..64))
            .prop_map(|(key, body)| StoreOp::Set { key, body }),
        key_strategy().prop_map(|key| StoreOp::Get { key }),
        key_strategy().prop_map(|key| StoreOp::Delete { key }),
    ]
}

fn entry(body: &[u8]) -> CacheEntry {
    let now = Utc::now();
    let headers: HeaderList = vec![("Cache-Control", "max-age=60")].into_iter().collect();
    CacheEntry::new(200, headers, Bytes::copy_from_slice(body), now, now)
}

// Applies `ops` to `store` and to a map model, checking every read.
async fn check_against_model<S: CacheStore>(store: &S, ops: Vec<StoreOp>) -> Result<(), TestCaseError> {
    let mut model: HashMap<CacheKey, Vec<u8>> = HashMap::new();
    for op in ops {
        match op {
            StoreOp::Set { key, body } => {
                store.set(&key, entry(&body)).await.unwrap();
                model.insert(key, body);
            }
            StoreOp::Get { key } => {
                let got = store.get(&key).await.unwrap().map(|e| e.body.to_vec());
                prop_assert_eq!(got, model.get(&key).cloned(), "read disagrees with last write");
            }
            StoreOp::Delete { key } => {
                store.delete(&key).await.unwrap();
                model.remove(&key);
            }
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // Two requests that agree on method, URL and the Vary-named header
    // values map to the same key, whatever else they carry.
    #[test]
    fn prop_key_stability(
        path in path_strategy(),
        accept in header_value_strategy(),
        agent_a in header_value_strategy(),
        agent_b in header_value_strategy(),
    ) {
        let url = Url::parse(&format!("http://example.com{}", path)).unwrap();
        let vary = Vary::parse(Some("Accept"));

        let mut a = HeaderMap::new();
        a.insert("accept", HeaderValue::from_str(&accept).unwrap());
        a.insert("user-agent", HeaderValue::from_str(&agent_a).unwrap());
        let mut b = HeaderMap::new();
        b.insert("accept", HeaderValue::from_str(&accept.to_uppercase()).unwrap());
        b.insert("user-agent", HeaderValue::from_str(&agent_b).unwrap());

        prop_assert_eq!(
            CacheKey::build(&Method::GET, &url, Some(&vary), &a),
            CacheKey::build(&Method::GET, &url, Some(&vary), &b)
        );
    }

    // Requests with different methods are never cache-equivalent.
    #[test]
    fn prop_methods_never_collide(path in path_strategy()) {
        let url = Url::parse(&format!("http://example.com{}", path)).unwrap();
        let keys = [Method::GET, Method::HEAD, Method::POST]
            .iter()
            .map(|m| CacheKey::base(m, &url))
            .collect::<std::collections::HashSet<_>>();
        prop_assert_eq!(keys.len(), 3);
    }

    // Every read of the memory store returns the last value written.
    #[test]
    fn prop_memory_write_then_read(ops in prop::collection::vec(store_op_strategy(), 1..60)) {
        let store = MemoryStore::new();
        tokio_test::block_on(check_against_model(&store, ops))?;
    }

    // A bounded memory store never holds more entries than its bound.
    #[test]
    fn prop_bounded_memory_respects_capacity(
        ops in prop::collection::vec(store_op_strategy(), 1..60),
        bound in 1usize..5,
    ) {
        let store = MemoryStore::bounded(bound);
        tokio_test::block_on(async {
            for op in ops {
                if let StoreOp::Set { key, body } = op {
                    store.set(&key, entry(&body)).await.unwrap();
                }
                assert!(store.len().await <= bound);
            }
        });
    }

    // Deleting keys that were never stored succeeds and changes nothing.
    #[test]
    fn prop_idempotent_delete(stored in key_strategy(), missing in 100u32..200) {
        let store = MemoryStore::new();
        tokio_test::block_on(async {
            store.set(&stored, entry(b"kept")).await.unwrap();
            let missing = CacheKey::from(format!("GET http://example.com/missing/{}", missing).as_str());
            store.delete(&missing).await.unwrap();
            store.delete(&missing).await.unwrap();
            assert_eq!(store.len().await, 1);
            assert!(store.get(&stored).await.unwrap().is_some());
        });
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    // The disk store obeys the same model as the memory store.
    #[test]
    fn prop_disk_write_then_read(ops in prop::collection::vec(store_op_strategy(), 1..30)) {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path());
        tokio_test::block_on(check_against_model(&store, ops))?;
    }
}
