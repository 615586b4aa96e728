//! Correctness tests for the core TTL cache.
//!
//! These exercise the full lifecycle against wall-clock time with the
//! smallest TTLs and sweep frequencies the coarse clock allows, so the
//! whole suite stays in single-digit seconds.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use ttl_cache_rs::{TtlCache, TtlCacheConfig};

#[derive(Clone, Debug, PartialEq)]
enum Payload {
    Null,
    Int(i64),
    Str(&'static str),
    Char(char),
}

fn cache(ttl: Duration) -> TtlCache<String, Payload> {
    TtlCache::new(TtlCacheConfig {
        ttl,
        initial_len: 16,
    })
}

/// Insert heterogeneous values, read them back, CAS each to `Null`
/// (observing the invalidate hook), then let the sweeper drain the cache.
#[test]
fn heterogeneous_round_trip_cas_and_sweep() {
    let c = cache(Duration::from_secs(1));
    let entries = vec![
        ("key1".to_string(), Payload::Str("value1")),
        ("key2".to_string(), Payload::Int(2)),
        ("a".to_string(), Payload::Char('a')),
    ];

    let invalidated = Arc::new(Mutex::new(HashMap::new()));
    let log = Arc::clone(&invalidated);
    c.set_invalidate_callback(Some(Box::new(move |k: &String, v: &Payload| {
        log.lock().unwrap().insert(k.clone(), v.clone());
    })));

    let evicted = Arc::new(AtomicUsize::new(0));
    let n = Arc::clone(&evicted);
    c.set_eviction_callback(Some(Box::new(move |_: &String, _: &Payload| {
        n.fetch_add(1, Ordering::SeqCst);
    })));

    for (k, v) in &entries {
        assert!(c.put(k.clone(), v.clone()), "failed adding key: {k}");
    }
    for (k, v) in &entries {
        assert_eq!(c.get(k), Some(v.clone()), "value mismatch for key: {k}");
    }

    for (k, v) in &entries {
        assert!(c.cas(k, v, Payload::Null), "cas failed for key: {k}");
        assert!(
            invalidated.lock().unwrap().contains_key(k),
            "invalidate hook not called for: {k}"
        );
    }
    for (k, _) in &entries {
        assert_eq!(c.get(k), Some(Payload::Null));
    }
    assert_eq!(invalidated.lock().unwrap().len(), 3);

    assert!(c.start(Duration::from_secs(1)));
    thread::sleep(Duration::from_millis(2600));
    assert_eq!(c.len(), 0, "sweeper should have drained the cache");
    assert_eq!(evicted.load(Ordering::SeqCst), 3);
    assert!(c.stop());
}

/// Ten entries, TTL shorter than the wait: all swept, evict hook fired
/// once per entry.
#[test]
fn sweep_drains_expired_entries() {
    let c = cache(Duration::from_secs(1));
    let evicted = Arc::new(AtomicUsize::new(0));
    let n = Arc::clone(&evicted);
    c.set_eviction_callback(Some(Box::new(move |_: &String, _: &Payload| {
        n.fetch_add(1, Ordering::SeqCst);
    })));

    for i in 0..10 {
        assert!(c.put(format!("key{i}"), Payload::Int(i)));
    }
    assert_eq!(c.len(), 10);

    assert!(c.start(Duration::from_secs(1)));
    thread::sleep(Duration::from_millis(2600));
    assert_eq!(c.len(), 0);
    assert_eq!(evicted.load(Ordering::SeqCst), 10);
    c.stop();
}

/// Entries outlive a sweep pass while their TTL has not elapsed, then
/// disappear once it has.
#[test]
fn entries_survive_sweeps_until_expiry() {
    let c = cache(Duration::from_secs(3));
    for i in 0..5 {
        c.put(format!("key{i}"), Payload::Int(i));
    }
    assert!(c.start(Duration::from_secs(1)));

    thread::sleep(Duration::from_millis(1500));
    for i in 0..5 {
        // `has` must not refresh, or this loop would keep them alive.
        assert!(c.has(&format!("key{i}")), "key{i} expired too early");
    }

    thread::sleep(Duration::from_millis(3000));
    assert_eq!(c.len(), 0, "entries outlived their ttl");
    c.stop();
}

/// A concurrent reader hammering `has` must never observe an
/// inconsistent store while entries are added and invalidated.
#[test]
fn lifecycle_with_concurrent_readers() {
    let c = Arc::new(cache(Duration::from_secs(2)));
    assert!(c.start(Duration::from_secs(1)));
    assert!(!c.start(Duration::from_secs(1)), "start must be idempotent");

    let done = Arc::new(AtomicBool::new(false));
    let reader = {
        let c = Arc::clone(&c);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            while !done.load(Ordering::Relaxed) {
                for i in 0..10 {
                    c.has(&format!("key{i}"));
                }
            }
        })
    };

    for round in 0..3 {
        for i in 0..10 {
            c.set(format!("key{i}"), Payload::Int(round * 10 + i));
        }
        for i in 0..10 {
            assert!(c.invalidate(&format!("key{i}")));
        }
    }

    done.store(true, Ordering::Relaxed);
    reader.join().unwrap();
    assert_eq!(c.len(), 0);
    assert!(c.stop());
    assert!(!c.stop(), "stop must be idempotent");
}

#[test]
fn swap_and_put_edges() {
    let c = cache(Duration::from_secs(60));
    // swap on an absent key performs no mutation
    assert_eq!(c.swap(&"k".to_string(), Payload::Int(1)), None);
    assert!(!c.has(&"k".to_string()));

    assert!(c.put("k".into(), Payload::Int(1)));
    assert!(!c.put("k".into(), Payload::Int(2)), "put must not overwrite");
    assert_eq!(c.get(&"k".to_string()), Some(Payload::Int(1)));

    assert_eq!(c.swap(&"k".to_string(), Payload::Int(3)), Some(Payload::Int(1)));
    assert_eq!(c.get(&"k".to_string()), Some(Payload::Int(3)));
}

/// Multi-operation critical section through the lock guard.
#[test]
fn guard_batches_operations() {
    let c = cache(Duration::from_secs(60));
    {
        let mut guard = c.lock();
        for i in 0..100 {
            guard.put(format!("key{i}"), Payload::Int(i));
        }
        assert_eq!(guard.len(), 100);
        // Read-modify-write with no other thread able to interleave.
        let current = guard.get(&"key5".to_string()).cloned().unwrap();
        assert!(guard.cas_with(
            &"key5".to_string(),
            &current,
            Payload::Str("swapped"),
            |a, b| a == b,
        ));
    }
    assert_eq!(c.get(&"key5".to_string()), Some(Payload::Str("swapped")));
}

#[test]
fn clear_empties_and_notifies() {
    let c = cache(Duration::from_secs(60));
    let invalidated = Arc::new(AtomicUsize::new(0));
    let n = Arc::clone(&invalidated);
    c.set_invalidate_callback(Some(Box::new(move |_: &String, _: &Payload| {
        n.fetch_add(1, Ordering::SeqCst);
    })));

    for i in 0..7 {
        c.put(format!("key{i}"), Payload::Int(i));
    }
    c.clear();
    assert_eq!(c.len(), 0);
    assert_eq!(invalidated.load(Ordering::SeqCst), 7);
}
