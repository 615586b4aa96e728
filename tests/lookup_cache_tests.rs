//! Correctness tests for the alias-addressable lookup cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use ttl_cache_rs::{LookupCache, LookupCacheConfig, LookupMap};

#[derive(Clone, Debug, PartialEq)]
enum Payload {
    Null,
    Int(i64),
    Str(&'static str),
    List(Vec<&'static str>),
    Bytes(Vec<u8>),
    Char(char),
}

#[derive(Clone, Debug, PartialEq)]
struct TestEntry {
    key1: String,
    key2: String,
    key3: String,
    key4: String,
    value: Payload,
}

fn entry(n: usize, value: Payload) -> TestEntry {
    TestEntry {
        key1: format!("key{n}1"),
        key2: format!("key{n}2"),
        key3: format!("key{n}3"),
        key4: format!("key{n}4"),
        value,
    }
}

fn test_entries() -> Vec<TestEntry> {
    vec![
        entry(1, Payload::Int(1)),
        entry(2, Payload::Str("value")),
        entry(3, Payload::List(vec!["1", "2"])),
        entry(4, Payload::Bytes(vec![b'0', b'1', b'2'])),
        entry(5, Payload::Char('0')),
        entry(6, Payload::Null),
    ]
}

fn lookup_cache(ttl: Duration) -> LookupCache<String, String, TestEntry> {
    LookupCache::new(LookupCacheConfig {
        register_lookups: Box::new(|lm: &mut LookupMap<String, String>| {
            lm.register_lookup("key2");
            lm.register_lookup("key3");
            lm.register_lookup("key4");
        }),
        add_lookups: Box::new(|lm, e: &TestEntry| {
            lm.set("key2", e.key2.clone(), e.key1.clone());
            lm.set("key3", e.key3.clone(), e.key1.clone());
            lm.set("key4", e.key4.clone(), e.key1.clone());
        }),
        delete_lookups: Box::new(|lm, e: &TestEntry| {
            lm.delete("key2", &e.key2);
            lm.delete("key3", &e.key3);
            lm.delete("key4", &e.key4);
        }),
        ttl,
        initial_len: 16,
    })
}

/// The Put/HasBy/Invalidate round: an alias resolves exactly while its
/// entry is live, and invalidating by primary key fires the hook once
/// with the entry.
#[test]
fn alias_lifecycle() {
    let c = lookup_cache(Duration::from_secs(60));
    let invalidated = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&invalidated);
    c.set_invalidate_callback(Some(Box::new(move |_: &String, e: &TestEntry| {
        log.lock().unwrap().push(e.clone());
    })));

    let e = entry(1, Payload::Int(1));
    assert!(c.put(e.key1.clone(), e.clone()));
    assert!(c.has_by("key2", &"key12".to_string()));

    assert!(c.invalidate(&"key11".to_string()));
    assert!(!c.has_by("key2", &"key12".to_string()));
    assert_eq!(&*invalidated.lock().unwrap(), &[e]);
}

#[test]
fn every_alias_resolves_to_the_primary_value() {
    let c = lookup_cache(Duration::from_secs(60));
    for e in test_entries() {
        assert!(c.put(e.key1.clone(), e.clone()));
    }

    for e in test_entries() {
        assert_eq!(c.get(&e.key1), Some(e.clone()));
        assert_eq!(c.get_by("key2", &e.key2), Some(e.clone()));
        assert_eq!(c.get_by("key3", &e.key3), Some(e.clone()));
        assert_eq!(c.get_by("key4", &e.key4), Some(e.clone()));
    }
}

#[test]
fn invalidate_by_any_alias_removes_all() {
    let c = lookup_cache(Duration::from_secs(60));
    let callbacks = Arc::new(Mutex::new(HashMap::new()));
    let log = Arc::clone(&callbacks);
    c.set_invalidate_callback(Some(Box::new(move |k: &String, e: &TestEntry| {
        log.lock().unwrap().insert(k.clone(), e.clone());
    })));

    for e in test_entries() {
        c.put(e.key1.clone(), e.clone());
    }

    for e in test_entries() {
        assert!(c.invalidate_by("key3", &e.key3));
        assert!(
            callbacks.lock().unwrap().contains_key(&e.key1),
            "invalidate hook not called for: {}",
            e.key1
        );
        assert!(!c.has(&e.key1));
        assert!(!c.has_by("key2", &e.key2));
        assert!(!c.has_by("key4", &e.key4));
    }
    assert_eq!(c.len(), 0);
}

/// Value replacement reindexes: the old value's aliases stop resolving,
/// the new value's begin to.
#[test]
fn swap_by_reindexes_aliases() {
    let c = lookup_cache(Duration::from_secs(60));
    let old = entry(1, Payload::Int(1));
    c.put(old.key1.clone(), old.clone());

    let new = TestEntry {
        key2: "key12-new".to_string(),
        value: Payload::Int(2),
        ..old.clone()
    };
    assert_eq!(c.swap_by("key2", &"key12".to_string(), new.clone()), Some(old));

    assert!(!c.has_by("key2", &"key12".to_string()), "stale alias survived");
    assert!(c.has_by("key2", &"key12-new".to_string()));
    assert_eq!(c.get(&"key11".to_string()), Some(new));
}

#[test]
fn cas_by_only_swaps_on_match() {
    let c = lookup_cache(Duration::from_secs(60));
    let e = entry(1, Payload::Int(1));
    c.put(e.key1.clone(), e.clone());

    let wrong = entry(1, Payload::Int(99));
    let next = entry(1, Payload::Int(2));
    assert!(!c.cas_by("key3", &e.key3, &wrong, next.clone(), |a, b| a == b));
    assert_eq!(c.get(&e.key1), Some(e.clone()));

    assert!(c.cas_by("key3", &e.key3, &e, next.clone(), |a, b| a == b));
    assert_eq!(c.get(&e.key1), Some(next));
}

#[test]
fn set_overwrites_and_reindexes() {
    let c = lookup_cache(Duration::from_secs(60));
    let old = entry(1, Payload::Int(1));
    c.set(old.key1.clone(), old.clone());
    assert!(c.has_by("key2", &old.key2));

    let new = TestEntry {
        key2: "other2".to_string(),
        key3: "other3".to_string(),
        ..old.clone()
    };
    c.set(old.key1.clone(), new.clone());
    assert!(!c.has_by("key2", &old.key2));
    assert!(c.has_by("key2", &"other2".to_string()));
    assert_eq!(c.get_by("key3", &"other3".to_string()), Some(new));
    assert_eq!(c.len(), 1);
}

/// Swept entries lose their aliases through the same teardown as
/// invalidated ones.
#[test]
fn sweep_tears_down_aliases() {
    let c = lookup_cache(Duration::from_secs(1));
    let evicted = Arc::new(AtomicUsize::new(0));
    let n = Arc::clone(&evicted);
    c.set_eviction_callback(Some(Box::new(move |_: &String, _: &TestEntry| {
        n.fetch_add(1, Ordering::SeqCst);
    })));

    for e in test_entries() {
        c.put(e.key1.clone(), e.clone());
    }
    assert!(c.start(Duration::from_secs(1)));
    thread::sleep(Duration::from_millis(2600));

    assert_eq!(c.len(), 0);
    assert_eq!(evicted.load(Ordering::SeqCst), test_entries().len());
    for e in test_entries() {
        assert!(!c.has_by("key2", &e.key2), "alias outlived its entry");
    }
    c.stop();
}

#[test]
fn concurrent_alias_readers() {
    let c = Arc::new(lookup_cache(Duration::from_secs(60)));
    let done = Arc::new(AtomicBool::new(false));
    let reader = {
        let c = Arc::clone(&c);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            while !done.load(Ordering::Relaxed) {
                for e in test_entries() {
                    c.has(&e.key1);
                    c.has_by("key2", &e.key2);
                    c.has_by("key3", &e.key3);
                    c.has_by("key4", &e.key4);
                }
            }
        })
    };

    for _ in 0..50 {
        for e in test_entries() {
            c.put(e.key1.clone(), e.clone());
        }
        for e in test_entries() {
            c.invalidate(&e.key1);
        }
    }

    done.store(true, Ordering::Relaxed);
    reader.join().unwrap();
    assert_eq!(c.len(), 0);
}
