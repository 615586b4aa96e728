//! Secondary-key lookups.
//!
//! [`LookupMap`] is the two-level alias index: lookup name to a map of
//! alias key to primary key. It never owns entries, only keys, so there
//! is no ownership cycle between the index and the store; the value itself
//! is the authoritative record of which aliases it carries (the
//! registration closures derive them from it).
//!
//! [`LookupCache`] layers that index over the TTL store. Three
//! caller-supplied closures keep the index in step with the store, and
//! every one of them runs inside the store's critical section, so an alias
//! and its entry always appear and disappear together:
//!
//! - `register_lookups` names the lookups once at construction;
//! - `add_lookups` registers a new value's aliases;
//! - `delete_lookups` drops a detached value's aliases. It runs before
//!   any user hook, so a hook never observes a half-indexed entry.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use ttl_cache_rs::{LookupCache, LookupCacheConfig};
//!
//! #[derive(Clone)]
//! struct Session {
//!     token: String,
//!     user: u64,
//! }
//!
//! let cache: LookupCache<u64, String, Session> = LookupCache::new(LookupCacheConfig {
//!     register_lookups: Box::new(|lookups| lookups.register_lookup("token")),
//!     add_lookups: Box::new(|lookups, s: &Session| {
//!         lookups.set("token", s.token.clone(), s.user)
//!     }),
//!     delete_lookups: Box::new(|lookups, s: &Session| {
//!         lookups.delete("token", &s.token)
//!     }),
//!     ttl: Duration::from_secs(60),
//!     initial_len: 8,
//! });
//!
//! cache.put(7, Session { token: "abc".into(), user: 7 });
//! assert!(cache.has_by("token", &"abc".to_string()));
//! assert_eq!(cache.get_by("token", &"abc".to_string()).unwrap().user, 7);
//!
//! cache.invalidate(&7);
//! assert!(!cache.has_by("token", &"abc".to_string()));
//! ```

use std::collections::BTreeMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::clock;
use crate::config::{LookupCacheConfig, TtlCacheConfig};
use crate::error::{self, ConfigError};
use crate::hook::{self, Hook};
use crate::metrics::CacheMetrics;
use crate::runner::Service;
use crate::ttl::TtlCore;

/// Two-level alias index: lookup name -> alias key -> primary key.
pub struct LookupMap<A, P> {
    map: HashMap<String, HashMap<A, P>>,
}

impl<A, P> LookupMap<A, P>
where
    A: Eq + Hash,
    P: Clone,
{
    pub(crate) fn new() -> Self {
        LookupMap {
            map: HashMap::new(),
        }
    }

    /// Register a lookup name. Only valid during construction.
    ///
    /// # Panics
    ///
    /// Panics when the name is already registered.
    pub fn register_lookup(&mut self, name: &str) {
        if self.map.contains_key(name) {
            panic!("{}", ConfigError::DuplicateLookup(name.to_string()));
        }
        self.map.insert(name.to_string(), HashMap::new());
    }

    /// Resolve an alias to its primary key. Unknown lookup names resolve
    /// to `None` like any other miss.
    pub fn get(&self, name: &str, alias: &A) -> Option<P> {
        self.map.get(name)?.get(alias).cloned()
    }

    /// Point an alias at a primary key.
    ///
    /// # Panics
    ///
    /// Panics on an unregistered lookup name: aliases must only ever be
    /// created under names fixed at construction.
    pub fn set(&mut self, name: &str, alias: A, primary: P) {
        match self.map.get_mut(name) {
            Some(aliases) => {
                aliases.insert(alias, primary);
            }
            None => panic!("{}", ConfigError::UnknownLookup(name.to_string())),
        }
    }

    pub fn has(&self, name: &str, alias: &A) -> bool {
        self.map.get(name).is_some_and(|aliases| aliases.contains_key(alias))
    }

    /// Drop an alias. Unknown names and absent aliases are no-ops.
    pub fn delete(&mut self, name: &str, alias: &A) {
        if let Some(aliases) = self.map.get_mut(name) {
            aliases.remove(alias);
        }
    }
}

/// Unlocked state: the TTL core plus the alias index it stays in step
/// with, guarded by one mutex so alias/entry consistency is atomic.
struct LookupCore<K, A, V> {
    cache: TtlCore<K, V>,
    lookup: LookupMap<A, K>,
    add_lookups: Box<dyn Fn(&mut LookupMap<A, K>, &V) + Send>,
    delete_lookups: Box<dyn Fn(&mut LookupMap<A, K>, &V) + Send>,
    evict: Hook<K, V>,
    invalid: Hook<K, V>,
}

impl<K, A, V> LookupCore<K, A, V>
where
    K: Eq + Hash + Clone,
    A: Eq + Hash,
{
    /// Detach a replaced value's aliases, notify, and index the
    /// replacement. Alias teardown strictly precedes the user hook.
    fn reindex_after_replace(&mut self, key: &K, old: &V) {
        (self.delete_lookups)(&mut self.lookup, old);
        (self.invalid)(key, old);
        if let Some(v) = self.cache.peek(key) {
            (self.add_lookups)(&mut self.lookup, v);
        }
    }

    fn put(&mut self, key: K, value: V) -> bool {
        if !self.cache.put(key.clone(), value) {
            return false;
        }
        if let Some(v) = self.cache.peek(&key) {
            (self.add_lookups)(&mut self.lookup, v);
        }
        true
    }

    fn set(&mut self, key: K, value: V) {
        match self.cache.set_detached(key.clone(), value) {
            Some(old) => self.reindex_after_replace(&key, &old),
            None => {
                if let Some(v) = self.cache.peek(&key) {
                    (self.add_lookups)(&mut self.lookup, v);
                }
            }
        }
    }

    fn swap(&mut self, key: &K, value: V) -> Option<V> {
        let old = self.cache.swap_detached(key, value)?;
        self.reindex_after_replace(key, &old);
        Some(old)
    }

    fn cas_with<F>(&mut self, key: &K, cmp: &V, swp: V, eq: F) -> bool
    where
        F: FnOnce(&V, &V) -> bool,
    {
        match self.cache.cas_detached(key, cmp, swp, eq) {
            Some(old) => {
                self.reindex_after_replace(key, &old);
                true
            }
            None => false,
        }
    }

    fn invalidate(&mut self, key: &K) -> bool {
        match self.cache.invalidate_detached(key) {
            Some((k, v)) => {
                (self.delete_lookups)(&mut self.lookup, &v);
                (self.invalid)(&k, &v);
                true
            }
            None => false,
        }
    }

    fn clear(&mut self) {
        for (k, v) in self.cache.drain_detached() {
            (self.delete_lookups)(&mut self.lookup, &v);
            (self.invalid)(&k, &v);
        }
    }

    fn sweep(&mut self, now: u64) -> usize {
        let expired = self.cache.sweep_detached(now);
        let n = expired.len();
        for (k, v) in &expired {
            (self.delete_lookups)(&mut self.lookup, v);
            (self.evict)(k, v);
        }
        n
    }
}

/// A TTL cache whose entries are also reachable through registered alias
/// keys. See the [module docs](self).
pub struct LookupCache<K, A, V> {
    core: Arc<Mutex<LookupCore<K, A, V>>>,
    svc: Service,
}

impl<K, A, V> LookupCache<K, A, V>
where
    K: Eq + Hash + Clone,
    A: Eq + Hash,
{
    /// Build the cache and run `register_lookups` on the fresh index.
    ///
    /// # Panics
    ///
    /// Panics when the nonzero TTL is below the coarse-clock floor, or if
    /// `register_lookups` registers a name twice.
    pub fn new(config: LookupCacheConfig<K, A, V>) -> Self {
        match Self::try_new(config) {
            Ok(cache) => cache,
            Err(e) => panic!("{e}"),
        }
    }

    pub fn try_new(config: LookupCacheConfig<K, A, V>) -> Result<Self, ConfigError> {
        error::check_ttl(config.ttl)?;
        let mut lookup = LookupMap::new();
        (config.register_lookups)(&mut lookup);
        let core = LookupCore {
            cache: TtlCore::new(TtlCacheConfig {
                ttl: config.ttl,
                initial_len: config.initial_len,
            }),
            lookup,
            add_lookups: config.add_lookups,
            delete_lookups: config.delete_lookups,
            evict: hook::none(),
            invalid: hook::none(),
        };
        Ok(LookupCache {
            core: Arc::new(Mutex::new(core)),
            svc: Service::new(),
        })
    }

    /// Fetch by primary key, sliding the expiry.
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.core.lock().cache.get(key).cloned()
    }

    /// Fetch by alias key, sliding the expiry.
    pub fn get_by(&self, lookup: &str, alias: &A) -> Option<V>
    where
        V: Clone,
    {
        let mut core = self.core.lock();
        let pk = core.lookup.get(lookup, alias)?;
        core.cache.get(&pk).cloned()
    }

    /// Insert only if absent, registering the value's aliases on success.
    pub fn put(&self, key: K, value: V) -> bool {
        self.core.lock().put(key, value)
    }

    /// Upsert. Overwriting detaches the old value's aliases, fires the
    /// invalidation hook, and indexes the new value.
    pub fn set(&self, key: K, value: V) {
        self.core.lock().set(key, value);
    }

    /// Replace the value at the primary key, reindexing aliases. Absent
    /// keys are not mutated.
    pub fn swap(&self, key: &K, value: V) -> Option<V> {
        self.core.lock().swap(key, value)
    }

    /// [`LookupCache::swap`] addressed by alias.
    pub fn swap_by(&self, lookup: &str, alias: &A, value: V) -> Option<V> {
        let mut core = self.core.lock();
        let pk = core.lookup.get(lookup, alias)?;
        core.swap(&pk, value)
    }

    /// Compare-and-swap at the primary key under the given predicate,
    /// reindexing aliases on success.
    pub fn cas_with<F>(&self, key: &K, cmp: &V, swp: V, eq: F) -> bool
    where
        F: FnOnce(&V, &V) -> bool,
    {
        self.core.lock().cas_with(key, cmp, swp, eq)
    }

    /// [`LookupCache::cas_with`] addressed by alias.
    pub fn cas_by<F>(&self, lookup: &str, alias: &A, cmp: &V, swp: V, eq: F) -> bool
    where
        F: FnOnce(&V, &V) -> bool,
    {
        let mut core = self.core.lock();
        match core.lookup.get(lookup, alias) {
            Some(pk) => core.cas_with(&pk, cmp, swp, eq),
            None => false,
        }
    }

    /// Presence by primary key; no expiry slide.
    pub fn has(&self, key: &K) -> bool {
        self.core.lock().cache.has(key)
    }

    /// Presence by alias key; no expiry slide.
    pub fn has_by(&self, lookup: &str, alias: &A) -> bool {
        self.core.lock().lookup.has(lookup, alias)
    }

    /// Remove by primary key, dropping every alias before the
    /// invalidation hook fires.
    pub fn invalidate(&self, key: &K) -> bool {
        self.core.lock().invalidate(key)
    }

    /// [`LookupCache::invalidate`] addressed by alias.
    pub fn invalidate_by(&self, lookup: &str, alias: &A) -> bool {
        let mut core = self.core.lock();
        match core.lookup.get(lookup, alias) {
            Some(pk) => core.invalidate(&pk),
            None => false,
        }
    }

    /// Remove every entry, firing the invalidation hook once per entry.
    pub fn clear(&self) {
        self.core.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.core.lock().cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// See [`TtlCache::set_ttl`](crate::TtlCache::set_ttl).
    pub fn set_ttl(&self, ttl: Duration, update_existing: bool) {
        self.core.lock().cache.set_ttl(ttl, update_existing);
    }

    /// Set the eviction hook; `None` installs a no-op. Alias teardown
    /// happens before the hook either way.
    pub fn set_eviction_callback(&self, hook: Option<Hook<K, V>>) {
        self.core.lock().evict = hook::or_none(hook);
    }

    /// Set the invalidation hook; `None` installs a no-op.
    pub fn set_invalidate_callback(&self, hook: Option<Hook<K, V>>) {
        self.core.lock().invalid = hook::or_none(hook);
    }
}

impl<K, A, V> LookupCache<K, A, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    A: Eq + Hash + Send + 'static,
    V: Send + 'static,
{
    /// Start the background sweeper. No-op (false) when already running or
    /// `freq` is zero.
    ///
    /// # Panics
    ///
    /// Panics when a nonzero `freq` is below 10x the clock precision.
    pub fn start(&self, freq: Duration) -> bool {
        if freq.is_zero() {
            return false;
        }
        if let Err(e) = error::check_sweep_freq(freq) {
            panic!("{e}");
        }
        let core = Arc::clone(&self.core);
        let started = self.svc.start(freq, move || {
            let now = clock::now();
            let evicted = core.lock().sweep(now);
            if evicted > 0 {
                trace!(evicted, "swept expired entries");
            }
        });
        if started {
            debug!(freq_ms = freq.as_millis() as u64, "lookup sweeper started");
        }
        started
    }

    /// Stop the background sweeper, blocking until its thread has exited.
    pub fn stop(&self) -> bool {
        let stopped = self.svc.stop();
        if stopped {
            debug!("lookup sweeper stopped");
        }
        stopped
    }
}

impl<K, A, V> CacheMetrics for LookupCache<K, A, V>
where
    K: Eq + Hash + Clone,
    A: Eq + Hash,
{
    fn metrics(&self) -> BTreeMap<String, f64> {
        self.core.lock().cache.metrics.to_btreemap()
    }

    fn cache_name(&self) -> &'static str {
        "lookup"
    }
}

impl<K, A, V> core::fmt::Debug for LookupCache<K, A, V>
where
    K: Eq + Hash + Clone,
    A: Eq + Hash,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LookupCache")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_map_resolves_and_deletes() {
        let mut m: LookupMap<String, u64> = LookupMap::new();
        m.register_lookup("email");
        m.set("email", "a@b".into(), 1);
        assert_eq!(m.get("email", &"a@b".to_string()), Some(1));
        assert!(m.has("email", &"a@b".to_string()));

        m.delete("email", &"a@b".to_string());
        assert_eq!(m.get("email", &"a@b".to_string()), None);
    }

    #[test]
    fn unknown_lookup_name_misses() {
        let m: LookupMap<String, u64> = LookupMap::new();
        assert_eq!(m.get("nope", &"x".to_string()), None);
        assert!(!m.has("nope", &"x".to_string()));
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn duplicate_registration_panics() {
        let mut m: LookupMap<String, u64> = LookupMap::new();
        m.register_lookup("email");
        m.register_lookup("email");
    }

    #[test]
    #[should_panic(expected = "unknown lookup")]
    fn set_under_unknown_lookup_panics() {
        let mut m: LookupMap<String, u64> = LookupMap::new();
        m.set("nope", "x".into(), 1);
    }
}
