//! The core TTL store.
//!
//! [`TtlCache`] is a concurrent map from key to value where every entry
//! carries an absolute expiry. Reads slide the expiry forward; a
//! background sweeper (started explicitly with [`TtlCache::start`])
//! periodically evicts entries whose expiry has passed.
//!
//! # Locking model
//!
//! One mutex per store serializes every operation, including the sweeper's
//! pass, so single-key operations are linearizable and cross-key
//! operations serializable. The mutex is not reentrant: hooks and
//! `get_with` closures must never call back into the cache.
//!
//! For composing several operations in one critical section, [`TtlCache::lock`]
//! returns a guard exposing the same operation set; the lock is released
//! when the guard drops, on every exit path.
//!
//! # Hooks
//!
//! Two callbacks observe entry removal:
//!
//! - the *eviction* hook fires when the store removes an entry (TTL sweep);
//! - the *invalidation* hook fires when a user call removes or overwrites
//!   one (`set`, `swap`, `cas`, `invalidate`, `clear`).
//!
//! Hooks run under the store lock, after the entry has been detached, and
//! fire exactly once per removal. A panicking hook leaves the store
//! unlocked and consistent.

use std::collections::BTreeMap;
use std::hash::Hash;
use std::mem;
use std::sync::Arc;
use std::time::Duration;

use hashbrown::hash_map::Entry as MapEntry;
use hashbrown::HashMap;
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::clock;
use crate::config::TtlCacheConfig;
use crate::entry::Entry;
use crate::error::{self, ConfigError};
use crate::hook::{self, Hook};
use crate::metrics::{CacheMetrics, CoreMetrics};
use crate::runner::Service;

/// Unlocked store state. All operations here assume the caller holds the
/// store mutex; the public wrappers and [`TtlCacheGuard`] provide it.
///
/// The `*_detached` variants perform the same mutation but return the
/// detached data instead of firing hooks, so composing layers can tear
/// down their own indices before invoking user callbacks.
pub(crate) struct TtlCore<K, V> {
    map: HashMap<K, Entry<V>>,
    ttl: Duration,
    evict: Hook<K, V>,
    invalid: Hook<K, V>,
    pub(crate) metrics: CoreMetrics,
}

impl<K, V> TtlCore<K, V>
where
    K: Eq + Hash + Clone,
{
    pub(crate) fn new(config: TtlCacheConfig) -> Self {
        TtlCore {
            map: HashMap::with_capacity(config.initial_len),
            ttl: config.ttl,
            evict: hook::none(),
            invalid: hook::none(),
            metrics: CoreMetrics::default(),
        }
    }

    /// Fetch a value, sliding its expiry forward.
    pub(crate) fn get(&mut self, key: &K) -> Option<&V> {
        let ttl = self.ttl;
        match self.map.get_mut(key) {
            Some(e) => {
                e.refresh(ttl);
                self.metrics.hits += 1;
                Some(&e.value)
            }
            None => {
                self.metrics.misses += 1;
                None
            }
        }
    }

    /// Fetch a value without touching its expiry or the metrics.
    pub(crate) fn peek(&self, key: &K) -> Option<&V> {
        self.map.get(key).map(|e| &e.value)
    }

    /// Insert only if absent. Present keys are left untouched: no hook, no
    /// expiry refresh.
    pub(crate) fn put(&mut self, key: K, value: V) -> bool {
        let ttl = self.ttl;
        match self.map.entry(key) {
            MapEntry::Occupied(_) => false,
            MapEntry::Vacant(slot) => {
                slot.insert(Entry::new(value, ttl));
                self.metrics.insertions += 1;
                true
            }
        }
    }

    /// Upsert. Overwriting fires the invalidation hook with the old value.
    pub(crate) fn set(&mut self, key: K, value: V) {
        let ttl = self.ttl;
        match self.map.entry(key) {
            MapEntry::Occupied(mut slot) => {
                let e = slot.get_mut();
                let old = mem::replace(&mut e.value, value);
                e.refresh(ttl);
                self.metrics.invalidations += 1;
                (self.invalid)(slot.key(), &old);
            }
            MapEntry::Vacant(slot) => {
                slot.insert(Entry::new(value, ttl));
                self.metrics.insertions += 1;
            }
        }
    }

    /// Upsert, returning the replaced value instead of firing hooks.
    pub(crate) fn set_detached(&mut self, key: K, value: V) -> Option<V> {
        let ttl = self.ttl;
        match self.map.entry(key) {
            MapEntry::Occupied(mut slot) => {
                let e = slot.get_mut();
                let old = mem::replace(&mut e.value, value);
                e.refresh(ttl);
                self.metrics.invalidations += 1;
                Some(old)
            }
            MapEntry::Vacant(slot) => {
                slot.insert(Entry::new(value, ttl));
                self.metrics.insertions += 1;
                None
            }
        }
    }

    /// Replace the value at `key`, returning the old one. Absent keys are
    /// not mutated.
    pub(crate) fn swap(&mut self, key: &K, value: V) -> Option<V> {
        let old = self.swap_detached(key, value)?;
        (self.invalid)(key, &old);
        Some(old)
    }

    pub(crate) fn swap_detached(&mut self, key: &K, value: V) -> Option<V> {
        let ttl = self.ttl;
        let e = self.map.get_mut(key)?;
        let old = mem::replace(&mut e.value, value);
        e.refresh(ttl);
        self.metrics.invalidations += 1;
        Some(old)
    }

    /// Compare-and-swap under the caller's equality predicate.
    pub(crate) fn cas_with<F>(&mut self, key: &K, cmp: &V, swp: V, eq: F) -> bool
    where
        F: FnOnce(&V, &V) -> bool,
    {
        match self.cas_detached(key, cmp, swp, eq) {
            Some(old) => {
                (self.invalid)(key, &old);
                true
            }
            None => false,
        }
    }

    pub(crate) fn cas_detached<F>(&mut self, key: &K, cmp: &V, swp: V, eq: F) -> Option<V>
    where
        F: FnOnce(&V, &V) -> bool,
    {
        let ttl = self.ttl;
        let e = self.map.get_mut(key)?;
        if !eq(&e.value, cmp) {
            return None;
        }
        let old = mem::replace(&mut e.value, swp);
        e.refresh(ttl);
        self.metrics.invalidations += 1;
        Some(old)
    }

    pub(crate) fn has(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    pub(crate) fn invalidate(&mut self, key: &K) -> bool {
        match self.invalidate_detached(key) {
            Some((k, v)) => {
                (self.invalid)(&k, &v);
                true
            }
            None => false,
        }
    }

    pub(crate) fn invalidate_detached(&mut self, key: &K) -> Option<(K, V)> {
        let (k, e) = self.map.remove_entry(key)?;
        self.metrics.invalidations += 1;
        Some((k, e.value))
    }

    pub(crate) fn clear(&mut self) {
        for (k, e) in self.map.drain() {
            self.metrics.invalidations += 1;
            (self.invalid)(&k, &e.value);
        }
    }

    pub(crate) fn drain_detached(&mut self) -> Vec<(K, V)> {
        self.metrics.invalidations += self.map.len() as u64;
        self.map.drain().map(|(k, e)| (k, e.value)).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }

    /// Update the TTL; optionally shift every existing entry's expiry by
    /// the delta.
    ///
    /// # Panics
    ///
    /// Panics when a nonzero TTL is below the coarse-clock floor.
    pub(crate) fn set_ttl(&mut self, ttl: Duration, update_existing: bool) {
        if let Err(e) = error::check_ttl(ttl) {
            panic!("{e}");
        }
        let old = mem::replace(&mut self.ttl, ttl);
        if !update_existing {
            return;
        }
        if ttl.is_zero() {
            for e in self.map.values_mut() {
                e.expiry = clock::NEVER;
            }
            return;
        }
        let delta = clock::ttl_delta(old, ttl);
        for e in self.map.values_mut() {
            e.shift_expiry(delta);
        }
    }

    /// Evict every entry expired at `now`, firing the eviction hook per
    /// entry. Full-map walk: O(n) per pass.
    pub(crate) fn sweep(&mut self, now: u64) -> usize {
        let expired = self.sweep_detached(now);
        let n = expired.len();
        for (k, v) in &expired {
            (self.evict)(k, v);
        }
        n
    }

    pub(crate) fn sweep_detached(&mut self, now: u64) -> Vec<(K, V)> {
        self.metrics.sweeps += 1;
        let expired_keys: Vec<K> = self
            .map
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        let mut out = Vec::with_capacity(expired_keys.len());
        for key in expired_keys {
            if let Some((k, e)) = self.map.remove_entry(&key) {
                self.metrics.evictions += 1;
                out.push((k, e.value));
            }
        }
        out
    }

    pub(crate) fn set_evict_hook(&mut self, h: Option<Hook<K, V>>) {
        self.evict = hook::or_none(h);
    }

    pub(crate) fn set_invalid_hook(&mut self, h: Option<Hook<K, V>>) {
        self.invalid = hook::or_none(h);
    }
}

/// A concurrent TTL-bounded key/value cache.
///
/// See the [module docs](self) for the locking and hook model.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use ttl_cache_rs::{TtlCache, TtlCacheConfig};
///
/// let cache: TtlCache<&str, i32> = TtlCache::new(TtlCacheConfig {
///     ttl: Duration::from_secs(60),
///     initial_len: 8,
/// });
///
/// assert!(cache.put("a", 1));
/// assert!(!cache.put("a", 2)); // present: no-op
/// assert_eq!(cache.get(&"a"), Some(1));
/// assert!(cache.invalidate(&"a"));
/// assert_eq!(cache.len(), 0);
/// ```
pub struct TtlCache<K, V> {
    core: Arc<Mutex<TtlCore<K, V>>>,
    svc: Service,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create a cache from the config.
    ///
    /// # Panics
    ///
    /// Panics when the config's nonzero TTL is below the coarse-clock
    /// floor; see [`TtlCache::try_new`] for the propagating form.
    pub fn new(config: TtlCacheConfig) -> Self {
        match Self::try_new(config) {
            Ok(cache) => cache,
            Err(e) => panic!("{e}"),
        }
    }

    pub fn try_new(config: TtlCacheConfig) -> Result<Self, ConfigError> {
        error::check_ttl(config.ttl)?;
        Ok(TtlCache {
            core: Arc::new(Mutex::new(TtlCore::new(config))),
            svc: Service::new(),
        })
    }

    /// Fetch the value at `key`, sliding its expiry forward.
    ///
    /// Clones the value so the lock is not held while the caller uses it;
    /// see [`TtlCache::get_with`] for clone-free reads.
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.core.lock().get(key).cloned()
    }

    /// Apply `f` to the value at `key` under the store lock, sliding the
    /// expiry forward. `f` must not call back into this cache.
    pub fn get_with<R>(&self, key: &K, f: impl FnOnce(&V) -> R) -> Option<R> {
        self.core.lock().get(key).map(f)
    }

    /// Insert only if absent; returns whether an insert happened.
    pub fn put(&self, key: K, value: V) -> bool {
        self.core.lock().put(key, value)
    }

    /// Upsert. Overwriting an existing value fires the invalidation hook
    /// with the old value and resets the entry's expiry.
    pub fn set(&self, key: K, value: V) {
        self.core.lock().set(key, value);
    }

    /// Replace the value at `key` and return the old one. Absent keys are
    /// not mutated and return `None`.
    pub fn swap(&self, key: &K, value: V) -> Option<V> {
        self.core.lock().swap(key, value)
    }

    /// Compare-and-swap: replace the value at `key` with `swp` iff the
    /// current value equals `cmp`. Fires the invalidation hook on success.
    pub fn cas(&self, key: &K, cmp: &V, swp: V) -> bool
    where
        V: PartialEq,
    {
        self.core.lock().cas_with(key, cmp, swp, |a, b| a == b)
    }

    /// Compare-and-swap under a caller-supplied equality predicate, for
    /// value types without meaningful `PartialEq`.
    pub fn cas_with<F>(&self, key: &K, cmp: &V, swp: V, eq: F) -> bool
    where
        F: FnOnce(&V, &V) -> bool,
    {
        self.core.lock().cas_with(key, cmp, swp, eq)
    }

    /// Presence check. Does not slide the expiry.
    pub fn has(&self, key: &K) -> bool {
        self.core.lock().has(key)
    }

    /// Remove the entry at `key`, firing the invalidation hook. Returns
    /// whether an entry was present.
    pub fn invalidate(&self, key: &K) -> bool {
        self.core.lock().invalidate(key)
    }

    /// Remove every entry, firing the invalidation hook once per entry.
    pub fn clear(&self) {
        self.core.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.core.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Update the TTL. With `update_existing`, every live entry's expiry
    /// is shifted by the change in TTL.
    ///
    /// # Panics
    ///
    /// Panics when a nonzero `ttl` is below the coarse-clock floor.
    pub fn set_ttl(&self, ttl: Duration, update_existing: bool) {
        self.core.lock().set_ttl(ttl, update_existing);
    }

    /// Set the eviction hook; `None` installs a no-op.
    pub fn set_eviction_callback(&self, hook: Option<Hook<K, V>>) {
        self.core.lock().set_evict_hook(hook);
    }

    /// Set the invalidation hook; `None` installs a no-op.
    pub fn set_invalidate_callback(&self, hook: Option<Hook<K, V>>) {
        self.core.lock().set_invalid_hook(hook);
    }

    /// Take the store lock for a composed critical section.
    pub fn lock(&self) -> TtlCacheGuard<'_, K, V> {
        TtlCacheGuard {
            core: self.core.lock(),
        }
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Send + 'static,
{
    /// Start the background sweeper at the given frequency. No-op (false)
    /// when already running or `freq` is zero.
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
            debug!(freq_ms = freq.as_millis() as u64, "ttl sweeper started");
        }
        started
    }

    /// Stop the background sweeper, blocking until its thread has exited.
    /// No-op (false) when not running.
    pub fn stop(&self) -> bool {
        let stopped = self.svc.stop();
        if stopped {
            debug!("ttl sweeper stopped");
        }
        stopped
    }
}

impl<K, V> Default for TtlCache<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new(TtlCacheConfig::default())
    }
}

impl<K, V> CacheMetrics for TtlCache<K, V>
where
    K: Eq + Hash + Clone,
{
    fn metrics(&self) -> BTreeMap<String, f64> {
        self.core.lock().metrics.to_btreemap()
    }

    fn cache_name(&self) -> &'static str {
        "ttl"
    }
}

impl<K, V> core::fmt::Debug for TtlCache<K, V>
where
    K: Eq + Hash + Clone,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TtlCache")
            .field("len", &self.len())
            .field("sweeping", &self.svc.is_running())
            .finish()
    }
}

/// Exclusive access to the store for composing several operations in one
/// critical section. Dropping the guard releases the lock.
///
/// The same rules as hooks apply: no calls back into the owning cache, no
/// blocking work while held.
pub struct TtlCacheGuard<'a, K, V> {
    core: MutexGuard<'a, TtlCore<K, V>>,
}

impl<K, V> TtlCacheGuard<'_, K, V>
where
    K: Eq + Hash + Clone,
{
    /// See [`TtlCache::get`]; returns a borrow valid while the guard is
    /// held.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.core.get(key)
    }

    pub fn put(&mut self, key: K, value: V) -> bool {
        self.core.put(key, value)
    }

    pub fn set(&mut self, key: K, value: V) {
        self.core.set(key, value);
    }

    pub fn swap(&mut self, key: &K, value: V) -> Option<V> {
        self.core.swap(key, value)
    }

    pub fn cas_with<F>(&mut self, key: &K, cmp: &V, swp: V, eq: F) -> bool
    where
        F: FnOnce(&V, &V) -> bool,
    {
        self.core.cas_with(key, cmp, swp, eq)
    }

    pub fn has(&self, key: &K) -> bool {
        self.core.has(key)
    }

    pub fn invalidate(&mut self, key: &K) -> bool {
        self.core.invalidate(key)
    }

    pub fn clear(&mut self) {
        self.core.clear();
    }

    pub fn len(&self) -> usize {
        self.core.len()
    }
}
