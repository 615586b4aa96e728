//! Expiry-ordered TTL store.
//!
//! [`OrderedTtlCache`] has the same operation surface as
//! [`TtlCache`](crate::TtlCache) over a different backing: entries are
//! kept in insertion order, which under a fixed TTL is expiry order.
//! That buys two things:
//!
//! - the sweep walks from the oldest entry and stops at the first
//!   non-expired one, O(expired) instead of O(n) per pass;
//! - a capacity cap becomes cheap: inserting past the cap drops the
//!   oldest entry through the eviction hook.
//!
//! The sliding-TTL refresh on `get` deliberately does *not* reposition
//! the entry, so a refreshed entry sits ahead of where its new expiry
//! belongs and may cut a sweep short. Entries behind it then survive
//! until the pass in which everything ahead of them has expired too.
//! This is the pragmatic trade against paying a reorder on every read.

use std::collections::BTreeMap;
use std::hash::Hash;
use std::mem;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use hashbrown::HashMap;
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::clock;
use crate::config::OrderedCacheConfig;
use crate::entry::Entry;
use crate::error::{self, ConfigError};
use crate::hook::{self, Hook};
use crate::metrics::{CacheMetrics, CoreMetrics};
use crate::runner::Service;

/// Insertion-ordered map: a key index over a sequence-numbered ordered
/// backing. The sequence is monotone, so iteration order is insertion
/// order and the first entry is always the oldest.
pub(crate) struct OrderedMap<K, V> {
    index: HashMap<K, u64>,
    order: BTreeMap<u64, (K, V)>,
    seq: u64,
    cap: Option<NonZeroUsize>,
}

impl<K, V> OrderedMap<K, V>
where
    K: Eq + Hash + Clone,
{
    pub(crate) fn with_capacity(initial_len: usize, cap: Option<NonZeroUsize>) -> Self {
        OrderedMap {
            index: HashMap::with_capacity(initial_len),
            order: BTreeMap::new(),
            seq: 0,
            cap,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.index.len()
    }

    pub(crate) fn cap(&self) -> Option<NonZeroUsize> {
        self.cap
    }

    pub(crate) fn has(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    pub(crate) fn get(&self, key: &K) -> Option<&V> {
        let seq = self.index.get(key)?;
        self.order.get(seq).map(|(_, v)| v)
    }

    pub(crate) fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let seq = self.index.get(key)?;
        self.order.get_mut(seq).map(|(_, v)| v)
    }

    /// Insert at the tail. An existing key is overwritten in place,
    /// keeping its position. Returns the pair evicted by the capacity cap,
    /// if any.
    pub(crate) fn set(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(seq) = self.index.get(&key) {
            if let Some(slot) = self.order.get_mut(seq) {
                slot.1 = value;
            }
            return None;
        }
        let mut evicted = None;
        if let Some(cap) = self.cap {
            if self.index.len() >= cap.get() {
                evicted = self.pop_oldest();
            }
        }
        let seq = self.seq;
        // A u64 sequence cannot wrap under any realistic workload.
        self.seq = self.seq.checked_add(1).expect("ordered map sequence overflow");
        self.index.insert(key.clone(), seq);
        self.order.insert(seq, (key, value));
        evicted
    }

    pub(crate) fn delete(&mut self, key: &K) -> Option<V> {
        let seq = self.index.remove(key)?;
        self.order.remove(&seq).map(|(_, v)| v)
    }

    fn pop_oldest(&mut self) -> Option<(K, V)> {
        let (_, (k, v)) = self.order.pop_first()?;
        self.index.remove(&k);
        Some((k, v))
    }

    /// Count entries from the oldest while `pred` holds, stopping at the
    /// first for which it does not.
    pub(crate) fn count_oldest_while(&self, mut pred: impl FnMut(&K, &V) -> bool) -> usize {
        let mut n = 0;
        for (k, v) in self.order.values() {
            if !pred(k, v) {
                break;
            }
            n += 1;
        }
        n
    }

    /// Drop the `n` oldest entries through `f`.
    pub(crate) fn truncate(&mut self, n: usize, mut f: impl FnMut(K, V)) {
        for _ in 0..n {
            match self.pop_oldest() {
                Some((k, v)) => f(k, v),
                None => break,
            }
        }
    }

    pub(crate) fn values_mut(&mut self) -> impl Iterator<Item = &mut V> {
        self.order.values_mut().map(|(_, v)| v)
    }

    pub(crate) fn drain(&mut self) -> Vec<(K, V)> {
        self.index.clear();
        mem::take(&mut self.order).into_values().collect()
    }
}

/// Unlocked state of the ordered store; the mirror of
/// [`TtlCore`](crate::ttl::TtlCore) over the ordered backing.
struct OrderedCore<K, V> {
    map: OrderedMap<K, Entry<V>>,
    ttl: Duration,
    evict: Hook<K, V>,
    invalid: Hook<K, V>,
    metrics: CoreMetrics,
}

impl<K, V> OrderedCore<K, V>
where
    K: Eq + Hash + Clone,
{
    fn new(config: OrderedCacheConfig) -> Self {
        OrderedCore {
            map: OrderedMap::with_capacity(config.initial_len, config.capacity),
            ttl: config.ttl,
            evict: hook::none(),
            invalid: hook::none(),
            metrics: CoreMetrics::default(),
        }
    }

    fn get(&mut self, key: &K) -> Option<&V> {
        let ttl = self.ttl;
        match self.map.get_mut(key) {
            Some(e) => {
                // Refresh without repositioning; see the module docs.
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

    fn put(&mut self, key: K, value: V) -> bool {
        if self.map.has(&key) {
            return false;
        }
        let entry = Entry::new(value, self.ttl);
        if let Some((k, e)) = self.map.set(key, entry) {
            self.metrics.evictions += 1;
            (self.evict)(&k, &e.value);
        }
        self.metrics.insertions += 1;
        true
    }

    fn set(&mut self, key: K, value: V) {
        let ttl = self.ttl;
        if let Some(e) = self.map.get_mut(&key) {
            let old = mem::replace(&mut e.value, value);
            e.refresh(ttl);
            self.metrics.invalidations += 1;
            (self.invalid)(&key, &old);
            return;
        }
        let entry = Entry::new(value, ttl);
        if let Some((k, e)) = self.map.set(key, entry) {
            self.metrics.evictions += 1;
            (self.evict)(&k, &e.value);
        }
        self.metrics.insertions += 1;
    }

    fn swap(&mut self, key: &K, value: V) -> Option<V> {
        let ttl = self.ttl;
        let e = self.map.get_mut(key)?;
        let old = mem::replace(&mut e.value, value);
        e.refresh(ttl);
        self.metrics.invalidations += 1;
        (self.invalid)(key, &old);
        Some(old)
    }

    fn cas_with<F>(&mut self, key: &K, cmp: &V, swp: V, eq: F) -> bool
    where
        F: FnOnce(&V, &V) -> bool,
    {
        let ttl = self.ttl;
        if let Some(e) = self.map.get_mut(key) {
            if eq(&e.value, cmp) {
                let old = mem::replace(&mut e.value, swp);
                e.refresh(ttl);
                self.metrics.invalidations += 1;
                (self.invalid)(key, &old);
                return true;
            }
        }
        false
    }

    fn invalidate(&mut self, key: &K) -> bool {
        match self.map.delete(key) {
            Some(e) => {
                self.metrics.invalidations += 1;
                (self.invalid)(key, &e.value);
                true
            }
            None => false,
        }
    }

    fn clear(&mut self) {
        for (k, e) in self.map.drain() {
            self.metrics.invalidations += 1;
            (self.invalid)(&k, &e.value);
        }
    }

    fn set_ttl(&mut self, ttl: Duration, update_existing: bool) {
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

    /// Walk from the oldest entry until the first non-expired one and drop
    /// the expired prefix through the eviction hook.
    fn sweep(&mut self, now: u64) -> usize {
        self.metrics.sweeps += 1;
        let n = self.map.count_oldest_while(|_, e| e.is_expired(now));
        if n == 0 {
            return 0;
        }
        let evict = &mut self.evict;
        let metrics = &mut self.metrics;
        self.map.truncate(n, |k, e| {
            metrics.evictions += 1;
            evict(&k, &e.value);
        });
        n
    }
}

/// A TTL cache over an expiry-ordered, optionally capacity-capped backing.
///
/// The operation surface matches [`TtlCache`](crate::TtlCache); see the
/// [module docs](self) for what the ordered backing changes.
pub struct OrderedTtlCache<K, V> {
    core: Arc<Mutex<OrderedCore<K, V>>>,
    svc: Service,
}

impl<K, V> OrderedTtlCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// # Panics
    ///
    /// Panics when the config's nonzero TTL is below the coarse-clock
    /// floor; see [`OrderedTtlCache::try_new`] for the propagating form.
    pub fn new(config: OrderedCacheConfig) -> Self {
        match Self::try_new(config) {
            Ok(cache) => cache,
            Err(e) => panic!("{e}"),
        }
    }

    pub fn try_new(config: OrderedCacheConfig) -> Result<Self, ConfigError> {
        error::check_ttl(config.ttl)?;
        Ok(OrderedTtlCache {
            core: Arc::new(Mutex::new(OrderedCore::new(config))),
            svc: Service::new(),
        })
    }

    /// Fetch the value at `key`, sliding its expiry forward (without
    /// repositioning the entry).
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.core.lock().get(key).cloned()
    }

    /// Apply `f` to the value at `key` under the store lock.
    pub fn get_with<R>(&self, key: &K, f: impl FnOnce(&V) -> R) -> Option<R> {
        self.core.lock().get(key).map(f)
    }

    /// Insert only if absent. May evict the oldest entry when the store is
    /// at capacity.
    pub fn put(&self, key: K, value: V) -> bool {
        self.core.lock().put(key, value)
    }

    /// Upsert; overwriting fires the invalidation hook with the old value.
    pub fn set(&self, key: K, value: V) {
        self.core.lock().set(key, value);
    }

    pub fn swap(&self, key: &K, value: V) -> Option<V> {
        self.core.lock().swap(key, value)
    }

    pub fn cas(&self, key: &K, cmp: &V, swp: V) -> bool
    where
        V: PartialEq,
    {
        self.core.lock().cas_with(key, cmp, swp, |a, b| a == b)
    }

    pub fn cas_with<F>(&self, key: &K, cmp: &V, swp: V, eq: F) -> bool
    where
        F: FnOnce(&V, &V) -> bool,
    {
        self.core.lock().cas_with(key, cmp, swp, eq)
    }

    pub fn has(&self, key: &K) -> bool {
        self.core.lock().map.has(key)
    }

    pub fn invalidate(&self, key: &K) -> bool {
        self.core.lock().invalidate(key)
    }

    pub fn clear(&self) {
        self.core.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.core.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum live entry count, when capped.
    pub fn cap(&self) -> Option<NonZeroUsize> {
        self.core.lock().map.cap()
    }

    /// See [`TtlCache::set_ttl`](crate::TtlCache::set_ttl). Shifted
    /// expiries weaken the ordering invariant the same way `get` does.
    pub fn set_ttl(&self, ttl: Duration, update_existing: bool) {
        self.core.lock().set_ttl(ttl, update_existing);
    }

    pub fn set_eviction_callback(&self, hook: Option<Hook<K, V>>) {
        self.core.lock().evict = hook::or_none(hook);
    }

    pub fn set_invalidate_callback(&self, hook: Option<Hook<K, V>>) {
        self.core.lock().invalid = hook::or_none(hook);
    }
}

impl<K, V> OrderedTtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
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
            debug!(freq_ms = freq.as_millis() as u64, "ordered sweeper started");
        }
        started
    }

    /// Stop the background sweeper, blocking until its thread has exited.
    pub fn stop(&self) -> bool {
        let stopped = self.svc.stop();
        if stopped {
            debug!("ordered sweeper stopped");
        }
        stopped
    }
}

impl<K, V> CacheMetrics for OrderedTtlCache<K, V>
where
    K: Eq + Hash + Clone,
{
    fn metrics(&self) -> BTreeMap<String, f64> {
        self.core.lock().metrics.to_btreemap()
    }

    fn cache_name(&self) -> &'static str {
        "ordered-ttl"
    }
}

impl<K, V> core::fmt::Debug for OrderedTtlCache<K, V>
where
    K: Eq + Hash + Clone,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OrderedTtlCache")
            .field("len", &self.len())
            .field("cap", &self.cap())
            .finish()
    }
}

/// Exclusive access for composed critical sections; the counterpart of
/// [`TtlCacheGuard`](crate::ttl::TtlCacheGuard).
pub struct OrderedCacheGuard<'a, K, V> {
    core: MutexGuard<'a, OrderedCore<K, V>>,
}

impl<K, V> OrderedTtlCache<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn lock(&self) -> OrderedCacheGuard<'_, K, V> {
        OrderedCacheGuard {
            core: self.core.lock(),
        }
    }
}

impl<K, V> OrderedCacheGuard<'_, K, V>
where
    K: Eq + Hash + Clone,
{
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
        self.core.map.has(key)
    }

    pub fn invalidate(&mut self, key: &K) -> bool {
        self.core.invalidate(key)
    }

    pub fn clear(&mut self) {
        self.core.clear();
    }

    pub fn len(&self) -> usize {
        self.core.map.len()
    }
}
