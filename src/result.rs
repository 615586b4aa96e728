//! Struct-keyed result caching.
//!
//! [`ResultCache`] wraps a load-by-key path (typically a database) and
//! caches *outcomes*: successful values under every registered lookup
//! whose key is derivable from the value, and load errors under the one
//! lookup that was probed. The canonical use is caching both a row and
//! its "no such row" error so repeated misses skip the database entirely.
//!
//! Entries are stored under internal monotonically increasing primary
//! keys; every lookup key is an alias resolved through the
//! [`LookupMap`]. Since several lookups address one entry, invalidating
//! through any of them removes the entry under all of them.
//!
//! Values returned from the cache always pass through the caller's copy
//! function, so callers can freely mutate what they get back without
//! affecting cached state. Supply an identity-like copy only for
//! genuinely immutable payloads.
//!
//! Concurrent loads of the same key are *not* deduplicated here: the
//! loader runs outside the store lock (it does I/O), and serializing
//! identical loads is the owning application layer's job. The losing
//! writer's entry simply steals the aliases of the winner's.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::clock;
use crate::entry::Entry;
use crate::error::{self, ConfigError};
use crate::hook::{self, ValueHook};
use crate::key::{self, KeyPart};
use crate::lookup::LookupMap;
use crate::metrics::{CacheMetrics, CoreMetrics};
use crate::ordered::OrderedMap;
use crate::plan::{KeySource, Lookup, StructKeys};
use crate::runner::Service;

/// A cached outcome plus the alias records it is reachable under.
///
/// The alias list on the entry is authoritative: detaching an entry only
/// ever consults its own list, never a scan of the index.
struct CachedResult<V, E> {
    keys: Vec<(usize, Vec<u8>)>,
    res: Result<V, E>,
}

type CopyFn<V> = dyn Fn(&V) -> V + Send + Sync;

/// Unlocked state; every method assumes the store mutex is held.
struct ResultCore<V, E> {
    map: OrderedMap<u64, Entry<CachedResult<V, E>>>,
    lookup: LookupMap<Vec<u8>, u64>,
    /// Lookup names by index, mirroring the plan held by the outer cache;
    /// needed here so detach paths (sweep included) can address the index.
    names: Vec<String>,
    ttl: Duration,
    next: u64,
    copy: Arc<CopyFn<V>>,
    ignore: Box<dyn Fn(&E) -> bool + Send>,
    evict: ValueHook<V>,
    invalid: ValueHook<V>,
    metrics: CoreMetrics,
}

impl<V, E> ResultCore<V, E> {
    /// Look for a cached outcome under one alias, sliding its expiry.
    /// Returns a copied value or a cloned error.
    fn probe(&mut self, name: &str, ckey: &Vec<u8>) -> Option<Result<V, E>>
    where
        E: Clone,
    {
        let pk = self.lookup.get(name, ckey)?;
        let ttl = self.ttl;
        let e = self.map.get_mut(&pk)?;
        e.refresh(ttl);
        self.metrics.hits += 1;
        Some(match &e.value.res {
            Ok(v) => Ok((self.copy.as_ref())(v)),
            Err(err) => Err(err.clone()),
        })
    }

    fn has(&self, name: &str, ckey: &Vec<u8>) -> bool {
        match self.lookup.get(name, ckey) {
            Some(pk) => matches!(self.map.get(&pk), Some(e) if e.value.res.is_ok()),
            None => false,
        }
    }

    /// Cache an outcome under all of its alias records.
    ///
    /// Aliases already owned by other entries are stolen first: the old
    /// entry's record of the alias is dropped so its later detachment
    /// cannot touch a key that now belongs to this entry, and an old
    /// entry left alias-less is deleted outright.
    fn store_result(&mut self, res: CachedResult<V, E>) {
        for (idx, ckey) in &res.keys {
            if let Some(pk) = self.lookup.get(&self.names[*idx], ckey) {
                let now_empty = match self.map.get_mut(&pk) {
                    Some(e) => {
                        e.value.keys.retain(|(i, k)| !(i == idx && k == ckey));
                        e.value.keys.is_empty()
                    }
                    None => false,
                };
                if now_empty {
                    self.map.delete(&pk);
                }
            }
        }

        let pk = self.next;
        self.next = match self.next.checked_add(1) {
            Some(n) => n,
            None => panic!("result cache primary key overflow"),
        };

        for (idx, ckey) in &res.keys {
            self.lookup.set(&self.names[*idx], ckey.clone(), pk);
        }

        let entry = Entry::new(res, self.ttl);
        if let Some((_, evicted)) = self.map.set(pk, entry) {
            self.detach_evicted(evicted);
        }
        self.metrics.insertions += 1;
    }

    /// Tear down a capacity-evicted entry: aliases first, then the
    /// value-level hook (negative entries stay invisible to hooks).
    fn detach_evicted(&mut self, e: Entry<CachedResult<V, E>>) {
        for (idx, ckey) in &e.value.keys {
            self.lookup.delete(&self.names[*idx], ckey);
        }
        self.metrics.evictions += 1;
        if let Ok(v) = &e.value.res {
            (self.evict)(v);
        }
    }

    fn invalidate(&mut self, name: &str, ckey: &Vec<u8>) -> bool {
        match self.lookup.get(name, ckey) {
            Some(pk) => self.invalidate_pk(pk),
            None => false,
        }
    }

    fn invalidate_pk(&mut self, pk: u64) -> bool {
        match self.map.delete(&pk) {
            Some(e) => {
                for (idx, ckey) in &e.value.keys {
                    self.lookup.delete(&self.names[*idx], ckey);
                }
                self.metrics.invalidations += 1;
                if let Ok(v) = &e.value.res {
                    (self.invalid)(v);
                }
                true
            }
            None => false,
        }
    }

    fn clear(&mut self) {
        for (_, e) in self.map.drain() {
            for (idx, ckey) in &e.value.keys {
                self.lookup.delete(&self.names[*idx], ckey);
            }
            self.metrics.invalidations += 1;
            if let Ok(v) = &e.value.res {
                (self.invalid)(v);
            }
        }
    }

    fn set_ttl(&mut self, ttl: Duration, update_existing: bool) {
        if let Err(e) = error::check_ttl(ttl) {
            panic!("{e}");
        }
        let old = std::mem::replace(&mut self.ttl, ttl);
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

    fn sweep(&mut self, now: u64) -> usize {
        self.metrics.sweeps += 1;
        let n = self.map.count_oldest_while(|_, e| e.is_expired(now));
        if n == 0 {
            return 0;
        }
        let lookup = &mut self.lookup;
        let names = &self.names;
        let evict = &mut self.evict;
        let metrics = &mut self.metrics;
        self.map.truncate(n, |_, e| {
            for (idx, ckey) in &e.value.keys {
                lookup.delete(&names[*idx], ckey);
            }
            metrics.evictions += 1;
            if let Ok(v) = &e.value.res {
                evict(v);
            }
        });
        n
    }
}

/// A cache of load-by-key outcomes, keyed by struct fields.
///
/// `V` is the payload (implementing [`KeySource`]); `E` is the loader's
/// error type, cloned when a cached negative result is returned.
///
/// See the [module docs](self) for semantics, and the crate README for a
/// worked example.
pub struct ResultCache<V, E> {
    keys: StructKeys<V>,
    copy: Arc<CopyFn<V>>,
    core: Arc<Mutex<ResultCore<V, E>>>,
    svc: Service,
}

impl<V, E> ResultCache<V, E>
where
    V: KeySource,
{
    /// Build a cache over the given lookups.
    ///
    /// `copy` is applied to every value returned from the cache; pass a
    /// deep copy unless the payload is immutable. `capacity` bounds the
    /// live entry count, evicting oldest-first past the cap.
    ///
    /// The cache starts with no TTL (entries never expire); see
    /// [`ResultCache::set_ttl`].
    ///
    /// # Panics
    ///
    /// Panics when `lookups` is empty, contains duplicates, or references
    /// a field `V` does not expose.
    pub fn new<F>(lookups: Vec<Lookup>, copy: F, capacity: Option<NonZeroUsize>) -> Self
    where
        F: Fn(&V) -> V + Send + Sync + 'static,
    {
        match Self::try_new(lookups, copy, capacity) {
            Ok(cache) => cache,
            Err(e) => panic!("{e}"),
        }
    }

    pub fn try_new<F>(
        lookups: Vec<Lookup>,
        copy: F,
        capacity: Option<NonZeroUsize>,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&V) -> V + Send + Sync + 'static,
    {
        let keys = StructKeys::try_new(&lookups)?;
        let names = keys.names();
        let mut lookup = LookupMap::new();
        for name in &names {
            lookup.register_lookup(name);
        }
        let copy: Arc<CopyFn<V>> = Arc::new(copy);
        let core = ResultCore {
            map: OrderedMap::with_capacity(0, capacity),
            lookup,
            names,
            ttl: Duration::ZERO,
            next: 0,
            copy: Arc::clone(&copy),
            ignore: Box::new(|_| false),
            evict: hook::none_value(),
            invalid: hook::none_value(),
            metrics: CoreMetrics::default(),
        };
        Ok(ResultCache {
            keys,
            copy,
            core: Arc::new(Mutex::new(core)),
            svc: Service::new(),
        })
    }

    /// Load the outcome cached under `lookup` and `parts`, or run `loader`
    /// and cache what it returns.
    ///
    /// A successful load is cached under every lookup whose key is
    /// derivable from the value; a failed one is cached under the probed
    /// lookup only, unless the ignore predicate rejects the error. The
    /// loader runs outside the store lock.
    ///
    /// # Panics
    ///
    /// Panics on an unregistered lookup name or empty `parts`.
    pub fn load<F>(&self, lookup: &str, loader: F, parts: &[&dyn KeyPart]) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
        E: Clone,
    {
        let idx = self.keys.require(lookup);
        let ckey = key::encode_key(lookup, parts);

        {
            let mut core = self.core.lock();
            if let Some(res) = core.probe(lookup, &ckey) {
                return res;
            }
            core.metrics.misses += 1;
        }

        match loader() {
            Ok(value) => {
                let out = (self.copy.as_ref())(&value);
                let keys = self.keys.generate(&value);
                self.core.lock().store_result(CachedResult {
                    keys,
                    res: Ok(value),
                });
                Ok(out)
            }
            Err(err) => {
                let mut core = self.core.lock();
                if (core.ignore)(&err) {
                    return Err(err);
                }
                trace!("caching negative result");
                core.store_result(CachedResult {
                    keys: vec![(idx, ckey)],
                    res: Err(err.clone()),
                });
                Err(err)
            }
        }
    }

    /// Run `persist`, and on success cache the value as a positive result
    /// and fire the invalidation hook to notify observers of the
    /// write-through.
    pub fn store<F>(&self, value: V, persist: F) -> Result<(), E>
    where
        F: FnOnce() -> Result<(), E>,
    {
        persist()?;
        let keys = self.keys.generate(&value);
        let copied = (self.copy.as_ref())(&value);
        let mut core = self.core.lock();
        core.store_result(CachedResult {
            keys,
            res: Ok(copied),
        });
        (core.invalid)(&value);
        Ok(())
    }

    /// Whether a *positive* result is cached under `lookup` and `parts`.
    /// Cached errors report false. No expiry slide.
    pub fn has(&self, lookup: &str, parts: &[&dyn KeyPart]) -> bool {
        self.keys.require(lookup);
        let ckey = key::encode_key(lookup, parts);
        self.core.lock().has(lookup, &ckey)
    }

    /// Invalidate whatever outcome is cached under `lookup` and `parts`,
    /// removing it under every other lookup too. Returns whether an entry
    /// was present.
    pub fn invalidate(&self, lookup: &str, parts: &[&dyn KeyPart]) -> bool {
        self.keys.require(lookup);
        let ckey = key::encode_key(lookup, parts);
        self.core.lock().invalidate(lookup, &ckey)
    }

    /// Remove every entry, firing the invalidation hook once per positive
    /// entry.
    pub fn clear(&self) {
        self.core.lock().clear();
    }

    /// Live entry count, negative entries included.
    pub fn len(&self) -> usize {
        self.core.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// See [`TtlCache::set_ttl`](crate::TtlCache::set_ttl). The cache
    /// starts with a zero TTL (no expiry).
    pub fn set_ttl(&self, ttl: Duration, update_existing: bool) {
        self.core.lock().set_ttl(ttl, update_existing);
    }

    /// Set the predicate deciding which loader errors must *not* be
    /// cached (e.g. cancellations and timeouts, which say nothing about
    /// the key). `None` restores the default of caching every error.
    pub fn ignore_errors(&self, ignore: Option<Box<dyn Fn(&E) -> bool + Send>>) {
        self.core.lock().ignore = ignore.unwrap_or_else(|| Box::new(|_| false));
    }

    /// Set the eviction hook; `None` installs a no-op. Hooks observe
    /// values only; negative entries come and go silently.
    pub fn set_eviction_callback(&self, hook: Option<ValueHook<V>>) {
        self.core.lock().evict = hook::or_none_value(hook);
    }

    /// Set the invalidation hook; `None` installs a no-op.
    pub fn set_invalidate_callback(&self, hook: Option<ValueHook<V>>) {
        self.core.lock().invalid = hook::or_none_value(hook);
    }
}

impl<V, E> ResultCache<V, E>
where
    V: KeySource + Send + 'static,
    E: Send + 'static,
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
                trace!(evicted, "swept expired results");
            }
        });
        if started {
            debug!(freq_ms = freq.as_millis() as u64, "result sweeper started");
        }
        started
    }

    /// Stop the background sweeper, blocking until its thread has exited.
    pub fn stop(&self) -> bool {
        let stopped = self.svc.stop();
        if stopped {
            debug!("result sweeper stopped");
        }
        stopped
    }
}

impl<V, E> CacheMetrics for ResultCache<V, E>
where
    V: KeySource,
{
    fn metrics(&self) -> BTreeMap<String, f64> {
        self.core.lock().metrics.to_btreemap()
    }

    fn cache_name(&self) -> &'static str {
        "result"
    }
}

impl<V, E> core::fmt::Debug for ResultCache<V, E>
where
    V: KeySource,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ResultCache")
            .field("len", &self.len())
            .finish()
    }
}
