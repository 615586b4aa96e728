//! Cache metrics.
//!
//! Every cache flavor tracks the same small counter set and reports it
//! through the [`CacheMetrics`] trait as a `BTreeMap`, so metric keys come
//! out in a deterministic order for reproducible test output and stable
//! serialization.

use std::collections::BTreeMap;

/// Uniform metrics reporting across all cache flavors.
pub trait CacheMetrics {
    /// All metrics as key-value pairs in deterministic (sorted) order.
    fn metrics(&self) -> BTreeMap<String, f64>;

    /// Short identifier of the cache flavor (e.g. "ttl", "result").
    fn cache_name(&self) -> &'static str;
}

/// Counters shared by every store. All updates happen under the store
/// lock, so plain integers suffice.
#[derive(Debug, Default, Clone)]
pub(crate) struct CoreMetrics {
    /// Lookups that found a live entry.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Entries newly inserted.
    pub insertions: u64,
    /// Entries removed by the store (TTL sweep or capacity pressure).
    pub evictions: u64,
    /// Entries removed or overwritten by user calls.
    pub invalidations: u64,
    /// Sweep passes executed.
    pub sweeps: u64,
}

impl CoreMetrics {
    pub(crate) fn hit_rate(&self) -> f64 {
        let requests = self.hits + self.misses;
        if requests > 0 {
            self.hits as f64 / requests as f64
        } else {
            0.0
        }
    }

    pub(crate) fn to_btreemap(&self) -> BTreeMap<String, f64> {
        let mut m = BTreeMap::new();
        m.insert("evictions".to_string(), self.evictions as f64);
        m.insert("hit_rate".to_string(), self.hit_rate());
        m.insert("hits".to_string(), self.hits as f64);
        m.insert("insertions".to_string(), self.insertions as f64);
        m.insert("invalidations".to_string(), self.invalidations as f64);
        m.insert("misses".to_string(), self.misses as f64);
        m.insert(
            "requests".to_string(),
            (self.hits + self.misses) as f64,
        );
        m.insert("sweeps".to_string(), self.sweeps as f64);
        m
    }
}
