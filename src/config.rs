//! Cache configuration structures.
//!
//! Configuration structs have all public fields: create the struct with
//! every field set, or start from `Default` and override. TTL and sweep
//! floors are validated at cache construction, not here.

use std::num::NonZeroUsize;
use std::time::Duration;

use crate::lookup::LookupMap;

/// Configuration for [`TtlCache`](crate::TtlCache).
#[derive(Debug, Clone, Copy)]
pub struct TtlCacheConfig {
    /// Per-entry time-to-live. `Duration::ZERO` disables expiry.
    /// Nonzero values below 1s are rejected (coarse-clock floor).
    pub ttl: Duration,

    /// Initial capacity hint for the backing map.
    pub initial_len: usize,
}

impl Default for TtlCacheConfig {
    fn default() -> Self {
        TtlCacheConfig {
            ttl: Duration::from_secs(300),
            initial_len: 100,
        }
    }
}

/// Configuration for [`OrderedTtlCache`](crate::OrderedTtlCache).
#[derive(Debug, Clone, Copy)]
pub struct OrderedCacheConfig {
    /// Per-entry time-to-live. `Duration::ZERO` disables expiry.
    pub ttl: Duration,

    /// Initial capacity hint for the backing map.
    pub initial_len: usize,

    /// Maximum live entry count. Inserting past the cap evicts the oldest
    /// entry through the eviction hook. `None` leaves the store unbounded.
    pub capacity: Option<NonZeroUsize>,
}

impl Default for OrderedCacheConfig {
    fn default() -> Self {
        OrderedCacheConfig {
            ttl: Duration::from_secs(300),
            initial_len: 100,
            capacity: None,
        }
    }
}

/// Configuration for [`LookupCache`](crate::LookupCache).
///
/// The three closures keep the alias index in step with the entry store;
/// all of them run inside the store's critical section.
pub struct LookupCacheConfig<K, A, V> {
    /// Called once at construction to register the lookup names.
    pub register_lookups: Box<dyn FnOnce(&mut LookupMap<A, K>)>,

    /// Called when a value is added, to register its alias keys against
    /// the primary key.
    pub add_lookups: Box<dyn Fn(&mut LookupMap<A, K>, &V) + Send>,

    /// Called when a value is evicted or invalidated, to drop its alias
    /// keys.
    pub delete_lookups: Box<dyn Fn(&mut LookupMap<A, K>, &V) + Send>,

    /// Per-entry time-to-live. `Duration::ZERO` disables expiry.
    pub ttl: Duration,

    /// Initial capacity hint for the backing map.
    pub initial_len: usize,
}
