#![doc = include_str!("../README.md")]
//!
//! ---
//!
//! # Layer map
//!
//! | Layer | Type | Backing | Keyed by |
//! |-------|------|---------|----------|
//! | Core | [`TtlCache`] | hash map | one primary key |
//! | Ordered | [`OrderedTtlCache`] | expiry-ordered map | one primary key |
//! | Lookup | [`LookupCache`] | hash map + alias index | primary or alias keys |
//! | Result | [`ResultCache`] | ordered map + alias index | struct-field-derived keys |
//!
//! The moving parts underneath:
//!
//! - [`key`]: deterministic byte encoding of key parts ([`KeyPart`],
//!   [`encode_key`])
//! - [`plan`]: struct-field key derivation ([`KeySource`], [`Lookup`],
//!   the [`key_source!`] macro)
//! - [`clock`]: the coarse shared clock all expiry arithmetic reads
//! - [`error`]: configuration validation ([`ConfigError`])
//! - [`metrics`]: uniform counters behind [`CacheMetrics`]

/// Coarse shared clock used for TTL arithmetic.
pub mod clock;

/// Cache configuration structures.
pub mod config;

/// Cache entry type shared by the TTL stores.
pub(crate) mod entry;

/// Configuration and registration errors.
pub mod error;

/// Eviction and invalidation callback types.
pub mod hook;

/// Cache key encoding.
pub mod key;

/// Secondary-key lookups: the alias index and the alias-addressable
/// cache.
pub mod lookup;

/// Cache metrics reporting.
pub mod metrics;

/// Expiry-ordered TTL store with an O(expired) sweep and a capacity cap.
pub mod ordered;

/// Struct-to-key planning for the result layer.
pub mod plan;

/// Periodic background task runner driving the sweepers.
pub(crate) mod runner;

/// Struct-keyed result caching (values and errors).
pub mod result;

/// The core TTL store.
pub mod ttl;

pub use config::{LookupCacheConfig, OrderedCacheConfig, TtlCacheConfig};
pub use error::ConfigError;
pub use hook::{Hook, ValueHook};
pub use key::{encode_key, KeyPart, Text};
pub use lookup::{LookupCache, LookupMap};
pub use metrics::CacheMetrics;
pub use ordered::{OrderedCacheGuard, OrderedTtlCache};
pub use plan::{KeySource, Lookup};
pub use result::ResultCache;
pub use ttl::{TtlCache, TtlCacheGuard};
