//! Cache entry type shared by the TTL stores.

use crate::clock::{self, NEVER};
use core::fmt;
use std::time::Duration;

/// One cached item: the payload plus its absolute expiry tick.
///
/// Entries are exclusively owned by their store; hooks only ever see a
/// borrowed view of the payload, never the entry itself.
pub(crate) struct Entry<V> {
    pub(crate) value: V,
    /// Coarse-clock instant after which this entry is eligible for sweep
    /// eviction. [`NEVER`] when the store's TTL is zero.
    pub(crate) expiry: u64,
}

impl<V> Entry<V> {
    pub(crate) fn new(value: V, ttl: Duration) -> Self {
        Entry {
            value,
            expiry: clock::expiry_after(ttl),
        }
    }

    /// Reset the expiry to `now + ttl` (the sliding-TTL refresh).
    pub(crate) fn refresh(&mut self, ttl: Duration) {
        self.expiry = clock::expiry_after(ttl);
    }

    pub(crate) fn is_expired(&self, now: u64) -> bool {
        self.expiry <= now
    }

    /// Shift the expiry by a signed delta, used by bulk TTL updates.
    /// Never-expiring entries are left alone.
    pub(crate) fn shift_expiry(&mut self, delta: i64) {
        if self.expiry != NEVER {
            self.expiry = self.expiry.saturating_add_signed(delta);
        }
    }
}

impl<V: fmt::Debug> fmt::Debug for Entry<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("value", &self.value)
            .field("expiry", &self.expiry)
            .finish()
    }
}
