//! Coarse shared clock used for TTL arithmetic.
//!
//! Reading the wall clock on every cache operation is needlessly expensive
//! when expiry only needs ~100 ms precision. A single process-wide daemon
//! thread refreshes an atomic tick counter every [`PRECISION`], and every
//! store reads that counter instead of calling into the OS.
//!
//! The trade-off is that TTLs and sweep frequencies must stay well above
//! the clock's precision or entries could expire a full tick early or
//! late; the configuration floors in the stores enforce this.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

/// Precision of the shared clock.
///
/// Nonzero TTLs and sweep frequencies below `10 * PRECISION` are rejected
/// at configuration time.
pub const PRECISION: Duration = Duration::from_millis(100);

/// Expiry value meaning "never expires" (used when the TTL is zero).
pub(crate) const NEVER: u64 = u64::MAX;

static CLOCK: OnceLock<CoarseClock> = OnceLock::new();

struct CoarseClock {
    /// Nanoseconds elapsed since the clock started, refreshed every
    /// [`PRECISION`] by the daemon thread.
    ticks: Arc<AtomicU64>,
}

fn clock() -> &'static CoarseClock {
    CLOCK.get_or_init(|| {
        let ticks = Arc::new(AtomicU64::new(0));
        let shared = Arc::clone(&ticks);
        let base = Instant::now();
        thread::Builder::new()
            .name("ttl-cache-clock".into())
            .spawn(move || loop {
                shared.store(base.elapsed().as_nanos() as u64, Ordering::Relaxed);
                thread::sleep(PRECISION);
            })
            .expect("failed to spawn clock refresher thread");
        CoarseClock { ticks }
    })
}

/// Current clock reading in nanoseconds since the clock started.
///
/// Only comparisons and offsets against other readings are meaningful.
pub(crate) fn now() -> u64 {
    clock().ticks.load(Ordering::Relaxed)
}

/// Absolute expiry for an entry touched now, under the given TTL.
///
/// A zero TTL disables expiry entirely.
pub(crate) fn expiry_after(ttl: Duration) -> u64 {
    if ttl.is_zero() {
        NEVER
    } else {
        now().saturating_add(ttl.as_nanos() as u64)
    }
}

/// Signed nanosecond delta between two TTLs, clamped to `i64`. Used by
/// bulk expiry shifts when the TTL changes.
pub(crate) fn ttl_delta(old: Duration, new: Duration) -> i64 {
    let diff = new.as_nanos() as i128 - old.as_nanos() as i128;
    diff.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advances() {
        let a = now();
        thread::sleep(PRECISION * 3);
        let b = now();
        assert!(b > a, "clock did not advance: {a} -> {b}");
    }

    #[test]
    fn zero_ttl_never_expires() {
        assert_eq!(expiry_after(Duration::ZERO), NEVER);
    }

    #[test]
    fn expiry_is_in_the_future() {
        let e = expiry_after(Duration::from_secs(5));
        assert!(e > now());
        assert!(e < NEVER);
    }
}
