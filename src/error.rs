//! Configuration and registration errors.
//!
//! Everything here is a programming error: a misconfigured TTL, a lookup
//! over a field the payload type does not expose, a duplicate lookup name.
//! The plain constructors panic with the formatted error (these bugs should
//! not survive the first test run); the `try_`-prefixed constructors return
//! them for callers that prefer propagation.
//!
//! Two categories from the design have no runtime representation because
//! Rust enforces them at compile time: a key part with an unsupported type
//! (no [`KeyPart`](crate::key::KeyPart) impl) and a non-struct payload
//! (no [`KeySource`](crate::plan::KeySource) impl).

use std::time::Duration;
use thiserror::Error;

use crate::clock::PRECISION;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A cache key was requested with no key parts. Usually the caller
    /// forgot the lookup name and passed a key part in its place.
    #[error("no key parts provided")]
    EmptyKey,

    /// A lookup-keyed cache was constructed without any lookups.
    #[error("no lookups registered")]
    NoLookups,

    /// A lookup path references a field the payload type does not expose.
    #[error("lookup {lookup:?} references unknown field {field:?}")]
    UnknownField { lookup: String, field: String },

    /// The same lookup name was registered twice.
    #[error("lookup {0:?} already registered")]
    DuplicateLookup(String),

    /// An operation referenced a lookup name that was never registered.
    #[error("unknown lookup {0:?}")]
    UnknownLookup(String),

    /// A nonzero TTL below the coarse clock's floor would be lost to clock
    /// imprecision.
    #[error("nonzero ttl {0:?} is below the 1s clock floor")]
    TtlTooFineGrained(Duration),

    /// A sweep frequency this close to the clock precision would sweep on
    /// stale readings.
    #[error("sweep frequency {0:?} is below the 1s floor")]
    SweepFrequencyTooHigh(Duration),
}

/// Validate a TTL against the coarse-clock floor. Zero is always accepted:
/// it disables expiry.
pub(crate) fn check_ttl(ttl: Duration) -> Result<(), ConfigError> {
    if !ttl.is_zero() && ttl < PRECISION * 10 {
        return Err(ConfigError::TtlTooFineGrained(ttl));
    }
    Ok(())
}

/// Validate a sweep frequency against the coarse-clock floor.
pub(crate) fn check_sweep_freq(freq: Duration) -> Result<(), ConfigError> {
    if freq < PRECISION * 10 {
        return Err(ConfigError::SweepFrequencyTooHigh(freq));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_floor() {
        assert!(check_ttl(Duration::ZERO).is_ok());
        assert!(check_ttl(Duration::from_millis(500)).is_err());
        assert!(check_ttl(Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn sweep_floor() {
        assert!(check_sweep_freq(Duration::from_millis(999)).is_err());
        assert!(check_sweep_freq(Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn messages_name_the_input() {
        let err = ConfigError::UnknownField {
            lookup: "a.b".into(),
            field: "b".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("a.b") && msg.contains('b'));
    }
}
