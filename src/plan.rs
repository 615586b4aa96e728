//! Struct-to-key planning.
//!
//! A *lookup* names one or more fields of a payload struct, joined by
//! `'.'` (e.g. `"id"` or `"owner.name"`). At construction time the planner
//! validates every segment against the type's indexable fields and keeps a
//! precomputed plan; at insert time it derives one encoded key per
//! registered lookup from an instance's field values.
//!
//! Payload types describe their indexable fields through [`KeySource`],
//! most conveniently via the [`key_source!`](crate::key_source) macro:
//!
//! ```
//! use ttl_cache_rs::key_source;
//!
//! struct Account {
//!     id: u64,
//!     email: String,
//! }
//!
//! key_source!(Account { id, email });
//! ```
//!
//! Only fields visible to the `key_source!` invocation can be listed, so
//! field accessibility is settled at compile time, as is encodability
//! (every listed field's type must implement `KeyPart`).

use std::marker::PhantomData;

use crate::error::ConfigError;
use crate::key::{self, KeyPart};

/// A type whose instances can contribute named fields to cache keys.
///
/// Implemented by hand or via [`key_source!`](crate::key_source).
pub trait KeySource {
    /// The indexable field names, in declaration order.
    const FIELDS: &'static [&'static str];

    /// Borrow the named field as an encodable key part. Returns `None`
    /// for names not listed in [`FIELDS`](KeySource::FIELDS).
    fn field(&self, name: &str) -> Option<&dyn KeyPart>;
}

/// Implements [`KeySource`] for a struct over the listed fields.
#[macro_export]
macro_rules! key_source {
    ($ty:ty { $($field:ident),+ $(,)? }) => {
        impl $crate::plan::KeySource for $ty {
            const FIELDS: &'static [&'static str] = &[$(stringify!($field)),+];

            fn field(&self, name: &str) -> Option<&dyn $crate::key::KeyPart> {
                match name {
                    $(stringify!($field) => Some(&self.$field),)+
                    _ => None,
                }
            }
        }
    };
}

/// One registered lookup: a dotted field path plus its zero-key policy.
#[derive(Debug, Clone)]
pub struct Lookup {
    /// Period-separated field names this lookup's keys are derived from.
    pub name: String,

    /// Whether to derive and cache keys whose every field holds its zero
    /// value. When false (the default), all-zero keys are omitted at
    /// insert time so unset fields don't alias each other.
    pub allow_zero: bool,
}

impl Lookup {
    pub fn new(name: impl Into<String>) -> Self {
        Lookup {
            name: name.into(),
            allow_zero: false,
        }
    }

    pub fn allowing_zero(name: impl Into<String>) -> Self {
        Lookup {
            name: name.into(),
            allow_zero: true,
        }
    }
}

/// A validated lookup: the dotted name and its resolved field segments.
#[derive(Debug)]
struct StructKey {
    name: String,
    fields: Vec<String>,
    allow_zero: bool,
}

/// The precomputed key plan for payload type `T`.
pub(crate) struct StructKeys<T: ?Sized> {
    keys: Vec<StructKey>,
    _marker: PhantomData<fn(&T)>,
}

impl<T: ?Sized> std::fmt::Debug for StructKeys<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructKeys").field("keys", &self.keys).finish()
    }
}

impl<T: KeySource> StructKeys<T> {
    /// Validate the lookups against `T`'s fields and build the plan.
    pub(crate) fn try_new(lookups: &[Lookup]) -> Result<Self, ConfigError> {
        if lookups.is_empty() {
            return Err(ConfigError::NoLookups);
        }
        let mut keys: Vec<StructKey> = Vec::with_capacity(lookups.len());
        for lookup in lookups {
            if keys.iter().any(|k| k.name == lookup.name) {
                return Err(ConfigError::DuplicateLookup(lookup.name.clone()));
            }
            let mut fields = Vec::new();
            for seg in lookup.name.split('.') {
                if seg.is_empty() || !T::FIELDS.iter().any(|f| *f == seg) {
                    return Err(ConfigError::UnknownField {
                        lookup: lookup.name.clone(),
                        field: seg.to_string(),
                    });
                }
                fields.push(seg.to_string());
            }
            keys.push(StructKey {
                name: lookup.name.clone(),
                fields,
                allow_zero: lookup.allow_zero,
            });
        }
        Ok(StructKeys {
            keys,
            _marker: PhantomData,
        })
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.keys.iter().map(|k| k.name.clone()).collect()
    }

    pub(crate) fn index_of(&self, name: &str) -> Option<usize> {
        self.keys.iter().position(|k| k.name == name)
    }

    /// Resolve a lookup name, panicking on an unregistered one.
    pub(crate) fn require(&self, name: &str) -> usize {
        self.index_of(name)
            .unwrap_or_else(|| panic!("{}", ConfigError::UnknownLookup(name.to_string())))
    }

    /// Derive the encoded key for one lookup over an instance's fields.
    pub(crate) fn key_for(&self, name: &str, value: &T) -> Vec<u8> {
        let sk = &self.keys[self.require(name)];
        let parts = Self::parts(sk, value);
        key::encode_key(&sk.name, &parts)
    }

    /// Derive `(lookup index, encoded key)` for every registered lookup
    /// over an instance, omitting all-zero keys where the lookup disallows
    /// them. Used at insert time.
    pub(crate) fn generate(&self, value: &T) -> Vec<(usize, Vec<u8>)> {
        let mut out = Vec::with_capacity(self.keys.len());
        for (i, sk) in self.keys.iter().enumerate() {
            let parts = Self::parts(sk, value);
            if !sk.allow_zero && parts.iter().all(|p| p.is_zero()) {
                continue;
            }
            out.push((i, key::encode_key(&sk.name, &parts)));
        }
        out
    }

    fn parts<'v>(sk: &StructKey, value: &'v T) -> Vec<&'v dyn KeyPart> {
        sk.fields
            .iter()
            .map(|f| {
                value
                    .field(f)
                    .unwrap_or_else(|| panic!("field {f:?} not accessible on key source"))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::encode_key;

    struct Record {
        id: u64,
        kind: String,
        owner: String,
        name: String,
        count: u32,
    }

    key_source!(Record { id, kind, owner, name, count });

    fn record() -> Record {
        Record {
            id: 7,
            kind: "disk".into(),
            owner: "alice".into(),
            name: "scratch".into(),
            count: 0,
        }
    }

    #[test]
    fn validates_fields_at_registration() {
        let err = StructKeys::<Record>::try_new(&[Lookup::new("missing")]).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownField { .. }));

        let err =
            StructKeys::<Record>::try_new(&[Lookup::new("owner.missing")]).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownField { .. }));

        let err = StructKeys::<Record>::try_new(&[]).unwrap_err();
        assert!(matches!(err, ConfigError::NoLookups));

        let err = StructKeys::<Record>::try_new(&[Lookup::new("id"), Lookup::new("id")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateLookup(_)));
    }

    #[test]
    fn key_for_matches_manual_encoding() {
        let keys =
            StructKeys::<Record>::try_new(&[Lookup::new("id"), Lookup::new("owner.name")])
                .unwrap();
        let r = record();
        assert_eq!(keys.key_for("id", &r), encode_key("id", &[&7u64]));
        assert_eq!(
            keys.key_for("owner.name", &r),
            encode_key("owner.name", &[&"alice", &"scratch"]),
        );
    }

    #[test]
    fn generate_omits_zero_keys() {
        let keys = StructKeys::<Record>::try_new(&[
            Lookup::new("id"),
            Lookup::new("count"),
            Lookup::allowing_zero("kind"),
        ])
        .unwrap();
        let r = record();
        let generated = keys.generate(&r);
        let indices: Vec<usize> = generated.iter().map(|(i, _)| *i).collect();
        // count is zero and disallows zero keys, so only id and kind derive.
        assert_eq!(indices, vec![0, 2]);
    }

    #[test]
    #[should_panic(expected = "unknown lookup")]
    fn unknown_lookup_panics() {
        let keys = StructKeys::<Record>::try_new(&[Lookup::new("id")]).unwrap();
        keys.require("email");
    }

    #[test]
    fn index_resolution() {
        let keys =
            StructKeys::<Record>::try_new(&[Lookup::new("id"), Lookup::new("kind")]).unwrap();
        assert_eq!(keys.index_of("kind"), Some(1));
        assert_eq!(keys.index_of("nope"), None);
        assert_eq!(keys.names(), vec!["id".to_string(), "kind".to_string()]);
    }
}
