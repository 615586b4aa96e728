//! Cache key encoding.
//!
//! Alias keys are deterministic byte strings: a lookup-name prefix, a `.`
//! separator, then the concatenated encodings of each key part. Equal part
//! lists always produce equal keys; unequal lists produce unequal keys for
//! any single part type.
//!
//! The encoding is deliberately *not* ambiguity-free across type
//! boundaries: the string `"ab"` and the byte slice `[0x61, 0x62]` encode
//! identically, as do adjacent variable-length parts that shift bytes
//! between each other. The lookup prefix is the collision discipline:
//! a single lookup always encodes the same field types in the same
//! order, and different lookups never share a key space.
//!
//! Encoders are selected statically through the [`KeyPart`] trait, so an
//! unsupported part type fails to compile. A thread-local scratch buffer
//! is reused across calls on each thread.

use std::cell::RefCell;
use std::fmt::{self, Display};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::ConfigError;

/// A value that can contribute bytes to a cache key.
///
/// Implementations must be deterministic: the same value always appends
/// the same bytes. Multi-byte integers and float bit patterns encode
/// little-endian; strings and byte slices append their raw bytes with no
/// length prefix; `None` appends nothing at all.
pub trait KeyPart {
    /// Append this value's encoding to `buf`.
    fn encode_to(&self, buf: &mut Vec<u8>);

    /// Whether this value is its type's zero value. Lookups that disallow
    /// zero keys skip keys whose every part is zero.
    fn is_zero(&self) -> bool;
}

macro_rules! int_part {
    ($($ty:ty),+ $(,)?) => {$(
        impl KeyPart for $ty {
            #[inline]
            fn encode_to(&self, buf: &mut Vec<u8>) {
                buf.extend_from_slice(&self.to_le_bytes());
            }

            #[inline]
            fn is_zero(&self) -> bool {
                *self == 0
            }
        }
    )+};
}

int_part!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);

impl KeyPart for bool {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) {
        buf.push(if *self { b'1' } else { b'0' });
    }

    #[inline]
    fn is_zero(&self) -> bool {
        !*self
    }
}

impl KeyPart for char {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&(*self as u32).to_le_bytes());
    }

    #[inline]
    fn is_zero(&self) -> bool {
        *self == '\0'
    }
}

impl KeyPart for f32 {
    /// Bit-pattern encoding: `-0.0` and `0.0` produce different keys, NaN
    /// payloads are preserved.
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.to_bits().to_le_bytes());
    }

    #[inline]
    fn is_zero(&self) -> bool {
        *self == 0.0
    }
}

impl KeyPart for f64 {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.to_bits().to_le_bytes());
    }

    #[inline]
    fn is_zero(&self) -> bool {
        *self == 0.0
    }
}

impl KeyPart for str {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.as_bytes());
    }

    #[inline]
    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl KeyPart for String {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.as_bytes());
    }

    #[inline]
    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl KeyPart for SystemTime {
    /// Nanoseconds since the Unix epoch as a signed 64-bit integer;
    /// pre-epoch instants encode negative.
    fn encode_to(&self, buf: &mut Vec<u8>) {
        let nanos: i64 = match self.duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_nanos() as i64,
            Err(e) => -(e.duration().as_nanos() as i64),
        };
        buf.extend_from_slice(&nanos.to_le_bytes());
    }

    #[inline]
    fn is_zero(&self) -> bool {
        *self == UNIX_EPOCH
    }
}

impl KeyPart for Duration {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&(self.as_nanos() as i64).to_le_bytes());
    }

    #[inline]
    fn is_zero(&self) -> bool {
        self.as_nanos() == 0
    }
}

impl KeyPart for Ipv4Addr {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.octets());
    }

    #[inline]
    fn is_zero(&self) -> bool {
        self.is_unspecified()
    }
}

impl KeyPart for Ipv6Addr {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.octets());
    }

    #[inline]
    fn is_zero(&self) -> bool {
        self.is_unspecified()
    }
}

impl KeyPart for IpAddr {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) {
        match self {
            IpAddr::V4(a) => a.encode_to(buf),
            IpAddr::V6(a) => a.encode_to(buf),
        }
    }

    #[inline]
    fn is_zero(&self) -> bool {
        self.is_unspecified()
    }
}

impl<T: KeyPart + ?Sized> KeyPart for &T {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) {
        (**self).encode_to(buf);
    }

    #[inline]
    fn is_zero(&self) -> bool {
        (**self).is_zero()
    }
}

/// `None` contributes no bytes, mirroring how a nil pointer is skipped.
/// `Some` of an inner zero value is *not* zero: the pointer itself is set.
impl<T: KeyPart> KeyPart for Option<T> {
    fn encode_to(&self, buf: &mut Vec<u8>) {
        if let Some(v) = self {
            v.encode_to(buf);
        }
    }

    #[inline]
    fn is_zero(&self) -> bool {
        self.is_none()
    }
}

/// Slices encode by concatenating element encodings in order. A byte slice
/// therefore encodes as its raw bytes.
impl<T: KeyPart> KeyPart for [T] {
    fn encode_to(&self, buf: &mut Vec<u8>) {
        for v in self {
            v.encode_to(buf);
        }
    }

    #[inline]
    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl<T: KeyPart> KeyPart for Vec<T> {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) {
        self.as_slice().encode_to(buf);
    }

    #[inline]
    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl<T: KeyPart, const N: usize> KeyPart for [T; N] {
    fn encode_to(&self, buf: &mut Vec<u8>) {
        for v in self {
            v.encode_to(buf);
        }
    }

    fn is_zero(&self) -> bool {
        self.iter().all(KeyPart::is_zero)
    }
}

/// Pairs and triples concatenate their components; a complex number keys
/// as its `(re, im)` pair.
impl<A: KeyPart, B: KeyPart> KeyPart for (A, B) {
    fn encode_to(&self, buf: &mut Vec<u8>) {
        self.0.encode_to(buf);
        self.1.encode_to(buf);
    }

    fn is_zero(&self) -> bool {
        self.0.is_zero() && self.1.is_zero()
    }
}

impl<A: KeyPart, B: KeyPart, C: KeyPart> KeyPart for (A, B, C) {
    fn encode_to(&self, buf: &mut Vec<u8>) {
        self.0.encode_to(buf);
        self.1.encode_to(buf);
        self.2.encode_to(buf);
    }

    fn is_zero(&self) -> bool {
        self.0.is_zero() && self.1.is_zero() && self.2.is_zero()
    }
}

/// Keys any value through its canonical textual form.
///
/// ```
/// use ttl_cache_rs::key::{encode_key, Text};
///
/// let key = encode_key("port", &[&Text(8080)]);
/// assert_eq!(&key[5..], b"8080".as_slice());
/// ```
pub struct Text<T>(pub T);

impl<T: Display> KeyPart for Text<T> {
    fn encode_to(&self, buf: &mut Vec<u8>) {
        use fmt::Write as _;
        // Infallible: ByteWriter never errors.
        let _ = write!(ByteWriter(buf), "{}", self.0);
    }

    fn is_zero(&self) -> bool {
        false
    }
}

struct ByteWriter<'a>(&'a mut Vec<u8>);

impl fmt::Write for ByteWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.extend_from_slice(s.as_bytes());
        Ok(())
    }
}

thread_local! {
    /// Per-thread scratch buffer reused across key encodings.
    static SCRATCH: RefCell<Vec<u8>> = RefCell::new(Vec::with_capacity(512));
}

/// Run `f` with this thread's scratch buffer, cleared. Falls back to a
/// fresh buffer on reentrant use (a `Display` impl encoding a key of its
/// own); the borrow is released on every exit path, panics included.
pub(crate) fn with_scratch<R>(f: impl FnOnce(&mut Vec<u8>) -> R) -> R {
    SCRATCH.with(|cell| match cell.try_borrow_mut() {
        Ok(mut buf) => {
            buf.clear();
            f(&mut buf)
        }
        Err(_) => f(&mut Vec::with_capacity(512)),
    })
}

/// Encode a cache key: `prefix`, a `.` separator, then each part in order.
///
/// # Panics
///
/// Panics if `parts` is empty. An empty part list almost always means the
/// caller forgot the lookup name and passed a key part in its place, which
/// would otherwise silently probe a key that can never exist.
pub fn encode_key(prefix: &str, parts: &[&dyn KeyPart]) -> Vec<u8> {
    if parts.is_empty() {
        panic!("{}", ConfigError::EmptyKey);
    }
    with_scratch(|buf| {
        buf.extend_from_slice(prefix.as_bytes());
        buf.push(b'.');
        for part in parts {
            part.encode_to(buf);
        }
        buf.clone()
    })
}
