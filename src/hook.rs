//! Eviction and invalidation callback types.
//!
//! Hooks run *inside* the store's critical section, strictly after the
//! affected entry has been detached from every index. A hook must return
//! promptly and must never call back into the cache that invoked it (the
//! store mutex is not reentrant). A panicking hook is safe: the lock is
//! released by scope on unwind.

/// Callback invoked with a borrowed view of a detached entry.
///
/// The borrow is only valid for the duration of the call.
pub type Hook<K, V> = Box<dyn FnMut(&K, &V) + Send>;

/// Value-level callback used by the result layer, which hides its internal
/// primary keys from observers.
pub type ValueHook<V> = Box<dyn FnMut(&V) + Send>;

/// No-op hook; `None` callbacks are normalized to this so the stores never
/// have to branch on hook presence.
pub(crate) fn none<K, V>() -> Hook<K, V> {
    Box::new(|_, _| {})
}

pub(crate) fn none_value<V>() -> ValueHook<V> {
    Box::new(|_| {})
}

/// Normalize an optional hook.
pub(crate) fn or_none<K, V>(hook: Option<Hook<K, V>>) -> Hook<K, V> {
    hook.unwrap_or_else(none)
}

pub(crate) fn or_none_value<V>(hook: Option<ValueHook<V>>) -> ValueHook<V> {
    hook.unwrap_or_else(none_value)
}
