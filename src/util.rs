//! Small crate-internal helpers.

use std::sync::{Mutex, MutexGuard};

/// Lock a [`Mutex`], recovering the guard if a panicking holder poisoned it.
///
/// The engine's shared maps and registries stay structurally valid even when
/// a consumer callback panics mid-dispatch, so the poison flag carries no
/// information we need to act on.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
