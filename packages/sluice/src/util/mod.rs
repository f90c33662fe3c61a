//! Low-level utilities shared by the core.

pub(crate) mod abort_on_drop;
pub(crate) mod atomic_take;

use std::sync::{Mutex, MutexGuard, PoisonError};


// lock a mutex, ignoring poisoning.
//
// no lock in this crate is held across a signal delivery, so a panic while one is held cannot
// leave the guarded state half-updated in a way later readers would misinterpret.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
