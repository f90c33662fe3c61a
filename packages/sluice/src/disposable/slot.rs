// swappable single-disposable holder.

use super::{Disposable, report_double_subscription};
use crate::util::lock;
use std::sync::{
    Arc,
    Mutex,
    atomic::{AtomicBool, Ordering::AcqRel, Ordering::Acquire},
};


/// Holder of at most one disposable, which may itself be disposed
///
/// Once the slot is disposed it stays disposed, and anything offered to it afterwards is disposed
/// immediately instead of being stored.
pub struct DisposableSlot<D: ?Sized + Disposable = dyn Disposable> {
    // begins false. once true, never changes again, and current is None.
    //
    // set before current is taken, and checked while current is locked, so that an offer racing
    // with disposal either sees the flag or is seen by the disposer.
    disposed: AtomicBool,
    current: Mutex<Option<Arc<D>>>,
}

impl<D: ?Sized + Disposable> DisposableSlot<D> {
    /// Construct empty.
    pub fn new() -> Self {
        DisposableSlot {
            disposed: AtomicBool::new(false),
            current: Mutex::new(None),
        }
    }

    /// Construct holding `d`.
    pub fn with(d: Arc<D>) -> Self {
        DisposableSlot {
            disposed: AtomicBool::new(false),
            current: Mutex::new(Some(d)),
        }
    }

    /// Attach `d` if nothing was ever attached.
    ///
    /// If something is already attached, that is a protocol violation: it is reported to the
    /// fallback channel and `d` is disposed, since it will never be used. If the slot is disposed,
    /// `d` is disposed. Returns whether `d` was attached.
    pub fn set_once(&self, d: Arc<D>) -> bool {
        let mut current = lock(&self.current);
        if self.disposed.load(Acquire) {
            drop(current);
            d.dispose();
            return false;
        }
        if current.is_some() {
            drop(current);
            d.dispose();
            report_double_subscription();
            return false;
        }
        *current = Some(d);
        true
    }

    /// Swap in `d` without disposing what it replaces.
    ///
    /// Returns false, having disposed `d`, if the slot is disposed.
    pub fn replace(&self, d: Arc<D>) -> bool {
        let mut current = lock(&self.current);
        if self.disposed.load(Acquire) {
            drop(current);
            d.dispose();
            return false;
        }
        *current = Some(d);
        true
    }

    /// Swap in `d` and dispose what it replaces.
    ///
    /// Returns false, having disposed `d`, if the slot is disposed.
    pub fn set(&self, d: Arc<D>) -> bool {
        let mut current = lock(&self.current);
        if self.disposed.load(Acquire) {
            drop(current);
            d.dispose();
            return false;
        }
        let old = current.replace(d);
        drop(current);
        if let Some(old) = old {
            old.dispose();
        }
        true
    }

    /// The currently held disposable, unless empty or disposed.
    pub fn get(&self) -> Option<Arc<D>> {
        lock(&self.current).clone()
    }
}

impl<D: ?Sized + Disposable> Disposable for DisposableSlot<D> {
    fn dispose(&self) {
        if self.disposed.swap(true, AcqRel) {
            return;
        }
        let old = lock(&self.current).take();
        if let Some(old) = old {
            old.dispose();
        }
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Acquire)
    }
}

impl<D: ?Sized + Disposable> Default for DisposableSlot<D> {
    fn default() -> Self {
        Self::new()
    }
}
