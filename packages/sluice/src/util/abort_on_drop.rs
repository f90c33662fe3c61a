//! Tokio utility.

use crate::disposable::Disposable;
use std::{
    future::Future,
    sync::atomic::{AtomicBool, Ordering::AcqRel, Ordering::Acquire},
};
use tokio::{
    runtime::Handle,
    task::AbortHandle,
};


/// Wrapper around tokio task that aborts if dropped or disposed.
pub(crate) struct AbortOnDrop {
    handle: AbortHandle,
    aborted: AtomicBool,
}

impl AbortOnDrop {
    /// Spawn a tokio task on the given runtime and wrap with self.
    pub(crate) fn spawn_on<F>(runtime: &Handle, f: F) -> Self
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        AbortOnDrop {
            handle: runtime.spawn(f).abort_handle(),
            aborted: AtomicBool::new(false),
        }
    }
}

impl Disposable for AbortOnDrop {
    fn dispose(&self) {
        if !self.aborted.swap(true, AcqRel) {
            self.handle.abort();
        }
    }

    fn is_disposed(&self) -> bool {
        self.aborted.load(Acquire) || self.handle.is_finished()
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
