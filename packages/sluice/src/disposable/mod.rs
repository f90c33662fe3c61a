//! Cancellation tokens.
//!
//! Everything that holds a resource which must be released when a subscription ends implements
//! [`Disposable`]. Disposal is idempotent and may be raced from any number of threads; the
//! wrapped release action runs at most once, on the thread that wins.
//!
//! The containers in this module hold disposables on behalf of a subscription:
//!
//! - [`Token`]: a single release action.
//! - [`DisposableSlot`]: a swappable reference to one disposable, with once-only and replace
//!   semantics.
//! - [`CompositeDisposable`]: a set of disposables released together.

mod composite;
mod slot;

pub use self::{
    composite::{CompositeDisposable, DisposalKey},
    slot::DisposableSlot,
};

use crate::{
    error::{Error, ProtocolViolation},
    fallback,
    util::atomic_take::AtomicTake,
};
use std::sync::Arc;


/// The right to stop something exactly once.
pub trait Disposable: Send + Sync {
    /// Release the underlying resource, if not already released.
    fn dispose(&self);

    /// Whether this has been disposed.
    fn is_disposed(&self) -> bool;
}

/// Shared handle to a disposable.
pub type DisposableRef = Arc<dyn Disposable>;

// boxed release action.
type ReleaseFn = Box<dyn FnOnce() + Send>;


/// Cancellation token wrapping an optional release action
///
/// The token starts live and transitions to disposed exactly once. The release action, if any,
/// runs on the thread that performs that transition.
pub struct Token {
    // Some(_) = live, taken = disposed.
    release: AtomicTake<Option<ReleaseFn>>,
}

impl Token {
    /// A live token with nothing to release.
    pub fn new() -> Self {
        Token { release: AtomicTake::some(None) }
    }

    /// A live token which runs `f` upon disposal.
    pub fn from_fn<F: FnOnce() + Send + 'static>(f: F) -> Self {
        Token { release: AtomicTake::some(Some(Box::new(f))) }
    }

    /// A live token which disposes `inner` upon disposal.
    pub fn wrap(inner: DisposableRef) -> Self {
        Self::from_fn(move || inner.dispose())
    }

    /// A token which is already disposed.
    pub fn disposed() -> Self {
        Token { release: AtomicTake::none() }
    }
}

impl Default for Token {
    fn default() -> Self {
        Token::new()
    }
}

impl Disposable for Token {
    fn dispose(&self) {
        if let Some(Some(release)) = self.release.take() {
            release();
        }
    }

    fn is_disposed(&self) -> bool {
        self.release.is_taken()
    }
}


/// Shared handle to a token that is already disposed.
pub fn disposed() -> DisposableRef {
    Arc::new(Token::disposed())
}

/// Shared handle to a live token with nothing to release.
pub fn empty() -> DisposableRef {
    Arc::new(Token::new())
}

/// Whether `d` is absent or disposed.
pub fn is_disposed(d: Option<&DisposableRef>) -> bool {
    d.map_or(true, |d| d.is_disposed())
}

// report an attempt to attach a second upstream to a set-once holder.
pub(crate) fn report_double_subscription() {
    warn!("attempted to attach a second upstream to a set-once holder");
    fallback::on_error(Error::Protocol(ProtocolViolation::DoubleSubscription));
}
