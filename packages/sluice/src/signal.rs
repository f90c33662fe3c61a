//! Consumer-side capability sets.
//!
//! A subscription delivers, in order: one `on_subscribe`, any number of `on_next`, and at most one
//! terminal signal (`on_error` or `on_complete`). Nothing is delivered after the terminal signal.
//! Signals to one consumer never overlap.
//!
//! Consumers are shared by reference and receive signals through `&self`, since the producer side
//! and the cancelling side of a subscription generally live on different threads.

use crate::{
    disposable::DisposableRef,
    error::Error,
};
use std::sync::Arc;


/// Demand-side handle of a backpressured subscription
pub trait Subscription: Send + Sync {
    /// Allow up to `n` more values to be delivered. `n` must be positive.
    fn request(&self, n: u64);

    /// Stop the subscription. Idempotent.
    fn cancel(&self);
}

/// Shared handle to a subscription.
pub type SubscriptionRef = Arc<dyn Subscription>;


/// Consumer of a [`Flowable`](crate::Flowable)
pub trait Subscriber<T>: Send + Sync {
    /// Receive the subscription handle. Always the first signal.
    fn on_subscribe(&self, subscription: SubscriptionRef);

    /// Receive a value. Never more than has been requested.
    fn on_next(&self, value: T);

    /// Receive the terminal failure.
    fn on_error(&self, error: Error);

    /// Receive the terminal completion.
    fn on_complete(&self);
}

/// Shared handle to a subscriber.
pub type SubscriberRef<T> = Arc<dyn Subscriber<T>>;


/// Consumer of an [`Observable`](crate::Observable)
///
/// Same as [`Subscriber`] but without flow control; the handle can only be disposed.
pub trait Observer<T>: Send + Sync {
    /// Receive the disposal handle. Always the first signal.
    fn on_subscribe(&self, d: DisposableRef);

    /// Receive a value.
    fn on_next(&self, value: T);

    /// Receive the terminal failure.
    fn on_error(&self, error: Error);

    /// Receive the terminal completion.
    fn on_complete(&self);
}

/// Shared handle to an observer.
pub type ObserverRef<T> = Arc<dyn Observer<T>>;


/// Consumer of a single value or a failure
pub trait SingleObserver<T>: Send + Sync {
    /// Receive the disposal handle. Always the first signal.
    fn on_subscribe(&self, d: DisposableRef);

    /// Receive the value. Terminal.
    fn on_success(&self, value: T);

    /// Receive the terminal failure.
    fn on_error(&self, error: Error);
}

/// Shared handle to a single observer.
pub type SingleObserverRef<T> = Arc<dyn SingleObserver<T>>;


/// Consumer of a [`Completable`](crate::Completable)
pub trait CompletableObserver: Send + Sync {
    /// Receive the disposal handle. Always the first signal.
    fn on_subscribe(&self, d: DisposableRef);

    /// Receive the terminal failure.
    fn on_error(&self, error: Error);

    /// Receive the terminal completion.
    fn on_complete(&self);
}

/// Shared handle to a completable observer.
pub type CompletableObserverRef = Arc<dyn CompletableObserver>;


/// A subscription which ignores requests and cancellation
///
/// Handed out by sources which terminate immediately upon subscription, and used as a placeholder
/// while a stage is between two upstreams.
#[derive(Debug, Default, Copy, Clone)]
pub struct EmptySubscription;

impl EmptySubscription {
    /// Shared handle to an empty subscription.
    pub fn shared() -> SubscriptionRef {
        Arc::new(EmptySubscription)
    }

    /// Subscribe `subscriber` with an empty subscription and immediately fail it.
    pub fn error<T>(subscriber: &dyn Subscriber<T>, error: Error) {
        subscriber.on_subscribe(Self::shared());
        subscriber.on_error(error);
    }

    /// Subscribe `subscriber` with an empty subscription and immediately complete it.
    pub fn complete<T>(subscriber: &dyn Subscriber<T>) {
        subscriber.on_subscribe(Self::shared());
        subscriber.on_complete();
    }
}

impl Subscription for EmptySubscription {
    fn request(&self, _: u64) {}

    fn cancel(&self) {}
}
