//! Backpressured sources.
//!
//! A [`Flowable`] delivers to a [`Subscriber`](crate::Subscriber) only as many values as it has
//! requested. Each call to [`subscribe`](Flowable::subscribe) starts one independent subscription.
//!
//! Sources:
//!
//! - [`Flowable::create`] bridges a callback-driven producer, applying an [`OverflowStrategy`] to
//!   values emitted ahead of demand.
//! - [`Flowable::generate`] pulls from a stateful generator one value per requested unit.
//! - [`Flowable::from_iterable`], [`Flowable::empty`] and [`Flowable::error`].
//! - [`Conduit`] is a hot source fed by hand, for a single subscriber.
//!
//! Stages: [`map`](Flowable::map), [`take_while`](Flowable::take_while),
//! [`debounce`](Flowable::debounce) and [`retry_when`](Flowable::retry_when).

mod conduit;
mod create;
mod debounce;
mod generate;
mod retry_when;
mod stages;
#[cfg(feature = "futures")]
mod stream;

pub use self::{
    conduit::Conduit,
    create::{Emitter, OverflowStrategy},
    generate::SyncEmitter,
};
#[cfg(feature = "futures")]
pub use self::stream::FlowableStream;

use crate::{
    error::Error,
    signal::{EmptySubscription, SubscriberRef},
};
use std::sync::Arc;


/// Something which can be subscribed to with backpressure
///
/// Implement this to write a source or stage, then wrap it with [`Flowable::from_publisher`].
pub trait Publisher<T>: Send + Sync {
    /// Start a new subscription delivering to `subscriber`.
    ///
    /// Must call `on_subscribe` on `subscriber` before any other signal.
    fn subscribe(&self, subscriber: SubscriberRef<T>);
}


/// Backpressured source of a sequence of `T`
///
/// Cheap to clone; clones share the same underlying publisher.
pub struct Flowable<T>(Arc<dyn Publisher<T>>);

impl<T> Clone for Flowable<T> {
    fn clone(&self) -> Self {
        Flowable(Arc::clone(&self.0))
    }
}

impl<T: Send + 'static> Flowable<T> {
    /// Wrap a publisher.
    pub fn from_publisher<P: Publisher<T> + 'static>(publisher: P) -> Self {
        Flowable(Arc::new(publisher))
    }

    /// Start a new subscription delivering to `subscriber`.
    pub fn subscribe(&self, subscriber: SubscriberRef<T>) {
        self.0.subscribe(subscriber);
    }

    /// Source which completes immediately.
    pub fn empty() -> Self {
        Flowable::from_publisher(Empty)
    }

    /// Source which fails immediately with `error`.
    pub fn error(error: Error) -> Self {
        Flowable::from_publisher(Failed(error))
    }
}


struct Empty;

impl<T> Publisher<T> for Empty {
    fn subscribe(&self, subscriber: SubscriberRef<T>) {
        EmptySubscription::complete(&*subscriber);
    }
}

struct Failed(Error);

impl<T> Publisher<T> for Failed {
    fn subscribe(&self, subscriber: SubscriberRef<T>) {
        EmptySubscription::error(&*subscriber, self.0.clone());
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn empty_completes_without_demand() {
        let ts = Flowable::<u8>::empty().test(0);
        assert_eq!(ts.value_count(), 0);
        ts.assert_complete();
    }

    #[test]
    fn error_fails_every_subscription() {
        let flowable = Flowable::<u8>::error(Error::user(anyhow!("nope")));
        for _ in 0..2 {
            assert_eq!(flowable.test(0).assert_error().to_string(), "nope");
        }
    }
}
