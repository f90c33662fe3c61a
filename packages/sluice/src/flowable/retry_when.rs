// resubscription driven by a companion flowable of failures.

use super::{Conduit, Flowable, Publisher};
use crate::{
    backpressure::{SubscriptionArbiter, SubscriptionSlot},
    drain::{SerializedSubscriber, WorkCounter},
    error::Error,
    signal::{EmptySubscription, Subscriber, SubscriberRef, Subscription, SubscriptionRef},
};
use std::{
    marker::PhantomData,
    sync::{
        Arc,
        Weak,
        atomic::{AtomicU64, Ordering::AcqRel},
    },
};


struct RetryWhen<T, U, F> {
    source: Flowable<T>,
    handler: F,
    _p: PhantomData<fn() -> U>,
}

impl<T, U, F> Publisher<T> for RetryWhen<T, U, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(Flowable<Error>) -> Flowable<U> + Send + Sync,
{
    fn subscribe(&self, subscriber: SubscriberRef<T>) {
        let failures = Conduit::new();
        let when = (self.handler)(failures.flowable());
        let parent = Arc::new_cyclic(|this| RetrySubscriber {
            actual: SerializedSubscriber::new(subscriber),
            arbiter: SubscriptionArbiter::new(),
            failures,
            receiver: Arc::new(WhenReceiver {
                source: self.source.clone(),
                upstream: SubscriptionSlot::new(),
                parent: this.clone(),
                wip: WorkCounter::new(),
            }),
            produced: AtomicU64::new(0),
        });
        parent.actual.on_subscribe(parent.clone());
        when.subscribe(parent.receiver.clone());
        parent.receiver.resubscribe();
    }
}


// subscriber to each attempt of the primary source, and the downstream's subscription.
struct RetrySubscriber<T> {
    // the receiver's terminal signal may race with the current attempt's signals.
    actual: SerializedSubscriber<T>,
    // the current attempt, swapped on each retry.
    arbiter: SubscriptionArbiter,
    failures: Conduit<Error>,
    receiver: Arc<WhenReceiver<T>>,
    // delivered during the current attempt.
    produced: AtomicU64,
}

impl<T: Send + 'static> RetrySubscriber<T> {
    // the current attempt failed: settle its demand and let the handler decide.
    fn again(&self, error: Error) {
        self.arbiter.set_subscription(EmptySubscription::shared());
        let p = self.produced.swap(0, AcqRel);
        if p != 0 {
            self.arbiter.produced(p);
        }
        self.receiver.upstream.request(1);
        self.failures.on_next(error);
    }
}

impl<T: Send + 'static> Subscriber<T> for RetrySubscriber<T> {
    fn on_subscribe(&self, s: SubscriptionRef) {
        self.arbiter.set_subscription(s);
    }

    fn on_next(&self, value: T) {
        self.produced.fetch_add(1, AcqRel);
        self.actual.on_next(value);
    }

    fn on_error(&self, error: Error) {
        trace!(%error, "attempt failed");
        self.again(error);
    }

    fn on_complete(&self) {
        self.receiver.upstream.cancel();
        self.arbiter.cancel();
        self.actual.on_complete();
    }
}

impl<T: Send + 'static> Subscription for RetrySubscriber<T> {
    fn request(&self, n: u64) {
        self.arbiter.request(n);
    }

    fn cancel(&self) {
        self.arbiter.cancel();
        self.receiver.upstream.cancel();
    }
}


// subscriber to the handler's flowable. each value triggers a new attempt.
struct WhenReceiver<T> {
    source: Flowable<T>,
    upstream: SubscriptionSlot,
    // non-owning, since the parent owns this.
    parent: Weak<RetrySubscriber<T>>,
    // attempts asked for and not yet started. attempts are started one after another, never
    // nested, even when an attempt fails synchronously.
    wip: WorkCounter,
}

impl<T: Send + 'static> WhenReceiver<T> {
    fn resubscribe(&self) {
        if !self.wip.enter() {
            return;
        }
        loop {
            if self.upstream.is_cancelled() {
                return;
            }
            let Some(parent) = self.parent.upgrade() else { return };
            trace!("subscribing to source");
            self.source.subscribe(parent);
            if self.wip.leave(1) == 0 {
                return;
            }
        }
    }
}

impl<T: Send + 'static, U> Subscriber<U> for WhenReceiver<T> {
    fn on_subscribe(&self, s: SubscriptionRef) {
        self.upstream.set_once(s);
    }

    fn on_next(&self, _: U) {
        self.resubscribe();
    }

    fn on_error(&self, error: Error) {
        if let Some(parent) = self.parent.upgrade() {
            parent.cancel();
            parent.actual.on_error(error);
        }
    }

    fn on_complete(&self) {
        if let Some(parent) = self.parent.upgrade() {
            parent.cancel();
            parent.actual.on_complete();
        }
    }
}


impl<T: Send + 'static> Flowable<T> {
    /// Resubscribe to this source whenever it fails, as directed by `handler`.
    ///
    /// Per subscription, `handler` is given a flowable of this source's failures and returns a
    /// flowable whose every value triggers a new attempt. Its completion completes the
    /// subscription, and its failure fails it. Outstanding demand carries over from one attempt to
    /// the next, and cancellation reaches whichever attempt is current.
    pub fn retry_when<U, F>(&self, handler: F) -> Flowable<T>
    where
        U: Send + 'static,
        F: Fn(Flowable<Error>) -> Flowable<U> + Send + Sync + 'static,
    {
        Flowable::from_publisher(RetryWhen { source: self.clone(), handler, _p: PhantomData })
    }
}
