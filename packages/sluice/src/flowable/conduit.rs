// hot single-subscriber source fed by hand.

use super::{Flowable, Publisher};
use crate::{
    backpressure::{DemandCounter, UNBOUNDED, validate_request},
    drain::WorkCounter,
    error::{Error, ProtocolViolation},
    fallback,
    signal::{EmptySubscription, Subscriber, SubscriberRef, Subscription, SubscriptionRef},
    util::lock,
};
use crossbeam_queue::SegQueue;
use std::sync::{
    Arc,
    Mutex,
    atomic::{AtomicBool, Ordering::AcqRel, Ordering::Acquire, Ordering::Release},
};


/// Hot source which buffers what it is fed until its one subscriber requests it
///
/// Values, a failure, or a completion may be pushed in before anyone subscribes; the first
/// subscriber receives all of it, subject to demand. Any later subscriber is failed with
/// [`ProtocolViolation::SingleSubscriberOnly`].
///
/// Also usable as a [`Subscriber`] to relay some other source, which it requests without bound.
pub struct Conduit<T>(Arc<ConduitState<T>>);

impl<T> Clone for Conduit<T> {
    fn clone(&self) -> Self {
        Conduit(Arc::clone(&self.0))
    }
}

struct ConduitState<T> {
    queue: SegQueue<T>,
    // written before done is set.
    error: Mutex<Option<Error>>,
    done: AtomicBool,
    // cleared at terminal and upon cancellation, since it holds this state as its subscription.
    downstream: Mutex<Option<SubscriberRef<T>>>,
    subscribed: AtomicBool,
    cancelled: AtomicBool,
    requested: DemandCounter,
    wip: WorkCounter,
}

impl<T: Send + 'static> Conduit<T> {
    /// Construct with nothing buffered.
    pub fn new() -> Self {
        Conduit(Arc::new(ConduitState {
            queue: SegQueue::new(),
            error: Mutex::new(None),
            done: AtomicBool::new(false),
            downstream: Mutex::new(None),
            subscribed: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            requested: DemandCounter::new(),
            wip: WorkCounter::new(),
        }))
    }

    /// The source side.
    pub fn flowable(&self) -> Flowable<T> {
        Flowable::from_publisher(ConduitPublisher(Arc::clone(&self.0)))
    }

    /// Push a value. Ignored once terminated or cancelled.
    pub fn on_next(&self, value: T) {
        let state = &self.0;
        if state.done.load(Acquire) || state.cancelled.load(Acquire) {
            return;
        }
        state.queue.push(value);
        state.drain();
    }

    /// Push the terminal failure. Routed to the fallback channel once terminated or cancelled.
    pub fn on_error(&self, error: Error) {
        let state = &self.0;
        if state.done.load(Acquire) || state.cancelled.load(Acquire) {
            fallback::on_error(error);
            return;
        }
        *lock(&state.error) = Some(error);
        state.done.store(true, Release);
        state.drain();
    }

    /// Push the terminal completion. Ignored once terminated or cancelled.
    pub fn on_complete(&self) {
        let state = &self.0;
        if state.done.load(Acquire) || state.cancelled.load(Acquire) {
            return;
        }
        state.done.store(true, Release);
        state.drain();
    }

    /// Whether a subscriber is currently attached.
    pub fn has_subscriber(&self) -> bool {
        lock(&self.0.downstream).is_some()
    }
}

impl<T: Send + 'static> Default for Conduit<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> Subscriber<T> for Conduit<T> {
    fn on_subscribe(&self, s: SubscriptionRef) {
        if self.0.done.load(Acquire) || self.0.cancelled.load(Acquire) {
            s.cancel();
        } else {
            s.request(UNBOUNDED);
        }
    }

    fn on_next(&self, value: T) {
        Conduit::on_next(self, value);
    }

    fn on_error(&self, error: Error) {
        Conduit::on_error(self, error);
    }

    fn on_complete(&self) {
        Conduit::on_complete(self);
    }
}

impl<T: Send + 'static> ConduitState<T> {
    fn clear(&self) {
        while self.queue.pop().is_some() {}
    }

    fn drain(&self) {
        if !self.wip.enter() {
            return;
        }
        let mut missed = 1;
        loop {
            let downstream = lock(&self.downstream).clone();
            if let Some(a) = downstream {
                let r = self.requested.get();
                let mut e = 0;
                while e != r {
                    let done = self.done.load(Acquire);
                    let value = self.queue.pop();
                    if self.check_terminated(done, value.is_none(), &a) {
                        return;
                    }
                    let Some(value) = value else { break };
                    a.on_next(value);
                    e += 1;
                }
                if e == r && self.check_terminated(self.done.load(Acquire), self.queue.is_empty(), &a) {
                    return;
                }
                if e != 0 {
                    self.requested.produced(e);
                }
            }
            missed = self.wip.leave(missed);
            if missed == 0 {
                return;
            }
        }
    }

    // deliver the terminal signal or honor cancellation. returns whether the drain is over for
    // good, in which case the work counter is never released.
    fn check_terminated(&self, done: bool, empty: bool, a: &SubscriberRef<T>) -> bool {
        if self.cancelled.load(Acquire) {
            self.clear();
            *lock(&self.downstream) = None;
            return true;
        }
        if done && empty {
            *lock(&self.downstream) = None;
            match lock(&self.error).take() {
                Some(error) => a.on_error(error),
                None => a.on_complete(),
            }
            return true;
        }
        false
    }
}

impl<T: Send + 'static> Subscription for ConduitState<T> {
    fn request(&self, n: u64) {
        if !validate_request(n) {
            return;
        }
        self.requested.request(n);
        self.drain();
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, AcqRel) {
            return;
        }
        trace!("conduit subscriber cancelled");
        if self.wip.enter() {
            self.clear();
            *lock(&self.downstream) = None;
        }
    }
}


struct ConduitPublisher<T>(Arc<ConduitState<T>>);

impl<T: Send + 'static> Publisher<T> for ConduitPublisher<T> {
    fn subscribe(&self, subscriber: SubscriberRef<T>) {
        let state = &self.0;
        if state.subscribed.swap(true, AcqRel) {
            EmptySubscription::error(
                &*subscriber,
                Error::Protocol(ProtocolViolation::SingleSubscriberOnly),
            );
            return;
        }
        subscriber.on_subscribe(state.clone());
        *lock(&state.downstream) = Some(subscriber);
        if state.cancelled.load(Acquire) {
            *lock(&state.downstream) = None;
        } else {
            state.drain();
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::capture_undeliverable;
    use anyhow::anyhow;

    #[test]
    fn buffers_until_subscribed_and_requested() {
        let conduit = Conduit::new();
        conduit.on_next(1);
        conduit.on_next(2);
        conduit.on_complete();
        conduit.on_next(3);
        let ts = conduit.flowable().test(1);
        ts.assert_values(&[1]);
        ts.assert_not_terminated();
        ts.request(1);
        ts.assert_values(&[1, 2]);
        ts.assert_complete();
        assert!(!conduit.has_subscriber());
    }

    #[test]
    fn second_subscriber_rejected() {
        let conduit = Conduit::<u8>::new();
        let _first = conduit.flowable().test(0);
        let second = conduit.flowable().test(0);
        assert!(matches!(
            second.assert_error(),
            Error::Protocol(ProtocolViolation::SingleSubscriberOnly),
        ));
    }

    #[test]
    fn cancel_discards_and_detaches() {
        let conduit = Conduit::new();
        let ts = conduit.flowable().test(1);
        conduit.on_next(1);
        conduit.on_next(2);
        ts.cancel();
        assert!(!conduit.has_subscriber());
        conduit.on_next(3);
        let ((), errors) = capture_undeliverable(|| conduit.on_error(Error::user(anyhow!("late"))));
        assert_eq!(errors.len(), 1);
        ts.assert_values(&[1]);
        ts.assert_not_terminated();
    }

    #[test]
    fn relays_another_source() {
        let conduit = Conduit::new();
        Flowable::from_iterable(vec![7, 8]).subscribe(Arc::new(conduit.clone()));
        let ts = conduit.flowable().test(UNBOUNDED);
        ts.assert_values(&[7, 8]);
        ts.assert_complete();
    }

    #[test]
    fn failure_waits_for_buffered_values() {
        let conduit = Conduit::new();
        conduit.on_next("a");
        conduit.on_error(Error::user(anyhow!("boom")));
        let ts = conduit.flowable().test(0);
        ts.assert_not_terminated();
        ts.request(1);
        ts.assert_values(&["a"]);
        assert_eq!(ts.assert_error().to_string(), "boom");
    }
}
