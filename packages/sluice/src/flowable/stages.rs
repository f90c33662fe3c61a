// one-to-one stages which forward demand and cancellation unchanged.

use super::{Flowable, Publisher};
use crate::{
    backpressure::SubscriptionSlot,
    error::Error,
    fallback,
    signal::{Subscriber, SubscriberRef, SubscriptionRef},
};
use std::{
    marker::PhantomData,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering::AcqRel, Ordering::Acquire},
    },
};


// shared plumbing of a stage: the downstream, the upstream handed to it, and the terminal flag.
struct Link<U> {
    actual: SubscriberRef<U>,
    // handed downstream as its subscription, so that cancellation releases the upstream.
    upstream: Arc<SubscriptionSlot>,
    done: AtomicBool,
}

impl<U> Link<U> {
    fn new(actual: SubscriberRef<U>) -> Self {
        Link {
            actual,
            upstream: Arc::new(SubscriptionSlot::new()),
            done: AtomicBool::new(false),
        }
    }

    fn on_subscribe(&self, s: SubscriptionRef) {
        if self.upstream.set_once(s) {
            self.actual.on_subscribe(self.upstream.clone());
        }
    }

    fn is_done(&self) -> bool {
        self.done.load(Acquire)
    }

    // a user function failed: stop the upstream and fail downstream in its place.
    fn fail(&self, error: Error) {
        if self.done.swap(true, AcqRel) {
            fallback::on_error(error);
            return;
        }
        trace!(%error, "stage function failed");
        self.upstream.cancel();
        self.actual.on_error(error);
    }

    // stop the upstream and complete downstream.
    fn cut(&self) {
        if self.done.swap(true, AcqRel) {
            return;
        }
        self.upstream.cancel();
        self.actual.on_complete();
    }

    fn on_error(&self, error: Error) {
        if self.done.swap(true, AcqRel) {
            fallback::on_error(error);
            return;
        }
        self.upstream.release();
        self.actual.on_error(error);
    }

    fn on_complete(&self) {
        if self.done.swap(true, AcqRel) {
            return;
        }
        self.upstream.release();
        self.actual.on_complete();
    }
}


struct MapSubscriber<T, U, F> {
    link: Link<U>,
    f: Arc<F>,
    _p: PhantomData<fn(T)>,
}

impl<T, U, F> Subscriber<T> for MapSubscriber<T, U, F>
where
    T: Send,
    U: Send,
    F: Fn(T) -> Result<U, Error> + Send + Sync,
{
    fn on_subscribe(&self, s: SubscriptionRef) {
        self.link.on_subscribe(s);
    }

    fn on_next(&self, value: T) {
        if self.link.is_done() {
            return;
        }
        match (self.f)(value) {
            Ok(mapped) => self.link.actual.on_next(mapped),
            Err(error) => self.link.fail(error),
        }
    }

    fn on_error(&self, error: Error) {
        self.link.on_error(error);
    }

    fn on_complete(&self) {
        self.link.on_complete();
    }
}

struct Map<T, F> {
    source: Flowable<T>,
    f: Arc<F>,
}

impl<T, U, F> Publisher<U> for Map<T, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Result<U, Error> + Send + Sync + 'static,
{
    fn subscribe(&self, subscriber: SubscriberRef<U>) {
        self.source.subscribe(Arc::new(MapSubscriber {
            link: Link::new(subscriber),
            f: Arc::clone(&self.f),
            _p: PhantomData,
        }));
    }
}


struct TakeWhileSubscriber<T, F> {
    link: Link<T>,
    predicate: Arc<F>,
}

impl<T, F> Subscriber<T> for TakeWhileSubscriber<T, F>
where
    T: Send,
    F: Fn(&T) -> Result<bool, Error> + Send + Sync,
{
    fn on_subscribe(&self, s: SubscriptionRef) {
        self.link.on_subscribe(s);
    }

    fn on_next(&self, value: T) {
        if self.link.is_done() {
            return;
        }
        match (self.predicate)(&value) {
            Ok(true) => self.link.actual.on_next(value),
            Ok(false) => self.link.cut(),
            Err(error) => self.link.fail(error),
        }
    }

    fn on_error(&self, error: Error) {
        self.link.on_error(error);
    }

    fn on_complete(&self) {
        self.link.on_complete();
    }
}

struct TakeWhile<T, F> {
    source: Flowable<T>,
    predicate: Arc<F>,
}

impl<T, F> Publisher<T> for TakeWhile<T, F>
where
    T: Send + 'static,
    F: Fn(&T) -> Result<bool, Error> + Send + Sync + 'static,
{
    fn subscribe(&self, subscriber: SubscriberRef<T>) {
        self.source.subscribe(Arc::new(TakeWhileSubscriber {
            link: Link::new(subscriber),
            predicate: Arc::clone(&self.predicate),
        }));
    }
}


impl<T: Send + 'static> Flowable<T> {
    /// Transform each value with a fallible function.
    ///
    /// A failure cancels the upstream and terminates downstream with it.
    pub fn map<U, F>(&self, f: F) -> Flowable<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Result<U, Error> + Send + Sync + 'static,
    {
        Flowable::from_publisher(Map { source: self.clone(), f: Arc::new(f) })
    }

    /// Relay values while a fallible predicate holds, then cancel the upstream and complete.
    ///
    /// A failure of the predicate cancels the upstream and terminates downstream with it.
    pub fn take_while<F>(&self, predicate: F) -> Flowable<T>
    where
        F: Fn(&T) -> Result<bool, Error> + Send + Sync + 'static,
    {
        Flowable::from_publisher(TakeWhile { source: self.clone(), predicate: Arc::new(predicate) })
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backpressure::UNBOUNDED,
        flowable::{Conduit, OverflowStrategy},
        testing::capture_undeliverable,
    };
    use anyhow::anyhow;

    #[test]
    fn map_forwards_demand() {
        let ts = Flowable::from_iterable(1..=5).map(|n: i32| Ok(n * 10)).test(2);
        ts.assert_values(&[10, 20]);
        ts.request(3);
        ts.assert_values(&[10, 20, 30, 40, 50]);
        ts.assert_complete();
    }

    #[test]
    fn map_failure_cancels_upstream() {
        let conduit = Conduit::<i32>::new();
        let ts = conduit
            .flowable()
            .map(|n| if n < 0 { Err(Error::user(anyhow!("negative"))) } else { Ok(n) })
            .test(UNBOUNDED);
        conduit.on_next(1);
        conduit.on_next(-1);
        conduit.on_next(2);
        ts.assert_values(&[1]);
        assert_eq!(ts.assert_error().to_string(), "negative");
        assert!(!conduit.has_subscriber());
    }

    #[test]
    fn take_while_completes_and_cancels() {
        let conduit = Conduit::<i32>::new();
        let ts = conduit.flowable().take_while(|&n| Ok(n < 3)).test(UNBOUNDED);
        for n in 0..5 {
            conduit.on_next(n);
        }
        ts.assert_values(&[0, 1, 2]);
        ts.assert_complete();
        assert!(!conduit.has_subscriber());
    }

    #[test]
    fn take_while_failure() {
        let ts = Flowable::from_iterable(vec![1, 2])
            .take_while(|_| Err(Error::user(anyhow!("undecidable"))))
            .test(UNBOUNDED);
        assert_eq!(ts.value_count(), 0);
        assert_eq!(ts.assert_error().to_string(), "undecidable");
    }

    #[test]
    fn upstream_failure_after_cut_goes_to_fallback() {
        let slot = Arc::new(std::sync::Mutex::new(None));
        let source = Flowable::<i32>::create(
            {
                let slot = Arc::clone(&slot);
                move |emitter| {
                    *slot.lock().unwrap() = Some(emitter);
                    Ok(())
                }
            },
            OverflowStrategy::PassThrough,
        );
        let ts = source.take_while(|&n| Ok(n == 0)).test(UNBOUNDED);
        let emitter = slot.lock().unwrap().clone().unwrap();
        emitter.on_next(1);
        ts.assert_complete();
        // the upstream is cancelled, so the emitter itself routes the failure
        let ((), errors) = capture_undeliverable(|| emitter.on_error(Error::user(anyhow!("late"))));
        assert_eq!(errors.len(), 1);
        ts.assert_complete();
    }
}
