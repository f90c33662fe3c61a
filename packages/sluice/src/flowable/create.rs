// bridge from callback-driven producers into the demand protocol.

use super::{Flowable, Publisher};
use crate::{
    aggregate::ErrorAggregator,
    backpressure::{DemandCounter, validate_request},
    disposable::{Disposable, DisposableRef, DisposableSlot, Token},
    drain::WorkCounter,
    error::Error,
    fallback,
    signal::{SubscriberRef, Subscription},
    util::lock,
};
use crossbeam_queue::SegQueue;
use std::{
    marker::PhantomData,
    sync::{
        Arc,
        Mutex,
        atomic::{AtomicBool, Ordering::Acquire, Ordering::Release},
    },
};


/// What a producer's emitter does when the consumer has not requested the value being emitted
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum OverflowStrategy {
    /// Deliver regardless of demand. The producer is trusted to honor demand itself.
    PassThrough,
    /// Fail with a missing-backpressure error and stop.
    Error,
    /// Discard the value and carry on.
    Drop,
    /// Keep only the most recent undelivered value, discarding any older one.
    Latest,
    /// Queue every value until it is requested.
    #[default]
    Buffer,
}


/// Producer-side handle of a [`Flowable::create`] subscription
///
/// Not meant to be called from several threads at once; use [`serialize`](Self::serialize) for
/// that. Cloning yields another handle to the same emitter.
pub struct Emitter<T>(Handle<T>);

enum Handle<T> {
    Direct(Arc<CreateEmitter<T>>),
    Serialized(Arc<SerializedEmitter<T>>),
}

impl<T> Clone for Emitter<T> {
    fn clone(&self) -> Self {
        Emitter(match &self.0 {
            Handle::Direct(e) => Handle::Direct(Arc::clone(e)),
            Handle::Serialized(e) => Handle::Serialized(Arc::clone(e)),
        })
    }
}

impl<T: Send + 'static> Emitter<T> {
    fn base(&self) -> &CreateEmitter<T> {
        match &self.0 {
            Handle::Direct(e) => e,
            Handle::Serialized(e) => &e.emitter,
        }
    }

    /// Emit a value.
    pub fn on_next(&self, value: T) {
        match &self.0 {
            Handle::Direct(e) => e.on_next(value),
            Handle::Serialized(e) => e.on_next(value),
        }
    }

    /// Emit a value which may be absent. An absent value fails the subscription.
    pub fn on_next_checked(&self, value: Option<T>) {
        match value {
            Some(value) => self.on_next(value),
            None => self.on_error(Error::NullValue { signal: "on_next" }),
        }
    }

    /// Terminate with a failure.
    ///
    /// If the subscription already terminated or was cancelled, the failure is routed to the
    /// fallback channel.
    pub fn on_error(&self, error: Error) {
        if !self.try_on_error(error.clone()) {
            fallback::on_error(error);
        }
    }

    /// Terminate with a failure which may be absent, which is a failure in itself.
    pub fn on_error_checked(&self, error: Option<Error>) {
        self.on_error(error.unwrap_or(Error::NullValue { signal: "on_error" }));
    }

    /// Terminate with a failure, unless already terminated or cancelled. Returns whether it did.
    pub fn try_on_error(&self, error: Error) -> bool {
        match &self.0 {
            Handle::Direct(e) => e.signal_error(error),
            Handle::Serialized(e) => e.try_on_error(error),
        }
    }

    /// Terminate with completion.
    pub fn on_complete(&self) {
        match &self.0 {
            Handle::Direct(e) => e.on_complete(),
            Handle::Serialized(e) => e.on_complete(),
        }
    }

    /// Attach a resource to release on cancellation or termination, releasing the previously
    /// attached one.
    pub fn set_disposable(&self, d: DisposableRef) {
        self.base().serial.set(d);
    }

    /// Attach a release action to run on cancellation or termination, releasing the previously
    /// attached resource.
    pub fn set_cancellable<F: FnOnce() + Send + 'static>(&self, f: F) {
        self.set_disposable(Arc::new(Token::from_fn(f)));
    }

    /// Outstanding demand.
    pub fn requested(&self) -> u64 {
        self.base().requested.get()
    }

    /// Whether the consumer cancelled or the subscription terminated.
    pub fn is_cancelled(&self) -> bool {
        self.base().is_cancelled()
    }

    /// A handle which may be called from several threads at once.
    pub fn serialize(&self) -> Emitter<T> {
        match &self.0 {
            Handle::Direct(e) => Emitter(Handle::Serialized(Arc::new(SerializedEmitter::new(
                Arc::clone(e),
            )))),
            Handle::Serialized(_) => self.clone(),
        }
    }
}


// the emitter behind a create subscription, also acting as that subscription.
pub(crate) struct CreateEmitter<T> {
    actual: SubscriberRef<T>,
    // disposed upon cancellation or termination. holds the producer's resource.
    serial: DisposableSlot,
    requested: DemandCounter,
    mode: Mode<T>,
}

enum Mode<T> {
    PassThrough,
    Error,
    Drop,
    Latest(Async<T, LatestSlot<T>>),
    Buffer(Async<T, SegQueue<T>>),
}

// state of the queueing strategies.
struct Async<T, Q> {
    queue: Q,
    // written before done is set. read after done is observed.
    error: Mutex<Option<Error>>,
    done: AtomicBool,
    wip: WorkCounter,
    _p: PhantomData<fn(T)>,
}

// values waiting for demand.
trait Pending<T>: Send + Sync {
    fn offer(&self, value: T);
    fn poll(&self) -> Option<T>;
    fn is_empty(&self) -> bool;
    fn clear(&self);
}

impl<T: Send> Pending<T> for SegQueue<T> {
    fn offer(&self, value: T) {
        self.push(value);
    }

    fn poll(&self) -> Option<T> {
        self.pop()
    }

    fn is_empty(&self) -> bool {
        SegQueue::is_empty(self)
    }

    fn clear(&self) {
        while self.pop().is_some() {}
    }
}

// single-value queue in which each offer overwrites the last.
struct LatestSlot<T>(Mutex<Option<T>>);

impl<T: Send> Pending<T> for LatestSlot<T> {
    fn offer(&self, value: T) {
        let replaced = lock(&self.0).replace(value);
        drop(replaced);
    }

    fn poll(&self) -> Option<T> {
        lock(&self.0).take()
    }

    fn is_empty(&self) -> bool {
        lock(&self.0).is_none()
    }

    fn clear(&self) {
        drop(self.poll());
    }
}

impl<T: Send + 'static> CreateEmitter<T> {
    pub(crate) fn new(actual: SubscriberRef<T>, strategy: OverflowStrategy) -> Self {
        let mode = match strategy {
            OverflowStrategy::PassThrough => Mode::PassThrough,
            OverflowStrategy::Error => Mode::Error,
            OverflowStrategy::Drop => Mode::Drop,
            OverflowStrategy::Latest => Mode::Latest(Async::new(LatestSlot(Mutex::new(None)))),
            OverflowStrategy::Buffer => Mode::Buffer(Async::new(SegQueue::new())),
        };
        CreateEmitter {
            actual,
            serial: DisposableSlot::new(),
            requested: DemandCounter::new(),
            mode,
        }
    }

    fn is_cancelled(&self) -> bool {
        self.serial.is_disposed()
    }

    fn on_next(&self, value: T) {
        match &self.mode {
            Mode::PassThrough => {
                if self.is_cancelled() {
                    return;
                }
                self.actual.on_next(value);
                self.requested.consume_one();
            }
            Mode::Error | Mode::Drop => {
                if self.is_cancelled() {
                    return;
                }
                if self.requested.get() != 0 {
                    self.actual.on_next(value);
                    self.requested.produced(1);
                } else if matches!(self.mode, Mode::Error) {
                    let error =
                        Error::missing_backpressure("create: could not emit value due to lack of requests");
                    if !self.signal_error(error.clone()) {
                        fallback::on_error(error);
                    }
                }
            }
            Mode::Latest(state) => state.on_next(self, value),
            Mode::Buffer(state) => state.on_next(self, value),
        }
    }

    fn signal_error(&self, error: Error) -> bool {
        match &self.mode {
            Mode::Latest(state) => state.signal_error(self, error),
            Mode::Buffer(state) => state.signal_error(self, error),
            _ => self.error_downstream(error),
        }
    }

    fn on_complete(&self) {
        match &self.mode {
            Mode::Latest(state) => state.on_complete(self),
            Mode::Buffer(state) => state.on_complete(self),
            _ => self.complete_downstream(),
        }
    }

    fn error_downstream(&self, error: Error) -> bool {
        if self.is_cancelled() {
            return false;
        }
        self.actual.on_error(error);
        self.serial.dispose();
        true
    }

    fn complete_downstream(&self) {
        if self.is_cancelled() {
            return;
        }
        self.actual.on_complete();
        self.serial.dispose();
    }
}

impl<T: Send, Q: Pending<T>> Async<T, Q> {
    fn new(queue: Q) -> Self {
        Async {
            queue,
            error: Mutex::new(None),
            done: AtomicBool::new(false),
            wip: WorkCounter::new(),
            _p: PhantomData,
        }
    }

    fn on_next(&self, emitter: &CreateEmitter<T>, value: T)
    where
        T: 'static,
    {
        if self.done.load(Acquire) || emitter.is_cancelled() {
            return;
        }
        self.queue.offer(value);
        self.drain(emitter);
    }

    fn signal_error(&self, emitter: &CreateEmitter<T>, error: Error) -> bool
    where
        T: 'static,
    {
        if self.done.load(Acquire) || emitter.is_cancelled() {
            return false;
        }
        *lock(&self.error) = Some(error);
        self.done.store(true, Release);
        self.drain(emitter);
        true
    }

    fn on_complete(&self, emitter: &CreateEmitter<T>)
    where
        T: 'static,
    {
        self.done.store(true, Release);
        self.drain(emitter);
    }

    // called upon cancellation. the work counter is never released again, so nothing further
    // is delivered.
    fn on_unsubscribed(&self) {
        if self.wip.enter() {
            self.queue.clear();
        }
    }

    // deliver queued values up to demand, then the terminal signal once the queue is empty.
    fn drain(&self, emitter: &CreateEmitter<T>)
    where
        T: 'static,
    {
        if !self.wip.enter() {
            return;
        }
        let mut missed = 1;
        loop {
            let r = emitter.requested.get();
            let mut e = 0;
            while e != r {
                if emitter.is_cancelled() {
                    self.queue.clear();
                    return;
                }
                let done = self.done.load(Acquire);
                let value = self.queue.poll();
                if done && value.is_none() {
                    self.terminate(emitter);
                    return;
                }
                let Some(value) = value else { break };
                emitter.actual.on_next(value);
                e += 1;
            }
            if e == r {
                if emitter.is_cancelled() {
                    self.queue.clear();
                    return;
                }
                if self.done.load(Acquire) && self.queue.is_empty() {
                    self.terminate(emitter);
                    return;
                }
            }
            if e != 0 {
                emitter.requested.produced(e);
            }
            missed = self.wip.leave(missed);
            if missed == 0 {
                return;
            }
        }
    }

    fn terminate(&self, emitter: &CreateEmitter<T>)
    where
        T: 'static,
    {
        match lock(&self.error).take() {
            Some(error) => {
                emitter.error_downstream(error);
            }
            None => emitter.complete_downstream(),
        }
    }
}

impl<T: Send + 'static> Subscription for CreateEmitter<T> {
    fn request(&self, n: u64) {
        if !validate_request(n) {
            return;
        }
        self.requested.request(n);
        match &self.mode {
            Mode::Latest(state) => state.drain(self),
            Mode::Buffer(state) => state.drain(self),
            _ => (),
        }
    }

    fn cancel(&self) {
        if self.is_cancelled() {
            return;
        }
        trace!("create subscription cancelled");
        self.serial.dispose();
        match &self.mode {
            Mode::Latest(state) => state.on_unsubscribed(),
            Mode::Buffer(state) => state.on_unsubscribed(),
            _ => (),
        }
    }
}


// emitter wrapper serializing concurrent producer calls through a drain loop.
struct SerializedEmitter<T> {
    emitter: Arc<CreateEmitter<T>>,
    queue: SegQueue<T>,
    errors: ErrorAggregator,
    done: AtomicBool,
    wip: WorkCounter,
}

impl<T: Send + 'static> SerializedEmitter<T> {
    fn new(emitter: Arc<CreateEmitter<T>>) -> Self {
        SerializedEmitter {
            emitter,
            queue: SegQueue::new(),
            errors: ErrorAggregator::new(),
            done: AtomicBool::new(false),
            wip: WorkCounter::new(),
        }
    }

    fn on_next(&self, value: T) {
        if self.emitter.is_cancelled() || self.done.load(Acquire) {
            return;
        }
        if self.wip.try_claim() {
            self.emitter.on_next(value);
            if self.wip.leave(1) == 0 {
                return;
            }
        } else {
            self.queue.push(value);
            if !self.wip.enter() {
                return;
            }
        }
        self.drain_loop();
    }

    fn try_on_error(&self, error: Error) -> bool {
        if self.emitter.is_cancelled() || self.done.load(Acquire) {
            return false;
        }
        if self.errors.add(error).is_err() {
            return false;
        }
        self.done.store(true, Release);
        self.drain();
        true
    }

    fn on_complete(&self) {
        if self.emitter.is_cancelled() || self.done.load(Acquire) {
            return;
        }
        self.done.store(true, Release);
        self.drain();
    }

    fn drain(&self) {
        if self.wip.enter() {
            self.drain_loop();
        }
    }

    // failures cut ahead of queued values; completion waits for the queue to empty.
    fn drain_loop(&self) {
        let mut missed = 1;
        loop {
            loop {
                if self.emitter.is_cancelled() {
                    while self.queue.pop().is_some() {}
                    return;
                }
                if self.errors.has_error() {
                    while self.queue.pop().is_some() {}
                    if let Some(error) = self.errors.terminate() {
                        if !self.emitter.signal_error(error.clone()) {
                            fallback::on_error(error);
                        }
                    }
                    return;
                }
                let done = self.done.load(Acquire);
                let value = self.queue.pop();
                if done && value.is_none() {
                    self.emitter.on_complete();
                    return;
                }
                match value {
                    Some(value) => self.emitter.on_next(value),
                    None => break,
                }
            }
            missed = self.wip.leave(missed);
            if missed == 0 {
                return;
            }
        }
    }
}


// the publisher behind Flowable::create.
pub(super) struct Create<T, F> {
    pub(super) source: F,
    pub(super) strategy: OverflowStrategy,
    pub(super) _p: PhantomData<fn() -> T>,
}

impl<T, F> Publisher<T> for Create<T, F>
where
    T: Send + 'static,
    F: Fn(Emitter<T>) -> Result<(), Error> + Send + Sync + 'static,
{
    fn subscribe(&self, subscriber: SubscriberRef<T>) {
        let emitter = Arc::new(CreateEmitter::new(Arc::clone(&subscriber), self.strategy));
        subscriber.on_subscribe(emitter.clone());
        if let Err(error) = (self.source)(Emitter(Handle::Direct(Arc::clone(&emitter)))) {
            if !emitter.signal_error(error.clone()) {
                fallback::on_error(error);
            }
        }
    }
}

impl<T: Send + 'static> Flowable<T> {
    /// Bridge a callback-driven producer into the demand protocol.
    ///
    /// `source` runs once per subscription, on the subscribing thread, and emits through the given
    /// [`Emitter`], which it may keep and use later from another thread. Values the consumer has
    /// not yet requested are handled according to `strategy`. A failure returned by `source`
    /// terminates the subscription.
    pub fn create<F>(source: F, strategy: OverflowStrategy) -> Self
    where
        F: Fn(Emitter<T>) -> Result<(), Error> + Send + Sync + 'static,
    {
        Flowable::from_publisher(Create { source, strategy, _p: PhantomData })
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backpressure::UNBOUNDED,
        testing::{TestSubscriber, capture_undeliverable},
    };
    use anyhow::anyhow;
    use rand::prelude::*;
    use rand_pcg::Pcg32;
    use std::{
        sync::{Barrier, atomic::AtomicUsize, atomic::Ordering::Relaxed},
        thread,
    };

    fn emit_range(n: u32, strategy: OverflowStrategy) -> Flowable<u32> {
        Flowable::create(
            move |emitter| {
                for i in 1..=n {
                    emitter.on_next(i);
                }
                emitter.on_complete();
                Ok(())
            },
            strategy,
        )
    }

    // emitter kept outside the source, for driving emissions from the test.
    fn manual<T: Send + 'static>(strategy: OverflowStrategy) -> (Flowable<T>, Arc<Mutex<Option<Emitter<T>>>>) {
        let slot = Arc::new(Mutex::new(None));
        let flowable = Flowable::create(
            {
                let slot = Arc::clone(&slot);
                move |emitter| {
                    *slot.lock().unwrap() = Some(emitter);
                    Ok(())
                }
            },
            strategy,
        );
        (flowable, slot)
    }

    #[test]
    fn drop_without_demand_delivers_nothing() {
        let (ts, errors) = capture_undeliverable(|| emit_range(10, OverflowStrategy::Drop).test(0));
        assert_eq!(ts.value_count(), 0);
        assert!(ts.errors().is_empty());
        ts.assert_complete();
        assert!(errors.is_empty());
    }

    #[test]
    fn drop_delivers_up_to_demand() {
        let ts = emit_range(10, OverflowStrategy::Drop).test(3);
        ts.assert_values(&[1, 2, 3]);
        ts.assert_complete();
    }

    #[test]
    fn error_without_demand_fails_once() {
        let (ts, errors) = capture_undeliverable(|| emit_range(10, OverflowStrategy::Error).test(0));
        assert_eq!(ts.value_count(), 0);
        assert!(ts.assert_error().is_missing_backpressure());
        // the completion after the failure is dropped; nothing else is undeliverable
        assert!(errors.is_empty());
    }

    #[test]
    fn latest_keeps_only_most_recent() {
        let ts = emit_range(3, OverflowStrategy::Latest).test(0);
        assert_eq!(ts.value_count(), 0);
        ts.assert_not_terminated();
        ts.request(1);
        ts.assert_values(&[3]);
        ts.assert_complete();
    }

    #[test]
    fn latest_with_pending_request() {
        let (flowable, emitter) = manual::<u32>(OverflowStrategy::Latest);
        let ts = flowable.test(1);
        let emitter = emitter.lock().unwrap().clone().unwrap();
        emitter.on_next(1);
        emitter.on_next(2);
        emitter.on_next(3);
        ts.assert_values(&[1]);
        ts.request(5);
        ts.assert_values(&[1, 3]);
    }

    #[test]
    fn buffer_queues_until_requested() {
        let ts = emit_range(5, OverflowStrategy::Buffer).test(0);
        ts.assert_not_terminated();
        ts.request(2);
        ts.assert_values(&[1, 2]);
        ts.request(10);
        ts.assert_values(&[1, 2, 3, 4, 5]);
        ts.assert_complete();
    }

    #[test]
    fn buffer_error_waits_for_queue() {
        let flowable = Flowable::<u32>::create(
            |emitter| {
                emitter.on_next(1);
                emitter.on_error(Error::user(anyhow!("boom")));
                Ok(())
            },
            OverflowStrategy::Buffer,
        );
        let ts = flowable.test(0);
        ts.assert_not_terminated();
        ts.request(1);
        ts.assert_values(&[1]);
        assert_eq!(ts.assert_error().to_string(), "boom");
    }

    #[test]
    fn pass_through_ignores_demand() {
        let ts = emit_range(4, OverflowStrategy::PassThrough).test(1);
        ts.assert_values(&[1, 2, 3, 4]);
        ts.assert_complete();
    }

    #[test]
    fn never_exceeds_requested() {
        let mut rng = Pcg32::seed_from_u64(42);
        for strategy in [OverflowStrategy::Error, OverflowStrategy::Drop, OverflowStrategy::Latest, OverflowStrategy::Buffer] {
            let (flowable, emitter) = manual::<u32>(strategy);
            let ts = flowable.test(0);
            let emitter = emitter.lock().unwrap().clone().unwrap();
            let mut requested = 0;
            for i in 0..200 {
                if rng.gen_bool(0.3) {
                    let n = rng.gen_range(1..4);
                    requested += n;
                    ts.request(n);
                }
                let (_, _) = capture_undeliverable(|| emitter.on_next(i));
                assert!(ts.value_count() as u64 <= requested);
            }
        }
    }

    #[test]
    fn absent_value_and_absent_failure_are_one_rule() {
        let (flowable, emitter) = manual::<u32>(OverflowStrategy::Buffer);
        let ts = flowable.test(UNBOUNDED);
        emitter.lock().unwrap().clone().unwrap().on_next_checked(None);
        assert!(matches!(ts.assert_error(), Error::NullValue { .. }));

        let (flowable, emitter) = manual::<u32>(OverflowStrategy::Error);
        let ts = flowable.test(UNBOUNDED);
        emitter.lock().unwrap().clone().unwrap().on_error_checked(None);
        assert!(matches!(ts.assert_error(), Error::NullValue { .. }));
    }

    #[test]
    fn failure_after_terminal_goes_to_fallback() {
        let (flowable, emitter) = manual::<u32>(OverflowStrategy::Drop);
        let ts = flowable.test(UNBOUNDED);
        let emitter = emitter.lock().unwrap().clone().unwrap();
        emitter.on_complete();
        let ((), errors) = capture_undeliverable(|| emitter.on_error(Error::user(anyhow!("late"))));
        ts.assert_complete();
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn source_failure_terminates() {
        let ts = Flowable::<u32>::create(|_| Err(Error::user(anyhow!("setup"))), OverflowStrategy::Buffer).test(1);
        assert_eq!(ts.assert_error().to_string(), "setup");
    }

    #[test]
    fn cancel_releases_resource_and_stops_delivery() {
        let released = Arc::new(AtomicUsize::new(0));
        let (flowable, emitter) = manual::<u32>(OverflowStrategy::Buffer);
        let ts = flowable.test(1);
        let emitter = emitter.lock().unwrap().clone().unwrap();
        emitter.set_cancellable({
            let released = Arc::clone(&released);
            move || { released.fetch_add(1, Relaxed); }
        });
        emitter.on_next(1);
        emitter.on_next(2);
        ts.cancel();
        assert!(emitter.is_cancelled());
        ts.request(5);
        emitter.on_next(3);
        ts.assert_values(&[1]);
        assert_eq!(released.load(Relaxed), 1);
    }

    #[test]
    fn terminal_releases_resource() {
        let released = Arc::new(AtomicUsize::new(0));
        let flowable = Flowable::<u32>::create(
            {
                let released = Arc::clone(&released);
                move |emitter| {
                    let released = Arc::clone(&released);
                    emitter.set_cancellable(move || { released.fetch_add(1, Relaxed); });
                    emitter.on_complete();
                    Ok(())
                }
            },
            OverflowStrategy::Buffer,
        );
        flowable.test(0).assert_complete();
        assert_eq!(released.load(Relaxed), 1);
    }

    #[test]
    fn requested_tracks_demand() {
        let (flowable, emitter) = manual::<u32>(OverflowStrategy::Drop);
        let ts = flowable.test(3);
        let emitter = emitter.lock().unwrap().clone().unwrap();
        assert_eq!(emitter.requested(), 3);
        emitter.on_next(1);
        assert_eq!(emitter.requested(), 2);
        ts.request(UNBOUNDED);
        assert_eq!(emitter.requested(), UNBOUNDED);
    }

    #[test]
    fn serialized_concurrent_producers() {
        let mut rng = Pcg32::seed_from_u64(99);
        for _ in 0..10 {
            let producers = rng.gen_range(2..6);
            let per_producer = rng.gen_range(100..400);
            let (flowable, emitter) = manual::<usize>(OverflowStrategy::Buffer);
            let ts = flowable.test(UNBOUNDED);
            let emitter = emitter.lock().unwrap().clone().unwrap().serialize();
            let barrier = Arc::new(Barrier::new(producers));
            let joins = (0..producers)
                .map(|p| {
                    let emitter = emitter.clone();
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        for i in 0..per_producer {
                            emitter.on_next(p * per_producer + i);
                        }
                    })
                })
                .collect::<Vec<_>>();
            for join in joins {
                join.join().unwrap();
            }
            emitter.on_complete();
            let mut values = ts.values();
            values.sort_unstable();
            assert_eq!(values, (0..producers * per_producer).collect::<Vec<_>>());
            ts.assert_complete();
            assert!(!ts.saw_overlap());
        }
    }

    #[test]
    fn serialized_error_follows_values() {
        let (flowable, emitter) = manual::<u32>(OverflowStrategy::Buffer);
        let ts = flowable.test(0);
        let emitter = emitter.lock().unwrap().clone().unwrap().serialize();
        emitter.on_next(1);
        emitter.on_error(Error::user(anyhow!("boom")));
        // the buffering emitter delivers the failure after what it has queued
        ts.request(1);
        ts.assert_values(&[1]);
        ts.assert_error();
        let ((), errors) = capture_undeliverable(|| emitter.on_error(Error::user(anyhow!("late"))));
        assert_eq!(errors.len(), 1);
    }
}
