// timed debounce: emit a value only once no newer one has arrived for a while.

use super::{Flowable, Publisher};
use crate::{
    backpressure::{DemandCounter, SubscriptionSlot, UNBOUNDED, validate_request},
    disposable::{Disposable, DisposableSlot},
    drain::SerializedSubscriber,
    error::Error,
    fallback,
    scheduler::{SchedulerRef, WorkerRef},
    signal::{Subscriber, SubscriberRef, Subscription, SubscriptionRef},
    util::atomic_take::AtomicTake,
};
use std::{
    sync::{
        Arc,
        Weak,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering::AcqRel, Ordering::Acquire, Ordering::SeqCst},
    },
    time::Duration,
};


struct Debounce<T> {
    source: Flowable<T>,
    delay: Duration,
    scheduler: SchedulerRef,
}

impl<T: Send + 'static> Publisher<T> for Debounce<T> {
    fn subscribe(&self, subscriber: SubscriberRef<T>) {
        let parent = Arc::new_cyclic(|this| DebounceSubscriber {
            actual: SerializedSubscriber::new(subscriber),
            upstream: SubscriptionSlot::new(),
            worker: self.scheduler.create_worker(),
            delay: self.delay,
            timer: DisposableSlot::new(),
            index: AtomicU64::new(0),
            requested: DemandCounter::new(),
            done: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            completing: AtomicBool::new(false),
            completed: AtomicBool::new(false),
            this: this.clone(),
        });
        self.source.subscribe(parent);
    }
}


// both the upstream's subscriber and the downstream's subscription.
struct DebounceSubscriber<T: Send> {
    // emissions come from both the upstream's thread and the worker's.
    actual: SerializedSubscriber<T>,
    upstream: SubscriptionSlot,
    worker: WorkerRef,
    delay: Duration,
    // the pending emission, if any.
    timer: DisposableSlot<DebounceEmitter<T>>,
    // sequence number of the latest value.
    index: AtomicU64,
    requested: DemandCounter,
    done: AtomicBool,
    // emitters between claiming their value and delivering it, plus the completion flush.
    // completion is delivered by whoever brings this to zero once completing is set.
    in_flight: AtomicUsize,
    completing: AtomicBool,
    completed: AtomicBool,
    this: Weak<Self>,
}

impl<T: Send + 'static> DebounceSubscriber<T> {
    // deliver a value whose delay has passed, unless a newer one arrived since.
    fn emit(&self, idx: u64, value: T, emitter: &DebounceEmitter<T>) {
        if idx != self.index.load(Acquire) {
            return;
        }
        if self.requested.get() != 0 {
            self.actual.on_next(value);
            self.requested.produced(1);
            emitter.dispose();
        } else {
            self.cancel();
            self.actual.on_error(Error::missing_backpressure(
                "debounce: could not deliver value due to lack of requests",
            ));
        }
    }

    fn enter(&self) {
        self.in_flight.fetch_add(1, SeqCst);
    }

    fn leave(&self) {
        if self.in_flight.fetch_sub(1, SeqCst) == 1 && self.completing.load(SeqCst) {
            self.complete();
        }
    }

    fn complete(&self) {
        if self.completed.swap(true, AcqRel) {
            return;
        }
        self.timer.dispose();
        self.upstream.release();
        self.actual.on_complete();
        self.worker.dispose();
    }
}

impl<T: Send + 'static> Subscriber<T> for DebounceSubscriber<T> {
    fn on_subscribe(&self, s: SubscriptionRef) {
        if !self.upstream.set_once(s) {
            return;
        }
        if let Some(this) = self.this.upgrade() {
            self.actual.on_subscribe(this);
        }
        self.upstream.request(UNBOUNDED);
    }

    fn on_next(&self, value: T) {
        if self.done.load(Acquire) {
            return;
        }
        let idx = self.index.fetch_add(1, AcqRel) + 1;
        let emitter = Arc::new(DebounceEmitter {
            value: AtomicTake::some(value),
            idx,
            parent: self.this.clone(),
            resource: DisposableSlot::new(),
        });
        // cancels the previous pending emission
        if !self.timer.set(Arc::clone(&emitter)) {
            return;
        }
        let task = Arc::clone(&emitter);
        let handle = self.worker.schedule(Box::new(move || task.run()), self.delay);
        emitter.resource.set(handle);
    }

    fn on_error(&self, error: Error) {
        if self.done.swap(true, AcqRel) {
            fallback::on_error(error);
            return;
        }
        self.timer.dispose();
        self.upstream.release();
        self.actual.on_error(error);
        self.worker.dispose();
    }

    fn on_complete(&self) {
        if self.done.swap(true, AcqRel) {
            return;
        }
        self.enter();
        self.completing.store(true, SeqCst);
        // flush what is pending. if the timer already took it, completion waits for its delivery
        if let Some(emitter) = self.timer.get() {
            emitter.dispose();
            emitter.run();
        }
        self.leave();
    }
}

impl<T: Send + 'static> Subscription for DebounceSubscriber<T> {
    fn request(&self, n: u64) {
        if validate_request(n) {
            self.requested.request(n);
        }
    }

    fn cancel(&self) {
        self.upstream.cancel();
        self.timer.dispose();
        self.worker.dispose();
    }
}


// one pending emission. fires at most once, whether from the timer or from a completion flush.
struct DebounceEmitter<T: Send> {
    value: AtomicTake<T>,
    idx: u64,
    parent: Weak<DebounceSubscriber<T>>,
    // the scheduled timer task.
    resource: DisposableSlot,
}

impl<T: Send + 'static> DebounceEmitter<T> {
    fn run(&self) {
        let Some(parent) = self.parent.upgrade() else { return };
        parent.enter();
        if let Some(value) = self.value.take() {
            parent.emit(self.idx, value, self);
        }
        parent.leave();
    }
}

// disposal stops the timer but leaves the value, so that a completion can still flush it.
impl<T: Send> Disposable for DebounceEmitter<T> {
    fn dispose(&self) {
        self.resource.dispose();
    }

    fn is_disposed(&self) -> bool {
        self.resource.is_disposed()
    }
}


impl<T: Send + 'static> Flowable<T> {
    /// Emit a value only once `delay` passes without a newer one, timed on `scheduler`.
    ///
    /// Completion flushes the pending value, if any, before completing. The upstream is requested
    /// without bound; a value falling due while downstream has no outstanding demand fails the
    /// subscription with a missing-backpressure error.
    pub fn debounce(&self, delay: Duration, scheduler: SchedulerRef) -> Flowable<T> {
        Flowable::from_publisher(Debounce { source: self.clone(), delay, scheduler })
    }
}
