//! Emission serialization.
//!
//! Several threads may want to signal the same consumer at once: a producer thread emitting values
//! while a timer thread flushes and yet another thread terminates. The drain loop makes those calls
//! reach the consumer one at a time, in a consistent order, and without re-entrancy:
//!
//! 1. Every caller deposits its work (enqueues a value, sets a flag) and then increments a work
//!    counter.
//! 2. The caller whose increment moved the counter off zero becomes the drainer. It delivers the
//!    whole backlog, then subtracts the amount of work it accounted for. If the counter is still
//!    non-zero, more work arrived meanwhile and it goes around again.
//! 3. Every other caller returns immediately, trusting the drainer to deliver its deposit.
//!
//! Nobody ever blocks, and the drainer only loops as many times as others contributed.

use crate::{
    error::Error,
    fallback,
    signal::{Subscriber, SubscriberRef, SubscriptionRef},
};
use crossbeam_queue::SegQueue;
use std::sync::atomic::{
    Ordering::{AcqRel, Acquire, Release},
    AtomicBool,
    AtomicUsize,
};


/// Work-in-progress counter of a drain loop
///
/// Zero means idle. Non-zero means exactly one caller owns delivery, and the count is the amount of
/// work not yet accounted for by that owner.
#[derive(Debug, Default)]
pub struct WorkCounter(AtomicUsize);

impl WorkCounter {
    /// Construct idle.
    pub const fn new() -> Self {
        WorkCounter(AtomicUsize::new(0))
    }

    /// Register one unit of work. Returns whether the caller became the owner.
    pub fn enter(&self) -> bool {
        self.0.fetch_add(1, AcqRel) == 0
    }

    /// Become the owner only if idle, registering one unit of work. Returns whether it did.
    ///
    /// Used by fast paths which deliver directly when uncontended and fall back to depositing
    /// otherwise.
    pub fn try_claim(&self) -> bool {
        self.0.compare_exchange(0, 1, AcqRel, Acquire).is_ok()
    }

    /// Account for `missed` units of work as handled. Returns how many remain.
    ///
    /// Only the owner may call this. Ownership is released when it returns zero.
    pub fn leave(&self, missed: usize) -> usize {
        self.0.fetch_sub(missed, AcqRel) - missed
    }

    /// Whether some caller currently owns delivery.
    pub fn is_busy(&self) -> bool {
        self.0.load(Acquire) != 0
    }
}


// signal waiting in a drain queue.
enum Signal<T> {
    Next(T),
    Error(Error),
    Complete,
}


/// Subscriber wrapper which lets `on_next`, `on_error` and `on_complete` be called concurrently
///
/// Signals reach the wrapped subscriber in the order their calls were linearized, never overlapping
/// and never re-entrantly. The first terminal signal wins; a failure arriving after it is routed to
/// the fallback channel, and values arriving after it are dropped. `on_subscribe` is forwarded
/// directly and must precede every other call.
pub struct SerializedSubscriber<T> {
    actual: SubscriberRef<T>,
    queue: SegQueue<Signal<T>>,
    wip: WorkCounter,
    // a terminal signal was accepted.
    done: AtomicBool,
    // a terminal signal was delivered, or delivery was stopped. queued signals are discarded.
    stopped: AtomicBool,
}

impl<T> SerializedSubscriber<T> {
    /// Wrap a subscriber.
    pub fn new(actual: SubscriberRef<T>) -> Self {
        SerializedSubscriber {
            actual,
            queue: SegQueue::new(),
            wip: WorkCounter::new(),
            done: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    /// Discard everything not yet delivered and deliver nothing further.
    pub fn stop(&self) {
        self.done.store(true, Release);
        self.stopped.store(true, Release);
        self.drain();
    }

    /// Whether a terminal signal has been accepted or delivery stopped.
    pub fn is_done(&self) -> bool {
        self.done.load(Acquire)
    }

    fn emit(&self, signal: Signal<T>) {
        self.queue.push(signal);
        self.drain();
    }

    fn drain(&self) {
        if !self.wip.enter() {
            return;
        }
        let mut missed = 1;
        loop {
            while let Some(signal) = self.queue.pop() {
                if self.stopped.load(Acquire) {
                    continue;
                }
                match signal {
                    Signal::Next(value) => self.actual.on_next(value),
                    Signal::Error(error) => {
                        self.stopped.store(true, Release);
                        self.actual.on_error(error);
                    }
                    Signal::Complete => {
                        self.stopped.store(true, Release);
                        self.actual.on_complete();
                    }
                }
            }
            missed = self.wip.leave(missed);
            if missed == 0 {
                return;
            }
        }
    }
}

impl<T: Send> Subscriber<T> for SerializedSubscriber<T> {
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        self.actual.on_subscribe(subscription);
    }

    fn on_next(&self, value: T) {
        if !self.done.load(Acquire) {
            self.emit(Signal::Next(value));
        }
    }

    fn on_error(&self, error: Error) {
        if self.done.swap(true, AcqRel) {
            fallback::on_error(error);
        } else {
            self.emit(Signal::Error(error));
        }
    }

    fn on_complete(&self) {
        if !self.done.swap(true, AcqRel) {
            self.emit(Signal::Complete);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        signal::EmptySubscription,
        testing::{TestSubscriber, capture_undeliverable},
    };
    use anyhow::anyhow;
    use rand::prelude::*;
    use rand_pcg::Pcg32;
    use std::{
        collections::HashMap,
        sync::{Arc, Barrier},
        thread,
    };

    #[test]
    fn work_counter_ownership() {
        let wip = WorkCounter::new();
        assert!(wip.enter());
        assert!(!wip.enter());
        assert!(!wip.try_claim());
        assert_eq!(wip.leave(1), 1);
        assert_eq!(wip.leave(1), 0);
        assert!(!wip.is_busy());
        assert!(wip.try_claim());
    }

    #[test]
    fn concurrent_emission_no_loss_no_duplication() {
        let mut rng = Pcg32::seed_from_u64(0x5eed);
        for _ in 0..20 {
            let producers = rng.gen_range(2..8);
            let per_producer = rng.gen_range(1..500);
            let sink = TestSubscriber::<(usize, usize)>::new(0);
            let serialized = Arc::new(SerializedSubscriber::new(sink.clone()));
            serialized.on_subscribe(EmptySubscription::shared());
            let barrier = Arc::new(Barrier::new(producers));
            let joins = (0..producers)
                .map(|p| {
                    let serialized = Arc::clone(&serialized);
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        for i in 0..per_producer {
                            serialized.on_next((p, i));
                        }
                    })
                })
                .collect::<Vec<_>>();
            for join in joins {
                join.join().unwrap();
            }
            serialized.on_complete();

            let values = sink.values();
            assert_eq!(values.len(), producers * per_producer);
            // each producer's values arrive in its own order, exactly once
            let mut next = HashMap::new();
            for (p, i) in values {
                let expected = next.entry(p).or_insert(0);
                assert_eq!(i, *expected);
                *expected += 1;
            }
            sink.assert_complete();
            assert!(!sink.saw_overlap());
        }
    }

    #[test]
    fn first_terminal_wins() {
        let sink = TestSubscriber::<u32>::new(0);
        let serialized = SerializedSubscriber::new(sink.clone());
        serialized.on_subscribe(EmptySubscription::shared());
        serialized.on_next(1);
        serialized.on_complete();
        let ((), errors) = capture_undeliverable(|| {
            serialized.on_error(Error::user(anyhow!("late")));
        });
        serialized.on_next(2);
        assert_eq!(sink.values(), vec![1]);
        sink.assert_complete();
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn stop_discards_backlog() {
        let sink = TestSubscriber::<u32>::new(0);
        let serialized = SerializedSubscriber::new(sink.clone());
        serialized.on_subscribe(EmptySubscription::shared());
        serialized.stop();
        serialized.on_next(1);
        serialized.on_complete();
        assert!(sink.values().is_empty());
        assert_eq!(sink.completions(), 0);
    }
}
