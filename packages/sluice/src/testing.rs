//! Test tooling for pipelines built on this crate.
//!
//! - [`TestSubscriber`] records everything a consumer receives and lets the test drive demand. It
//!   also works as an [`Observer`], a [`SingleObserver`] and a [`CompletableObserver`].
//! - [`RecordingSubscription`] records requests and cancellation made against an upstream.
//! - [`capture_undeliverable`] collects failures routed to the [fallback channel](crate::fallback).

use crate::{
    backpressure::DemandCounter,
    completable::Completable,
    disposable::{DisposableRef, report_double_subscription},
    error::Error,
    fallback,
    flowable::Flowable,
    observable::Observable,
    signal::{CompletableObserver, Observer, SingleObserver, Subscriber, Subscription, SubscriptionRef},
    util::lock,
};
use std::{
    cell::RefCell,
    fmt::Debug,
    sync::{
        Arc,
        Condvar,
        Mutex,
        Once,
        atomic::{AtomicBool, Ordering::AcqRel, Ordering::Acquire, Ordering::Release},
    },
    time::{Duration, Instant},
};


/// Consumer which records the signals it receives
///
/// Requests `initial` values upon subscription, after which the test requests more with
/// [`request`](Self::request). The upstream handle is released once a terminal signal arrives.
pub struct TestSubscriber<T> {
    initial: u64,
    recorded: Mutex<Recorded<T>>,
    terminated: Condvar,
    upstream: Mutex<Option<Upstream>>,
    subscribed: AtomicBool,
    cancelled: AtomicBool,
    // set for the duration of each signal, to detect overlapping delivery.
    in_signal: AtomicBool,
    overlap: AtomicBool,
}

struct Recorded<T> {
    values: Vec<T>,
    errors: Vec<Error>,
    completions: usize,
}

enum Upstream {
    Subscription(SubscriptionRef),
    Disposable(DisposableRef),
}

impl Upstream {
    fn cancel(self) {
        match self {
            Upstream::Subscription(s) => s.cancel(),
            Upstream::Disposable(d) => d.dispose(),
        }
    }
}

impl<T> TestSubscriber<T> {
    /// Construct, to request `initial` values upon subscription.
    pub fn new(initial: u64) -> Arc<Self> {
        Arc::new(TestSubscriber {
            initial,
            recorded: Mutex::new(Recorded {
                values: Vec::new(),
                errors: Vec::new(),
                completions: 0,
            }),
            terminated: Condvar::new(),
            upstream: Mutex::new(None),
            subscribed: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            in_signal: AtomicBool::new(false),
            overlap: AtomicBool::new(false),
        })
    }

    /// Construct, to request without bound upon subscription.
    pub fn unbounded() -> Arc<Self> {
        Self::new(u64::MAX)
    }

    /// Request more values from the upstream.
    pub fn request(&self, n: u64) {
        let upstream = lock(&self.upstream);
        if let Some(Upstream::Subscription(s)) = &*upstream {
            let s = s.clone();
            drop(upstream);
            s.request(n);
        }
    }

    /// Cancel the upstream, now or upon arrival.
    pub fn cancel(&self) {
        self.cancelled.store(true, Release);
        let upstream = lock(&self.upstream).take();
        if let Some(upstream) = upstream {
            upstream.cancel();
        }
    }

    /// Whether subscribed.
    pub fn has_subscription(&self) -> bool {
        self.subscribed.load(Acquire)
    }

    /// Values received so far.
    pub fn values(&self) -> Vec<T>
    where
        T: Clone,
    {
        lock(&self.recorded).values.clone()
    }

    /// Number of values received so far.
    pub fn value_count(&self) -> usize {
        lock(&self.recorded).values.len()
    }

    /// Failures received so far.
    pub fn errors(&self) -> Vec<Error> {
        lock(&self.recorded).errors.clone()
    }

    /// Completions received so far.
    pub fn completions(&self) -> usize {
        lock(&self.recorded).completions
    }

    /// Whether any terminal signal was received.
    pub fn is_terminated(&self) -> bool {
        let recorded = lock(&self.recorded);
        recorded.completions + recorded.errors.len() > 0
    }

    /// Whether two signals were ever delivered concurrently.
    pub fn saw_overlap(&self) -> bool {
        self.overlap.load(Acquire)
    }

    /// Block until a terminal signal arrives or `timeout` elapses. Returns whether one arrived.
    pub fn await_terminal(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut recorded = lock(&self.recorded);
        while recorded.completions + recorded.errors.len() == 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            recorded = match self.terminated.wait_timeout(recorded, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }

    /// Assert exactly one completion and no failure.
    #[track_caller]
    pub fn assert_complete(&self) {
        let recorded = lock(&self.recorded);
        assert_eq!(recorded.completions, 1, "expected exactly one completion");
        assert!(recorded.errors.is_empty(), "unexpected failures: {:?}", recorded.errors);
    }

    /// Assert exactly one failure and no completion, returning the failure.
    #[track_caller]
    pub fn assert_error(&self) -> Error {
        let recorded = lock(&self.recorded);
        assert_eq!(recorded.completions, 0, "unexpected completion");
        assert_eq!(recorded.errors.len(), 1, "expected exactly one failure: {:?}", recorded.errors);
        recorded.errors[0].clone()
    }

    /// Assert no terminal signal.
    #[track_caller]
    pub fn assert_not_terminated(&self) {
        let recorded = lock(&self.recorded);
        assert_eq!(recorded.completions, 0, "unexpected completion");
        assert!(recorded.errors.is_empty(), "unexpected failures: {:?}", recorded.errors);
    }

    /// Assert the values received so far.
    #[track_caller]
    pub fn assert_values(&self, expected: &[T])
    where
        T: PartialEq + Debug,
    {
        assert_eq!(lock(&self.recorded).values, expected);
    }

    fn subscribe(&self, upstream: Upstream) {
        if self.subscribed.swap(true, AcqRel) {
            upstream.cancel();
            report_double_subscription();
            return;
        }
        if self.cancelled.load(Acquire) {
            upstream.cancel();
            return;
        }
        let request = match &upstream {
            Upstream::Subscription(s) if self.initial > 0 => Some(s.clone()),
            _ => None,
        };
        *lock(&self.upstream) = Some(upstream);
        if let Some(s) = request {
            s.request(self.initial);
        }
    }

    fn record<F: FnOnce(&mut Recorded<T>)>(&self, f: F) {
        if self.in_signal.swap(true, AcqRel) {
            self.overlap.store(true, Release);
        }
        f(&mut lock(&self.recorded));
        self.in_signal.store(false, Release);
    }

    fn record_terminal<F: FnOnce(&mut Recorded<T>)>(&self, f: F) {
        self.record(f);
        // release the upstream, which may hold a reference back to us
        drop(lock(&self.upstream).take());
        self.terminated.notify_all();
    }
}

impl<T: Send> Subscriber<T> for TestSubscriber<T> {
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        self.subscribe(Upstream::Subscription(subscription));
    }

    fn on_next(&self, value: T) {
        self.record(|r| r.values.push(value));
    }

    fn on_error(&self, error: Error) {
        self.record_terminal(|r| r.errors.push(error));
    }

    fn on_complete(&self) {
        self.record_terminal(|r| r.completions += 1);
    }
}

impl<T: Send> Observer<T> for TestSubscriber<T> {
    fn on_subscribe(&self, d: DisposableRef) {
        self.subscribe(Upstream::Disposable(d));
    }

    fn on_next(&self, value: T) {
        self.record(|r| r.values.push(value));
    }

    fn on_error(&self, error: Error) {
        self.record_terminal(|r| r.errors.push(error));
    }

    fn on_complete(&self) {
        self.record_terminal(|r| r.completions += 1);
    }
}

// a success counts as one value followed by completion.
impl<T: Send> SingleObserver<T> for TestSubscriber<T> {
    fn on_subscribe(&self, d: DisposableRef) {
        self.subscribe(Upstream::Disposable(d));
    }

    fn on_success(&self, value: T) {
        self.record_terminal(|r| {
            r.values.push(value);
            r.completions += 1;
        });
    }

    fn on_error(&self, error: Error) {
        self.record_terminal(|r| r.errors.push(error));
    }
}

impl<T: Send> CompletableObserver for TestSubscriber<T> {
    fn on_subscribe(&self, d: DisposableRef) {
        self.subscribe(Upstream::Disposable(d));
    }

    fn on_error(&self, error: Error) {
        self.record_terminal(|r| r.errors.push(error));
    }

    fn on_complete(&self) {
        self.record_terminal(|r| r.completions += 1);
    }
}

impl<T: Send + 'static> Flowable<T> {
    /// Subscribe a [`TestSubscriber`] which requests `initial` values.
    pub fn test(&self, initial: u64) -> Arc<TestSubscriber<T>> {
        let subscriber = TestSubscriber::new(initial);
        self.subscribe(subscriber.clone());
        subscriber
    }
}

impl<T: Send + 'static> Observable<T> {
    /// Subscribe a [`TestSubscriber`].
    pub fn test(&self) -> Arc<TestSubscriber<T>> {
        let observer = TestSubscriber::new(0);
        self.subscribe(observer.clone());
        observer
    }
}

impl Completable {
    /// Subscribe a [`TestSubscriber`].
    pub fn test(&self) -> Arc<TestSubscriber<()>> {
        let observer = TestSubscriber::new(0);
        self.subscribe(observer.clone());
        observer
    }
}


/// Upstream stand-in which records what its consumer asks of it
#[derive(Debug, Default)]
pub struct RecordingSubscription {
    requested: DemandCounter,
    cancelled: AtomicBool,
}

impl RecordingSubscription {
    /// Total requested so far, saturating.
    pub fn requested(&self) -> u64 {
        self.requested.get()
    }

    /// Whether cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Acquire)
    }
}

impl Subscription for RecordingSubscription {
    fn request(&self, n: u64) {
        self.requested.request(n);
    }

    fn cancel(&self) {
        self.cancelled.store(true, Release);
    }
}


thread_local! {
    static CAPTURED: RefCell<Option<Vec<Error>>> = const { RefCell::new(None) };
}

static INSTALL_CAPTURE: Once = Once::new();

/// Run `f`, collecting the failures it routes to the fallback channel on the current thread.
///
/// The first call permanently installs a capturing handler in place of whatever handler is
/// installed. Failures raised outside of a capture, or on other threads, are logged the same way
/// the default handler logs them.
pub fn capture_undeliverable<R, F: FnOnce() -> R>(f: F) -> (R, Vec<Error>) {
    INSTALL_CAPTURE.call_once(|| {
        fallback::set_error_handler(|error| {
            let unclaimed = CAPTURED.with(|captured| match &mut *captured.borrow_mut() {
                Some(errors) => {
                    errors.push(error);
                    None
                }
                None => Some(error),
            });
            if let Some(error) = unclaimed {
                error!(%error, "undeliverable failure");
            }
        });
    });
    CAPTURED.with(|captured| *captured.borrow_mut() = Some(Vec::new()));
    let result = f();
    let errors = CAPTURED
        .with(|captured| captured.borrow_mut().take())
        .unwrap_or_default();
    (result, errors)
}
