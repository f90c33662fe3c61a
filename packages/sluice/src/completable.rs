//! Sources which produce no values, only a terminal signal.

use crate::{
    aggregate::{ErrorAggregator, ErrorMode},
    disposable::{CompositeDisposable, Disposable, DisposableRef, DisposableSlot, DisposalKey, Token},
    error::Error,
    fallback,
    scheduler::SchedulerRef,
    signal::{CompletableObserver, CompletableObserverRef},
    util::lock,
};
use std::{
    sync::{
        Arc,
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering::AcqRel},
    },
    time::Duration,
};


/// Something which can be subscribed to for a terminal signal
pub trait CompletableSource: Send + Sync {
    /// Start a new subscription delivering to `observer`.
    ///
    /// Must call `on_subscribe` on `observer` before its terminal signal.
    fn subscribe(&self, observer: CompletableObserverRef);
}


/// Source of a single terminal signal
///
/// Cheap to clone; clones share the same underlying source.
#[derive(Clone)]
pub struct Completable(Arc<dyn CompletableSource>);

impl Completable {
    /// Wrap a source.
    pub fn from_source<S: CompletableSource + 'static>(source: S) -> Self {
        Completable(Arc::new(source))
    }

    /// Start a new subscription delivering to `observer`.
    pub fn subscribe(&self, observer: CompletableObserverRef) {
        self.0.subscribe(observer);
    }

    /// Source which completes immediately.
    pub fn complete() -> Self {
        Completable::from_fn(|| Ok(()))
    }

    /// Source which fails immediately with `error`.
    pub fn error(error: Error) -> Self {
        Completable::from_fn(move || Err(error.clone()))
    }

    /// Source which runs `f` upon each subscription, completing if it succeeds and failing
    /// otherwise.
    ///
    /// If the subscription is disposed while `f` runs, its failure goes to the fallback channel.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn() -> Result<(), Error> + Send + Sync + 'static,
    {
        Completable::from_source(FromFn(f))
    }

    /// Source which completes once `delay` passes, timed on `scheduler`.
    pub fn timer(delay: Duration, scheduler: SchedulerRef) -> Self {
        Completable::from_source(Timer { delay, scheduler })
    }

    /// Subscribe to every source at once and terminate once all of them have.
    ///
    /// With [`ErrorMode::Immediate`], the first failure disposes the rest and is delivered at once;
    /// later failures go to the fallback channel. With [`ErrorMode::Delayed`], every source runs to
    /// its end, after which the failures, if any, are delivered together. Disposing the
    /// subscription disposes every source's subscription.
    pub fn merge(sources: Vec<Completable>, mode: ErrorMode) -> Self {
        Completable::from_source(Merge { sources, mode })
    }
}


struct FromFn<F>(F);

impl<F> CompletableSource for FromFn<F>
where
    F: Fn() -> Result<(), Error> + Send + Sync,
{
    fn subscribe(&self, observer: CompletableObserverRef) {
        let token = Arc::new(Token::new());
        observer.on_subscribe(token.clone());
        if token.is_disposed() {
            return;
        }
        let result = (self.0)();
        if token.is_disposed() {
            if let Err(error) = result {
                fallback::on_error(error);
            }
            return;
        }
        match result {
            Ok(()) => observer.on_complete(),
            Err(error) => observer.on_error(error),
        }
    }
}


struct Timer {
    delay: Duration,
    scheduler: SchedulerRef,
}

impl CompletableSource for Timer {
    fn subscribe(&self, observer: CompletableObserverRef) {
        let slot = Arc::new(DisposableSlot::new());
        observer.on_subscribe(slot.clone());
        let handle = self.scheduler.schedule_direct(Box::new(move || observer.on_complete()), self.delay);
        slot.set(handle);
    }
}


struct Merge {
    sources: Vec<Completable>,
    mode: ErrorMode,
}

impl CompletableSource for Merge {
    fn subscribe(&self, observer: CompletableObserverRef) {
        let state = Arc::new(MergeState {
            downstream: observer,
            set: Arc::new(CompositeDisposable::new()),
            // one extra, released once every source is subscribed
            remaining: AtomicUsize::new(self.sources.len() + 1),
            errors: ErrorAggregator::new(),
            mode: self.mode,
            once: AtomicBool::new(false),
        });
        state.downstream.on_subscribe(state.set.clone());
        for source in &self.sources {
            if state.set.is_disposed() {
                return;
            }
            source.subscribe(Arc::new(MergeInner {
                state: Arc::clone(&state),
                key: Mutex::new(None),
            }));
        }
        state.finish();
    }
}

struct MergeState {
    downstream: CompletableObserverRef,
    // the inner subscriptions, handed downstream as its disposable.
    set: Arc<CompositeDisposable>,
    // sources not yet terminated.
    remaining: AtomicUsize,
    errors: ErrorAggregator,
    mode: ErrorMode,
    // downstream was signalled.
    once: AtomicBool,
}

impl MergeState {
    // one source terminated. the last one terminates downstream.
    fn finish(&self) {
        if self.remaining.fetch_sub(1, AcqRel) != 1 {
            return;
        }
        match self.mode {
            ErrorMode::Immediate => {
                if !self.set.is_disposed() && !self.once.swap(true, AcqRel) {
                    self.downstream.on_complete();
                }
            }
            ErrorMode::Delayed => {
                if self.set.is_disposed() {
                    self.errors.terminate_and_report();
                } else {
                    self.errors.terminate_into(
                        |error| self.downstream.on_error(error),
                        || self.downstream.on_complete(),
                    );
                }
            }
        }
    }

    fn fail(&self, error: Error) {
        match self.mode {
            ErrorMode::Immediate => {
                let disposed = self.set.is_disposed();
                self.set.dispose();
                if !disposed && !self.once.swap(true, AcqRel) {
                    debug!(%error, "merge failed, disposing siblings");
                    self.downstream.on_error(error);
                } else {
                    fallback::on_error(error);
                }
            }
            ErrorMode::Delayed => {
                self.errors.add_or_report(error);
                self.finish();
            }
        }
    }
}

struct MergeInner {
    state: Arc<MergeState>,
    key: Mutex<Option<DisposalKey>>,
}

impl MergeInner {
    // stop tracking the finished source's subscription.
    fn untrack(&self) {
        if let Some(key) = lock(&self.key).take() {
            self.state.set.remove(key);
        }
    }
}

impl CompletableObserver for MergeInner {
    fn on_subscribe(&self, d: DisposableRef) {
        *lock(&self.key) = self.state.set.add(d);
    }

    fn on_error(&self, error: Error) {
        self.untrack();
        self.state.fail(error);
    }

    fn on_complete(&self) {
        self.untrack();
        self.state.finish();
    }
}
