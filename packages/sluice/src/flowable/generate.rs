// pull-based source driven by demand.

use super::{Flowable, Publisher};
use crate::{
    backpressure::{DemandCounter, validate_request},
    error::{Error, ProtocolViolation},
    fallback,
    signal::{EmptySubscription, SubscriberRef, Subscription},
    util::lock,
};
use std::{
    marker::PhantomData,
    sync::{
        Arc,
        Mutex,
        atomic::{AtomicBool, Ordering::AcqRel, Ordering::Acquire, Ordering::Relaxed, Ordering::Release},
    },
};


/// Emitter handed to a [`Flowable::generate`] generator for the duration of one call
///
/// A call may emit at most one value, and may follow it with a terminal signal.
pub struct SyncEmitter<T> {
    actual: SubscriberRef<T>,
    terminated: AtomicBool,
    // a value was emitted during the current call.
    has_next: AtomicBool,
}

impl<T: Send + 'static> SyncEmitter<T> {
    /// Emit the value of this call.
    pub fn on_next(&self, value: T) {
        if self.terminated.load(Acquire) {
            return;
        }
        if self.has_next.swap(true, Relaxed) {
            self.on_error(Error::Protocol(ProtocolViolation::MultipleValuesPerCall));
        } else {
            self.actual.on_next(value);
        }
    }

    /// Emit the value of this call, which may be absent. An absent value fails the subscription.
    pub fn on_next_checked(&self, value: Option<T>) {
        match value {
            Some(value) => self.on_next(value),
            None => self.on_error(Error::NullValue { signal: "on_next" }),
        }
    }

    /// Terminate with a failure. A failure after termination goes to the fallback channel.
    pub fn on_error(&self, error: Error) {
        if self.terminated.swap(true, AcqRel) {
            fallback::on_error(error);
        } else {
            self.actual.on_error(error);
        }
    }

    /// Terminate with completion.
    pub fn on_complete(&self) {
        if !self.terminated.swap(true, AcqRel) {
            self.actual.on_complete();
        }
    }

    fn is_terminated(&self) -> bool {
        self.terminated.load(Acquire)
    }
}


// subscription of a generate source. the generator runs inside request, on whichever thread
// brought demand up from zero.
struct Generator<T, S, G, D> {
    emitter: SyncEmitter<T>,
    // taken when the state is disposed.
    state: Mutex<Option<S>>,
    generator: Arc<G>,
    dispose: Arc<D>,
    requested: DemandCounter,
    cancelled: AtomicBool,
}

impl<T, S, G, D> Generator<T, S, G, D>
where
    T: Send + 'static,
    S: Send + 'static,
    G: Fn(&mut S, &SyncEmitter<T>) -> Result<(), Error> + Send + Sync + 'static,
    D: Fn(S) + Send + Sync + 'static,
{
    fn dispose_state(&self) {
        let state = lock(&self.state).take();
        if let Some(state) = state {
            (self.dispose)(state);
        }
    }

    // generate until demand is met, then settle it. requests arriving meanwhile only add demand.
    fn run(&self, mut r: u64) {
        let mut e = 0;
        let Some(mut state) = lock(&self.state).take() else { return };
        loop {
            while e != r {
                if self.cancelled.load(Acquire) {
                    (self.dispose)(state);
                    return;
                }
                self.emitter.has_next.store(false, Relaxed);
                if let Err(error) = (self.generator)(&mut state, &self.emitter) {
                    self.cancelled.store(true, Release);
                    self.emitter.on_error(error);
                    (self.dispose)(state);
                    return;
                }
                if self.emitter.is_terminated() {
                    self.cancelled.store(true, Release);
                    (self.dispose)(state);
                    return;
                }
                e += 1;
            }
            r = self.requested.get();
            if e == r {
                // put the state back before settling, since settling to zero hands ownership to
                // the next request
                *lock(&self.state) = Some(state);
                r = self.requested.produced(e);
                if r == 0 {
                    return;
                }
                e = 0;
                state = match lock(&self.state).take() {
                    Some(state) => state,
                    None => return,
                };
            }
        }
    }
}

impl<T, S, G, D> Subscription for Generator<T, S, G, D>
where
    T: Send + 'static,
    S: Send + 'static,
    G: Fn(&mut S, &SyncEmitter<T>) -> Result<(), Error> + Send + Sync + 'static,
    D: Fn(S) + Send + Sync + 'static,
{
    fn request(&self, n: u64) {
        if !validate_request(n) {
            return;
        }
        if self.requested.request(n) != 0 {
            return;
        }
        self.run(n);
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, AcqRel) {
            return;
        }
        // if the generator is idle, dispose the state here; otherwise it notices the flag
        if self.requested.request(1) == 0 {
            self.dispose_state();
        }
    }
}


struct Generate<T, S, I, G, D> {
    initial: I,
    generator: Arc<G>,
    dispose: Arc<D>,
    _p: PhantomData<fn() -> (T, S)>,
}

impl<T, S, I, G, D> Publisher<T> for Generate<T, S, I, G, D>
where
    T: Send + 'static,
    S: Send + 'static,
    I: Fn() -> Result<S, Error> + Send + Sync,
    G: Fn(&mut S, &SyncEmitter<T>) -> Result<(), Error> + Send + Sync + 'static,
    D: Fn(S) + Send + Sync + 'static,
{
    fn subscribe(&self, subscriber: SubscriberRef<T>) {
        let state = match (self.initial)() {
            Ok(state) => state,
            Err(error) => {
                EmptySubscription::error(&*subscriber, error);
                return;
            }
        };
        let subscription = Arc::new(Generator {
            emitter: SyncEmitter {
                actual: Arc::clone(&subscriber),
                terminated: AtomicBool::new(false),
                has_next: AtomicBool::new(false),
            },
            state: Mutex::new(Some(state)),
            generator: Arc::clone(&self.generator),
            dispose: Arc::clone(&self.dispose),
            requested: DemandCounter::new(),
            cancelled: AtomicBool::new(false),
        });
        subscriber.on_subscribe(subscription);
    }
}

impl<T: Send + 'static> Flowable<T> {
    /// Source which pulls one value from a stateful generator per requested unit.
    ///
    /// Each subscription gets its own state from `initial`. The generator emits at most one value
    /// per call through the [`SyncEmitter`], and may terminate instead. Once the subscription
    /// terminates, fails, or is cancelled, the state is passed to `dispose` exactly once. A failure
    /// returned by `initial` or the generator terminates the subscription with it.
    pub fn generate<S, I, G, D>(initial: I, generator: G, dispose: D) -> Self
    where
        S: Send + 'static,
        I: Fn() -> Result<S, Error> + Send + Sync + 'static,
        G: Fn(&mut S, &SyncEmitter<T>) -> Result<(), Error> + Send + Sync + 'static,
        D: Fn(S) + Send + Sync + 'static,
    {
        Flowable::from_publisher(Generate {
            initial,
            generator: Arc::new(generator),
            dispose: Arc::new(dispose),
            _p: PhantomData,
        })
    }

    /// Source which emits the items of `iterable`, iterating afresh per subscription.
    pub fn from_iterable<I>(iterable: I) -> Self
    where
        I: IntoIterator<Item = T> + Clone + Send + Sync + 'static,
        I::IntoIter: Send + 'static,
    {
        Flowable::generate(
            move || Ok(iterable.clone().into_iter().peekable()),
            |iter, emitter| {
                match iter.next() {
                    Some(value) => {
                        emitter.on_next(value);
                        // complete along with the last value, which needs no further demand
                        if iter.peek().is_none() {
                            emitter.on_complete();
                        }
                    }
                    None => emitter.on_complete(),
                }
                Ok(())
            },
            drop,
        )
    }
}
