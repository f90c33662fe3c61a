//! Push sources without flow control.
//!
//! An [`Observable`] delivers to an [`Observer`] as fast as it produces, and can be stopped only
//! by disposal. [`Observable::to_flowable`] puts one under the demand protocol by choosing what
//! to do with values emitted ahead of demand.

use crate::{
    disposable::{Disposable, DisposableRef, DisposableSlot, Token},
    error::Error,
    fallback,
    flowable::{Emitter, Flowable, OverflowStrategy},
    signal::{Observer, ObserverRef},
};
use std::{marker::PhantomData, sync::Arc};


/// Something which can be observed
pub trait ObservableSource<T>: Send + Sync {
    /// Start a new subscription delivering to `observer`.
    ///
    /// Must call `on_subscribe` on `observer` before any other signal.
    fn subscribe(&self, observer: ObserverRef<T>);
}


/// Push source of a sequence of `T`
///
/// Cheap to clone; clones share the same underlying source.
pub struct Observable<T>(Arc<dyn ObservableSource<T>>);

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Observable(Arc::clone(&self.0))
    }
}

impl<T: Send + 'static> Observable<T> {
    /// Wrap a source.
    pub fn from_source<S: ObservableSource<T> + 'static>(source: S) -> Self {
        Observable(Arc::new(source))
    }

    /// Start a new subscription delivering to `observer`.
    pub fn subscribe(&self, observer: ObserverRef<T>) {
        self.0.subscribe(observer);
    }

    /// Bridge a callback-driven producer.
    ///
    /// `source` runs once per subscription, on the subscribing thread, and emits through the given
    /// [`ObservableEmitter`]. A failure returned by `source` terminates the subscription.
    pub fn create<F>(source: F) -> Self
    where
        F: Fn(ObservableEmitter<T>) -> Result<(), Error> + Send + Sync + 'static,
    {
        Observable::from_source(Create { source, _p: PhantomData })
    }

    /// Put this source under the demand protocol.
    ///
    /// Values emitted ahead of demand are handled according to `strategy`. Cancelling the
    /// flowable's subscription disposes the underlying observable subscription.
    pub fn to_flowable(&self, strategy: OverflowStrategy) -> Flowable<T> {
        let source = self.clone();
        Flowable::create(
            move |emitter| {
                source.subscribe(Arc::new(EmitterObserver(emitter)));
                Ok(())
            },
            strategy,
        )
    }
}


/// Producer-side handle of an [`Observable::create`] subscription
pub struct ObservableEmitter<T>(Arc<EmitterState<T>>);

impl<T> Clone for ObservableEmitter<T> {
    fn clone(&self) -> Self {
        ObservableEmitter(Arc::clone(&self.0))
    }
}

// doubles as the disposable handed to the observer.
struct EmitterState<T> {
    observer: ObserverRef<T>,
    // disposed upon disposal or termination. holds the producer's resource.
    serial: DisposableSlot,
}

impl<T: Send + 'static> ObservableEmitter<T> {
    /// Emit a value. Ignored once disposed or terminated.
    pub fn on_next(&self, value: T) {
        if !self.is_disposed() {
            self.0.observer.on_next(value);
        }
    }

    /// Emit a value which may be absent. An absent value fails the subscription.
    pub fn on_next_checked(&self, value: Option<T>) {
        match value {
            Some(value) => self.on_next(value),
            None => self.on_error(Error::NullValue { signal: "on_next" }),
        }
    }

    /// Terminate with a failure. Routed to the fallback channel once disposed or terminated.
    pub fn on_error(&self, error: Error) {
        if !self.try_on_error(error.clone()) {
            fallback::on_error(error);
        }
    }

    /// Terminate with a failure which may be absent, which is a failure in itself.
    pub fn on_error_checked(&self, error: Option<Error>) {
        self.on_error(error.unwrap_or(Error::NullValue { signal: "on_error" }));
    }

    /// Terminate with a failure, unless disposed or terminated. Returns whether it did.
    pub fn try_on_error(&self, error: Error) -> bool {
        if self.is_disposed() {
            return false;
        }
        self.0.observer.on_error(error);
        self.0.serial.dispose();
        true
    }

    /// Terminate with completion. Ignored once disposed or terminated.
    pub fn on_complete(&self) {
        if !self.is_disposed() {
            self.0.observer.on_complete();
            self.0.serial.dispose();
        }
    }

    /// Attach a resource to release on disposal or termination, releasing the previously
    /// attached one.
    pub fn set_disposable(&self, d: DisposableRef) {
        self.0.serial.set(d);
    }

    /// Attach a release action to run on disposal or termination, releasing the previously
    /// attached resource.
    pub fn set_cancellable<F: FnOnce() + Send + 'static>(&self, f: F) {
        self.set_disposable(Arc::new(Token::from_fn(f)));
    }

    /// Whether the observer disposed the subscription or it terminated.
    pub fn is_disposed(&self) -> bool {
        self.0.serial.is_disposed()
    }
}

impl<T: Send> Disposable for EmitterState<T> {
    fn dispose(&self) {
        self.serial.dispose();
    }

    fn is_disposed(&self) -> bool {
        self.serial.is_disposed()
    }
}


struct Create<T, F> {
    source: F,
    _p: PhantomData<fn() -> T>,
}

impl<T, F> ObservableSource<T> for Create<T, F>
where
    T: Send + 'static,
    F: Fn(ObservableEmitter<T>) -> Result<(), Error> + Send + Sync,
{
    fn subscribe(&self, observer: ObserverRef<T>) {
        let state = Arc::new(EmitterState { observer: Arc::clone(&observer), serial: DisposableSlot::new() });
        observer.on_subscribe(state.clone());
        let emitter = ObservableEmitter(state);
        if let Err(error) = (self.source)(emitter.clone()) {
            emitter.on_error(error);
        }
    }
}


// observer relaying into a flowable create emitter.
struct EmitterObserver<T>(Emitter<T>);

impl<T: Send + 'static> Observer<T> for EmitterObserver<T> {
    fn on_subscribe(&self, d: DisposableRef) {
        self.0.set_disposable(d);
    }

    fn on_next(&self, value: T) {
        self.0.on_next(value);
    }

    fn on_error(&self, error: Error) {
        self.0.on_error(error);
    }

    fn on_complete(&self) {
        self.0.on_complete();
    }
}
