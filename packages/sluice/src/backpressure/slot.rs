// set-once upstream holder which defers requests made before the upstream arrives.

use super::demand::{DemandCounter, validate_request};
use crate::{
    disposable::report_double_subscription,
    signal::{Subscription, SubscriptionRef},
    util::lock,
};
use std::sync::{
    Mutex,
    atomic::{AtomicBool, Ordering::AcqRel, Ordering::Acquire, Ordering::Release},
};


/// Holder of a stage's single upstream subscription
///
/// Requests and cancellation may arrive before the upstream does; requests are accumulated and
/// forwarded once it is attached, and cancellation cancels it upon arrival.
#[derive(Default)]
pub struct SubscriptionSlot {
    // begins false. once true, never changes again, and current is None.
    cancelled: AtomicBool,
    current: Mutex<Option<SubscriptionRef>>,
    // requests made while current was None.
    deferred: DemandCounter,
}

impl SubscriptionSlot {
    /// Construct empty.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the upstream, forwarding any deferred demand.
    ///
    /// If an upstream is already attached, that is reported as a protocol violation and `s` is
    /// cancelled. If the slot is cancelled, `s` is cancelled. Returns whether `s` was attached.
    pub fn set_once(&self, s: SubscriptionRef) -> bool {
        let mut current = lock(&self.current);
        if self.cancelled.load(Acquire) {
            drop(current);
            s.cancel();
            return false;
        }
        if current.is_some() {
            drop(current);
            s.cancel();
            report_double_subscription();
            return false;
        }
        *current = Some(s.clone());
        drop(current);
        let r = self.deferred.take();
        if r != 0 {
            s.request(r);
        }
        true
    }

    /// Request from the upstream, or remember the request until it is attached.
    pub fn request(&self, n: u64) {
        if !validate_request(n) {
            return;
        }
        if let Some(s) = self.get() {
            s.request(n);
            return;
        }
        self.deferred.request(n);
        // the upstream may have been attached between our check and our deposit, in which case
        // whoever takes the deposit forwards it.
        if let Some(s) = self.get() {
            let r = self.deferred.take();
            if r != 0 {
                s.request(r);
            }
        }
    }

    /// Cancel the upstream, now or upon arrival. Returns whether this call did it.
    pub fn cancel(&self) -> bool {
        if self.cancelled.swap(true, AcqRel) {
            return false;
        }
        let s = lock(&self.current).take();
        if let Some(s) = s {
            s.cancel();
        }
        true
    }

    /// Drop the upstream without cancelling it, for once it has terminated.
    ///
    /// Afterwards the slot behaves as cancelled.
    pub fn release(&self) {
        self.cancelled.store(true, Release);
        drop(lock(&self.current).take());
    }

    /// Whether cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Acquire)
    }

    /// The attached upstream, unless not yet attached or cancelled.
    pub fn get(&self) -> Option<SubscriptionRef> {
        lock(&self.current).clone()
    }
}

impl Subscription for SubscriptionSlot {
    fn request(&self, n: u64) {
        SubscriptionSlot::request(self, n);
    }

    fn cancel(&self) {
        SubscriptionSlot::cancel(self);
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::{Error, ProtocolViolation},
        testing::{RecordingSubscription, capture_undeliverable},
    };
    use std::sync::Arc;

    #[test]
    fn defers_requests_until_attached() {
        let slot = SubscriptionSlot::new();
        slot.request(3);
        slot.request(4);
        let upstream = Arc::new(RecordingSubscription::default());
        assert!(slot.set_once(upstream.clone()));
        assert_eq!(upstream.requested(), 7);
        slot.request(1);
        assert_eq!(upstream.requested(), 8);
    }

    #[test]
    fn cancel_before_attach() {
        let slot = SubscriptionSlot::new();
        assert!(slot.cancel());
        assert!(!slot.cancel());
        let upstream = Arc::new(RecordingSubscription::default());
        assert!(!slot.set_once(upstream.clone()));
        assert!(upstream.is_cancelled());
    }

    #[test]
    fn release_does_not_cancel() {
        let slot = SubscriptionSlot::new();
        let upstream = Arc::new(RecordingSubscription::default());
        slot.set_once(upstream.clone());
        slot.release();
        assert!(!upstream.is_cancelled());
        assert!(slot.get().is_none());
        assert!(slot.is_cancelled());
    }

    #[test]
    fn second_upstream_rejected() {
        let slot = SubscriptionSlot::new();
        let first = Arc::new(RecordingSubscription::default());
        let second = Arc::new(RecordingSubscription::default());
        let (_, errors) = capture_undeliverable(|| {
            slot.set_once(first.clone());
            slot.set_once(second.clone());
        });
        assert!(second.is_cancelled());
        assert!(!first.is_cancelled());
        assert!(matches!(errors[..], [Error::Protocol(ProtocolViolation::DoubleSubscription)]));
    }
}
