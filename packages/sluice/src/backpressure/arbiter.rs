// swappable upstream which carries outstanding demand across swaps.

use super::demand::{UNBOUNDED, add_cap, report_more_produced, validate_request};
use crate::{
    drain::WorkCounter,
    signal::{Subscription, SubscriptionRef},
    util::lock,
};
use std::sync::{
    Mutex,
    atomic::{
        Ordering::{AcqRel, Acquire, Release},
        AtomicBool,
        AtomicU64,
    },
};


/// Upstream holder for stages which move between successive upstreams
///
/// Tracks how much demand is outstanding across all upstreams so that a new upstream can be asked
/// for exactly what the previous one left unfulfilled. Swapping does not cancel the previous
/// upstream; stages swap only once the previous one has terminated. Cancelling the arbiter reaches
/// whichever upstream is current, including one that is mid-swap.
///
/// All state changes funnel through a work counter: whoever finds it at zero applies their own
/// change and then any changes others deposited meanwhile. Upstream calls are made outside of that
/// exclusive section, so an upstream which re-enters the arbiter synchronously is safe.
#[derive(Default)]
pub struct SubscriptionArbiter {
    // the current upstream. only accessed by the work counter's owner.
    actual: Mutex<Option<SubscriptionRef>>,
    // outstanding demand. only written by the work counter's owner.
    requested: AtomicU64,

    // changes deposited by callers which found the work counter non-zero.
    missed_subscription: Mutex<Option<SubscriptionRef>>,
    missed_requested: AtomicU64,
    missed_produced: AtomicU64,

    wip: WorkCounter,
    cancelled: AtomicBool,
    // set once requested saturates. requests and production are no longer tracked.
    unbounded: AtomicBool,
}

impl SubscriptionArbiter {
    /// Construct without an upstream.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `s` the current upstream and request from it the outstanding demand.
    pub fn set_subscription(&self, s: SubscriptionRef) {
        if self.is_cancelled() {
            s.cancel();
            return;
        }
        if self.wip.try_claim() {
            *lock(&self.actual) = Some(s.clone());
            let r = self.requested.load(Acquire);
            if self.wip.leave(1) != 0 {
                self.drain_loop();
            }
            if r != 0 {
                s.request(r);
            }
            return;
        }
        *lock(&self.missed_subscription) = Some(s);
        self.drain();
    }

    /// Add demand, forwarding it to the current upstream.
    pub fn request(&self, n: u64) {
        if !validate_request(n) || self.unbounded.load(Acquire) {
            return;
        }
        if self.wip.try_claim() {
            let r = self.requested.load(Acquire);
            if r != UNBOUNDED {
                let r = add_cap(r, n);
                self.requested.store(r, Release);
                if r == UNBOUNDED {
                    self.unbounded.store(true, Release);
                }
            }
            let a = lock(&self.actual).clone();
            if self.wip.leave(1) != 0 {
                self.drain_loop();
            }
            if let Some(a) = a {
                a.request(n);
            }
            return;
        }
        add_missed(&self.missed_requested, n);
        self.drain();
    }

    /// Account for `n` values delivered downstream by the current upstream.
    pub fn produced(&self, n: u64) {
        if self.unbounded.load(Acquire) {
            return;
        }
        if self.wip.try_claim() {
            let r = self.requested.load(Acquire);
            if r != UNBOUNDED {
                if n > r {
                    report_more_produced(n - r);
                }
                self.requested.store(r.saturating_sub(n), Release);
            }
            if self.wip.leave(1) != 0 {
                self.drain_loop();
            }
            return;
        }
        add_missed(&self.missed_produced, n);
        self.drain();
    }

    /// Cancel the current upstream and any upstream set afterwards.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, AcqRel) {
            self.drain();
        }
    }

    /// Whether cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Acquire)
    }

    /// Whether outstanding demand saturated to unbounded.
    pub fn is_unbounded(&self) -> bool {
        self.unbounded.load(Acquire)
    }

    /// Outstanding demand as of the last applied change.
    pub fn requested(&self) -> u64 {
        self.requested.load(Acquire)
    }

    fn drain(&self) {
        if self.wip.enter() {
            self.drain_loop();
        }
    }

    // apply deposited changes until none remain. caller must own the work counter.
    fn drain_loop(&self) {
        let mut missed = 1;
        let mut request_amount = 0;
        let mut request_target = None;
        loop {
            let ms = lock(&self.missed_subscription).take();
            let mr = self.missed_requested.swap(0, AcqRel);
            let mp = self.missed_produced.swap(0, AcqRel);

            if self.is_cancelled() {
                let a = lock(&self.actual).take();
                if let Some(a) = a {
                    a.cancel();
                }
                if let Some(ms) = ms {
                    ms.cancel();
                }
                request_target = None;
            } else {
                let mut r = self.requested.load(Acquire);
                if r != UNBOUNDED {
                    let u = add_cap(r, mr);
                    r = if u != UNBOUNDED {
                        if mp > u {
                            report_more_produced(mp - u);
                        }
                        u.saturating_sub(mp)
                    } else {
                        u
                    };
                    self.requested.store(r, Release);
                    if r == UNBOUNDED {
                        self.unbounded.store(true, Release);
                    }
                }

                if let Some(ms) = ms {
                    *lock(&self.actual) = Some(ms.clone());
                    if r != 0 {
                        request_amount = add_cap(request_amount, r);
                        request_target = Some(ms);
                    }
                } else if mr != 0 {
                    if let Some(a) = lock(&self.actual).clone() {
                        request_amount = add_cap(request_amount, mr);
                        request_target = Some(a);
                    }
                }
            }

            missed = self.wip.leave(missed);
            if missed == 0 {
                if let Some(target) = request_target {
                    if request_amount != 0 {
                        target.request(request_amount);
                    }
                }
                return;
            }
        }
    }
}

impl Subscription for SubscriptionArbiter {
    fn request(&self, n: u64) {
        SubscriptionArbiter::request(self, n);
    }

    fn cancel(&self) {
        SubscriptionArbiter::cancel(self);
    }
}

// saturating atomic add.
fn add_missed(counter: &AtomicU64, n: u64) {
    let _ = counter.fetch_update(AcqRel, Acquire, |r| Some(add_cap(r, n)));
}
