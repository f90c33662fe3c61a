// outstanding-demand accounting.

use crate::{
    error::{Error, ProtocolViolation},
    fallback,
};
use std::sync::atomic::{
    Ordering::{AcqRel, Acquire},
    AtomicU64,
};


/// Demand value meaning "no flow control"
///
/// Once a counter reaches it, the counter stays pinned there.
pub const UNBOUNDED: u64 = u64::MAX;


/// Saturating accumulator of requested-but-not-yet-delivered values
#[derive(Debug, Default)]
pub struct DemandCounter(AtomicU64);

impl DemandCounter {
    /// Construct at zero.
    pub const fn new() -> Self {
        DemandCounter(AtomicU64::new(0))
    }

    /// Current outstanding demand.
    pub fn get(&self) -> u64 {
        self.0.load(Acquire)
    }

    /// Whether demand has saturated to [`UNBOUNDED`].
    pub fn is_unbounded(&self) -> bool {
        self.get() == UNBOUNDED
    }

    /// Add `n` units, saturating at [`UNBOUNDED`]. Returns the previous value.
    pub fn request(&self, n: u64) -> u64 {
        match self.0.fetch_update(AcqRel, Acquire, |r| {
            if r == UNBOUNDED {
                None
            } else {
                Some(add_cap(r, n))
            }
        }) {
            Ok(prev) | Err(prev) => prev,
        }
    }

    /// Subtract `k` delivered units, clamped at zero. Returns the new value.
    ///
    /// An unbounded counter is unaffected. Producing more than is outstanding is a protocol
    /// violation, which is reported to the fallback channel.
    pub fn produced(&self, k: u64) -> u64 {
        match self.0.fetch_update(AcqRel, Acquire, |r| {
            if r == UNBOUNDED {
                None
            } else {
                Some(r.saturating_sub(k))
            }
        }) {
            Ok(prev) => {
                if k > prev {
                    report_more_produced(k - prev);
                }
                prev.saturating_sub(k)
            }
            Err(unbounded) => unbounded,
        }
    }

    /// Subtract one unit if any is outstanding. Returns whether there was.
    pub fn consume_one(&self) -> bool {
        match self.0.fetch_update(AcqRel, Acquire, |r| {
            if r == 0 || r == UNBOUNDED {
                None
            } else {
                Some(r - 1)
            }
        }) {
            Ok(_) => true,
            Err(r) => r == UNBOUNDED,
        }
    }

    /// Take all outstanding demand, leaving zero.
    pub fn take(&self) -> u64 {
        self.0.swap(0, AcqRel)
    }
}


/// Add two demand amounts, saturating at [`UNBOUNDED`].
pub fn add_cap(a: u64, b: u64) -> u64 {
    a.saturating_add(b)
}

/// Check that a request amount is positive.
///
/// A zero request is a protocol violation, which is reported to the fallback channel rather than
/// propagated as data. Returns whether `n` is valid.
pub fn validate_request(n: u64) -> bool {
    if n == 0 {
        warn!("non-positive request");
        fallback::on_error(Error::Protocol(ProtocolViolation::NonPositiveRequest(n)));
        false
    } else {
        true
    }
}

// report delivering more than was requested.
pub(crate) fn report_more_produced(excess: u64) {
    warn!(excess, "more produced than requested");
    fallback::on_error(Error::Protocol(ProtocolViolation::ProducedMoreThanRequested(excess)));
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::capture_undeliverable;
    use rand::prelude::*;
    use rand_pcg::Pcg32;
    use std::{sync::Arc, thread};

    #[test]
    fn saturates_and_pins() {
        let demand = DemandCounter::new();
        assert_eq!(demand.request(5), 0);
        assert_eq!(demand.produced(2), 3);
        assert_eq!(demand.request(UNBOUNDED - 1), 3);
        assert!(demand.is_unbounded());
        assert_eq!(demand.produced(1_000), UNBOUNDED);
        assert_eq!(demand.request(7), UNBOUNDED);
        assert!(demand.is_unbounded());
        assert!(demand.consume_one());
        assert!(demand.is_unbounded());
    }

    #[test]
    fn consume_one_stops_at_zero() {
        let demand = DemandCounter::new();
        demand.request(1);
        assert!(demand.consume_one());
        assert!(!demand.consume_one());
        assert_eq!(demand.get(), 0);
    }

    #[test]
    fn produced_clamps_and_reports() {
        let demand = DemandCounter::new();
        demand.request(2);
        let (left, errors) = capture_undeliverable(|| demand.produced(5));
        assert_eq!(left, 0);
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors[0],
            Error::Protocol(ProtocolViolation::ProducedMoreThanRequested(3)),
        ));
    }

    #[test]
    fn zero_request_is_reported() {
        let (valid, errors) = capture_undeliverable(|| validate_request(0));
        assert!(!valid);
        assert!(matches!(
            errors[0],
            Error::Protocol(ProtocolViolation::NonPositiveRequest(0)),
        ));
        assert!(validate_request(1));
    }

    #[test]
    fn concurrent_requests_sum() {
        let mut rng = Pcg32::seed_from_u64(7);
        let amounts = (0..8)
            .map(|_| (0..100).map(|_| rng.gen_range(1..1_000)).collect::<Vec<u64>>())
            .collect::<Vec<_>>();
        let expected = amounts.iter().flatten().sum::<u64>();
        let demand = Arc::new(DemandCounter::new());
        let joins = amounts
            .into_iter()
            .map(|amounts| {
                let demand = Arc::clone(&demand);
                thread::spawn(move || {
                    for n in amounts {
                        demand.request(n);
                    }
                })
            })
            .collect::<Vec<_>>();
        for join in joins {
            join.join().unwrap();
        }
        assert_eq!(demand.get(), expected);
        assert_eq!(demand.take(), expected);
        assert_eq!(demand.get(), 0);
    }
}
