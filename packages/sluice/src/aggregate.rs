//! Merging of concurrently raised failures.

use crate::{
    error::{CompositeError, Error},
    fallback,
};
use smallvec::SmallVec;
use std::{
    fmt::{self, Debug, Formatter},
    ptr,
    sync::atomic::{AtomicPtr, Ordering::AcqRel, Ordering::Acquire},
};


/// How a stage with several concurrent sources reacts to the first failure
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum ErrorMode {
    /// Cancel every sibling and terminate with the first failure.
    #[default]
    Immediate,
    /// Let every sibling finish, then terminate with all failures combined.
    Delayed,
}


/// Collector of failures that become one terminal failure
///
/// Accepts failures until [`terminate`](Self::terminate) takes them. After that it stays
/// terminated, and additions are refused so the caller can route them to the fallback channel.
/// Never blocks: additions push onto a lock-free stack, and termination swaps the whole stack out
/// for a terminated marker in one step.
pub struct ErrorAggregator {
    // null when empty, the terminated marker once terminated, else the newest collected failure.
    head: AtomicPtr<Node>,
}

struct Node {
    error: Error,
    next: *mut Node,
}

// its address marks the terminated state. never dereferenced.
static TERMINATED: u8 = 0;

fn terminated() -> *mut Node {
    ptr::addr_of!(TERMINATED).cast_mut().cast()
}

impl ErrorAggregator {
    /// Construct empty.
    pub const fn new() -> Self {
        ErrorAggregator { head: AtomicPtr::new(ptr::null_mut()) }
    }

    /// Add a failure, or give it back if already terminated.
    pub fn add(&self, error: Error) -> Result<(), Error> {
        let node = Box::into_raw(Box::new(Node { error, next: ptr::null_mut() }));
        let mut head = self.head.load(Acquire);
        loop {
            if head == terminated() {
                // safety: node was never published, so we still own it.
                let node = unsafe { Box::from_raw(node) };
                return Err(node.error);
            }
            // safety: as above. other nodes are only linked to, never dereferenced, here.
            unsafe { (*node).next = head };
            match self.head.compare_exchange_weak(head, node, AcqRel, Acquire) {
                Ok(_) => return Ok(()),
                Err(actual) => head = actual,
            }
        }
    }

    /// Add a failure, routing it to the fallback channel if already terminated.
    ///
    /// Returns whether it was added.
    pub fn add_or_report(&self, error: Error) -> bool {
        match self.add(error) {
            Ok(()) => true,
            Err(error) => {
                fallback::on_error(error);
                false
            }
        }
    }

    /// Terminate, taking the collected failures.
    ///
    /// A single failure is returned as-is; several are combined into a composite. Returns `None`
    /// if nothing was collected, including when already terminated.
    pub fn terminate(&self) -> Option<Error> {
        self.take_all().filter(|errors| !errors.is_empty()).map(combine)
    }

    /// Terminate and route anything collected to the fallback channel.
    ///
    /// For subscriptions which were cancelled and so have nobody to deliver to.
    pub fn terminate_and_report(&self) {
        if let Some(error) = self.terminate() {
            fallback::on_error(error);
        }
    }

    /// Terminate and deliver the outcome through one of two callbacks: the failure if any was
    /// collected, otherwise completion. Does nothing if already terminated.
    pub fn terminate_into<E, C>(&self, on_error: E, on_complete: C)
    where
        E: FnOnce(Error),
        C: FnOnce(),
    {
        match self.take_all() {
            Some(errors) if errors.is_empty() => on_complete(),
            Some(errors) => on_error(combine(errors)),
            None => (),
        }
    }

    /// Whether any failure is collected and not yet taken.
    pub fn has_error(&self) -> bool {
        let head = self.head.load(Acquire);
        !head.is_null() && head != terminated()
    }

    /// Whether terminated.
    pub fn is_terminated(&self) -> bool {
        self.head.load(Acquire) == terminated()
    }

    // swap in the terminated marker, taking what was collected in the order it was added. none if
    // already terminated.
    fn take_all(&self) -> Option<SmallVec<[Error; 2]>> {
        let mut node = self.head.swap(terminated(), AcqRel);
        if node == terminated() {
            return None;
        }
        let mut errors = SmallVec::new();
        while !node.is_null() {
            // safety: the swap unpublished the whole stack, so we now own every node in it.
            let owned = unsafe { Box::from_raw(node) };
            node = owned.next;
            errors.push(owned.error);
        }
        errors.reverse();
        Some(errors)
    }
}

impl Default for ErrorAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ErrorAggregator {
    fn drop(&mut self) {
        self.take_all();
    }
}

impl Debug for ErrorAggregator {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("ErrorAggregator")
            .field("has_error", &self.has_error())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

// representative failure of a non-empty collection.
fn combine(mut errors: SmallVec<[Error; 2]>) -> Error {
    if errors.len() == 1 {
        errors.remove(0)
    } else {
        Error::Composite(CompositeError::new(errors))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::capture_undeliverable;
    use anyhow::anyhow;
    use rand::prelude::*;
    use rand_pcg::Pcg32;
    use std::{
        sync::{Arc, Barrier},
        thread,
    };

    #[test]
    fn single_failure_as_is() {
        let agg = ErrorAggregator::new();
        assert!(!agg.has_error());
        agg.add(Error::user(anyhow!("only"))).unwrap();
        assert!(agg.has_error());
        let error = agg.terminate().unwrap();
        assert_eq!(error.to_string(), "only");
        assert!(agg.is_terminated());
        assert!(agg.terminate().is_none());
    }

    #[test]
    fn residual_after_terminate_is_reported() {
        let agg = ErrorAggregator::new();
        assert!(agg.terminate().is_none());
        assert!(agg.add(Error::user(anyhow!("late"))).is_err());
        let (added, errors) = capture_undeliverable(|| agg.add_or_report(Error::user(anyhow!("x"))));
        assert!(!added);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn terminate_into_picks_one_callback() {
        let agg = ErrorAggregator::new();
        let mut completed = false;
        agg.terminate_into(|_| panic!("no failure collected"), || completed = true);
        assert!(completed);
        agg.terminate_into(|_| panic!(), || panic!());

        let agg = ErrorAggregator::new();
        agg.add(Error::user(anyhow!("a"))).unwrap();
        let mut failed = None;
        agg.terminate_into(|e| failed = Some(e), || panic!());
        assert_eq!(failed.unwrap().to_string(), "a");
    }

    #[test]
    fn keeps_arrival_order() {
        let agg = ErrorAggregator::new();
        for msg in ["a", "b", "c"] {
            agg.add(Error::user(anyhow!(msg))).unwrap();
        }
        let Some(Error::Composite(composite)) = agg.terminate() else { panic!("expected composite") };
        let seen = composite.errors().iter().map(|e| e.to_string()).collect::<Vec<_>>();
        assert_eq!(seen, ["a", "b", "c"]);
    }

    #[test]
    fn additions_racing_termination_are_kept_or_refused() {
        let mut rng = Pcg32::seed_from_u64(0xa66);
        for _ in 0..200 {
            let k = rng.gen_range(1..12);
            let agg = Arc::new(ErrorAggregator::new());
            let barrier = Arc::new(Barrier::new(k + 1));
            let joins = (0..k)
                .map(|i| {
                    let agg = Arc::clone(&agg);
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        agg.add(Error::user(anyhow!("sibling {}", i))).is_err()
                    })
                })
                .collect::<Vec<_>>();
            barrier.wait();
            let taken = agg.terminate().map_or(0, |error| error.count());
            let refused = joins.into_iter().map(|j| j.join().unwrap()).filter(|&r| r).count();
            assert_eq!(taken + refused, k);
        }
    }

    #[test]
    fn delayed_aggregate_of_concurrent_failures() {
        for k in [2, 5, 16] {
            let agg = Arc::new(ErrorAggregator::new());
            let barrier = Arc::new(Barrier::new(k));
            let joins = (0..k)
                .map(|i| {
                    let agg = Arc::clone(&agg);
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        agg.add(Error::user(anyhow!("sibling {}", i))).unwrap();
                    })
                })
                .collect::<Vec<_>>();
            for join in joins {
                join.join().unwrap();
            }
            let error = agg.terminate().unwrap();
            assert_eq!(error.count(), k);
            let Error::Composite(composite) = error else { panic!("expected composite") };
            let mut seen = composite.errors().iter().map(|e| e.to_string()).collect::<Vec<_>>();
            seen.sort();
            let mut expected = (0..k).map(|i| format!("sibling {}", i)).collect::<Vec<_>>();
            expected.sort();
            assert_eq!(seen, expected);
        }
    }
}
