//! Low-level concurrency utility.

use std::{
    cell::UnsafeCell,
    mem::MaybeUninit,
    sync::atomic::{
        Ordering::AcqRel,
        Ordering::Acquire,
        AtomicBool,
    },
};


/// Like an atomic `Option<T>` that can be `take`n once.
///
/// Exactly one caller of [`take`](Self::take) observes the value, no matter how many threads race
/// on it. This is the primitive behind cancellation tokens and one-shot guards.
pub(crate) struct AtomicTake<T> {
    // val is initialized if is_some is true. the thread that transitions it from true to false
    // claims the right to read it and take ownership of it.
    is_some: AtomicBool,
    val: UnsafeCell<MaybeUninit<T>>,
}

impl<T> AtomicTake<T> {
    /// Construct with a value.
    pub(crate) const fn some(val: T) -> Self {
        AtomicTake {
            is_some: AtomicBool::new(true),
            val: UnsafeCell::new(MaybeUninit::new(val)),
        }
    }

    /// Construct without a value.
    pub(crate) const fn none() -> Self {
        AtomicTake {
            is_some: AtomicBool::new(false),
            val: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Try to atomically take the value.
    pub(crate) fn take(&self) -> Option<T> {
        if self.is_some.swap(false, AcqRel) {
            // safety: we won the transition, so nobody else will ever read val again.
            Some(unsafe { (*self.val.get()).as_ptr().read() })
        } else {
            None
        }
    }

    /// Whether the value has already been taken (or was never there).
    pub(crate) fn is_taken(&self) -> bool {
        !self.is_some.load(Acquire)
    }
}

impl<T> Drop for AtomicTake<T> {
    fn drop(&mut self) {
        // make sure the value gets dropped if not yet taken
        drop(self.take());
    }
}

// the value is only ever moved out, never shared by reference, so moving it across threads is all
// that is required.
unsafe impl<T: Send> Send for AtomicTake<T> {}
unsafe impl<T: Send> Sync for AtomicTake<T> {}


#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::{Arc, atomic::{AtomicUsize, Ordering::Relaxed}},
        thread,
    };

    #[test]
    fn take_once() {
        let t = AtomicTake::some(5);
        assert!(!t.is_taken());
        assert_eq!(t.take(), Some(5));
        assert!(t.is_taken());
        assert_eq!(t.take(), None);
        assert!(AtomicTake::<u8>::none().is_taken());
    }

    #[test]
    fn concurrent_take_wins_exactly_once() {
        for _ in 0..100 {
            let t = Arc::new(AtomicTake::some(String::from("x")));
            let wins = Arc::new(AtomicUsize::new(0));
            let joins = (0..8)
                .map(|_| {
                    let t = Arc::clone(&t);
                    let wins = Arc::clone(&wins);
                    thread::spawn(move || {
                        if t.take().is_some() {
                            wins.fetch_add(1, Relaxed);
                        }
                    })
                })
                .collect::<Vec<_>>();
            for join in joins {
                join.join().unwrap();
            }
            assert_eq!(wins.load(Relaxed), 1);
        }
    }

    #[test]
    fn untaken_value_is_dropped() {
        let marker = Arc::new(());
        drop(AtomicTake::some(Arc::clone(&marker)));
        assert_eq!(Arc::strong_count(&marker), 1);
    }
}
