// set of disposables released together.

use super::{Disposable, DisposableRef};
use dashmap::DashMap;
use std::sync::atomic::{
    Ordering::{Acquire, Relaxed, SeqCst},
    AtomicBool,
    AtomicU64,
};


/// Key identifying a member of a [`CompositeDisposable`]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct DisposalKey(u64);


/// Thread-safe set of disposables which are disposed together
///
/// Members may be added and removed while [`dispose`](Disposable::dispose) is racing. Once
/// disposed, the set stays disposed and anything added later is disposed immediately rather than
/// stored, so nothing leaks.
#[derive(Default)]
pub struct CompositeDisposable {
    members: DashMap<DisposalKey, DisposableRef>,
    next_key: AtomicU64,
    disposed: AtomicBool,
}

impl CompositeDisposable {
    /// Construct empty.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a member, returning its key.
    ///
    /// If the set is disposed, `d` is disposed synchronously and `None` is returned.
    pub fn add(&self, d: DisposableRef) -> Option<DisposalKey> {
        if self.disposed.load(Acquire) {
            d.dispose();
            return None;
        }
        let key = DisposalKey(self.next_key.fetch_add(1, Relaxed));
        self.members.insert(key, d);
        // if disposal began concurrently and its sweep missed our insert, take it back out
        // ourselves. exactly one of us gets it from the map.
        if self.disposed.load(SeqCst) {
            if let Some((_, d)) = self.members.remove(&key) {
                d.dispose();
            }
            return None;
        }
        Some(key)
    }

    /// Remove a member without disposing it.
    ///
    /// The member is assumed to have been disposed by its own logic.
    pub fn remove(&self, key: DisposalKey) -> Option<DisposableRef> {
        self.members.remove(&key).map(|(_, d)| d)
    }

    /// Remove a member and dispose it.
    pub fn delete(&self, key: DisposalKey) -> bool {
        match self.remove(key) {
            Some(d) => {
                d.dispose();
                true
            }
            None => false,
        }
    }

    /// Dispose all current members, without disposing the set itself.
    pub fn clear(&self) {
        let keys = self.members.iter().map(|e| *e.key()).collect::<Vec<_>>();
        for key in keys {
            self.delete(key);
        }
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether there are no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl Disposable for CompositeDisposable {
    fn dispose(&self) {
        if self.disposed.swap(true, SeqCst) {
            return;
        }
        // collect keys first so that no shard lock is held while members run release actions,
        // which may call back into this set.
        let keys = self.members.iter().map(|e| *e.key()).collect::<Vec<_>>();
        for key in keys {
            if let Some((_, d)) = self.members.remove(&key) {
                d.dispose();
            }
        }
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Acquire)
    }
}
