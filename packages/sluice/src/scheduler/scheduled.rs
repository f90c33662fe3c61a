// units of scheduled work, tracked by the worker which scheduled them.

use super::{PeriodicFn, Task};
use crate::{
    disposable::{CompositeDisposable, Disposable, DisposableRef, DisposableSlot, DisposalKey},
    util::{atomic_take::AtomicTake, lock},
};
use std::sync::{
    Arc,
    Mutex,
    Weak,
    atomic::{AtomicBool, Ordering::AcqRel, Ordering::Acquire},
};


// link from a task to the worker's tracking set, so that the task leaves it when finished.
struct Tracker {
    set: Mutex<Option<(Weak<CompositeDisposable>, DisposalKey)>>,
}

impl Tracker {
    fn new() -> Self {
        Tracker { set: Mutex::new(None) }
    }

    // join a tracking set. returns false if the set was disposed, in which case d was disposed.
    fn join(&self, tracking: &Arc<CompositeDisposable>, d: DisposableRef) -> bool {
        match tracking.add(d) {
            Some(key) => {
                *lock(&self.set) = Some((Arc::downgrade(tracking), key));
                true
            }
            None => false,
        }
    }

    // leave the tracking set, if still in one.
    fn leave(&self) {
        let joined = lock(&self.set).take();
        if let Some((set, key)) = joined {
            if let Some(set) = set.upgrade() {
                set.remove(key);
            }
        }
    }
}


/// A task scheduled to run once
///
/// Runs at most once, and never after being disposed. Disposing it after it has run does nothing.
pub struct ScheduledTask {
    task: AtomicTake<Task>,
    // whatever drives the task at its due time.
    timer: DisposableSlot,
    tracker: Tracker,
}

impl ScheduledTask {
    // construct, joining the worker's tracking set. the result is disposed if the worker is.
    pub(crate) fn tracked(task: Task, tracking: &Arc<CompositeDisposable>) -> Arc<Self> {
        let scheduled = Arc::new(ScheduledTask {
            task: AtomicTake::some(task),
            timer: DisposableSlot::new(),
            tracker: Tracker::new(),
        });
        scheduled.tracker.join(tracking, scheduled.clone());
        scheduled
    }

    // attach the timer driving this task. it is disposed along with the task.
    pub(crate) fn arm(&self, timer: DisposableRef) {
        self.timer.set(timer);
    }

    /// Run the task, unless it already ran or was disposed.
    pub fn run(&self) {
        if let Some(task) = self.task.take() {
            task();
            self.tracker.leave();
        }
    }
}

impl Disposable for ScheduledTask {
    fn dispose(&self) {
        if let Some(task) = self.task.take() {
            drop(task);
            self.timer.dispose();
            self.tracker.leave();
        }
    }

    fn is_disposed(&self) -> bool {
        self.task.is_taken()
    }
}


/// A task scheduled to run repeatedly until disposed
pub struct PeriodicTask {
    // held for the duration of each run.
    task: Mutex<Option<PeriodicFn>>,
    disposed: AtomicBool,
    timer: DisposableSlot,
    tracker: Tracker,
}

impl PeriodicTask {
    // construct, joining the worker's tracking set. the result is disposed if the worker is.
    pub(crate) fn tracked(task: PeriodicFn, tracking: &Arc<CompositeDisposable>) -> Arc<Self> {
        let periodic = Arc::new(PeriodicTask {
            task: Mutex::new(Some(task)),
            disposed: AtomicBool::new(false),
            timer: DisposableSlot::new(),
            tracker: Tracker::new(),
        });
        periodic.tracker.join(tracking, periodic.clone());
        periodic
    }

    // attach the timer driving this task. it is disposed along with the task.
    pub(crate) fn arm(&self, timer: DisposableRef) {
        self.timer.set(timer);
    }

    /// Run the task once. Returns whether it should keep running.
    pub fn run(&self) -> bool {
        if self.is_disposed() {
            return false;
        }
        let mut task = lock(&self.task);
        match task.as_mut() {
            Some(f) => f(),
            None => return false,
        }
        if self.is_disposed() {
            // disposed while running; the disposer could not drop the task
            *task = None;
            return false;
        }
        true
    }
}

impl Disposable for PeriodicTask {
    fn dispose(&self) {
        if self.disposed.swap(true, AcqRel) {
            return;
        }
        self.timer.dispose();
        self.tracker.leave();
        // if running, the runner drops it when done
        if let Ok(mut task) = self.task.try_lock() {
            *task = None;
        }
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Acquire)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::disposable::empty;
    use std::sync::atomic::{AtomicUsize, Ordering::Relaxed};

    fn counter() -> (Arc<AtomicUsize>, Task) {
        let count = Arc::new(AtomicUsize::new(0));
        let task = Box::new({
            let count = Arc::clone(&count);
            move || { count.fetch_add(1, Relaxed); }
        });
        (count, task)
    }

    #[test]
    fn runs_once_and_leaves_tracking() {
        let tracking = Arc::new(CompositeDisposable::new());
        let (count, task) = counter();
        let scheduled = ScheduledTask::tracked(task, &tracking);
        assert_eq!(tracking.len(), 1);
        scheduled.run();
        scheduled.run();
        assert_eq!(count.load(Relaxed), 1);
        assert!(tracking.is_empty());

        let timer = empty();
        scheduled.arm(timer.clone());
        scheduled.dispose();
        assert!(!timer.is_disposed());
    }

    #[test]
    fn disposed_never_runs() {
        let tracking = Arc::new(CompositeDisposable::new());
        let (count, task) = counter();
        let scheduled = ScheduledTask::tracked(task, &tracking);
        let timer = empty();
        scheduled.arm(timer.clone());
        scheduled.dispose();
        scheduled.run();
        assert_eq!(count.load(Relaxed), 0);
        assert!(timer.is_disposed());
        assert!(tracking.is_empty());
    }

    #[test]
    fn disposed_tracking_disposes_task() {
        let tracking = Arc::new(CompositeDisposable::new());
        tracking.dispose();
        let (count, task) = counter();
        let scheduled = ScheduledTask::tracked(task, &tracking);
        assert!(scheduled.is_disposed());
        scheduled.run();
        assert_eq!(count.load(Relaxed), 0);
    }

    #[test]
    fn periodic_until_disposed() {
        let tracking = Arc::new(CompositeDisposable::new());
        let count = Arc::new(AtomicUsize::new(0));
        let periodic = PeriodicTask::tracked(
            Box::new({
                let count = Arc::clone(&count);
                move || { count.fetch_add(1, Relaxed); }
            }),
            &tracking,
        );
        assert!(periodic.run());
        assert!(periodic.run());
        tracking.dispose();
        assert!(periodic.is_disposed());
        assert!(!periodic.run());
        assert_eq!(count.load(Relaxed), 2);
    }
}
