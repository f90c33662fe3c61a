// scheduler driven by a virtual clock, for deterministic tests of timed stages.

use super::{PeriodicFn, PeriodicTask, ScheduledTask, Scheduler, Task, Worker, WorkerRef};
use crate::{
    disposable::{CompositeDisposable, Disposable, DisposableRef, Token},
    util::lock,
};
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, Weak},
    time::Duration,
};


/// Scheduler whose clock only moves when told to
///
/// Due tasks run on the thread that advances the clock, in order of due time and then of
/// scheduling. Tasks may schedule further tasks; those run in the same advance if they fall due
/// within it.
#[derive(Clone, Default)]
pub struct TestScheduler {
    clock: Arc<Clock>,
}

#[derive(Default)]
struct Clock {
    state: Mutex<ClockState>,
}

#[derive(Default)]
struct ClockState {
    now: Duration,
    // tie-breaker so that equal due times run in scheduling order.
    next_seq: u64,
    queue: BTreeMap<(Duration, u64), Entry>,
}

enum Entry {
    Once(Arc<ScheduledTask>),
    Periodic {
        task: Arc<PeriodicTask>,
        period: Duration,
    },
}

impl TestScheduler {
    /// Construct with the clock at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time.
    pub fn now(&self) -> Duration {
        lock(&self.clock.state).now
    }

    /// Move the clock forward by `by`, running everything that falls due.
    pub fn advance_time_by(&self, by: Duration) {
        let target = self.now() + by;
        self.advance_time_to(target);
    }

    /// Move the clock to `to`, running everything that falls due. Never moves the clock backward.
    pub fn advance_time_to(&self, to: Duration) {
        loop {
            let mut state = lock(&self.clock.state);
            let due = match state.queue.first_key_value() {
                Some((&(at, seq), _)) if at <= to => (at, seq),
                _ => {
                    state.now = state.now.max(to);
                    return;
                }
            };
            let entry = state.queue.remove(&due);
            state.now = state.now.max(due.0);
            drop(state);

            match entry {
                Some(Entry::Once(task)) => task.run(),
                Some(Entry::Periodic { task, period }) => {
                    if task.run() {
                        let next = due.0 + period;
                        let entry = Entry::Periodic { task: Arc::clone(&task), period };
                        self.clock.enqueue(next, entry, |timer| task.arm(timer));
                    }
                }
                None => (),
            }
        }
    }

    /// Run everything due at the current time.
    pub fn trigger_actions(&self) {
        self.advance_time_to(self.now());
    }
}

impl Scheduler for TestScheduler {
    fn create_worker(&self) -> WorkerRef {
        Arc::new(TestWorker {
            clock: Arc::clone(&self.clock),
            tasks: Arc::new(CompositeDisposable::new()),
        })
    }
}

impl Clock {
    // queue an entry at absolute time `at` and hand its removal handle to `arm`.
    fn enqueue<A: FnOnce(DisposableRef)>(self: &Arc<Self>, at: Duration, entry: Entry, arm: A) {
        let key = {
            let mut state = lock(&self.state);
            let key = (at, state.next_seq);
            state.next_seq += 1;
            state.queue.insert(key, entry);
            key
        };
        let clock = Arc::downgrade(self);
        arm(Arc::new(Token::from_fn(move || remove(&clock, key))));
    }
}

// dequeue a disposed entry, so it does not linger until its due time.
fn remove(clock: &Weak<Clock>, key: (Duration, u64)) {
    if let Some(clock) = clock.upgrade() {
        let removed = lock(&clock.state).queue.remove(&key);
        drop(removed);
    }
}


struct TestWorker {
    clock: Arc<Clock>,
    tasks: Arc<CompositeDisposable>,
}

impl Worker for TestWorker {
    fn schedule(&self, task: Task, delay: Duration) -> DisposableRef {
        let scheduled = ScheduledTask::tracked(task, &self.tasks);
        if scheduled.is_disposed() {
            return scheduled;
        }
        let at = lock(&self.clock.state).now + delay;
        self.clock.enqueue(at, Entry::Once(Arc::clone(&scheduled)), |timer| scheduled.arm(timer));
        scheduled
    }

    fn schedule_periodic(
        &self,
        task: PeriodicFn,
        initial_delay: Duration,
        period: Duration,
    ) -> DisposableRef {
        let periodic = PeriodicTask::tracked(task, &self.tasks);
        if periodic.is_disposed() {
            return periodic;
        }
        let at = lock(&self.clock.state).now + initial_delay;
        let entry = Entry::Periodic { task: Arc::clone(&periodic), period };
        self.clock.enqueue(at, entry, |timer| periodic.arm(timer));
        periodic
    }
}

impl Disposable for TestWorker {
    fn dispose(&self) {
        self.tasks.dispose();
    }

    fn is_disposed(&self) -> bool {
        self.tasks.is_disposed()
    }
}
