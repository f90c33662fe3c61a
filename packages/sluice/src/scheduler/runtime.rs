// scheduler running tasks on a tokio runtime.

use super::{PeriodicFn, PeriodicTask, ScheduledTask, Scheduler, Task, Worker, WorkerRef};
use crate::{
    disposable::{CompositeDisposable, Disposable, DisposableRef},
    error::Error,
    util::abort_on_drop::AbortOnDrop,
};
use std::{io, sync::Arc, time::Duration};
use tokio::{
    runtime::Handle,
    time::{Instant, interval_at, sleep},
};


// tokio intervals reject a zero period.
const MIN_PERIOD: Duration = Duration::from_nanos(1);


/// Scheduler which runs each task as a tokio task
///
/// The runtime must have its time driver enabled.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    /// Schedule onto the runtime behind `handle`.
    pub fn new(handle: Handle) -> Self {
        TokioScheduler { handle }
    }

    /// Schedule onto the runtime the caller is running within.
    pub fn current() -> Result<Self, Error> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| Error::SchedulerUnavailable(Arc::new(io::Error::other(e))))
    }
}

impl Scheduler for TokioScheduler {
    fn create_worker(&self) -> WorkerRef {
        Arc::new(TokioWorker {
            handle: self.handle.clone(),
            tasks: Arc::new(CompositeDisposable::new()),
        })
    }
}


// worker tracking its tokio tasks so they can be aborted together.
struct TokioWorker {
    handle: Handle,
    tasks: Arc<CompositeDisposable>,
}

impl Worker for TokioWorker {
    fn schedule(&self, task: Task, delay: Duration) -> DisposableRef {
        let scheduled = ScheduledTask::tracked(task, &self.tasks);
        if scheduled.is_disposed() {
            return scheduled;
        }
        let runner = Arc::clone(&scheduled);
        let timer = AbortOnDrop::spawn_on(&self.handle, async move {
            if !delay.is_zero() {
                sleep(delay).await;
            }
            runner.run();
        });
        scheduled.arm(Arc::new(timer));
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
        let runner = Arc::clone(&periodic);
        let timer = AbortOnDrop::spawn_on(&self.handle, async move {
            let mut ticks = interval_at(Instant::now() + initial_delay, period.max(MIN_PERIOD));
            loop {
                ticks.tick().await;
                if !runner.run() {
                    break;
                }
            }
        });
        periodic.arm(Arc::new(timer));
        periodic
    }
}

impl Disposable for TokioWorker {
    fn dispose(&self) {
        if !self.tasks.is_disposed() {
            trace!(pending = self.tasks.len(), "disposing worker");
            self.tasks.dispose();
        }
    }

    fn is_disposed(&self) -> bool {
        self.tasks.is_disposed()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering::Relaxed};
    use tokio::sync::oneshot;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn runs_after_delay() {
        let worker = TokioScheduler::current().unwrap().create_worker();
        let (send, recv) = oneshot::channel();
        let start = Instant::now();
        worker.schedule(Box::new(move || { let _ = send.send(()); }), Duration::from_millis(20));
        recv.await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn disposed_task_never_runs() {
        let worker = TokioScheduler::current().unwrap().create_worker();
        let ran = Arc::new(AtomicUsize::new(0));
        let handle = worker.schedule(
            Box::new({
                let ran = Arc::clone(&ran);
                move || { ran.fetch_add(1, Relaxed); }
            }),
            Duration::from_millis(30),
        );
        handle.dispose();
        assert!(handle.is_disposed());
        sleep(Duration::from_millis(60)).await;
        assert_eq!(ran.load(Relaxed), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn worker_dispose_cancels_everything() {
        let worker = TokioScheduler::current().unwrap().create_worker();
        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            let ran = Arc::clone(&ran);
            worker.schedule(Box::new(move || { ran.fetch_add(1, Relaxed); }), Duration::from_millis(30));
        }
        let periodic = worker.schedule_periodic(
            Box::new({
                let ran = Arc::clone(&ran);
                move || { ran.fetch_add(1, Relaxed); }
            }),
            Duration::from_millis(30),
            Duration::from_millis(5),
        );
        worker.dispose();
        assert!(periodic.is_disposed());
        sleep(Duration::from_millis(60)).await;
        assert_eq!(ran.load(Relaxed), 0);

        let late = worker.schedule(Box::new(|| ()), Duration::ZERO);
        assert!(late.is_disposed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn periodic_repeats() {
        let worker = TokioScheduler::current().unwrap().create_worker();
        let (send, mut recv) = tokio::sync::mpsc::unbounded_channel();
        let handle = worker.schedule_periodic(
            Box::new(move || { let _ = send.send(()); }),
            Duration::ZERO,
            Duration::from_millis(5),
        );
        for _ in 0..3 {
            recv.recv().await.unwrap();
        }
        handle.dispose();
    }

    #[test]
    fn no_runtime_is_an_error() {
        assert!(matches!(TokioScheduler::current(), Err(Error::SchedulerUnavailable(_))));
    }

    #[test]
    fn shared_io_scheduler() {
        let io = crate::scheduler::schedulers::io().unwrap();
        let (send, recv) = std::sync::mpsc::channel();
        io.schedule_direct(Box::new(move || { let _ = send.send(()); }), Duration::from_millis(1));
        recv.recv_timeout(Duration::from_secs(5)).unwrap();
    }
}
