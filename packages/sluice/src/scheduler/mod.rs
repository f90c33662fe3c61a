//! Time-ordered task execution.
//!
//! A [`Scheduler`] hands out [`Worker`]s. A worker runs tasks after a delay, or periodically, and
//! returns a disposal handle per scheduled task. Disposing the worker disposes every task scheduled
//! through it which has not yet run.
//!
//! Implementations:
//!
//! - [`TokioScheduler`]: tasks run on a tokio runtime. [`schedulers::io`] gives a shared elastic
//!   pool configured from the environment.
//! - [`TestScheduler`]: tasks run on the calling thread when the test advances a virtual clock.

mod runtime;
mod scheduled;
mod virtual_time;

pub use self::{
    runtime::TokioScheduler,
    scheduled::{PeriodicTask, ScheduledTask},
    virtual_time::TestScheduler,
};

use crate::disposable::{Disposable, DisposableRef, Token};
use std::{sync::Arc, time::Duration};


/// A task to run once.
pub type Task = Box<dyn FnOnce() + Send>;

/// A task to run repeatedly.
pub type PeriodicFn = Box<dyn FnMut() + Send>;


/// Source of workers
pub trait Scheduler: Send + Sync {
    /// Create a new worker.
    fn create_worker(&self) -> WorkerRef;

    /// Run `task` after `delay` on a worker of its own.
    ///
    /// Disposing the returned handle before the task runs prevents it from running.
    fn schedule_direct(&self, task: Task, delay: Duration) -> DisposableRef {
        let worker = self.create_worker();
        let finished = Arc::clone(&worker);
        let scheduled = worker.schedule(
            Box::new(move || {
                task();
                finished.dispose();
            }),
            delay,
        );
        Arc::new(Token::from_fn(move || {
            scheduled.dispose();
            worker.dispose();
        }))
    }
}

/// Shared handle to a scheduler.
pub type SchedulerRef = Arc<dyn Scheduler>;


/// Execution context bound to one scheduler, disposable as a unit
pub trait Worker: Disposable {
    /// Run `task` once after `delay`.
    ///
    /// If the worker is disposed, the task never runs and the returned handle is disposed.
    fn schedule(&self, task: Task, delay: Duration) -> DisposableRef;

    /// Run `task` after `initial_delay`, then every `period`, until disposed.
    fn schedule_periodic(
        &self,
        task: PeriodicFn,
        initial_delay: Duration,
        period: Duration,
    ) -> DisposableRef;
}

/// Shared handle to a worker.
pub type WorkerRef = Arc<dyn Worker>;


/// Shared schedulers.
pub mod schedulers {
    use super::{SchedulerRef, TokioScheduler};
    use crate::{config::config, error::Error};
    use std::{
        io,
        sync::{Arc, OnceLock},
    };
    use tokio::runtime::{Builder, Runtime};

    static IO: OnceLock<Runtime> = OnceLock::new();

    /// Elastic pool for blocking work and timers, backed by a dedicated multi-threaded tokio
    /// runtime which starts on first use.
    ///
    /// Worker thread count and name come from [`Config`](crate::config::Config).
    pub fn io() -> Result<SchedulerRef, Error> {
        let runtime = io_runtime()?;
        Ok(Arc::new(TokioScheduler::new(runtime.handle().clone())))
    }

    fn io_runtime() -> Result<&'static Runtime, Error> {
        if let Some(runtime) = IO.get() {
            return Ok(runtime);
        }
        let config = config();
        let runtime = Builder::new_multi_thread()
            .worker_threads(config.io_worker_threads)
            .thread_name(config.io_thread_name.clone())
            .enable_time()
            .build()
            .map_err(|e| Error::SchedulerUnavailable(Arc::new(e)))?;
        if let Err(lost) = IO.set(runtime) {
            // another thread won the race. dropping a runtime may block, which is not allowed
            // from async contexts.
            lost.shutdown_background();
        }
        IO.get().ok_or_else(|| {
            Error::SchedulerUnavailable(Arc::new(io::Error::other("io runtime not initialized")))
        })
    }
}
