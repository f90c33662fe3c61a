//! Execution core for composable asynchronous pipelines.
//!
//! A source emits a sequence of values followed by at most one terminal signal (an error or a
//! completion) to a consumer, either as an unbounded push ([`Observable`]) or under explicitly
//! negotiated demand ([`Flowable`]). This crate provides the pieces every pipeline stage is built
//! from:
//!
//! - [`disposable`]: at-most-once cancellation tokens and the containers that hold them.
//! - [`backpressure`]: the demand counter and the upstream subscription holders.
//! - [`drain`]: the work-in-progress trampoline which serializes concurrent emissions.
//! - [`aggregate`]: merging of concurrently raised failures into one terminal failure.
//! - [`scheduler`]: time-ordered task execution for timed stages.
//! - [`fallback`]: the process-wide channel for failures that have nowhere else to go.

#[macro_use]
extern crate tracing;

pub mod aggregate;
pub mod backpressure;
pub mod completable;
pub mod config;
pub mod disposable;
pub mod drain;
pub mod error;
pub mod fallback;
pub mod flowable;
pub mod observable;
pub mod scheduler;
pub mod signal;
pub mod testing;
pub(crate) mod util;

pub use crate::{
    completable::Completable,
    error::Error,
    flowable::{Flowable, OverflowStrategy},
    observable::Observable,
    signal::{Subscriber, Subscription},
};
