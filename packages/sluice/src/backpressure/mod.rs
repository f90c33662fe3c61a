//! Demand protocol.
//!
//! A demand source never delivers more values than its consumer has requested. Requests add to a
//! saturating counter, deliveries subtract from it, and a request of [`UNBOUNDED`] switches flow
//! control off for the rest of the subscription.

mod arbiter;
mod demand;
mod slot;

pub use self::{
    arbiter::SubscriptionArbiter,
    demand::{DemandCounter, UNBOUNDED, add_cap, validate_request},
    slot::SubscriptionSlot,
};
