//! Failure types.

use std::{
    fmt::{self, Display, Formatter},
    sync::Arc,
};
use thiserror::Error;


/// A failure travelling through a pipeline as a terminal signal
///
/// Cloning is cheap; user failures are reference-counted.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A value could not be delivered because the consumer had not requested it
    #[error("missing backpressure: {0}")]
    MissingBackpressure(String),
    /// A signal carried no value where one was required
    ///
    /// Absent values and absent failures are reported through this same variant.
    #[error("{signal} called with an absent value; absent values are not allowed")]
    NullValue {
        /// The signal that carried the absent value.
        signal: &'static str,
    },
    /// A party broke the signalling protocol
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),
    /// Several failures raised by sibling work
    #[error(transparent)]
    Composite(#[from] CompositeError),
    /// A failure raised by user-supplied logic
    #[error("{0}")]
    User(Arc<anyhow::Error>),
    /// The runtime backing a scheduler could not be started
    #[error("scheduler unavailable: {0}")]
    SchedulerUnavailable(Arc<std::io::Error>),
}

impl Error {
    /// Wrap a failure raised by user-supplied logic.
    pub fn user<E: Into<anyhow::Error>>(error: E) -> Self {
        Error::User(Arc::new(error.into()))
    }

    /// Construct a missing-backpressure failure.
    pub fn missing_backpressure(msg: impl Into<String>) -> Self {
        Error::MissingBackpressure(msg.into())
    }

    /// Whether this is a missing-backpressure failure.
    pub fn is_missing_backpressure(&self) -> bool {
        matches!(self, Error::MissingBackpressure(_))
    }

    /// Number of individual failures this represents.
    pub fn count(&self) -> usize {
        match self {
            Error::Composite(composite) => composite.errors().len(),
            _ => 1,
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(error: anyhow::Error) -> Self {
        Error::User(Arc::new(error))
    }
}


/// Ways in which a party can break the signalling protocol
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Error)]
pub enum ProtocolViolation {
    /// A second upstream was attached to a holder that accepts only one
    #[error("subscription already set")]
    DoubleSubscription,
    /// A request for zero items
    #[error("request amount must be positive, got {0}")]
    NonPositiveRequest(u64),
    /// More items were reported produced than had been requested
    #[error("more produced than requested: {0}")]
    ProducedMoreThanRequested(u64),
    /// A synchronous generator emitted more than one value in a single call
    #[error("generator emitted more than one value in a single call")]
    MultipleValuesPerCall,
    /// A second consumer subscribed to a source that accepts only one
    #[error("only a single subscriber is allowed")]
    SingleSubscriberOnly,
}


/// Several failures merged into one
///
/// Shares its list on clone.
#[derive(Debug, Clone)]
pub struct CompositeError {
    // behind a pointer, since Error holds this inline.
    errors: Arc<[Error]>,
}

impl CompositeError {
    /// Merge failures, flattening nested composites.
    pub fn new<I: IntoIterator<Item = Error>>(errors: I) -> Self {
        let mut flat = Vec::new();
        for error in errors {
            match error {
                Error::Composite(inner) => flat.extend(inner.errors.iter().cloned()),
                error => flat.push(error),
            }
        }
        CompositeError { errors: flat.into() }
    }

    /// The merged failures, in the order they were raised.
    pub fn errors(&self) -> &[Error] {
        &self.errors
    }
}

impl Display for CompositeError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{} errors occurred", self.errors.len())?;
        for (i, error) in self.errors.iter().enumerate() {
            write!(f, "\n  {}: {}", i + 1, error)?;
        }
        Ok(())
    }
}

impl std::error::Error for CompositeError {}


#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn composite_flattens() {
        let inner = Error::Composite(CompositeError::new([
            Error::user(anyhow!("a")),
            Error::user(anyhow!("b")),
        ]));
        let outer = CompositeError::new([inner, Error::missing_backpressure("c")]);
        assert_eq!(outer.errors().len(), 3);
        assert!(outer.errors()[2].is_missing_backpressure());
        assert_eq!(Error::Composite(outer).count(), 3);
    }

    #[test]
    fn stays_small() {
        // a composite nested in a composite must not grow the enum
        assert!(std::mem::size_of::<Error>() <= 4 * std::mem::size_of::<usize>());
        let nested = Error::Composite(CompositeError::new([
            Error::Composite(CompositeError::new([Error::user(anyhow!("a"))])),
            Error::user(anyhow!("b")),
        ]));
        let copy = nested.clone();
        assert_eq!(copy.count(), 2);
    }

    #[test]
    fn display() {
        let e = Error::from(ProtocolViolation::NonPositiveRequest(0));
        assert_eq!(e.to_string(), "protocol violation: request amount must be positive, got 0");
        let e = Error::user(anyhow!("boom"));
        assert_eq!(e.to_string(), "boom");
        let e = Error::Composite(CompositeError::new([Error::user(anyhow!("x"))]));
        assert_eq!(e.to_string(), "1 errors occurred\n  1: x");
    }
}
