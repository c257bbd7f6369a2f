//! Fault taxonomy and error types.
//!
//! Faults are recoverable per-element or per-aggregate conditions reported
//! as state and events; they never cross the public boundary as errors for
//! active (subscribed) operations. `Error` covers the one-shot failures a
//! non-subscribable operation may signal at construction time.

use crate::value::Value;
use thiserror::Error;

/// Result type alias for Vigil operations.
pub type Result<T> = core::result::Result<T, Error>;

/// A recoverable fault attached to an element, key, or aggregate.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum Fault {
    /// The watched expression reported an exception for one element.
    #[error("evaluation failed: {0}")]
    Evaluation(String),
    /// An aggregate's current value depends on a faulted element.
    #[error("aggregate depends on a faulted element: {0}")]
    Aggregate(Box<Fault>),
    /// A singleton-returning operation saw an empty sequence.
    #[error("sequence contains no elements")]
    EmptySequence,
    /// A single-returning operation saw more than one element.
    #[error("sequence contains more than one element")]
    MultipleElements,
    /// A map projection produced the same key for more than one element.
    #[error("duplicate key in projection: {0}")]
    DuplicateKey(Value),
    /// A map projection produced a null key.
    #[error("null key in projection")]
    NullKey,
}

impl Fault {
    /// Creates an evaluation fault.
    pub fn evaluation(message: impl Into<String>) -> Self {
        Fault::Evaluation(message.into())
    }

    /// Wraps an underlying element fault as an aggregate fault.
    pub fn aggregate(underlying: Fault) -> Self {
        Fault::Aggregate(Box::new(underlying))
    }
}

/// Error type for one-shot failures.
#[derive(Debug, Error)]
pub enum Error {
    /// An index outside the collection's bounds.
    #[error("index {index} out of bounds for collection of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },
    /// A key absent from the collection.
    #[error("key not found: {key}")]
    KeyNotFound { key: Value },
    /// An operation that cannot be performed as requested.
    #[error("invalid operation: {message}")]
    InvalidOperation { message: String },
    /// A one-shot operation failed with a fault at construction time.
    #[error(transparent)]
    Fault(#[from] Fault),
}

impl Error {
    /// Creates an index-out-of-bounds error.
    pub fn index_out_of_bounds(index: usize, len: usize) -> Self {
        Error::IndexOutOfBounds { index, len }
    }

    /// Creates a key-not-found error.
    pub fn key_not_found(key: Value) -> Self {
        Error::KeyNotFound { key }
    }

    /// Creates an invalid-operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Error::InvalidOperation {
            message: message.into(),
        }
    }
}
