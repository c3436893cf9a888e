//! Error types for the match engine.

use quern_query::QueryError;
use quern_weight::{DocId, WeightError};
use thiserror::Error;

/// Errors that can occur while preparing or running a match.
#[derive(Debug, Error)]
pub enum MatchError {
    /// A caller-supplied argument was out of range or inconsistent.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An operation was applied in a state that does not allow it.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// A document id was not present in the shard.
    #[error("document {0} not found")]
    DocNotFound(DocId),

    /// A wildcard or edit-distance expansion exceeded its term limit.
    #[error("wildcard error: {0}")]
    Wildcard(String),

    /// The requested combination of features is not supported.
    #[error("unimplemented: {0}")]
    Unimplemented(String),

    /// A remote shard's transport failed.
    #[error("network error: {0}")]
    Network(String),

    /// A remote shard did not respond within the configured timeout.
    #[error("network timeout: {0}")]
    NetworkTimeout(String),

    /// Data from a remote shard could not be decoded.
    #[error("serialisation error: {0}")]
    Serialisation(String),

    /// The query tree itself was invalid.
    #[error(transparent)]
    Query(#[from] QueryError),

    /// A weighting scheme could not be reconstructed.
    #[error(transparent)]
    Weight(#[from] WeightError),
}

impl MatchError {
    /// Creates an `InvalidArgument` error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Creates an `Unimplemented` error.
    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::Unimplemented(message.into())
    }
}
