//! Error types for the remote protocol.

use quern_match::MatchError;
use thiserror::Error;

/// Errors raised by the remote shard client and server.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The transport failed, or the peer spoke a different protocol.
    #[error("network error: {0}")]
    Network(String),

    /// The peer did not respond within the configured timeout.
    #[error("network timeout: {0}")]
    NetworkTimeout(String),

    /// A frame arrived truncated or malformed.
    #[error("serialisation error: {0}")]
    Serialisation(String),

    /// The match itself failed (locally on the server, or reported back
    /// over the wire).
    #[error(transparent)]
    Match(#[from] MatchError),
}

impl RemoteError {
    /// Creates a `Network` error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    /// Creates a `Serialisation` error.
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Serialisation(message.into())
    }
}

impl From<RemoteError> for MatchError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Network(message) => Self::Network(message),
            RemoteError::NetworkTimeout(message) => Self::NetworkTimeout(message),
            RemoteError::Serialisation(message) => Self::Serialisation(message),
            RemoteError::Match(inner) => inner,
        }
    }
}
