//! Index backend error types.

use thiserror::Error;

/// Errors from the indexing backend and its bulk sessions.
///
/// Cloneable so one failure can be reported for every document it affected.
#[derive(Debug, Clone, Error)]
pub enum IndexBackendError {
    /// Failed to reach any configured backend host.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// A bulk request failed or a bulk item was rejected.
    #[error("Bulk index error: {0}")]
    BulkIndexError(String),

    /// Failed to parse a response from the backend.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// The bulk session was already stopped.
    #[error("Bulk session is closed")]
    SessionClosed,
}

impl IndexBackendError {
    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::ConnectionError(msg.into())
    }

    /// Create a bulk index error.
    pub fn bulk_index(msg: impl Into<String>) -> Self {
        Self::BulkIndexError(msg.into())
    }

    /// Create a parse error.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::ParseError(msg.into())
    }
}
