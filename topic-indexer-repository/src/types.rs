//! Request and report types for index backend operations.

use chrono::{DateTime, Utc};
use topic_indexer_shared::Document;

use crate::errors::IndexBackendError;

/// Document type literal used for every submitted document.
pub const LOG_LINE_DOC_TYPE: &str = "log_line";

/// Request to index one document through a bulk session.
#[derive(Debug, Clone)]
pub struct IndexRequest {
    /// Target index name.
    pub index: String,
    /// Document type. Backends without mapping types ignore it.
    pub doc_type: String,
    /// Explicit document id, or `None` to let the backend assign one.
    pub id: Option<String>,
    /// Parent document id, used for routing when set.
    pub parent: Option<String>,
    /// Time-to-live. Backends without per-document TTL ignore it.
    pub ttl: Option<String>,
    /// Time the submission was captured.
    pub timestamp: DateTime<Utc>,
    /// The document body.
    pub document: Document,
}

impl IndexRequest {
    /// Create a `log_line` request with no id, parent or ttl.
    pub fn log_line(
        index: impl Into<String>,
        document: Document,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            index: index.into(),
            doc_type: LOG_LINE_DOC_TYPE.to_string(),
            id: None,
            parent: None,
            ttl: None,
            timestamp,
            document,
        }
    }
}

/// An asynchronous failure report from a bulk session.
#[derive(Debug, Clone)]
pub struct BulkErrorReport {
    /// What went wrong.
    pub error: IndexBackendError,
    /// The document that failed, when the backend could attribute it.
    pub document: Option<Document>,
}
