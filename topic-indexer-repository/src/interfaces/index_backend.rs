//! Index backend and bulk session trait definitions.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::IndexBackendError;
use crate::types::{BulkErrorReport, IndexRequest};

/// A connection factory for the indexing backend.
///
/// Every call to [`connect`](IndexBackend::connect) opens a fresh connection
/// and starts a new bulk session on it. A dispatcher owns the returned session
/// exclusively; sessions are never shared between concurrent dispatches.
#[async_trait]
pub trait IndexBackend: Send + Sync {
    /// Open a connection and start a bulk-submit session.
    ///
    /// # Returns
    ///
    /// * `Ok(Box<dyn BulkSession>)` - A started session ready to accept documents
    /// * `Err(IndexBackendError)` - If the backend could not be reached
    async fn connect(&self) -> Result<Box<dyn BulkSession>, IndexBackendError>;
}

/// A stateful bulk-submit session.
///
/// Submissions are queued and sent in bulk, in the order they were accepted.
/// [`index`] and [`flush`] return how many queued requests the call delivered
/// to the backend; those are always the oldest ones still queued. An `Err`
/// from either means every request accepted since the last delivery was lost
/// with the failed send and must be resent on a new session.
///
/// Failures discovered asynchronously (rejected bulk items, a bulk request
/// that failed after its retries) are also delivered on the error-report
/// stream. That stream is diagnostic only.
///
/// [`index`]: BulkSession::index
/// [`flush`]: BulkSession::flush
#[async_trait]
pub trait BulkSession: Send {
    /// Submit one document.
    ///
    /// Returns `Ok(0)` when the request was only queued.
    async fn index(&mut self, request: &IndexRequest) -> Result<usize, IndexBackendError>;

    /// Take the error-report stream.
    ///
    /// Returns `Some` only on the first call. The stream ends once the session
    /// is stopped.
    fn error_reports(&mut self) -> Option<mpsc::UnboundedReceiver<BulkErrorReport>>;

    /// Send any queued submissions and return how many were delivered.
    async fn flush(&mut self) -> Result<usize, IndexBackendError>;

    /// Stop the session and release its resources.
    ///
    /// Queued submissions that were not flushed are discarded.
    async fn stop(&mut self);
}
