//! Configuration types for backend connections and bulk sessions.

use std::time::Duration;

/// Default number of retries for a failed bulk request.
pub const DEFAULT_BULK_MAX_RETRIES: usize = 3;

/// Default number of queued documents that triggers a bulk request.
pub const DEFAULT_MAX_BUFFERED_DOCS: usize = 500;

/// Where and how to connect to the indexing backend.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Target index name (used for logging; requests carry their own index).
    pub index: String,
    /// Hosts to try in order. Either bare host names or full URLs.
    pub hosts: Vec<String>,
    /// Port applied to hosts that do not specify one.
    pub port: Option<u16>,
    /// Log every bulk request body.
    pub trace: bool,
}

/// Behaviour of a bulk-submit session.
#[derive(Debug, Clone)]
pub struct BulkSessionConfig {
    /// Retries for a bulk request that fails as a whole.
    pub max_retries: usize,
    /// Delay between bulk request retries.
    pub retry_delay: Duration,
    /// Queue length at which submissions are sent without waiting for a flush.
    pub max_buffered_docs: usize,
}

impl Default for BulkSessionConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_BULK_MAX_RETRIES,
            retry_delay: Duration::from_secs(1),
            max_buffered_docs: DEFAULT_MAX_BUFFERED_DOCS,
        }
    }
}
