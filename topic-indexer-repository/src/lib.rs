//! # Topic Indexer Repository
//!
//! Traits and implementations for talking to the indexing backend. The
//! pipeline only depends on [`IndexBackend`] and [`BulkSession`]; the
//! [`OpenSearchBackend`] is the concrete implementation used in production.

pub mod config;
pub mod errors;
pub mod interfaces;
pub mod opensearch;
pub mod types;

pub use config::{BulkSessionConfig, ConnectionConfig};
pub use errors::IndexBackendError;
pub use interfaces::{BulkSession, IndexBackend};
pub use opensearch::OpenSearchBackend;
pub use types::{BulkErrorReport, IndexRequest, LOG_LINE_DOC_TYPE};
