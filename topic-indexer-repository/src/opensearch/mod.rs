//! OpenSearch implementation of the index backend.
//!
//! This module provides a concrete implementation of `IndexBackend` and
//! `BulkSession` using the `_bulk` API of OpenSearch.

mod backend;
mod bulk_session;

pub use backend::{host_url, OpenSearchBackend, DEFAULT_PORT};
pub use bulk_session::OpenSearchBulkSession;
