//! Interface definitions for the indexing backend.
//!
//! The traits here let the dispatcher run against OpenSearch in production
//! and against in-memory mocks in tests.

mod index_backend;

pub use index_backend::{BulkSession, IndexBackend};
