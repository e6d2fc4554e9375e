//! Error types for the topic indexer repository.

mod index_backend_error;

pub use index_backend_error::IndexBackendError;
