//! # Topic Indexer
//!
//! Consumes messages from a set of bus topics and bulk-indexes them into
//! OpenSearch.
//!
//! ## Architecture
//!
//! The pipeline has four stages:
//!
//! 1. **Consumer**: one receive loop per topic; every message is converted
//!    into a document on its own task
//! 2. **Aggregator**: collects documents into batches, flushing on size or
//!    on a timer
//! 3. **Dispatcher**: submits each batch through a bulk session, reconnecting
//!    and resending on failure
//! 4. **Orchestrator**: wires the stages together and reports stats
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and dependency wiring
//! - [`consumer`]: Bus sources and the per-topic consumer loop
//! - [`aggregator`]: Size/time batching
//! - [`dispatcher`]: Retrying bulk dispatch
//! - [`stats`]: Periodic counter reports
//! - [`orchestrator`]: Coordinates the pipeline
//! - [`errors`]: Error types for the pipeline

pub mod aggregator;
pub mod config;
pub mod consumer;
pub mod dispatcher;
pub mod errors;
pub mod orchestrator;
pub mod stats;

pub use config::{AppConfig, Dependencies};
pub use errors::IngestError;

use thiserror::Error;

/// Errors that can occur during indexer initialization or execution.
#[derive(Error, Debug)]
pub enum IndexingError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Ingest error.
    #[error("Ingest error: {0}")]
    IngestError(#[from] IngestError),
}

impl IndexingError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}
