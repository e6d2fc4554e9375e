//! # Topic Indexer Shared
//!
//! Shared data structures for the topic indexer: the [`Document`] that flows
//! from the bus consumers to the indexing backend, the [`DocumentBuilder`]
//! that creates it from raw message bytes, and the [`PipelineCounters`]
//! shared by every stage.

pub mod types;

pub use types::counters::{CountersSnapshot, PipelineCounters};
pub use types::document::{
    Document, DocumentBuilder, FieldPrecedence, RAW_MESSAGE_KEY, SOURCE_KEY, TIMESTAMP_KEY,
};
