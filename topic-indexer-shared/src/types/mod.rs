//! Core data types shared across the topic indexer crates.

pub mod counters;
pub mod document;

pub use counters::{CountersSnapshot, PipelineCounters};
pub use document::{Document, DocumentBuilder, FieldPrecedence};
