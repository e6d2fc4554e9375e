//! Consumer module for the topic indexer.
//!
//! Provides the bus-facing [`MessageSource`] trait, its Kafka implementation,
//! and the per-topic receive loop that turns messages into documents.

mod kafka_consumer;
mod messages;
mod topic_consumer;

pub use kafka_consumer::KafkaSource;
pub use messages::{RawMessage, Received, Subscription};
pub use topic_consumer::{
    ConsumerContext, IngestLimits, TopicConsumer, DEFAULT_BACKPRESSURE_GRACE,
    DEFAULT_INGRESS_CAPACITY, DEFAULT_MAX_IN_FLIGHT, DEFAULT_RECEIVE_TIMEOUT,
};

use async_trait::async_trait;
use std::time::Duration;

use crate::errors::IngestError;

/// A subscription on the message bus.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Block for the next message, for at most `timeout`.
    ///
    /// # Returns
    ///
    /// * `Ok(Received::Message)` - A message arrived
    /// * `Ok(Received::Timeout)` - Nothing arrived within `timeout`
    /// * `Ok(Received::Closed)` - The source has no more messages
    /// * `Err(IngestError)` - The bus connection failed
    async fn receive(&mut self, timeout: Duration) -> Result<Received, IngestError>;
}
