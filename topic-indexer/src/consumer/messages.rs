//! Message types for the consumer.

use serde::Deserialize;

/// One (topic, group) pair to consume.
///
/// Subscriptions sharing a group split the topic's messages between them.
/// A subscription without a group sees every message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Subscription {
    /// Topic to consume.
    pub topic: String,
    /// Optional consumer group.
    #[serde(default)]
    pub group: Option<String>,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, group: Option<String>) -> Self {
        Self {
            topic: topic.into(),
            group,
        }
    }

    /// The consumer group, treating an empty name as no group.
    pub fn group(&self) -> Option<&str> {
        self.group.as_deref().filter(|g| !g.is_empty())
    }
}

/// A message as delivered by the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// The topic the message was published on.
    pub topic: String,
    /// The message body.
    pub payload: Vec<u8>,
}

impl RawMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Outcome of a single receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// A message arrived.
    Message(RawMessage),
    /// Nothing arrived before the receive timeout. Not an error.
    Timeout,
    /// The source is exhausted.
    Closed,
}
