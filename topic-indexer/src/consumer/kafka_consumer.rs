//! Kafka implementation of [`MessageSource`].
//!
//! Each subscription gets its own `StreamConsumer`. Offsets are auto-committed:
//! delivery to the index is best-effort and nothing is replayed on failure.

use async_trait::async_trait;
use rdkafka::{
    config::ClientConfig,
    consumer::{Consumer, StreamConsumer},
    message::Message as KafkaMessage,
};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::BusConfig;
use crate::consumer::messages::{RawMessage, Received, Subscription};
use crate::consumer::MessageSource;
use crate::errors::IngestError;

/// Prefix for generated group ids of subscriptions without a group.
const GENERATED_GROUP_PREFIX: &str = "topic-indexer";

/// Kafka consumer for one subscription.
pub struct KafkaSource {
    consumer: StreamConsumer,
    topic: String,
}

impl KafkaSource {
    /// Create a consumer and subscribe it to the subscription's topic.
    ///
    /// # Arguments
    ///
    /// * `config` - Broker address and credentials
    /// * `subscription` - Topic and optional consumer group
    ///
    /// # Returns
    ///
    /// * `Ok(KafkaSource)` - A subscribed consumer
    /// * `Err(IngestError)` - If consumer creation or subscription fails
    pub fn new(config: &BusConfig, subscription: &Subscription) -> Result<Self, IngestError> {
        let group_id = group_id(subscription);

        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &group_id)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("session.timeout.ms", config.session_timeout_ms.to_string());

        // SASL/SSL for managed Kafka, plaintext otherwise
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            client_config
                .set("security.protocol", "SASL_SSL")
                .set("sasl.mechanisms", "PLAIN")
                .set("sasl.username", username)
                .set("sasl.password", password);

            if let Some(ca_pem) = &config.ssl_ca_pem {
                client_config.set("ssl.ca.pem", ca_pem);
            }
        }

        let consumer: StreamConsumer = client_config.create()?;
        consumer.subscribe(&[subscription.topic.as_str()])?;

        info!(
            brokers = %config.brokers,
            topic = %subscription.topic,
            group_id = %group_id,
            "Subscribed to Kafka topic"
        );

        Ok(Self {
            consumer,
            topic: subscription.topic.clone(),
        })
    }
}

#[async_trait]
impl MessageSource for KafkaSource {
    async fn receive(&mut self, timeout: Duration) -> Result<Received, IngestError> {
        match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_) => Ok(Received::Timeout),
            Ok(Err(e)) => Err(e.into()),
            Ok(Ok(msg)) => {
                debug!(
                    topic = %msg.topic(),
                    partition = msg.partition(),
                    offset = msg.offset(),
                    "Received message from Kafka"
                );
                Ok(Received::Message(RawMessage {
                    topic: msg.topic().to_string(),
                    payload: msg.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                }))
            }
        }
    }
}

impl std::fmt::Debug for KafkaSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaSource").field("topic", &self.topic).finish()
    }
}

/// Consumer group for a subscription. Without a group, a unique id is
/// generated so this consumer receives every message on the topic.
fn group_id(subscription: &Subscription) -> String {
    match subscription.group() {
        Some(group) => group.to_string(),
        None => format!("{}-{}", GENERATED_GROUP_PREFIX, Uuid::new_v4()),
    }
}
