//! Per-topic receive loop.
//!
//! The loop only receives. Each message is converted and enqueued on its own
//! task so a slow aggregator never stalls the bus connection, up to the
//! in-flight limit.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn, Instrument};
use topic_indexer_shared::{Document, DocumentBuilder, PipelineCounters};

use crate::consumer::messages::{RawMessage, Received, Subscription};
use crate::consumer::MessageSource;
use crate::errors::IngestError;

/// Default bound on conversion tasks in flight.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 10_000;

/// Default ingress channel capacity.
pub const DEFAULT_INGRESS_CAPACITY: usize = 10_000;

/// Default wait for a free permit before warning about backpressure.
pub const DEFAULT_BACKPRESSURE_GRACE: Duration = Duration::from_millis(500);

/// Default receive timeout. Only a liveness check.
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(12 * 60 * 60);

/// Limits on the ingest side of the pipeline.
#[derive(Debug, Clone)]
pub struct IngestLimits {
    /// Conversion tasks allowed in flight across all consumers.
    pub max_in_flight: usize,
    /// Capacity of the channel between consumers and the aggregator.
    pub ingress_capacity: usize,
    /// How long the receive loop waits for a permit before warning.
    pub backpressure_grace: Duration,
    /// How long a single receive blocks.
    pub receive_timeout: Duration,
}

impl Default for IngestLimits {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            ingress_capacity: DEFAULT_INGRESS_CAPACITY,
            backpressure_grace: DEFAULT_BACKPRESSURE_GRACE,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
        }
    }
}

/// State shared by every topic consumer of a pipeline.
#[derive(Debug, Clone)]
pub struct ConsumerContext {
    pub builder: DocumentBuilder,
    pub ingress: mpsc::Sender<Document>,
    pub counters: Arc<PipelineCounters>,
    pub in_flight: Arc<Semaphore>,
    pub backpressure_grace: Duration,
    pub receive_timeout: Duration,
}

impl ConsumerContext {
    pub fn new(
        builder: DocumentBuilder,
        ingress: mpsc::Sender<Document>,
        counters: Arc<PipelineCounters>,
        limits: &IngestLimits,
    ) -> Self {
        Self {
            builder,
            ingress,
            counters,
            in_flight: Arc::new(Semaphore::new(limits.max_in_flight.max(1))),
            backpressure_grace: limits.backpressure_grace,
            receive_timeout: limits.receive_timeout,
        }
    }
}

/// Receive loop for one subscription.
pub struct TopicConsumer {
    subscription: Subscription,
    source: Box<dyn MessageSource>,
    context: ConsumerContext,
}

impl TopicConsumer {
    pub fn new(
        subscription: Subscription,
        source: Box<dyn MessageSource>,
        context: ConsumerContext,
    ) -> Self {
        Self {
            subscription,
            source,
            context,
        }
    }

    /// Receive until the source closes or fails.
    ///
    /// Receive timeouts are not errors. A bus error ends this consumer only
    /// and is returned to the caller.
    #[instrument(
        skip(self),
        fields(topic = %self.subscription.topic, group = self.subscription.group().unwrap_or(""))
    )]
    pub async fn run(mut self) -> Result<(), IngestError> {
        info!("Starting to consume");

        loop {
            match self.source.receive(self.context.receive_timeout).await? {
                Received::Message(message) => {
                    self.context.counters.record_consumed();
                    let permit = self.acquire_permit().await?;
                    self.hand_off(message, permit);
                }
                Received::Timeout => {
                    debug!("Receive timed out, still waiting for messages");
                }
                Received::Closed => {
                    info!("Source closed");
                    return Ok(());
                }
            }
        }
    }

    /// Convert and enqueue a message on its own task.
    fn hand_off(&self, message: RawMessage, permit: OwnedSemaphorePermit) {
        let builder = self.context.builder;
        let ingress = self.context.ingress.clone();

        tokio::spawn(
            async move {
                let document = builder.build(&message.payload, &message.topic);
                if ingress.send(document).await.is_err() {
                    debug!("Ingress channel closed, dropping document");
                }
                drop(permit);
            }
            .in_current_span(),
        );
    }

    /// Take an in-flight permit, warning once the grace period is exceeded.
    async fn acquire_permit(&self) -> Result<OwnedSemaphorePermit, IngestError> {
        let in_flight = Arc::clone(&self.context.in_flight);

        if let Ok(permit) = Arc::clone(&in_flight).try_acquire_owned() {
            return Ok(permit);
        }

        match timeout(
            self.context.backpressure_grace,
            Arc::clone(&in_flight).acquire_owned(),
        )
        .await
        {
            Ok(permit) => permit.map_err(|e| IngestError::channel(e.to_string())),
            Err(_) => {
                warn!(
                    grace_ms = self.context.backpressure_grace.as_millis() as u64,
                    "Backpressure engaged, receive loop blocked until documents drain"
                );
                in_flight
                    .acquire_owned()
                    .await
                    .map_err(|e| IngestError::channel(e.to_string()))
            }
        }
    }
}
