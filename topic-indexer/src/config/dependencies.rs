//! Dependency initialization and wiring for the topic indexer.

use std::sync::Arc;
use tracing::info;
use topic_indexer_repository::OpenSearchBackend;
use topic_indexer_shared::PipelineCounters;

use crate::config::AppConfig;
use crate::consumer::{KafkaSource, MessageSource, Subscription};
use crate::dispatcher::BulkDispatcher;
use crate::orchestrator::Orchestrator;
use crate::IndexingError;

/// Container for all initialized dependencies.
pub struct Dependencies {
    /// The configured orchestrator ready to run.
    pub orchestrator: Orchestrator,
}

impl Dependencies {
    /// Build the pipeline from a validated configuration.
    ///
    /// Every subject is subscribed here; a subscription failure is a
    /// configuration error. The index backend is not contacted until the
    /// first batch is dispatched.
    pub fn new(config: &AppConfig) -> Result<Self, IndexingError> {
        info!(
            brokers = %config.bus.brokers,
            hosts = ?config.elastic.hosts,
            index = %config.elastic.index,
            subjects = config.subjects.len(),
            "Initializing dependencies"
        );

        let counters = Arc::new(PipelineCounters::new());

        let backend = Arc::new(OpenSearchBackend::new(
            config.elastic.connection_config(),
            config.elastic.bulk_session_config(),
        ));
        let dispatcher = Arc::new(BulkDispatcher::new(
            backend,
            config.elastic.dispatch_settings(),
            Arc::clone(&counters),
        ));

        let mut sources: Vec<(Subscription, Box<dyn MessageSource>)> =
            Vec::with_capacity(config.subjects.len());
        for subscription in &config.subjects {
            let source = KafkaSource::new(&config.bus, subscription).map_err(|e| {
                IndexingError::config(format!(
                    "Failed to subscribe to topic '{}': {}",
                    subscription.topic, e
                ))
            })?;
            sources.push((subscription.clone(), Box::new(source)));
        }

        info!("Kafka consumers created");

        let orchestrator = Orchestrator::new(
            sources,
            dispatcher,
            counters,
            config.orchestrator_config(),
        );

        Ok(Self { orchestrator })
    }
}
