//! Orchestrator module for the topic indexer.
//!
//! Wires the consumers, the aggregator and the stats reporter together and
//! decides when the pipeline is done.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info, instrument, warn};
use topic_indexer_shared::{Document, DocumentBuilder, FieldPrecedence, PipelineCounters};

use crate::aggregator::{BatchAggregator, BatchConfig, BatchDispatch};
use crate::consumer::{ConsumerContext, IngestLimits, MessageSource, Subscription, TopicConsumer};
use crate::errors::IngestError;
use crate::stats::StatsReporter;

/// Configuration for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub batch: BatchConfig,
    pub limits: IngestLimits,
    pub precedence: FieldPrecedence,
    /// Seconds between stats reports; 0 disables them.
    pub report_sec: u64,
}

/// Orchestrator that runs the pipeline.
///
/// `run` returns when:
/// - the aggregator fails with a fatal dispatch error (returned),
/// - every consumer has finished and the aggregator has drained,
/// - Ctrl-C is received (in-flight work is abandoned).
pub struct Orchestrator {
    sources: Vec<(Subscription, Box<dyn MessageSource>)>,
    dispatcher: Arc<dyn BatchDispatch>,
    counters: Arc<PipelineCounters>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        sources: Vec<(Subscription, Box<dyn MessageSource>)>,
        dispatcher: Arc<dyn BatchDispatch>,
        counters: Arc<PipelineCounters>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            sources,
            dispatcher,
            counters,
            config,
        }
    }

    /// Run the pipeline until it finishes, fails or is interrupted.
    #[instrument(skip(self), fields(subjects = self.sources.len()))]
    pub async fn run(self) -> Result<(), IngestError> {
        info!("Starting topic indexer orchestrator");

        let (ingress_tx, ingress_rx) =
            mpsc::channel::<Document>(self.config.limits.ingress_capacity.max(1));

        let stats = tokio::spawn(
            StatsReporter::new(self.config.report_sec, Arc::clone(&self.counters)).run(),
        );

        let aggregator = BatchAggregator::new(self.config.batch.clone(), self.dispatcher);
        let mut aggregator_handle = tokio::spawn(aggregator.run(ingress_rx));

        let context = ConsumerContext::new(
            DocumentBuilder::new(self.config.precedence),
            ingress_tx,
            Arc::clone(&self.counters),
            &self.config.limits,
        );

        let mut consumers = JoinSet::new();
        for (subscription, source) in self.sources {
            let consumer = TopicConsumer::new(subscription.clone(), source, context.clone());
            consumers.spawn(async move { (subscription, consumer.run().await) });
        }
        // Consumers and their conversion tasks now hold the only senders.
        drop(context);

        info!("Ready to consume");

        let result = loop {
            tokio::select! {
                joined = &mut aggregator_handle => {
                    break aggregator_outcome(joined);
                }
                Some(joined) = consumers.join_next() => {
                    log_consumer_exit(joined);
                    if consumers.is_empty() {
                        info!("All consumers finished, shutting down");
                        break aggregator_outcome((&mut aggregator_handle).await);
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    consumers.abort_all();
                    aggregator_handle.abort();
                    break Ok(());
                }
            }
        };

        stats.abort();

        let totals = self.counters.snapshot();
        info!(
            messages_rx = totals.consumed,
            messages_tx = totals.sent,
            "Orchestrator shutdown complete"
        );

        result
    }
}

fn aggregator_outcome(
    joined: Result<Result<(), IngestError>, JoinError>,
) -> Result<(), IngestError> {
    match joined {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, "Aggregator task failed");
            Err(IngestError::dispatch(e.to_string()))
        }
    }
}

fn log_consumer_exit(joined: Result<(Subscription, Result<(), IngestError>), JoinError>) {
    match joined {
        Ok((subscription, Ok(()))) => {
            info!(
                topic = %subscription.topic,
                group = subscription.group().unwrap_or(""),
                "Finished consuming"
            );
        }
        Ok((subscription, Err(e))) => {
            warn!(
                topic = %subscription.topic,
                group = subscription.group().unwrap_or(""),
                error = %e,
                "Problem while consuming messages"
            );
        }
        Err(e) => {
            error!(error = %e, "Consumer task failed");
        }
    }
}
