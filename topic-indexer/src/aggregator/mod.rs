//! Batch aggregator for the topic indexer.
//!
//! Collects documents from every consumer through one ingress channel and
//! closes a batch when it reaches `batch_size` or when the flush timer fires,
//! whichever comes first. Each closed batch is dispatched on its own task.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn, Instrument};
use topic_indexer_shared::Document;
use uuid::Uuid;

use crate::errors::IngestError;

/// Shortest flush timer period.
const MIN_BATCH_TIMEOUT: Duration = Duration::from_millis(1);

/// How the flush timer behaves around size-triggered flushes.
///
/// Neither policy is an idle timeout: a document arriving never restarts the
/// timer, so a steady trickle of messages still flushes every
/// `batch_timeout`. A timer restarted on each arrival would hold a partial
/// batch for as long as messages keep coming faster than the timeout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushTimerPolicy {
    /// Fixed ticker, independent of size flushes.
    #[default]
    Interval,
    /// The ticker restarts after every size flush.
    ResetOnFlush,
}

/// What closed a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// The batch reached `batch_size`.
    Size,
    /// The flush timer fired.
    Timeout,
    /// The ingress channel closed.
    Drain,
}

/// A closed batch of documents.
#[derive(Debug)]
pub struct Batch {
    pub id: Uuid,
    pub trigger: FlushTrigger,
    pub documents: Vec<Document>,
}

impl Batch {
    pub fn new(trigger: FlushTrigger, documents: Vec<Document>) -> Self {
        Self {
            id: Uuid::new_v4(),
            trigger,
            documents,
        }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// Batching thresholds.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Documents per batch before a size flush.
    pub batch_size: usize,
    /// Flush timer period.
    pub batch_timeout: Duration,
    pub timer_policy: FlushTimerPolicy,
}

/// Receives closed batches.
#[async_trait]
pub trait BatchDispatch: Send + Sync {
    /// Deliver one batch. A fatal error stops the pipeline.
    async fn dispatch(&self, batch: Batch) -> Result<(), IngestError>;
}

/// Single-task loop that owns the open batch.
pub struct BatchAggregator {
    config: BatchConfig,
    dispatcher: Arc<dyn BatchDispatch>,
    open: Vec<Document>,
    in_flight: JoinSet<Result<(), IngestError>>,
}

impl BatchAggregator {
    pub fn new(config: BatchConfig, dispatcher: Arc<dyn BatchDispatch>) -> Self {
        let config = BatchConfig {
            batch_size: config.batch_size.max(1),
            batch_timeout: config.batch_timeout.max(MIN_BATCH_TIMEOUT),
            ..config
        };

        Self {
            open: Vec::with_capacity(config.batch_size),
            config,
            dispatcher,
            in_flight: JoinSet::new(),
        }
    }

    /// Batch documents until the ingress channel closes.
    ///
    /// On close the remainder is flushed and in-flight dispatches are awaited.
    /// Returns early with the first fatal dispatch error.
    #[instrument(skip_all, name = "aggregator")]
    pub async fn run(mut self, mut ingress: mpsc::Receiver<Document>) -> Result<(), IngestError> {
        info!(
            batch_size = self.config.batch_size,
            batch_timeout_secs = self.config.batch_timeout.as_secs_f64(),
            timer_policy = ?self.config.timer_policy,
            "Starting to batch documents"
        );

        let period = self.config.batch_timeout;
        let mut flush_timer = interval_at(Instant::now() + period, period);
        flush_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                received = ingress.recv() => {
                    match received {
                        Some(document) => {
                            self.open.push(document);
                            if self.open.len() >= self.config.batch_size {
                                debug!(size = self.open.len(), "Flushing batch at size threshold");
                                self.flush(FlushTrigger::Size);
                                if self.config.timer_policy == FlushTimerPolicy::ResetOnFlush {
                                    flush_timer.reset();
                                }
                            }
                        }
                        None => {
                            info!(remaining = self.open.len(), "Ingress closed, draining");
                            self.flush(FlushTrigger::Drain);
                            break;
                        }
                    }
                }
                _ = flush_timer.tick() => {
                    debug!(size = self.open.len(), "Flushing batch on timeout");
                    self.flush(FlushTrigger::Timeout);
                }
                Some(joined) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    Self::check_dispatch(joined)?;
                }
            }
        }

        while let Some(joined) = self.in_flight.join_next().await {
            Self::check_dispatch(joined)?;
        }

        info!("Aggregator finished");
        Ok(())
    }

    /// Close the open batch and dispatch it on its own task.
    fn flush(&mut self, trigger: FlushTrigger) {
        let fresh = Vec::with_capacity(self.config.batch_size);
        let documents = std::mem::replace(&mut self.open, fresh);
        let batch = Batch::new(trigger, documents);
        let dispatcher = Arc::clone(&self.dispatcher);

        self.in_flight
            .spawn(async move { dispatcher.dispatch(batch).await }.in_current_span());
    }

    fn check_dispatch(
        joined: Result<Result<(), IngestError>, JoinError>,
    ) -> Result<(), IngestError> {
        match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) if e.is_fatal() => {
                error!(error = %e, "Fatal dispatch error");
                Err(e)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Dispatch failed");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Dispatch task failed");
                Err(IngestError::dispatch(e.to_string()))
            }
        }
    }
}
