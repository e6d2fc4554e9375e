//! Bulk dispatcher for the topic indexer.
//!
//! Submits one closed batch through a fresh bulk session. Documents stay
//! unacknowledged until the session reports them delivered; when a submit or
//! the final flush fails, the dispatcher reconnects and resends every
//! unacknowledged document on the new session. Running out of reconnect
//! attempts is fatal.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, info_span, warn, Instrument};
use topic_indexer_repository::{BulkSession, IndexBackend, IndexBackendError, IndexRequest};
use topic_indexer_shared::{Document, PipelineCounters};

use crate::aggregator::{Batch, BatchDispatch};
use crate::errors::IngestError;

/// Where and how hard to try when dispatching.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Target index.
    pub index: String,
    /// Reconnect attempts after a failed submission.
    pub reconnect_attempts: u32,
    /// Delay between reconnect attempts.
    pub retry_delay: Duration,
}

/// Dispatcher that indexes batches through an [`IndexBackend`].
pub struct BulkDispatcher {
    backend: Arc<dyn IndexBackend>,
    settings: DispatchSettings,
    counters: Arc<PipelineCounters>,
}

/// The session currently in use plus the error drains of every session opened
/// for this batch.
struct ActiveSession {
    session: Box<dyn BulkSession>,
    drains: Vec<JoinHandle<()>>,
}

impl BulkDispatcher {
    pub fn new(
        backend: Arc<dyn IndexBackend>,
        settings: DispatchSettings,
        counters: Arc<PipelineCounters>,
    ) -> Self {
        Self {
            backend,
            settings,
            counters,
        }
    }

    async fn dispatch_batch(&self, batch: Batch) -> Result<(), IngestError> {
        let mut session = self.backend.connect().await.map_err(|e| {
            error!(error = %e, "Failed to connect to index backend");
            IngestError::backend_connect(e.to_string())
        })?;
        debug!("Connected to index backend");

        let drains = spawn_error_drain(session.as_mut()).into_iter().collect();
        let mut active = ActiveSession { session, drains };

        let outcome = self.submit_all(&mut active, batch.documents).await;

        debug!("Shutting down bulk session");
        active.session.stop().await;
        for drain in active.drains {
            let _ = drain.await;
        }

        if outcome.is_ok() {
            debug!("Batch dispatched");
        }
        outcome
    }

    /// Submit every document in order, then flush. Each document counts as
    /// sent once, when the session reports it delivered.
    async fn submit_all(
        &self,
        active: &mut ActiveSession,
        documents: Vec<Document>,
    ) -> Result<(), IngestError> {
        let mut unacked: VecDeque<IndexRequest> = VecDeque::with_capacity(documents.len());

        for document in documents {
            let request = IndexRequest::log_line(&self.settings.index, document, Utc::now());
            let outcome = active.session.index(&request).await;
            unacked.push_back(request);
            self.settle(active, &mut unacked, outcome, false).await?;
        }

        let outcome = active.session.flush().await;
        self.settle(active, &mut unacked, outcome, true).await
    }

    /// Acknowledge a delivery, or reconnect and resend everything still
    /// unacknowledged until the session takes it. With `flush` set the resent
    /// documents are flushed as well.
    async fn settle(
        &self,
        active: &mut ActiveSession,
        unacked: &mut VecDeque<IndexRequest>,
        mut outcome: Result<usize, IndexBackendError>,
        flush: bool,
    ) -> Result<(), IngestError> {
        let mut attempt: u32 = 1;

        loop {
            let e = match outcome {
                Ok(delivered) => {
                    self.acknowledge(unacked, delivered);
                    return Ok(());
                }
                Err(e) => e,
            };

            warn!(
                error = %e,
                attempt = attempt,
                unacked = unacked.len(),
                "Error sending documents, reconnecting"
            );
            let fresh = self.reconnect().await?;
            let mut previous = std::mem::replace(&mut active.session, fresh);
            // Anything the old session still holds is resent below.
            previous.stop().await;
            active.drains.extend(spawn_error_drain(active.session.as_mut()));
            attempt += 1;

            outcome = match self.resend(active.session.as_mut(), unacked).await {
                Ok(()) if flush => active.session.flush().await,
                Ok(()) => Ok(0),
                Err(e) => Err(e),
            };
        }
    }

    /// Submit every unacknowledged request on a fresh session, acknowledging
    /// whatever it delivers along the way.
    async fn resend(
        &self,
        session: &mut dyn BulkSession,
        unacked: &mut VecDeque<IndexRequest>,
    ) -> Result<(), IndexBackendError> {
        // Requests unacked[..queued] are held by this session.
        let mut queued = 0;
        while queued < unacked.len() {
            let delivered = session.index(&unacked[queued]).await?;
            queued += 1;
            let delivered = delivered.min(queued);
            self.acknowledge(unacked, delivered);
            queued -= delivered;
        }
        Ok(())
    }

    fn acknowledge(&self, unacked: &mut VecDeque<IndexRequest>, delivered: usize) {
        let delivered = delivered.min(unacked.len());
        if delivered > 0 {
            unacked.drain(..delivered);
            self.counters.record_sent(delivered as u64);
        }
    }

    /// Open a new session, trying up to `reconnect_attempts` times.
    async fn reconnect(&self) -> Result<Box<dyn BulkSession>, IngestError> {
        let attempts = self.settings.reconnect_attempts;

        for attempt in 1..=attempts {
            match self.backend.connect().await {
                Ok(session) => {
                    info!(attempt = attempt, "Reconnected after {} attempts", attempt);
                    return Ok(session);
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        attempt = attempt,
                        attempts = attempts,
                        "Failed to reconnect to index backend"
                    );
                    if attempt < attempts {
                        sleep(self.settings.retry_delay).await;
                    }
                }
            }
        }

        error!(attempts = attempts, "Giving up on index backend");
        Err(IngestError::ReconnectExhausted { attempts })
    }
}

#[async_trait]
impl BatchDispatch for BulkDispatcher {
    async fn dispatch(&self, batch: Batch) -> Result<(), IngestError> {
        if batch.is_empty() {
            debug!(batch_id = %batch.id, trigger = ?batch.trigger, "Skipping empty batch");
            return Ok(());
        }

        let span = info_span!(
            "dispatch",
            batch_id = %batch.id,
            size = batch.len(),
            trigger = ?batch.trigger,
            index = %self.settings.index
        );
        self.dispatch_batch(batch).instrument(span).await
    }
}

/// Log every report from the session's error stream until it ends.
fn spawn_error_drain(session: &mut dyn BulkSession) -> Option<JoinHandle<()>> {
    let mut reports = session.error_reports()?;

    Some(tokio::spawn(
        async move {
            while let Some(report) = reports.recv().await {
                warn!(
                    error = %report.error,
                    document = ?report.document.as_ref().and_then(|d| d.raw_message()),
                    "Trouble sending document to index backend"
                );
            }
        }
        .in_current_span(),
    ))
}
