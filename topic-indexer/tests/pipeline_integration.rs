//! Integration tests for the topic indexer pipeline.
//!
//! These tests use the real Orchestrator, aggregator and dispatcher but mock
//! the bus (MessageSource) and the index backend (IndexBackend/BulkSession).

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

use topic_indexer::aggregator::{BatchConfig, FlushTimerPolicy};
use topic_indexer::consumer::{IngestLimits, MessageSource, RawMessage, Received, Subscription};
use topic_indexer::dispatcher::{BulkDispatcher, DispatchSettings};
use topic_indexer::errors::IngestError;
use topic_indexer::orchestrator::{Orchestrator, OrchestratorConfig};
use topic_indexer_repository::{
    BulkErrorReport, BulkSession, IndexBackend, IndexBackendError, IndexRequest,
};
use topic_indexer_shared::{FieldPrecedence, PipelineCounters};

// Mock source that replays a fixed script, then closes
struct MockSource {
    script: VecDeque<Result<Received, IngestError>>,
}

impl MockSource {
    fn messages(topic: &str, payloads: &[&str]) -> Box<dyn MessageSource> {
        let script = payloads
            .iter()
            .map(|p| Ok(Received::Message(RawMessage::new(topic, p.as_bytes()))))
            .collect();
        Box::new(Self { script })
    }

    fn failing(message: &str) -> Box<dyn MessageSource> {
        Box::new(Self {
            script: VecDeque::from([Err(IngestError::bus(message))]),
        })
    }
}

#[async_trait::async_trait]
impl MessageSource for MockSource {
    async fn receive(&mut self, _timeout: Duration) -> Result<Received, IngestError> {
        self.script.pop_front().unwrap_or(Ok(Received::Closed))
    }
}

// Mock backend recording everything it indexes
#[derive(Default)]
struct MockBackendState {
    connects: AtomicUsize,
    allowed_connects: Option<usize>,
    reject_once: Mutex<HashSet<String>>,
    failing_flushes: AtomicUsize,
    indexed: Mutex<Vec<IndexRequest>>,
    stops: AtomicUsize,
}

impl MockBackendState {
    fn indexed_raw_messages(&self) -> Vec<String> {
        let mut raws: Vec<String> = self
            .indexed
            .lock()
            .unwrap()
            .iter()
            .filter_map(|r| r.document.raw_message().map(str::to_string))
            .collect();
        raws.sort();
        raws
    }
}

struct MockBackend {
    state: Arc<MockBackendState>,
}

#[async_trait::async_trait]
impl IndexBackend for MockBackend {
    async fn connect(&self) -> Result<Box<dyn BulkSession>, IndexBackendError> {
        let n = self.state.connects.fetch_add(1, Ordering::SeqCst) + 1;
        if matches!(self.state.allowed_connects, Some(allowed) if n > allowed) {
            return Err(IndexBackendError::connection("Mock backend unreachable"));
        }
        let (_tx, rx) = mpsc::unbounded_channel();
        Ok(Box::new(MockSession {
            state: Arc::clone(&self.state),
            queue: Vec::new(),
            reports: Some(rx),
        }))
    }
}

// Mock session queueing everything until flush
struct MockSession {
    state: Arc<MockBackendState>,
    queue: Vec<IndexRequest>,
    reports: Option<mpsc::UnboundedReceiver<BulkErrorReport>>,
}

#[async_trait::async_trait]
impl BulkSession for MockSession {
    async fn index(&mut self, request: &IndexRequest) -> Result<usize, IndexBackendError> {
        let raw = request.document.raw_message().unwrap_or_default().to_string();
        if self.state.reject_once.lock().unwrap().remove(&raw) {
            self.queue.clear();
            return Err(IndexBackendError::bulk_index("Mock rejection"));
        }
        self.queue.push(request.clone());
        Ok(0)
    }

    fn error_reports(&mut self) -> Option<mpsc::UnboundedReceiver<BulkErrorReport>> {
        self.reports.take()
    }

    async fn flush(&mut self) -> Result<usize, IndexBackendError> {
        let queued = std::mem::take(&mut self.queue);
        let failing = &self.state.failing_flushes;
        if !queued.is_empty()
            && failing
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(IndexBackendError::bulk_index("Mock bulk failure"));
        }
        let count = queued.len();
        self.state.indexed.lock().unwrap().extend(queued);
        Ok(count)
    }

    async fn stop(&mut self) {
        self.queue.clear();
        self.state.stops.fetch_add(1, Ordering::SeqCst);
    }
}

fn orchestrator_config(batch_size: usize, precedence: FieldPrecedence) -> OrchestratorConfig {
    OrchestratorConfig {
        batch: BatchConfig {
            batch_size,
            batch_timeout: Duration::from_secs(10),
            timer_policy: FlushTimerPolicy::Interval,
        },
        limits: IngestLimits::default(),
        precedence,
        report_sec: 0,
    }
}

fn build_orchestrator(
    sources: Vec<(Subscription, Box<dyn MessageSource>)>,
    state: Arc<MockBackendState>,
    config: OrchestratorConfig,
) -> (Orchestrator, Arc<PipelineCounters>) {
    let counters = Arc::new(PipelineCounters::new());
    let dispatcher = Arc::new(BulkDispatcher::new(
        Arc::new(MockBackend { state }),
        DispatchSettings {
            index: "logs".to_string(),
            reconnect_attempts: 2,
            retry_delay: Duration::from_secs(1),
        },
        Arc::clone(&counters),
    ));
    let orchestrator = Orchestrator::new(sources, dispatcher, Arc::clone(&counters), config);
    (orchestrator, counters)
}

#[tokio::test]
async fn test_orchestrator_indexes_all_topics() {
    let state = Arc::new(MockBackendState::default());
    let sources = vec![
        (
            Subscription::new("events", Some("indexers".to_string())),
            MockSource::messages("events", &["e1", "e2", "e3"]),
        ),
        (
            Subscription::new("audit", None),
            MockSource::messages("audit", &["a1", "a2"]),
        ),
    ];
    let (orchestrator, counters) = build_orchestrator(
        sources,
        state.clone(),
        orchestrator_config(2, FieldPrecedence::PayloadWins),
    );

    let result = timeout(Duration::from_secs(5), orchestrator.run()).await;
    assert!(result.is_ok(), "Orchestrator should finish once sources close");
    assert!(result.unwrap().is_ok());

    assert_eq!(state.indexed_raw_messages(), vec!["a1", "a2", "e1", "e2", "e3"]);
    assert_eq!(counters.consumed(), 5);
    assert_eq!(counters.sent(), 5);

    let indexed = state.indexed.lock().unwrap();
    for request in indexed.iter() {
        assert_eq!(request.index, "logs");
        let expected_source = match request.document.raw_message() {
            Some(raw) if raw.starts_with('e') => "events",
            _ => "audit",
        };
        assert_eq!(request.document.source(), Some(expected_source));
    }
}

#[tokio::test]
async fn test_payload_fields_overwrite_metadata() {
    let state = Arc::new(MockBackendState::default());
    let sources = vec![(
        Subscription::new("events", None),
        MockSource::messages("events", &[r#"{"user":"a","raw_message":"x"}"#]),
    )];
    let (orchestrator, _counters) = build_orchestrator(
        sources,
        state.clone(),
        orchestrator_config(5, FieldPrecedence::PayloadWins),
    );

    timeout(Duration::from_secs(5), orchestrator.run())
        .await
        .unwrap()
        .unwrap();

    let indexed = state.indexed.lock().unwrap();
    assert_eq!(indexed.len(), 1);
    assert_eq!(indexed[0].document.raw_message(), Some("x"));
    assert_eq!(indexed[0].document.get_str("user"), Some("a"));
    assert_eq!(indexed[0].document.source(), Some("events"));
}

#[tokio::test]
async fn test_metadata_wins_when_configured() {
    let payload = r#"{"user":"a","raw_message":"x"}"#;
    let state = Arc::new(MockBackendState::default());
    let sources = vec![(
        Subscription::new("events", None),
        MockSource::messages("events", &[payload]),
    )];
    let (orchestrator, _counters) = build_orchestrator(
        sources,
        state.clone(),
        orchestrator_config(5, FieldPrecedence::MetadataWins),
    );

    timeout(Duration::from_secs(5), orchestrator.run())
        .await
        .unwrap()
        .unwrap();

    let indexed = state.indexed.lock().unwrap();
    assert_eq!(indexed[0].document.raw_message(), Some(payload));
    assert_eq!(indexed[0].document.get_str("user"), Some("a"));
}

#[tokio::test]
async fn test_bus_error_ends_only_that_consumer() {
    let state = Arc::new(MockBackendState::default());
    let sources = vec![
        (
            Subscription::new("broken", None),
            MockSource::failing("Mock bus error"),
        ),
        (
            Subscription::new("events", None),
            MockSource::messages("events", &["e1", "e2"]),
        ),
    ];
    let (orchestrator, counters) = build_orchestrator(
        sources,
        state.clone(),
        orchestrator_config(5, FieldPrecedence::PayloadWins),
    );

    let result = timeout(Duration::from_secs(5), orchestrator.run()).await.unwrap();

    assert!(result.is_ok());
    assert_eq!(state.indexed_raw_messages(), vec!["e1", "e2"]);
    assert_eq!(counters.sent(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_document_is_retried() {
    let state = Arc::new(MockBackendState {
        reject_once: Mutex::new(HashSet::from(["m2".to_string()])),
        ..MockBackendState::default()
    });
    let sources = vec![(
        Subscription::new("events", None),
        MockSource::messages("events", &["m1", "m2", "m3"]),
    )];
    let (orchestrator, counters) = build_orchestrator(
        sources,
        state.clone(),
        orchestrator_config(3, FieldPrecedence::PayloadWins),
    );

    orchestrator.run().await.unwrap();

    assert_eq!(counters.sent(), 3);
    assert_eq!(state.connects.load(Ordering::SeqCst), 2);
    assert_eq!(state.indexed_raw_messages(), vec!["m1", "m2", "m3"]);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_backend_is_fatal() {
    let state = Arc::new(MockBackendState {
        allowed_connects: Some(0),
        ..MockBackendState::default()
    });
    let sources = vec![(
        Subscription::new("events", None),
        MockSource::messages("events", &["m1"]),
    )];
    let (orchestrator, counters) = build_orchestrator(
        sources,
        state.clone(),
        orchestrator_config(5, FieldPrecedence::PayloadWins),
    );

    let result = orchestrator.run().await;

    assert!(matches!(result, Err(IngestError::BackendConnectError(_))));
    assert_eq!(counters.consumed(), 1);
    assert_eq!(counters.sent(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_exhaustion_is_fatal() {
    let state = Arc::new(MockBackendState {
        allowed_connects: Some(1),
        reject_once: Mutex::new(HashSet::from(["m1".to_string()])),
        ..MockBackendState::default()
    });
    let sources = vec![(
        Subscription::new("events", None),
        MockSource::messages("events", &["m1"]),
    )];
    let (orchestrator, counters) = build_orchestrator(
        sources,
        state.clone(),
        orchestrator_config(1, FieldPrecedence::PayloadWins),
    );

    let result = orchestrator.run().await;

    assert!(matches!(result, Err(IngestError::ReconnectExhausted { attempts: 2 })));
    assert_eq!(counters.sent(), 0);
    // The first session is still stopped.
    assert_eq!(state.stops.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_flush_of_drain_batch_is_resent() {
    let state = Arc::new(MockBackendState {
        failing_flushes: AtomicUsize::new(1),
        ..MockBackendState::default()
    });
    let sources = vec![(
        Subscription::new("events", None),
        MockSource::messages("events", &["m1", "m2"]),
    )];
    let (orchestrator, counters) = build_orchestrator(
        sources,
        state.clone(),
        orchestrator_config(5, FieldPrecedence::PayloadWins),
    );

    orchestrator.run().await.unwrap();

    assert_eq!(state.indexed_raw_messages(), vec!["m1", "m2"]);
    assert_eq!(counters.sent(), 2);
    assert_eq!(state.connects.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_no_subjects_finishes_immediately() {
    let state = Arc::new(MockBackendState::default());
    let (orchestrator, counters) = build_orchestrator(
        Vec::new(),
        state.clone(),
        orchestrator_config(5, FieldPrecedence::PayloadWins),
    );

    let result = timeout(Duration::from_secs(5), orchestrator.run()).await.unwrap();

    assert!(result.is_ok());
    assert_eq!(counters.consumed(), 0);
    assert_eq!(state.connects.load(Ordering::SeqCst), 0);
}
