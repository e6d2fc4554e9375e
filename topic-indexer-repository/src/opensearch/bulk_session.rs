//! Bulk-submit session over the OpenSearch `_bulk` API.

use async_trait::async_trait;
use opensearch::{http::request::JsonBody, BulkParts, OpenSearch};
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tokio_retry::{strategy::FixedInterval, Retry};
use topic_indexer_shared::Document;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::BulkSessionConfig;
use crate::errors::IndexBackendError;
use crate::interfaces::BulkSession;
use crate::types::{BulkErrorReport, IndexRequest};

/// A queued index operation: the action line and the document it applies to.
struct PendingOperation {
    action: Value,
    document: Document,
}

/// Bulk session that queues index operations and sends them through `_bulk`.
///
/// Operations are sent when the queue reaches `max_buffered_docs` or on
/// [`flush`](BulkSession::flush). A bulk request that fails as a whole is
/// retried `max_retries` times; if it still fails, the queue is dropped, every
/// queued document is reported on the error stream and the triggering
/// [`index`](BulkSession::index) or flush returns an error. Rejected items
/// inside a successful response are only reported and still count as
/// delivered.
pub struct OpenSearchBulkSession {
    client: OpenSearch,
    url: Url,
    trace: bool,
    config: BulkSessionConfig,
    pending: Vec<PendingOperation>,
    reports_tx: Option<mpsc::UnboundedSender<BulkErrorReport>>,
    reports_rx: Option<mpsc::UnboundedReceiver<BulkErrorReport>>,
}

impl OpenSearchBulkSession {
    pub(crate) fn new(
        client: OpenSearch,
        url: Url,
        trace: bool,
        config: BulkSessionConfig,
    ) -> Self {
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        Self {
            client,
            url,
            trace,
            pending: Vec::with_capacity(config.max_buffered_docs),
            config,
            reports_tx: Some(reports_tx),
            reports_rx: Some(reports_rx),
        }
    }

    fn report(&self, error: IndexBackendError, document: Option<Document>) {
        if let Some(tx) = &self.reports_tx {
            // Nobody draining the stream is not a session failure.
            let _ = tx.send(BulkErrorReport { error, document });
        }
    }

    /// Send every queued operation in one bulk request.
    async fn send_pending(&mut self) -> Result<usize, IndexBackendError> {
        let operations = std::mem::take(&mut self.pending);
        if operations.is_empty() {
            return Ok(0);
        }

        let count = operations.len();
        debug!(url = %self.url, count = count, "Sending bulk request");

        let strategy = FixedInterval::new(self.config.retry_delay).take(self.config.max_retries);
        let client = &self.client;
        let (url, trace) = (&self.url, self.trace);
        let result = Retry::spawn(strategy, || send_bulk(client, url, trace, &operations)).await;

        match result {
            Ok(response) => {
                let failures = item_failures(&response);
                if !failures.is_empty() {
                    warn!(
                        failed = failures.len(),
                        total = count,
                        "Bulk request completed with rejected items"
                    );
                }
                for (position, reason) in failures {
                    let document = operations.get(position).map(|op| op.document.clone());
                    self.report(IndexBackendError::bulk_index(reason), document);
                }
                debug!(count = count, "Bulk request sent");
                Ok(count)
            }
            Err(e) => {
                warn!(
                    error = %e,
                    count = count,
                    attempts = self.config.max_retries + 1,
                    "Bulk request failed after retries"
                );
                for op in operations {
                    self.report(e.clone(), Some(op.document));
                }
                Err(e)
            }
        }
    }
}

#[async_trait]
impl BulkSession for OpenSearchBulkSession {
    async fn index(&mut self, request: &IndexRequest) -> Result<usize, IndexBackendError> {
        if self.reports_tx.is_none() {
            return Err(IndexBackendError::SessionClosed);
        }

        self.pending.push(PendingOperation {
            action: action_line(request),
            document: request.document.clone(),
        });

        if self.pending.len() >= self.config.max_buffered_docs {
            return self.send_pending().await;
        }

        Ok(0)
    }

    fn error_reports(&mut self) -> Option<mpsc::UnboundedReceiver<BulkErrorReport>> {
        self.reports_rx.take()
    }

    async fn flush(&mut self) -> Result<usize, IndexBackendError> {
        if self.reports_tx.is_none() {
            return Err(IndexBackendError::SessionClosed);
        }
        self.send_pending().await
    }

    async fn stop(&mut self) {
        if !self.pending.is_empty() {
            warn!(
                count = self.pending.len(),
                "Discarding unflushed documents on session stop"
            );
            self.pending.clear();
        }
        // Dropping the sender ends the error-report stream.
        self.reports_tx = None;
    }
}

/// Send one bulk request and return the parsed response body.
async fn send_bulk(
    client: &OpenSearch,
    url: &Url,
    trace: bool,
    operations: &[PendingOperation],
) -> Result<Value, IndexBackendError> {
    let mut body: Vec<JsonBody<Value>> = Vec::with_capacity(operations.len() * 2);
    for op in operations {
        body.push(JsonBody::new(op.action.clone()));
        body.push(JsonBody::new(op.document.clone().into_value()));
    }

    if trace {
        info!(
            component = "es",
            method = "POST",
            url = %format!("{}_bulk", url),
            trace = true,
            body = %render_ndjson(operations),
            "Bulk request"
        );
    }

    let response = client
        .bulk(BulkParts::None)
        .body(body)
        .send()
        .await
        .map_err(|e| IndexBackendError::bulk_index(e.to_string()))?;

    let status = response.status_code();
    if !status.is_success() {
        let error_body = response.text().await.unwrap_or_default();
        return Err(IndexBackendError::bulk_index(format!(
            "Bulk request failed with status {}: {}",
            status, error_body
        )));
    }

    response
        .json::<Value>()
        .await
        .map_err(|e| IndexBackendError::parse(e.to_string()))
}

/// Build the `_bulk` action line for a request.
fn action_line(request: &IndexRequest) -> Value {
    let mut meta = Map::new();
    meta.insert("_index".to_string(), json!(request.index));
    if let Some(id) = &request.id {
        meta.insert("_id".to_string(), json!(id));
    }
    if let Some(parent) = &request.parent {
        meta.insert("routing".to_string(), json!(parent));
    }
    json!({ "index": meta })
}

/// Positions and reasons of rejected items in a bulk response.
fn item_failures(response: &Value) -> Vec<(usize, String)> {
    if response.get("errors").and_then(Value::as_bool) != Some(true) {
        return Vec::new();
    }

    let Some(items) = response.get("items").and_then(Value::as_array) else {
        return Vec::new();
    };

    items
        .iter()
        .enumerate()
        .filter_map(|(position, item)| {
            let result = item.as_object()?.values().next()?;
            let error = result.get("error")?;
            let reason = error
                .get("reason")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            Some((position, reason))
        })
        .collect()
}

fn render_ndjson(operations: &[PendingOperation]) -> String {
    let mut out = String::new();
    for op in operations {
        out.push_str(&op.action.to_string());
        out.push('\n');
        out.push_str(&serde_json::to_string(&op.document).unwrap_or_default());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use opensearch::http::transport::{SingleNodeConnectionPool, TransportBuilder};
    use std::time::Duration;
    use topic_indexer_shared::DocumentBuilder;

    fn request() -> IndexRequest {
        request_with(br#"{"a":1}"#)
    }

    fn request_with(raw: &[u8]) -> IndexRequest {
        let doc = DocumentBuilder::default().build(raw, "events");
        IndexRequest::log_line("logs", doc, Utc::now())
    }

    /// A session whose bulk requests can never reach a server.
    fn unreachable_session(max_buffered_docs: usize) -> OpenSearchBulkSession {
        let url = Url::parse("http://127.0.0.1:1").unwrap();
        let transport = TransportBuilder::new(SingleNodeConnectionPool::new(url.clone()))
            .disable_proxy()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        let config = BulkSessionConfig {
            max_retries: 0,
            retry_delay: Duration::from_millis(1),
            max_buffered_docs,
        };
        OpenSearchBulkSession::new(OpenSearch::new(transport), url, false, config)
    }

    fn reported_messages(rx: &mut mpsc::UnboundedReceiver<BulkErrorReport>) -> Vec<String> {
        let mut messages = Vec::new();
        while let Ok(report) = rx.try_recv() {
            assert!(matches!(report.error, IndexBackendError::BulkIndexError(_)));
            let document = report.document.expect("failed send reports its document");
            messages.push(document.raw_message().unwrap_or_default().to_string());
        }
        messages
    }

    #[tokio::test]
    async fn test_index_below_threshold_only_queues() {
        let mut session = unreachable_session(3);

        assert_eq!(session.index(&request_with(b"a")).await.unwrap(), 0);
        assert_eq!(session.index(&request_with(b"b")).await.unwrap(), 0);
        assert_eq!(session.pending.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_threshold_send_loses_whole_queue() {
        let mut session = unreachable_session(2);
        let mut reports = session.error_reports().unwrap();

        assert_eq!(session.index(&request_with(b"a")).await.unwrap(), 0);
        let result = session.index(&request_with(b"b")).await;

        assert!(matches!(result, Err(IndexBackendError::BulkIndexError(_))));
        assert!(session.pending.is_empty());
        assert_eq!(reported_messages(&mut reports), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_failed_flush_reports_and_errors() {
        let mut session = unreachable_session(10);
        let mut reports = session.error_reports().unwrap();

        session.index(&request_with(b"a")).await.unwrap();
        let result = session.flush().await;

        assert!(matches!(result, Err(IndexBackendError::BulkIndexError(_))));
        assert_eq!(reported_messages(&mut reports), vec!["a"]);
        // Nothing queued, nothing to send.
        assert_eq!(session.flush().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stop_discards_queue_and_closes_session() {
        let mut session = unreachable_session(10);
        let mut reports = session.error_reports().unwrap();

        session.index(&request_with(b"a")).await.unwrap();
        session.stop().await;

        assert!(session.pending.is_empty());
        assert!(reports.recv().await.is_none());
        assert!(matches!(
            session.index(&request()).await,
            Err(IndexBackendError::SessionClosed)
        ));
        assert!(matches!(
            session.flush().await,
            Err(IndexBackendError::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn test_error_reports_taken_once() {
        let mut session = unreachable_session(1);

        assert!(session.error_reports().is_some());
        assert!(session.error_reports().is_none());
    }

    #[test]
    fn test_action_line_defaults() {
        assert_eq!(action_line(&request()), json!({"index": {"_index": "logs"}}));
    }

    #[test]
    fn test_action_line_with_id_and_parent() {
        let mut req = request();
        req.id = Some("doc-1".to_string());
        req.parent = Some("p-9".to_string());

        assert_eq!(
            action_line(&req),
            json!({"index": {"_index": "logs", "_id": "doc-1", "routing": "p-9"}})
        );
    }

    #[test]
    fn test_item_failures_none_when_no_errors() {
        let response = json!({"took": 3, "errors": false, "items": [{"index": {"status": 201}}]});
        assert!(item_failures(&response).is_empty());
    }

    #[test]
    fn test_item_failures_reports_positions() {
        let response = json!({
            "took": 3,
            "errors": true,
            "items": [
                {"index": {"status": 201}},
                {"index": {"status": 400, "error": {
                    "type": "mapper_parsing_exception",
                    "reason": "failed to parse field [count]"
                }}},
                {"index": {"status": 201}},
                {"index": {"status": 429, "error": "rejected"}}
            ]
        });

        let failures = item_failures(&response);
        assert_eq!(
            failures,
            vec![
                (1, "failed to parse field [count]".to_string()),
                (3, "\"rejected\"".to_string()),
            ]
        );
    }

    #[test]
    fn test_render_ndjson_pairs_lines() {
        let req = request();
        let ops = vec![PendingOperation {
            action: action_line(&req),
            document: req.document.clone(),
        }];

        let rendered = render_ndjson(&ops);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], r#"{"index":{"_index":"logs"}}"#);
        assert!(lines[1].contains("\"source\":\"events\""));
    }
}
