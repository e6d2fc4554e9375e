//! The JSON configuration file.
//!
//! Loaded once at startup. Environment variables override a few connection
//! fields so credentials can stay out of the file.

use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use topic_indexer_repository::{
    config::DEFAULT_BULK_MAX_RETRIES, BulkSessionConfig, ConnectionConfig,
};
use topic_indexer_shared::FieldPrecedence;

use crate::aggregator::{BatchConfig, FlushTimerPolicy};
use crate::consumer::{
    IngestLimits, Subscription, DEFAULT_BACKPRESSURE_GRACE, DEFAULT_INGRESS_CAPACITY,
    DEFAULT_MAX_IN_FLIGHT, DEFAULT_RECEIVE_TIMEOUT,
};
use crate::dispatcher::DispatchSettings;
use crate::orchestrator::OrchestratorConfig;
use crate::IndexingError;

/// Default Kafka broker address.
const DEFAULT_KAFKA_BROKER: &str = "localhost:9092";

/// Default offset reset policy for new consumer groups.
const DEFAULT_AUTO_OFFSET_RESET: &str = "latest";

/// Default Kafka session timeout.
const DEFAULT_SESSION_TIMEOUT_MS: u64 = 6000;

/// Default log level when `RUST_LOG` is unset.
const DEFAULT_LOG_LEVEL: &str = "info";

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Topics to consume.
    pub subjects: Vec<Subscription>,
    #[serde(default)]
    pub bus: BusConfig,
    pub elastic: ElasticConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    /// Seconds between stats reports; 0 disables them.
    #[serde(default)]
    pub report_sec: u64,
    #[serde(default)]
    pub log: LogConfig,
}

/// Message bus connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub brokers: String,
    pub auto_offset_reset: String,
    pub session_timeout_ms: u64,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssl_ca_pem: Option<String>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            brokers: DEFAULT_KAFKA_BROKER.to_string(),
            auto_offset_reset: DEFAULT_AUTO_OFFSET_RESET.to_string(),
            session_timeout_ms: DEFAULT_SESSION_TIMEOUT_MS,
            username: None,
            password: None,
            ssl_ca_pem: None,
        }
    }
}

/// Index backend connection and batching.
#[derive(Debug, Clone, Deserialize)]
pub struct ElasticConfig {
    pub index: String,
    pub hosts: Vec<String>,
    #[serde(default)]
    pub port: Option<u16>,
    /// Log every bulk request body.
    #[serde(default)]
    pub trace: bool,
    pub reconnect_attempts: u32,
    pub retry_seconds: u64,
    pub batch_size: usize,
    pub batch_timeout_sec: u64,
    #[serde(default = "default_bulk_max_retries")]
    pub bulk_max_retries: usize,
    #[serde(default)]
    pub flush_timer: FlushTimerPolicy,
}

fn default_bulk_max_retries() -> usize {
    DEFAULT_BULK_MAX_RETRIES
}

/// Ingest-side limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub max_in_flight: usize,
    pub ingress_capacity: usize,
    pub backpressure_grace_ms: u64,
    pub receive_timeout_sec: u64,
    pub field_precedence: FieldPrecedence,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            ingress_capacity: DEFAULT_INGRESS_CAPACITY,
            backpressure_grace_ms: DEFAULT_BACKPRESSURE_GRACE.as_millis() as u64,
            receive_timeout_sec: DEFAULT_RECEIVE_TIMEOUT.as_secs(),
            field_precedence: FieldPrecedence::default(),
        }
    }
}

/// Logging output.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub level: String,
    /// JSON output instead of the pretty console format.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load, apply environment overrides, and validate.
    ///
    /// # Environment Variables
    ///
    /// - `KAFKA_BROKER`: overrides `bus.brokers`
    /// - `KAFKA_USERNAME` / `KAFKA_PASSWORD`: override the SASL credentials
    /// - `KAFKA_SSL_CA_PEM`: overrides `bus.ssl_ca_pem`
    /// - `OPENSEARCH_URL`: replaces `elastic.hosts` with a single host
    pub fn load(path: impl AsRef<Path>) -> Result<Self, IndexingError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            IndexingError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let mut config = Self::from_json(&raw)?;
        config.apply_overrides(|key| env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse without overrides or validation.
    pub fn from_json(raw: &str) -> Result<Self, IndexingError> {
        serde_json::from_str(raw)
            .map_err(|e| IndexingError::config(format!("Invalid configuration: {}", e)))
    }

    /// Apply overrides from `lookup` (normally the process environment).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(brokers) = lookup("KAFKA_BROKER") {
            self.bus.brokers = brokers;
        }
        if let Some(username) = lookup("KAFKA_USERNAME") {
            self.bus.username = Some(username);
        }
        if let Some(password) = lookup("KAFKA_PASSWORD") {
            self.bus.password = Some(password);
        }
        if let Some(ca_pem) = lookup("KAFKA_SSL_CA_PEM") {
            self.bus.ssl_ca_pem = Some(ca_pem);
        }
        if let Some(url) = lookup("OPENSEARCH_URL") {
            self.elastic.hosts = vec![url];
        }
    }

    pub fn validate(&self) -> Result<(), IndexingError> {
        if self.subjects.is_empty() {
            return Err(IndexingError::config("At least one subject is required"));
        }
        if let Some(position) = self.subjects.iter().position(|s| s.topic.trim().is_empty()) {
            return Err(IndexingError::config(format!(
                "Subject {} has an empty topic",
                position
            )));
        }
        if self.elastic.hosts.is_empty() {
            return Err(IndexingError::config("elastic.hosts must not be empty"));
        }
        if self.elastic.index.trim().is_empty() {
            return Err(IndexingError::config("elastic.index must not be empty"));
        }
        if self.elastic.batch_size == 0 {
            return Err(IndexingError::config("elastic.batch_size must be positive"));
        }
        if self.elastic.batch_timeout_sec == 0 {
            return Err(IndexingError::config(
                "elastic.batch_timeout_sec must be positive",
            ));
        }
        if self.ingest.max_in_flight == 0 {
            return Err(IndexingError::config("ingest.max_in_flight must be positive"));
        }
        if self.ingest.ingress_capacity == 0 {
            return Err(IndexingError::config(
                "ingest.ingress_capacity must be positive",
            ));
        }
        if self.ingest.receive_timeout_sec == 0 {
            return Err(IndexingError::config(
                "ingest.receive_timeout_sec must be positive",
            ));
        }
        Ok(())
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            batch: self.elastic.batch_config(),
            limits: self.ingest.limits(),
            precedence: self.ingest.field_precedence,
            report_sec: self.report_sec,
        }
    }
}

impl ElasticConfig {
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            index: self.index.clone(),
            hosts: self.hosts.clone(),
            port: self.port,
            trace: self.trace,
        }
    }

    pub fn bulk_session_config(&self) -> BulkSessionConfig {
        BulkSessionConfig {
            max_retries: self.bulk_max_retries,
            retry_delay: Duration::from_secs(self.retry_seconds),
            // A full batch goes out as one bulk request.
            max_buffered_docs: self.batch_size.max(1),
        }
    }

    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            batch_size: self.batch_size,
            batch_timeout: Duration::from_secs(self.batch_timeout_sec),
            timer_policy: self.flush_timer,
        }
    }

    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            index: self.index.clone(),
            reconnect_attempts: self.reconnect_attempts,
            retry_delay: Duration::from_secs(self.retry_seconds),
        }
    }
}

impl IngestConfig {
    pub fn limits(&self) -> IngestLimits {
        IngestLimits {
            max_in_flight: self.max_in_flight,
            ingress_capacity: self.ingress_capacity,
            backpressure_grace: Duration::from_millis(self.backpressure_grace_ms),
            receive_timeout: Duration::from_secs(self.receive_timeout_sec),
        }
    }
}
