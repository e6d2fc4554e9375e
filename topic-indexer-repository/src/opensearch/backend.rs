//! OpenSearch backend implementation.
//!
//! Opens a verified connection to the first reachable host and hands out
//! [`OpenSearchBulkSession`]s that submit through the `_bulk` API.

use async_trait::async_trait;
use opensearch::{
    http::transport::{SingleNodeConnectionPool, TransportBuilder},
    OpenSearch,
};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{BulkSessionConfig, ConnectionConfig};
use crate::errors::IndexBackendError;
use crate::interfaces::{BulkSession, IndexBackend};
use crate::opensearch::bulk_session::OpenSearchBulkSession;

/// Port used for bare host names when none is configured.
pub const DEFAULT_PORT: u16 = 9200;

/// Timeout applied to every request sent by a client.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// OpenSearch implementation of [`IndexBackend`].
///
/// # Example
///
/// ```ignore
/// let backend = OpenSearchBackend::new(
///     ConnectionConfig {
///         index: "logs".to_string(),
///         hosts: vec!["localhost".to_string()],
///         port: Some(9200),
///         trace: false,
///     },
///     BulkSessionConfig::default(),
/// );
/// let mut session = backend.connect().await?;
/// session.index(&request).await?;
/// session.flush().await?;
/// session.stop().await;
/// ```
pub struct OpenSearchBackend {
    connection: ConnectionConfig,
    session: BulkSessionConfig,
}

impl OpenSearchBackend {
    pub fn new(connection: ConnectionConfig, session: BulkSessionConfig) -> Self {
        Self {
            connection,
            session,
        }
    }

    /// Resolve every configured host into a URL.
    fn host_urls(&self) -> Result<Vec<Url>, IndexBackendError> {
        self.connection
            .hosts
            .iter()
            .map(|host| host_url(host, self.connection.port))
            .collect()
    }

    /// Build a client for one host and check that it answers.
    async fn open_client(url: &Url) -> Result<OpenSearch, IndexBackendError> {
        let conn_pool = SingleNodeConnectionPool::new(url.clone());
        let transport = TransportBuilder::new(conn_pool)
            .disable_proxy()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| IndexBackendError::connection(e.to_string()))?;

        let client = OpenSearch::new(transport);

        let response = client
            .ping()
            .send()
            .await
            .map_err(|e| IndexBackendError::connection(e.to_string()))?;

        let status = response.status_code();
        if !status.is_success() {
            return Err(IndexBackendError::connection(format!(
                "Ping to {} failed with status {}",
                url, status
            )));
        }

        Ok(client)
    }
}

#[async_trait]
impl IndexBackend for OpenSearchBackend {
    async fn connect(&self) -> Result<Box<dyn BulkSession>, IndexBackendError> {
        info!(
            hosts = ?self.connection.hosts,
            index = %self.connection.index,
            port = ?self.connection.port,
            trace = self.connection.trace,
            "Connecting to OpenSearch"
        );

        let mut last_error = None;
        for url in self.host_urls()? {
            match Self::open_client(&url).await {
                Ok(client) => {
                    debug!(url = %url, "Connected to OpenSearch");
                    return Ok(Box::new(OpenSearchBulkSession::new(
                        client,
                        url,
                        self.connection.trace,
                        self.session.clone(),
                    )));
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "OpenSearch host unreachable");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| IndexBackendError::connection("No hosts configured")))
    }
}

/// Turn a configured host entry into a URL.
///
/// Bare host names get the `http` scheme and `port` (or [`DEFAULT_PORT`]).
/// Full URLs keep their scheme; `port` only fills in a missing port.
pub fn host_url(host: &str, port: Option<u16>) -> Result<Url, IndexBackendError> {
    let host = host.trim();
    if host.is_empty() {
        return Err(IndexBackendError::connection("Empty host"));
    }

    let (raw, fallback_port) = if host.contains("://") {
        (host.to_string(), port)
    } else {
        (
            format!("http://{}", host),
            Some(port.unwrap_or(DEFAULT_PORT)),
        )
    };

    let mut url = Url::parse(&raw)
        .map_err(|e| IndexBackendError::connection(format!("Invalid host '{}': {}", host, e)))?;

    if url.port().is_none() {
        if let Some(port) = fallback_port {
            url.set_port(Some(port)).map_err(|_| {
                IndexBackendError::connection(format!("Cannot set port on host '{}'", host))
            })?;
        }
    }

    Ok(url)
}
