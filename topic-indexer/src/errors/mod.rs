//! Error types for the topic indexer pipeline.

use thiserror::Error;

/// Errors that can occur in the ingest pipeline.
#[derive(Error, Debug)]
pub enum IngestError {
    /// The bus connection failed while receiving. Ends one consumer.
    #[error("Bus error: {0}")]
    BusError(String),

    /// Channel communication error.
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// The index backend could not be reached when a dispatch started.
    #[error("Failed to connect to index backend: {0}")]
    BackendConnectError(String),

    /// Every reconnect attempt after a failed submission failed.
    #[error("Failed to reconnect to index backend after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    /// A dispatch task panicked or was cancelled.
    #[error("Dispatch error: {0}")]
    DispatchError(String),
}

impl IngestError {
    /// Create a bus error.
    pub fn bus(msg: impl Into<String>) -> Self {
        Self::BusError(msg.into())
    }

    /// Create a channel error.
    pub fn channel(msg: impl Into<String>) -> Self {
        Self::ChannelError(msg.into())
    }

    /// Create a backend connect error.
    pub fn backend_connect(msg: impl Into<String>) -> Self {
        Self::BackendConnectError(msg.into())
    }

    /// Create a dispatch error.
    pub fn dispatch(msg: impl Into<String>) -> Self {
        Self::DispatchError(msg.into())
    }

    /// Whether this error must terminate the process.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::BackendConnectError(_) | Self::ReconnectExhausted { .. } | Self::DispatchError(_)
        )
    }
}

impl From<rdkafka::error::KafkaError> for IngestError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        Self::BusError(err.to_string())
    }
}
