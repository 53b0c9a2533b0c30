//! Error types for relay workers
//!
//! Per-message errors ([`RelayError::Deserialization`], [`RelayError::Processing`])
//! settle one delivery and never stop the loop. Loop-level errors end the worker
//! and make the process exit non-zero.

use crate::config::ConfigError;
use crate::protocol::RecordError;
use thiserror::Error;

/// Main error type for relay operations
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Broker connection failed: {0}")]
    Connection(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Queue declaration failed for '{queue}': {message}")]
    Declaration { queue: String, message: String },

    #[error("Malformed message body: {0}")]
    Deserialization(#[from] RecordError),

    #[error("Processing failed: {message}")]
    Processing { message: String },

    #[error("Publish to '{queue}' failed: {message}")]
    Publish { queue: String, message: String },

    #[error("Consumer on '{queue}' was closed by the broker")]
    ConsumerClosed { queue: String },

    #[error("Connection to the broker was lost while consuming '{queue}'")]
    ConnectionLost { queue: String },

    #[error("Broker error: {0}")]
    Broker(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl RelayError {
    /// Wrap a transport error raised while connecting
    pub fn connection<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Connection(Box::new(error))
    }

    /// Wrap a transport error raised inside the consume loop
    pub fn broker<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Broker(Box::new(error))
    }

    pub fn processing<S: Into<String>>(message: S) -> Self {
        Self::Processing {
            message: message.into(),
        }
    }

    /// A publish failure inside the worker is a processing failure of the
    /// delivery being handled
    pub fn escalate_publish(self) -> Self {
        match self {
            RelayError::Publish { queue, message } => RelayError::Processing {
                message: format!("publish to '{queue}' failed: {message}"),
            },
            other => other,
        }
    }

    /// Whether this error ends the worker instead of a single delivery
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RelayError::Connection(_)
                | RelayError::ConsumerClosed { .. }
                | RelayError::ConnectionLost { .. }
                | RelayError::Broker(_)
                | RelayError::Config(_)
        )
    }
}

/// Result type for relay operations
pub type RelayResult<T> = Result<T, RelayError>;
