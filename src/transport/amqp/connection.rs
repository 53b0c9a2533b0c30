//! Pure connection state management for the AMQP client
//!
//! This module contains the connection state machine, connect retry policy,
//! error type and broker URI construction. Nothing here performs I/O.

use crate::config::BrokerSection;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Connection state for the AMQP client
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Never connected
    Disconnected,
    /// Connect attempt in progress (attempt number, starting at 1)
    Connecting(u32),
    /// Connection and channel open
    Connected,
    /// Connection lost after having been established
    Lost(String),
    /// Closed by the owner; terminal
    Closed,
}

impl ConnectionState {
    /// Check if state allows publishing, consuming and settling deliveries
    pub fn is_usable(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Bounded connect retry policy
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total connect attempts, including the first
    pub max_attempts: u32,
    /// Backoff pattern in milliseconds, applied between attempts
    pub backoff_pattern: Vec<u64>,
    /// Delay to use after the pattern is exhausted
    pub sustained_delay: u64,
    /// Timeout for one connect attempt
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_pattern: vec![250, 500, 1000, 2000],
            sustained_delay: 2000,
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &BrokerSection) -> Self {
        Self {
            max_attempts: config.connect_attempts.max(1),
            attempt_timeout: Duration::from_secs(config.connect_timeout_secs),
            ..Default::default()
        }
    }

    /// Delay before retrying after the given failed attempt
    pub fn backoff_delay(&self, failed_attempt: u32) -> Duration {
        let index = failed_attempt.saturating_sub(1) as usize;
        let millis = self
            .backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay);
        Duration::from_millis(millis)
    }

    /// Decide what to do after a failed connect attempt
    pub fn after_failure(&self, failed_attempt: u32) -> RetryDecision {
        if failed_attempt >= self.max_attempts {
            RetryDecision::GiveUp
        } else {
            RetryDecision::RetryAfter(self.backoff_delay(failed_attempt))
        }
    }

    /// Upper bound on time spent sleeping between attempts
    pub fn total_backoff(&self) -> Duration {
        (1..self.max_attempts)
            .map(|attempt| self.backoff_delay(attempt))
            .sum()
    }
}

/// Outcome of a failed connect attempt
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// AMQP transport errors
#[derive(Debug, Error)]
pub enum AmqpError {
    #[error("Connection to {endpoint} failed after {attempts} attempt(s)")]
    ConnectionFailed {
        endpoint: String,
        attempts: u32,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Connect attempt timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("Channel operation failed")]
    ChannelFailed(#[source] lapin::Error),
    #[error("Declaring queue '{queue}' failed")]
    DeclareFailed {
        queue: String,
        #[source]
        source: lapin::Error,
    },
    #[error("Publishing to '{queue}' failed")]
    PublishFailed {
        queue: String,
        #[source]
        source: lapin::Error,
    },
    #[error("Broker refused message published to '{queue}'")]
    PublishNacked { queue: String },
    #[error("Consuming from '{queue}' failed")]
    ConsumeFailed {
        queue: String,
        #[source]
        source: lapin::Error,
    },
    #[error("Settling delivery {tag} failed")]
    SettleFailed {
        tag: u64,
        #[source]
        source: lapin::Error,
    },
    #[error("Invalid broker URI: {0}")]
    InvalidBrokerUri(String),
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
    #[error("No consumer started")]
    NoConsumer,
}

/// Build the AMQP URI for a broker section.
///
/// The virtual host is percent-encoded as a single path segment, so the
/// default vhost `/` becomes `%2F`.
pub fn build_broker_uri(config: &BrokerSection) -> Result<String, AmqpError> {
    let base = format!("amqp://{}:{}", config.host.trim(), config.port);
    let mut url = Url::parse(&base).map_err(|_| AmqpError::InvalidBrokerUri(base.clone()))?;
    if url.host_str().map_or(true, str::is_empty) {
        return Err(AmqpError::InvalidBrokerUri(base));
    }

    url.path_segments_mut()
        .map_err(|_| AmqpError::InvalidBrokerUri(base.clone()))?
        .clear()
        .push(&config.vhost);
    Ok(url.to_string())
}

/// Host and port for log lines
pub fn endpoint(config: &BrokerSection) -> String {
    format!("{}:{}", config.host, config.port)
}
