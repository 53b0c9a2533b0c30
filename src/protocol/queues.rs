//! Queue names and queue name validation
//!
//! The pipeline topology is static: every stage reads and writes these
//! durable queues on the broker's default exchange.

use thiserror::Error;

/// Raw tweets published by the mock crawler
pub const TWEET_QUEUE: &str = "tweet_queue";
/// Extracted token records (terminal queue, no consumer in this pipeline)
pub const TOKEN_QUEUE: &str = "token_queue";
/// URLs found in tweets without a token
pub const URL_QUEUE: &str = "url_queue";
/// Simulated web page content for each URL
pub const WEB_CONTENT_QUEUE: &str = "web_content_queue";
/// Web content in which no token could be found
pub const ERROR_QUEUE: &str = "error_queue";
/// Rejected deliveries together with the reason they were rejected
pub const DEAD_LETTER_QUEUE: &str = "dead_letter_queue";

/// All queues of the pipeline topology, in data-flow order
pub const ALL_QUEUES: [&str; 6] = [
    TWEET_QUEUE,
    URL_QUEUE,
    WEB_CONTENT_QUEUE,
    TOKEN_QUEUE,
    ERROR_QUEUE,
    DEAD_LETTER_QUEUE,
];

/// Maximum queue name length accepted by AMQP 0-9-1 (short string)
pub const MAX_QUEUE_NAME_LEN: usize = 255;

pub fn validate_queue_name(name: &str) -> Result<(), QueueNameError> {
    if name.is_empty() {
        return Err(QueueNameError::Empty);
    }

    if name.len() > MAX_QUEUE_NAME_LEN {
        return Err(QueueNameError::TooLong(name.len()));
    }

    // Names starting with "amq." are reserved by the broker
    if name.starts_with("amq.") {
        return Err(QueueNameError::Reserved(name.to_string()));
    }

    for ch in name.chars() {
        if !ch.is_ascii_alphanumeric() && ch != '.' && ch != '_' && ch != '-' && ch != ':' {
            return Err(QueueNameError::InvalidChar(ch));
        }
    }

    Ok(())
}

/// Queue name validation errors
#[derive(Debug, Error, PartialEq)]
pub enum QueueNameError {
    #[error("Queue name cannot be empty")]
    Empty,
    #[error("Queue name is {0} bytes, limit is 255")]
    TooLong(usize),
    #[error("Queue name '{0}' uses the reserved amq. prefix")]
    Reserved(String),
    #[error("Queue name contains invalid character: '{0}'")]
    InvalidChar(char),
}
