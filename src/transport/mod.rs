//! Transport layer for relay workers
//!
//! This module provides the broker abstraction consumed by the relay worker
//! and its AMQP implementation.

use crate::protocol::Record;

pub mod amqp;

/// One dequeued message plus the handle needed to settle it.
///
/// A `Delivery` is not `Clone`: [`Broker::ack`] and [`Broker::reject`] take it
/// by value, so every delivery is settled at most once.
#[derive(Debug, PartialEq, Eq)]
pub struct Delivery {
    tag: u64,
    queue: String,
    body: Vec<u8>,
    redelivered: bool,
}

impl Delivery {
    pub fn new(tag: u64, queue: impl Into<String>, body: Vec<u8>, redelivered: bool) -> Self {
        Self {
            tag,
            queue: queue.into(),
            body,
            redelivered,
        }
    }

    /// Broker-assigned acknowledgement handle
    pub fn tag(&self) -> u64 {
        self.tag
    }

    /// Queue this delivery was consumed from
    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// True when the broker delivered this message before without an ack
    pub fn redelivered(&self) -> bool {
        self.redelivered
    }
}

/// Broker trait for relay workers
///
/// Abstracts the message broker so the relay worker can be driven by the
/// AMQP client in production and by an in-memory broker in tests.
#[async_trait::async_trait]
pub trait Broker: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open connection and channel
    async fn connect(&mut self) -> Result<(), Self::Error>;

    /// Declare a durable queue; a no-op when it already exists with the same durability
    async fn declare_queue(&mut self, queue: &str) -> Result<(), Self::Error>;

    /// Publish a persistent message to a queue through the default exchange
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), Self::Error>;

    /// Serialize and publish a record
    async fn publish_record(
        &self,
        queue: &str,
        record: &Record,
    ) -> Result<(), PublishRecordError<Self::Error>> {
        let payload = record.to_vec().map_err(PublishRecordError::Encode)?;
        self.publish(queue, &payload)
            .await
            .map_err(PublishRecordError::Broker)
    }

    /// Start consuming a queue with the given prefetch limit
    async fn consume(&mut self, queue: &str, prefetch: u16) -> Result<(), Self::Error>;

    /// Wait for the next delivery; `None` once the consumer has been closed
    async fn next_delivery(&mut self) -> Result<Option<Delivery>, Self::Error>;

    /// Acknowledge a delivery
    async fn ack(&self, delivery: Delivery) -> Result<(), Self::Error>;

    /// Reject a delivery, optionally asking the broker to requeue it
    async fn reject(&self, delivery: Delivery, requeue: bool) -> Result<(), Self::Error>;

    /// Stop consuming; in-flight deliveries stay owned by the caller
    async fn cancel_consumer(&mut self) -> Result<(), Self::Error>;

    /// Release channel and connection; safe to call repeatedly
    async fn close(&mut self) -> Result<(), Self::Error>;

    /// Check whether connection and channel are usable
    fn is_open(&self) -> bool;
}

/// Failure to publish a record: either encoding or the broker itself
#[derive(Debug, thiserror::Error)]
pub enum PublishRecordError<E: std::error::Error + 'static> {
    #[error("Failed to encode record")]
    Encode(#[source] crate::protocol::RecordError),
    #[error("Broker publish failed")]
    Broker(#[source] E),
}

/// Type alias for the AMQP transport
pub type AmqpTransport = amqp::AmqpClient;
