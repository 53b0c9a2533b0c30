//! Mock implementations for testing
//!
//! [`InMemoryBroker`] implements [`Broker`] over in-process queues so relay
//! workers can be exercised without RabbitMQ. Clones share state: a test keeps
//! one clone to seed queues and inspect results while the worker owns another.

use crate::protocol::Record;
use crate::relay::classifier::{Classifier, RouteDecision};
use crate::transport::{Broker, Delivery};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

/// Poll interval of [`InMemoryBroker::next_delivery`] while the queue is empty
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Errors raised by the in-memory broker
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MockBrokerError {
    #[error("Mock connection failure")]
    ConnectFailed,
    #[error("Not connected")]
    NotConnected,
    #[error("Mock declare failure for '{0}'")]
    DeclareFailed(String),
    #[error("Mock publish failure for '{0}'")]
    PublishFailed(String),
    #[error("No consumer started")]
    NoConsumer,
    #[error("Mock settle failure for delivery {0}")]
    SettleFailed(u64),
    #[error("Unknown delivery tag {0}")]
    UnknownTag(u64),
}

/// A message sitting in a queue or held unacknowledged by a consumer
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub queue: String,
    pub body: Vec<u8>,
    pub redelivered: bool,
}

/// A rejected delivery as the broker saw it
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedMessage {
    pub queue: String,
    pub body: Vec<u8>,
    pub requeue: bool,
}

/// Failure injection switches
#[derive(Debug, Default)]
struct Failures {
    connect: bool,
    connect_delay: Option<Duration>,
    declare: HashSet<String>,
    publish: HashSet<String>,
    settle: bool,
}

#[derive(Debug, Default)]
struct BrokerState {
    queues: HashMap<String, VecDeque<StoredMessage>>,
    declared: Vec<String>,
    unacked: HashMap<u64, StoredMessage>,
    acked: Vec<StoredMessage>,
    rejected: Vec<RejectedMessage>,
    unroutable: Vec<(String, Vec<u8>)>,
    next_tag: u64,
    max_unacked: usize,
    consumer_closed: bool,
    connection_lost: bool,
    close_calls: usize,
    cancel_calls: usize,
    failures: Failures,
}

/// In-memory broker shared between a worker and the test driving it
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    connected: bool,
    consuming: Option<(String, u16)>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Broker whose `connect` always fails
    pub fn unreachable() -> Self {
        let broker = Self::new();
        if let Ok(mut state) = broker.state.try_lock() {
            state.failures.connect = true;
        }
        broker
    }

    /// Put a message on a queue, creating the queue if needed
    pub async fn enqueue(&self, queue: &str, body: &[u8]) {
        let mut state = self.state.lock().await;
        state
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back(StoredMessage {
                queue: queue.to_string(),
                body: body.to_vec(),
                redelivered: false,
            });
    }

    pub async fn enqueue_record(&self, queue: &str, record: &Record) {
        let body = record.to_vec().unwrap_or_default();
        self.enqueue(queue, &body).await;
    }

    /// Bodies currently waiting in a queue, in order
    pub async fn messages_in(&self, queue: &str) -> Vec<Vec<u8>> {
        let state = self.state.lock().await;
        state
            .queues
            .get(queue)
            .map(|messages| messages.iter().map(|m| m.body.clone()).collect())
            .unwrap_or_default()
    }

    /// Records currently waiting in a queue; undecodable bodies are skipped
    pub async fn records_in(&self, queue: &str) -> Vec<Record> {
        self.messages_in(queue)
            .await
            .iter()
            .filter_map(|body| Record::from_slice(body).ok())
            .collect()
    }

    pub async fn queue_len(&self, queue: &str) -> usize {
        let state = self.state.lock().await;
        state.queues.get(queue).map_or(0, VecDeque::len)
    }

    pub async fn declared_queues(&self) -> Vec<String> {
        self.state.lock().await.declared.clone()
    }

    pub async fn acked(&self) -> Vec<StoredMessage> {
        self.state.lock().await.acked.clone()
    }

    pub async fn rejected(&self) -> Vec<RejectedMessage> {
        self.state.lock().await.rejected.clone()
    }

    /// Messages published to queues that were never declared
    pub async fn unroutable(&self) -> Vec<(String, Vec<u8>)> {
        self.state.lock().await.unroutable.clone()
    }

    pub async fn unacked_count(&self) -> usize {
        self.state.lock().await.unacked.len()
    }

    /// Highest number of deliveries ever held unacknowledged at once
    pub async fn max_unacked(&self) -> usize {
        self.state.lock().await.max_unacked
    }

    pub async fn close_calls(&self) -> usize {
        self.state.lock().await.close_calls
    }

    pub async fn cancel_calls(&self) -> usize {
        self.state.lock().await.cancel_calls
    }

    /// Wait until a queue is empty and nothing is unacknowledged
    pub async fn wait_until_drained(&self, queue: &str, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let state = self.state.lock().await;
                let waiting = state.queues.get(queue).map_or(0, VecDeque::len);
                if waiting == 0 && state.unacked.is_empty() {
                    return true;
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    pub async fn fail_declare(&self, queue: &str) {
        self.state
            .lock()
            .await
            .failures
            .declare
            .insert(queue.to_string());
    }

    pub async fn fail_publish(&self, queue: &str) {
        self.state
            .lock()
            .await
            .failures
            .publish
            .insert(queue.to_string());
    }

    /// Make `connect` hang for a while, like a broker still booting
    pub async fn delay_connect(&self, delay: Duration) {
        self.state.lock().await.failures.connect_delay = Some(delay);
    }

    pub async fn fail_settle(&self) {
        self.state.lock().await.failures.settle = true;
    }

    /// End the consumer stream as if the broker cancelled it
    pub async fn close_consumer(&self) {
        self.state.lock().await.consumer_closed = true;
    }

    /// Drop the connection as if the broker went away
    pub async fn lose_connection(&self) {
        let mut state = self.state.lock().await;
        state.connection_lost = true;
        state.consumer_closed = true;
    }

    async fn ensure_connected(&self) -> Result<(), MockBrokerError> {
        if self.connected && !self.state.lock().await.connection_lost {
            Ok(())
        } else {
            Err(MockBrokerError::NotConnected)
        }
    }

    /// Pop the next message if prefetch allows; `Err` when the stream ended
    async fn try_take(&self, queue: &str, prefetch: u16) -> Result<Option<Delivery>, ()> {
        let mut state = self.state.lock().await;
        if state.consumer_closed {
            return Err(());
        }
        if prefetch > 0 && state.unacked.len() >= usize::from(prefetch) {
            return Ok(None);
        }

        let Some(message) = state.queues.get_mut(queue).and_then(VecDeque::pop_front) else {
            return Ok(None);
        };

        state.next_tag += 1;
        let tag = state.next_tag;
        let delivery = Delivery::new(tag, queue, message.body.clone(), message.redelivered);
        state.unacked.insert(tag, message);
        state.max_unacked = state.max_unacked.max(state.unacked.len());
        Ok(Some(delivery))
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    type Error = MockBrokerError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        let (fails, delay) = {
            let state = self.state.lock().await;
            (state.failures.connect, state.failures.connect_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fails {
            return Err(MockBrokerError::ConnectFailed);
        }
        self.connected = true;
        Ok(())
    }

    async fn declare_queue(&mut self, queue: &str) -> Result<(), Self::Error> {
        self.ensure_connected().await?;
        let mut state = self.state.lock().await;
        if state.failures.declare.contains(queue) {
            return Err(MockBrokerError::DeclareFailed(queue.to_string()));
        }
        if !state.declared.iter().any(|q| q == queue) {
            state.declared.push(queue.to_string());
        }
        state.queues.entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), Self::Error> {
        self.ensure_connected().await?;
        let mut state = self.state.lock().await;
        if state.failures.publish.contains(queue) {
            return Err(MockBrokerError::PublishFailed(queue.to_string()));
        }

        // The default exchange drops messages for queues that do not exist
        match state.queues.get_mut(queue) {
            Some(messages) => messages.push_back(StoredMessage {
                queue: queue.to_string(),
                body: payload.to_vec(),
                redelivered: false,
            }),
            None => state.unroutable.push((queue.to_string(), payload.to_vec())),
        }
        Ok(())
    }

    async fn consume(&mut self, queue: &str, prefetch: u16) -> Result<(), Self::Error> {
        self.ensure_connected().await?;
        self.consuming = Some((queue.to_string(), prefetch));
        Ok(())
    }

    async fn next_delivery(&mut self) -> Result<Option<Delivery>, Self::Error> {
        let (queue, prefetch) = self.consuming.clone().ok_or(MockBrokerError::NoConsumer)?;
        loop {
            match self.try_take(&queue, prefetch).await {
                Ok(Some(delivery)) => return Ok(Some(delivery)),
                Ok(None) => tokio::time::sleep(POLL_INTERVAL).await,
                Err(()) => return Ok(None),
            }
        }
    }

    async fn ack(&self, delivery: Delivery) -> Result<(), Self::Error> {
        self.ensure_connected().await?;
        let mut state = self.state.lock().await;
        if state.failures.settle {
            return Err(MockBrokerError::SettleFailed(delivery.tag()));
        }
        let message = state
            .unacked
            .remove(&delivery.tag())
            .ok_or(MockBrokerError::UnknownTag(delivery.tag()))?;
        state.acked.push(message);
        Ok(())
    }

    async fn reject(&self, delivery: Delivery, requeue: bool) -> Result<(), Self::Error> {
        self.ensure_connected().await?;
        let mut state = self.state.lock().await;
        if state.failures.settle {
            return Err(MockBrokerError::SettleFailed(delivery.tag()));
        }
        let message = state
            .unacked
            .remove(&delivery.tag())
            .ok_or(MockBrokerError::UnknownTag(delivery.tag()))?;

        state.rejected.push(RejectedMessage {
            queue: message.queue.clone(),
            body: message.body.clone(),
            requeue,
        });
        if requeue {
            let queue = message.queue.clone();
            state.queues.entry(queue).or_default().push_front(StoredMessage {
                redelivered: true,
                ..message
            });
        }
        Ok(())
    }

    async fn cancel_consumer(&mut self) -> Result<(), Self::Error> {
        self.consuming = None;
        self.state.lock().await.cancel_calls += 1;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        self.consuming = None;
        self.connected = false;
        self.state.lock().await.close_calls += 1;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.connected
            && self
                .state
                .try_lock()
                .map(|state| !state.connection_lost)
                .unwrap_or(true)
    }
}

/// Classifier with a fixed answer, counting its calls
#[derive(Debug)]
pub struct StaticClassifier {
    route_to: Option<&'static str>,
    delay: Duration,
    calls: AtomicUsize,
}

impl StaticClassifier {
    /// Routes every record to `queue` with a one-field output record
    pub fn routing(queue: &'static str) -> Self {
        Self {
            route_to: Some(queue),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    /// Drops every record
    pub fn dropping() -> Self {
        Self {
            route_to: None,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    /// Sleep before answering, to keep a delivery in flight
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Classifier for StaticClassifier {
    fn name(&self) -> &str {
        "static"
    }

    fn output_queues(&self) -> Vec<&'static str> {
        self.route_to.into_iter().collect()
    }

    async fn classify(&self, _record: &Record) -> RouteDecision {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.route_to {
            Some(queue) => {
                RouteDecision::route(queue, Record::new().with("classified_by", "static"))
            }
            None => RouteDecision::dropped("static classifier drops everything"),
        }
    }
}
