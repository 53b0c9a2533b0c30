//! Generic at-least-once relay worker
//!
//! One worker drains one input queue through one [`Classifier`]:
//!
//! 1. receive a delivery (prefetch 1, handled sequentially)
//! 2. decode the body into a [`Record`]; malformed bodies are rejected
//! 3. classify into a [`RouteDecision`]
//! 4. publish the derived record when routed; a failed publish rejects
//! 5. acknowledge
//!
//! Rejections never requeue. When a dead-letter queue is configured the
//! original body and the failure reason are published there first.

use crate::config::WorkerSection;
use crate::error::{RelayError, RelayResult};
use crate::observability::WorkerMetrics;
use crate::protocol::{fields, Record};
use crate::relay::classifier::{Classifier, RouteDecision};
use crate::transport::{Broker, Delivery};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Instrument, Span};

/// Unacknowledged deliveries a worker may hold
pub const PREFETCH: u16 = 1;

/// Why a delivery was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Body is not a UTF-8 JSON object
    Malformed(String),
    /// Classification or publishing failed
    ProcessingFailed(String),
}

impl RejectReason {
    pub fn kind(&self) -> &'static str {
        match self {
            RejectReason::Malformed(_) => "malformed",
            RejectReason::ProcessingFailed(_) => "processing_failed",
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, RejectReason::Malformed(_))
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Malformed(detail) => write!(f, "malformed body: {detail}"),
            RejectReason::ProcessingFailed(detail) => write!(f, "processing failed: {detail}"),
        }
    }
}

impl From<&RelayError> for RejectReason {
    fn from(error: &RelayError) -> Self {
        match error {
            RelayError::Deserialization(e) => RejectReason::Malformed(error_chain(e)),
            other => RejectReason::ProcessingFailed(other.to_string()),
        }
    }
}

/// Terminal state of one delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Acknowledged; `routed_to` names the queue a derived record went to
    Acked { routed_to: Option<String> },
    /// Rejected without requeue
    Rejected {
        reason: RejectReason,
        dead_lettered: bool,
    },
    /// The ack or reject call itself failed; the broker still owns the message
    /// and will redeliver it
    SettleFailed { error: String },
}

/// Relay worker bound to one broker connection
pub struct RelayWorker<B: Broker> {
    broker: B,
    classifier: Arc<dyn Classifier>,
    input_queue: String,
    dead_letter_queue: Option<String>,
    idle_timeout: Duration,
    metrics: Arc<WorkerMetrics>,
    span: Span,
}

impl<B: Broker> RelayWorker<B> {
    pub fn new(
        broker: B,
        classifier: Arc<dyn Classifier>,
        input_queue: impl Into<String>,
        config: &WorkerSection,
    ) -> Self {
        let input_queue = input_queue.into();
        let span = crate::worker_span!(
            stage = classifier.name(),
            input_queue = %input_queue
        );
        let metrics = Arc::new(WorkerMetrics::new(classifier.name()));

        Self {
            broker,
            classifier,
            input_queue,
            dead_letter_queue: config.dead_letter_queue().map(str::to_string),
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
            metrics,
            span,
        }
    }

    /// Replace the worker's metrics, e.g. to keep a handle for reporting
    pub fn with_metrics(mut self, metrics: Arc<WorkerMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Replace the span all worker events are emitted under
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    pub fn metrics(&self) -> &Arc<WorkerMetrics> {
        &self.metrics
    }

    pub fn input_queue(&self) -> &str {
        &self.input_queue
    }

    /// Connect, declare every queue this stage touches, and start consuming.
    ///
    /// A failed declaration is logged and skipped; the broker keeps the
    /// existing queue and the worker continues with it.
    pub async fn start(&mut self) -> RelayResult<()> {
        let span = self.span.clone();
        self.connect_and_consume().instrument(span).await
    }

    /// [`start`](Self::start) that gives up once a stop is requested.
    ///
    /// Returns `Ok(false)` when the stop came first. Whatever was opened by
    /// then is closed again and the worker must not be run.
    pub async fn start_unless_stopped(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> RelayResult<bool> {
        let span = self.span.clone();
        let started = tokio::select! {
            biased;
            _ = stop_requested(shutdown) => None,
            started = self.connect_and_consume().instrument(span.clone()) => Some(started),
        };

        match started {
            Some(result) => result.map(|()| true),
            None => {
                span.in_scope(|| info!("Stop requested before the worker started"));
                self.stop().instrument(span).await;
                Ok(false)
            }
        }
    }

    async fn connect_and_consume(&mut self) -> RelayResult<()> {
        self.broker.connect().await.map_err(RelayError::connection)?;

        for queue in self.queues_to_declare() {
            if let Err(e) = self.broker.declare_queue(&queue).await {
                let err = RelayError::Declaration {
                    queue: queue.clone(),
                    message: error_chain(&e),
                };
                warn!(queue = %queue, error = %err, "Queue declaration failed, continuing");
            }
        }

        self.broker
            .consume(&self.input_queue, PREFETCH)
            .await
            .map_err(RelayError::broker)?;

        info!(
            prefetch = PREFETCH,
            dead_letter_queue = self.dead_letter_queue.as_deref().unwrap_or("disabled"),
            "Worker started, waiting for messages"
        );
        Ok(())
    }

    fn queues_to_declare(&self) -> Vec<String> {
        let mut queues = vec![self.input_queue.clone()];
        for queue in self.classifier.output_queues() {
            if !queues.iter().any(|q| q == queue) {
                queues.push(queue.to_string());
            }
        }
        if let Some(dlq) = &self.dead_letter_queue {
            if !queues.contains(dlq) {
                queues.push(dlq.clone());
            }
        }
        queues
    }

    /// Consume until a stop is requested or the consumer fails.
    ///
    /// A stop request never interrupts a delivery being handled. On every exit
    /// path the consumer is cancelled and the connection closed.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> RelayResult<()> {
        let span = self.span.clone();
        self.run_until_stopped(&mut shutdown).instrument(span).await
    }

    async fn run_until_stopped(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> RelayResult<()> {
        let result = self.consume_loop(shutdown).await;
        if let Err(e) = &result {
            error!(error = %e, "Worker loop terminated");
        }
        self.stop().await;
        result
    }

    async fn consume_loop(&mut self, shutdown: &mut watch::Receiver<bool>) -> RelayResult<()> {
        loop {
            if *shutdown.borrow() {
                info!("Stop requested");
                return Ok(());
            }

            let next = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        info!("Stop signal source dropped");
                        return Ok(());
                    }
                    continue;
                }
                next = tokio::time::timeout(self.idle_timeout, self.broker.next_delivery()) => next,
            };

            match next {
                Err(_) => {
                    if !self.broker.is_open() {
                        return Err(RelayError::ConnectionLost {
                            queue: self.input_queue.clone(),
                        });
                    }
                    debug!(
                        idle_secs = self.idle_timeout.as_secs(),
                        "No messages, connection still open"
                    );
                }
                Ok(Ok(Some(delivery))) => {
                    self.handle_delivery(delivery).await;
                }
                Ok(Ok(None)) => {
                    return Err(RelayError::ConsumerClosed {
                        queue: self.input_queue.clone(),
                    });
                }
                Ok(Err(e)) => return Err(RelayError::broker(e)),
            }
        }
    }

    async fn stop(&mut self) {
        if let Err(e) = self.broker.cancel_consumer().await {
            warn!(error = %e, "Failed to cancel consumer");
        }
        if let Err(e) = self.broker.close().await {
            warn!(error = %e, "Failed to close broker connection");
        }

        let snapshot = self.metrics.snapshot();
        info!(
            received = snapshot.deliveries.received,
            acked = snapshot.deliveries.acked,
            rejected = snapshot.deliveries.rejected,
            "Worker stopped"
        );
    }

    /// Take one delivery through decode, classify, publish and settle.
    ///
    /// Exactly one of ack or reject is issued for the delivery.
    pub async fn handle_delivery(&self, delivery: Delivery) -> DeliveryOutcome {
        let span = self.span.in_scope(|| {
            crate::delivery_span!(
                tag = delivery.tag(),
                redelivered = delivery.redelivered(),
                correlation_id = tracing::field::Empty
            )
        });
        self.settle(delivery).instrument(span).await
    }

    async fn settle(&self, delivery: Delivery) -> DeliveryOutcome {
        let started = Instant::now();
        self.metrics.delivery_received(delivery.redelivered());

        match self.process(&delivery).await {
            Ok(routed_to) => match self.broker.ack(delivery).await {
                Ok(()) => {
                    self.metrics
                        .delivery_acked(routed_to.as_deref(), started.elapsed());
                    info!(
                        outcome = "acked",
                        routed_to = routed_to.as_deref().unwrap_or("none"),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Delivery processed"
                    );
                    DeliveryOutcome::Acked { routed_to }
                }
                Err(e) => self.settle_failed("ack", &e),
            },
            Err(err) => {
                let reason = RejectReason::from(&err);
                let dead_lettered = self.dead_letter(&delivery, &reason).await;

                match self.broker.reject(delivery, false).await {
                    Ok(()) => {
                        self.metrics
                            .delivery_rejected(reason.is_malformed(), started.elapsed());
                        warn!(
                            outcome = "rejected",
                            reason = %reason,
                            dead_lettered = dead_lettered,
                            requeue = false,
                            "Delivery rejected"
                        );
                        DeliveryOutcome::Rejected {
                            reason,
                            dead_lettered,
                        }
                    }
                    Err(e) => self.settle_failed("reject", &e),
                }
            }
        }
    }

    fn settle_failed(&self, operation: &str, error: &B::Error) -> DeliveryOutcome {
        self.metrics.settle_failed();
        let error = error_chain(error);
        warn!(
            operation = operation,
            error = %error,
            "Settling delivery failed; broker will redeliver"
        );
        DeliveryOutcome::SettleFailed { error }
    }

    /// Decode, classify and publish; returns the queue a record was routed to
    async fn process(&self, delivery: &Delivery) -> RelayResult<Option<String>> {
        let record = Record::from_slice(delivery.body())?;
        let correlation_id = record.correlation_id();
        if let Some(id) = &correlation_id {
            Span::current().record("correlation_id", id.as_str());
        }

        match self.classifier.classify(&record).await {
            RouteDecision::Drop { reason } => {
                info!(reason = %reason, "Nothing to route");
                Ok(None)
            }
            RouteDecision::Route { queue, mut output } => {
                output.stamp(correlation_id.as_deref());
                self.publish(&queue, &output)
                    .await
                    .map_err(RelayError::escalate_publish)?;
                debug!(queue = %queue, "Derived record published");
                Ok(Some(queue))
            }
        }
    }

    async fn publish(&self, queue: &str, record: &Record) -> RelayResult<()> {
        match self.broker.publish_record(queue, record).await {
            Ok(()) => {
                self.metrics.message_published();
                Ok(())
            }
            Err(e) => {
                self.metrics.publish_failed();
                Err(RelayError::Publish {
                    queue: queue.to_string(),
                    message: error_chain(&e),
                })
            }
        }
    }

    /// Publish the rejected body to the dead-letter queue; true on success
    async fn dead_letter(&self, delivery: &Delivery, reason: &RejectReason) -> bool {
        let Some(dlq) = &self.dead_letter_queue else {
            return false;
        };

        let record = dead_letter_record(&self.input_queue, delivery.body(), reason);
        match self.broker.publish_record(dlq, &record).await {
            Ok(()) => {
                self.metrics.dead_lettered();
                true
            }
            Err(e) => {
                self.metrics.dead_letter_failed();
                warn!(
                    dead_letter_queue = %dlq,
                    error = %error_chain(&e),
                    "Dead-letter publish failed; rejecting anyway"
                );
                false
            }
        }
    }
}

/// Resolves once the flag is set or its sender is gone
async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Record describing a rejected delivery
pub fn dead_letter_record(input_queue: &str, body: &[u8], reason: &RejectReason) -> Record {
    let correlation_id = Record::from_slice(body)
        .ok()
        .and_then(|record| record.correlation_id());

    let mut record = Record::new()
        .with(fields::REJECTED_FROM, input_queue)
        .with(fields::REJECT_REASON, reason.to_string())
        .with(fields::ORIGINAL_BODY, String::from_utf8_lossy(body).into_owned());
    record.stamp(correlation_id.as_deref());
    record
}

/// Render an error with its sources, outermost first
fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
