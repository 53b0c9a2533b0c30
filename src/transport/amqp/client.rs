//! Impure I/O operations for the AMQP client
//!
//! This module owns the lapin connection, channel and consumer of one worker.

use super::connection::{
    build_broker_uri, endpoint, AmqpError, ConnectionState, RetryDecision, RetryPolicy,
};
use crate::config::BrokerSection;
use crate::transport::{Broker, Delivery};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicPublishOptions,
    BasicQosOptions, BasicRejectOptions, ConfirmSelectOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// AMQP delivery mode marking a message persistent
const PERSISTENT: u8 = 2;

/// AMQP reply code for a normal close
const REPLY_SUCCESS: u16 = 200;

/// AMQP client owning one connection, one channel and at most one consumer
pub struct AmqpClient {
    config: BrokerSection,
    retry_policy: RetryPolicy,
    connection: Option<Connection>,
    channel: Option<Channel>,
    consumer: Option<Consumer>,
    consumer_queue: Option<String>,
    prefetch: Option<u16>,
    state: ConnectionState,
}

impl AmqpClient {
    pub fn new(config: BrokerSection) -> Self {
        let retry_policy = RetryPolicy::from_config(&config);
        Self {
            config,
            retry_policy,
            connection: None,
            channel: None,
            consumer: None,
            consumer_queue: None,
            prefetch: None,
            state: ConnectionState::Disconnected,
        }
    }

    /// Override the connect retry policy
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Open a channel, enabling publisher confirms and re-applying QoS if needed
    async fn open_channel(&self, connection: &Connection) -> Result<Channel, AmqpError> {
        let channel = connection
            .create_channel()
            .await
            .map_err(AmqpError::ChannelFailed)?;

        if self.config.publisher_confirms {
            channel
                .confirm_select(ConfirmSelectOptions::default())
                .await
                .map_err(AmqpError::ChannelFailed)?;
        }

        if let Some(prefetch) = self.prefetch {
            channel
                .basic_qos(prefetch, BasicQosOptions::default())
                .await
                .map_err(AmqpError::ChannelFailed)?;
        }

        debug!(target: "amqp_transport", channel_id = channel.id(), "Channel opened");
        Ok(channel)
    }

    /// One connect attempt bounded by the policy timeout
    async fn connect_once(&self, uri: &str) -> Result<Connection, AmqpError> {
        let attempt = Connection::connect(uri, ConnectionProperties::default());
        match tokio::time::timeout(self.retry_policy.attempt_timeout, attempt).await {
            Ok(Ok(connection)) => Ok(connection),
            Ok(Err(e)) => Err(AmqpError::ChannelFailed(e)),
            Err(_) => Err(AmqpError::ConnectTimeout(self.retry_policy.attempt_timeout)),
        }
    }

    /// Channel for publish and settle operations, checking connection state
    fn usable_channel(&self) -> Result<&Channel, AmqpError> {
        if !self.state.is_usable() {
            return Err(AmqpError::NotConnected {
                state: self.state.clone(),
            });
        }
        self.channel.as_ref().ok_or_else(|| AmqpError::NotConnected {
            state: self.state.clone(),
        })
    }

    /// A failed declare closes the channel server-side; replace it
    async fn recover_channel(&mut self) {
        let channel_open = self
            .channel
            .as_ref()
            .is_some_and(|channel| channel.status().connected());
        if channel_open {
            return;
        }

        let Some(connection) = self.connection.as_ref() else {
            return;
        };
        let reopened = self.open_channel(connection).await;
        match reopened {
            Ok(channel) => {
                info!("Reopened channel after failed declaration");
                self.channel = Some(channel);
            }
            Err(e) => {
                error!(error = %e, "Failed to reopen channel after failed declaration");
                self.state = ConnectionState::Lost(e.to_string());
            }
        }
    }

    fn mark_lost_if_closed(&mut self) {
        let connected = self
            .connection
            .as_ref()
            .is_some_and(|connection| connection.status().connected());
        if !connected && self.state.is_usable() {
            self.state = ConnectionState::Lost("Connection closed by broker".to_string());
        }
    }
}

/// Persistent JSON message properties; the publish time travels in the AMQP
/// `timestamp` header, never in the body
fn publish_properties(published_at: DateTime<Utc>) -> BasicProperties {
    BasicProperties::default()
        .with_delivery_mode(PERSISTENT)
        .with_content_type("application/json".into())
        .with_message_id(Uuid::new_v4().to_string().into())
        .with_timestamp(u64::try_from(published_at.timestamp()).unwrap_or_default())
}

#[async_trait]
impl Broker for AmqpClient {
    type Error = AmqpError;

    /// Connect with bounded retry and backoff
    async fn connect(&mut self) -> Result<(), Self::Error> {
        let uri = build_broker_uri(&self.config)?;
        let endpoint = endpoint(&self.config);
        let mut attempt = 1u32;

        loop {
            self.state = ConnectionState::Connecting(attempt);
            info!(
                endpoint = %endpoint,
                attempt = attempt,
                max_attempts = self.retry_policy.max_attempts,
                "Connecting to broker"
            );

            let connected = self.connect_once(&uri).await;
            let failure = match connected {
                Ok(connection) => {
                    let opened = self.open_channel(&connection).await;
                    match opened {
                        Ok(channel) => {
                            self.connection = Some(connection);
                            self.channel = Some(channel);
                            self.state = ConnectionState::Connected;
                            info!(endpoint = %endpoint, "Connected to broker");
                            return Ok(());
                        }
                        Err(e) => {
                            let _ = connection.close(REPLY_SUCCESS, "channel setup failed").await;
                            e
                        }
                    }
                }
                Err(e) => e,
            };

            warn!(
                endpoint = %endpoint,
                attempt = attempt,
                error = %failure,
                "Broker connect attempt failed"
            );

            match self.retry_policy.after_failure(attempt) {
                RetryDecision::RetryAfter(delay) => {
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                RetryDecision::GiveUp => {
                    self.state = ConnectionState::Disconnected;
                    error!(endpoint = %endpoint, attempts = attempt, "Broker unreachable");
                    return Err(AmqpError::ConnectionFailed {
                        endpoint,
                        attempts: attempt,
                        source: Box::new(failure),
                    });
                }
            }
        }
    }

    async fn declare_queue(&mut self, queue: &str) -> Result<(), Self::Error> {
        let channel = self.usable_channel()?;
        let options = QueueDeclareOptions {
            durable: true,
            ..Default::default()
        };

        let declared = channel
            .queue_declare(queue, options, FieldTable::default())
            .await;
        match declared {
            Ok(_) => {
                info!(queue = %queue, "Queue declared");
                Ok(())
            }
            Err(source) => {
                self.recover_channel().await;
                Err(AmqpError::DeclareFailed {
                    queue: queue.to_string(),
                    source,
                })
            }
        }
    }

    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), Self::Error> {
        let channel = self.usable_channel()?;
        let properties = publish_properties(Utc::now());

        let confirm = channel
            .basic_publish("", queue, BasicPublishOptions::default(), payload, properties)
            .await
            .map_err(|source| AmqpError::PublishFailed {
                queue: queue.to_string(),
                source,
            })?;

        // Resolves immediately with NotRequested when confirms are disabled
        let confirmation = confirm.await.map_err(|source| AmqpError::PublishFailed {
            queue: queue.to_string(),
            source,
        })?;
        if confirmation.is_nack() {
            return Err(AmqpError::PublishNacked {
                queue: queue.to_string(),
            });
        }

        debug!(target: "amqp_transport", queue = %queue, bytes = payload.len(), "Published message");
        Ok(())
    }

    async fn consume(&mut self, queue: &str, prefetch: u16) -> Result<(), Self::Error> {
        let channel = self.usable_channel()?;
        channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await
            .map_err(|source| AmqpError::ConsumeFailed {
                queue: queue.to_string(),
                source,
            })?;

        let consumer_tag = format!("relay-{queue}-{}", Uuid::new_v4());
        let consumer = channel
            .basic_consume(
                queue,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|source| AmqpError::ConsumeFailed {
                queue: queue.to_string(),
                source,
            })?;

        info!(queue = %queue, prefetch = prefetch, consumer_tag = %consumer_tag, "Consumer started");
        self.prefetch = Some(prefetch);
        self.consumer = Some(consumer);
        self.consumer_queue = Some(queue.to_string());
        Ok(())
    }

    async fn next_delivery(&mut self) -> Result<Option<Delivery>, Self::Error> {
        let consumer = self.consumer.as_mut().ok_or(AmqpError::NoConsumer)?;
        let queue = self.consumer_queue.clone().unwrap_or_default();

        let next = consumer.next().await;
        match next {
            Some(Ok(delivery)) => Ok(Some(Delivery::new(
                delivery.delivery_tag,
                queue,
                delivery.data,
                delivery.redelivered,
            ))),
            Some(Err(source)) => {
                self.mark_lost_if_closed();
                Err(AmqpError::ConsumeFailed { queue, source })
            }
            None => {
                self.mark_lost_if_closed();
                Ok(None)
            }
        }
    }

    async fn ack(&self, delivery: Delivery) -> Result<(), Self::Error> {
        let channel = self.usable_channel()?;
        channel
            .basic_ack(delivery.tag(), BasicAckOptions::default())
            .await
            .map_err(|source| AmqpError::SettleFailed {
                tag: delivery.tag(),
                source,
            })
    }

    async fn reject(&self, delivery: Delivery, requeue: bool) -> Result<(), Self::Error> {
        let channel = self.usable_channel()?;
        channel
            .basic_reject(delivery.tag(), BasicRejectOptions { requeue })
            .await
            .map_err(|source| AmqpError::SettleFailed {
                tag: delivery.tag(),
                source,
            })
    }

    async fn cancel_consumer(&mut self) -> Result<(), Self::Error> {
        let Some(consumer) = self.consumer.take() else {
            return Ok(());
        };
        self.consumer_queue = None;

        let Some(channel) = self.channel.as_ref() else {
            return Ok(());
        };
        if !channel.status().connected() {
            return Ok(());
        }

        let consumer_tag = consumer.tag();
        channel
            .basic_cancel(consumer_tag.as_str(), BasicCancelOptions::default())
            .await
            .map_err(AmqpError::ChannelFailed)?;
        info!(consumer_tag = %consumer_tag.as_str(), "Consumer cancelled");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        if self.state == ConnectionState::Closed {
            return Ok(());
        }

        self.consumer = None;
        self.consumer_queue = None;

        if let Some(channel) = self.channel.take() {
            if channel.status().connected() {
                if let Err(e) = channel.close(REPLY_SUCCESS, "worker shutdown").await {
                    warn!(error = %e, "Channel close failed");
                }
            }
        }

        let result = match self.connection.take() {
            Some(connection) if connection.status().connected() => connection
                .close(REPLY_SUCCESS, "worker shutdown")
                .await
                .map_err(AmqpError::ChannelFailed),
            _ => Ok(()),
        };

        self.state = ConnectionState::Closed;
        info!("Broker connection closed");
        result
    }

    fn is_open(&self) -> bool {
        self.state.is_usable()
            && self
                .connection
                .as_ref()
                .is_some_and(|connection| connection.status().connected())
            && self
                .channel
                .as_ref()
                .is_some_and(|channel| channel.status().connected())
    }
}
