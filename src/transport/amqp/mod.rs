//! AMQP 0-9-1 broker client for relay workers
//!
//! The module separates pure state handling from I/O:
//!
//! - [`connection`] - Connection state, connect retry policy, errors and URI building
//! - [`client`] - lapin-backed [`Broker`](crate::transport::Broker) implementation
//!
//! # Usage
//!
//! ```rust,no_run
//! use tweet_relay::config::BrokerSection;
//! use tweet_relay::transport::amqp::AmqpClient;
//! use tweet_relay::transport::Broker;
//!
//! # tokio_test::block_on(async {
//! let mut client = AmqpClient::new(BrokerSection::default());
//! client.connect().await?;
//! client.declare_queue("tweet_queue").await?;
//! client.publish("tweet_queue", br#"{"id":"t1","text":"hello"}"#).await?;
//! client.close().await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;

pub use client::AmqpClient;
pub use connection::{AmqpError, ConnectionState, RetryDecision, RetryPolicy};
