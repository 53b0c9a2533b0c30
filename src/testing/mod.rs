//! Testing utilities and mock implementations
//!
//! In-memory broker and fixed classifiers for exercising relay workers
//! without a running RabbitMQ.

pub mod mocks;

pub use mocks::*;
