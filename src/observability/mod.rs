//! Observability for relay workers
//!
//! Structured logging through `tracing` and per-worker delivery metrics.

pub mod logging;
pub mod metrics;

pub use logging::{init_default_logging, init_logging, LogFormat};
pub use metrics::{WorkerMetrics, WorkerMetricsSnapshot};

// Span macros for structured logging
pub use logging::{broker_span, delivery_span, worker_span};
