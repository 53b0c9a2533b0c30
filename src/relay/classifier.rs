//! Classifier capability plugged into a relay worker

use crate::protocol::Record;
use async_trait::async_trait;

/// What a classifier wants done with one input record
#[derive(Debug, Clone, PartialEq)]
pub enum RouteDecision {
    /// Publish `output` to `queue`, then acknowledge the input
    Route { queue: String, output: Record },
    /// Publish nothing and acknowledge the input
    Drop { reason: String },
}

impl RouteDecision {
    pub fn route(queue: impl Into<String>, output: impl Into<Record>) -> Self {
        Self::Route {
            queue: queue.into(),
            output: output.into(),
        }
    }

    pub fn dropped(reason: impl Into<String>) -> Self {
        Self::Drop {
            reason: reason.into(),
        }
    }

    /// Destination queue, if any
    pub fn queue(&self) -> Option<&str> {
        match self {
            RouteDecision::Route { queue, .. } => Some(queue),
            RouteDecision::Drop { .. } => None,
        }
    }
}

/// Maps one input record to a routing decision.
///
/// Implementations cannot fail: a record the classifier cannot use becomes a
/// [`RouteDecision::Drop`] or a record routed to an error queue. The same input
/// always yields the same decision, so redelivered messages are handled alike.
/// Async so that a stage may wait (the URL fetcher simulates network latency).
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Stage name used in logs and metrics
    fn name(&self) -> &str;

    /// Every queue this classifier may route to, declared at worker start
    fn output_queues(&self) -> Vec<&'static str>;

    async fn classify(&self, record: &Record) -> RouteDecision;
}
