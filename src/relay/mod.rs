//! Relay core: the classifier seam and the worker loop driving it

pub mod classifier;
pub mod worker;

pub use classifier::{Classifier, RouteDecision};
pub use worker::{dead_letter_record, DeliveryOutcome, RejectReason, RelayWorker, PREFETCH};
