//! Message and queue definitions for the relay pipeline
//!
//! This module implements the record format exchanged between pipeline stages
//! and the fixed queue topology names.

pub mod messages;
pub mod queues;

pub use messages::*;
pub use queues::*;
