//! Per-worker metrics
//!
//! Atomic counters for the delivery lifecycle plus mutex-protected timing and
//! routing data. Each worker owns one [`WorkerMetrics`] (usually behind an
//! `Arc` so the binary can log a snapshot on shutdown); nothing is global.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Processing times kept for percentile calculation
const MAX_PROCESSING_SAMPLES: usize = 1000;

/// Delivery counters and timings for one relay worker
pub struct WorkerMetrics {
    stage: String,

    deliveries_received: AtomicU64,
    deliveries_acked: AtomicU64,
    deliveries_rejected: AtomicU64,
    deliveries_dropped: AtomicU64,
    malformed_bodies: AtomicU64,
    redeliveries: AtomicU64,

    messages_published: AtomicU64,
    publish_failures: AtomicU64,
    dead_lettered: AtomicU64,
    dead_letter_failures: AtomicU64,
    settle_failures: AtomicU64,

    in_flight: AtomicU64,
    max_in_flight: AtomicU64,
    started_at: AtomicU64,

    // milliseconds
    processing_times: Mutex<Vec<u64>>,
    routed_by_queue: Mutex<HashMap<String, u64>>,
}

impl WorkerMetrics {
    pub fn new(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            deliveries_received: AtomicU64::new(0),
            deliveries_acked: AtomicU64::new(0),
            deliveries_rejected: AtomicU64::new(0),
            deliveries_dropped: AtomicU64::new(0),
            malformed_bodies: AtomicU64::new(0),
            redeliveries: AtomicU64::new(0),
            messages_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            dead_lettered: AtomicU64::new(0),
            dead_letter_failures: AtomicU64::new(0),
            settle_failures: AtomicU64::new(0),
            in_flight: AtomicU64::new(0),
            max_in_flight: AtomicU64::new(0),
            started_at: AtomicU64::new(current_timestamp()),
            processing_times: Mutex::new(Vec::new()),
            routed_by_queue: Mutex::new(HashMap::new()),
        }
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    pub fn delivery_received(&self, redelivered: bool) {
        self.deliveries_received.fetch_add(1, Ordering::Relaxed);
        if redelivered {
            self.redeliveries.fetch_add(1, Ordering::Relaxed);
        }
        let current = self.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        self.max_in_flight.fetch_max(current, Ordering::Relaxed);
    }

    /// Delivery acknowledged; `routed_to` is `None` for a dropped record
    pub fn delivery_acked(&self, routed_to: Option<&str>, duration: Duration) {
        self.deliveries_acked.fetch_add(1, Ordering::Relaxed);
        match routed_to {
            Some(queue) => {
                if let Ok(mut routed) = self.routed_by_queue.lock() {
                    *routed.entry(queue.to_string()).or_insert(0) += 1;
                }
            }
            None => {
                self.deliveries_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.delivery_settled(duration);
    }

    pub fn delivery_rejected(&self, malformed: bool, duration: Duration) {
        self.deliveries_rejected.fetch_add(1, Ordering::Relaxed);
        if malformed {
            self.malformed_bodies.fetch_add(1, Ordering::Relaxed);
        }
        self.delivery_settled(duration);
    }

    /// Terminal call failed; the broker still owns the delivery but this
    /// worker is done with it
    pub fn settle_failed(&self) {
        self.settle_failures.fetch_add(1, Ordering::Relaxed);
        self.release_in_flight();
    }

    pub fn message_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn publish_failed(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dead_lettered(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dead_letter_failed(&self) {
        self.dead_letter_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn release_in_flight(&self) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            });
    }

    fn delivery_settled(&self, duration: Duration) {
        self.release_in_flight();

        if let Ok(mut times) = self.processing_times.lock() {
            times.push(duration.as_millis() as u64);
            if times.len() > MAX_PROCESSING_SAMPLES {
                times.remove(0);
            }
        }
    }

    /// Calculate processing time statistics (avg, p50, p95)
    fn processing_time_statistics(&self) -> (f64, f64, f64) {
        let Ok(times) = self.processing_times.lock() else {
            return (0.0, 0.0, 0.0);
        };
        if times.is_empty() {
            return (0.0, 0.0, 0.0);
        }

        let mut sorted = times.clone();
        sorted.sort_unstable();
        let avg = sorted.iter().sum::<u64>() as f64 / sorted.len() as f64;
        (avg, percentile(&sorted, 50.0), percentile(&sorted, 95.0))
    }

    /// Get complete metrics snapshot
    pub fn snapshot(&self) -> WorkerMetricsSnapshot {
        let now = current_timestamp();
        let (avg_processing_time_ms, p50_processing_time_ms, p95_processing_time_ms) =
            self.processing_time_statistics();
        let routed_by_queue = self
            .routed_by_queue
            .lock()
            .map(|routed| routed.clone())
            .unwrap_or_default();

        WorkerMetricsSnapshot {
            stage: self.stage.clone(),
            deliveries: DeliveryMetrics {
                received: self.deliveries_received.load(Ordering::Relaxed),
                acked: self.deliveries_acked.load(Ordering::Relaxed),
                rejected: self.deliveries_rejected.load(Ordering::Relaxed),
                dropped: self.deliveries_dropped.load(Ordering::Relaxed),
                malformed: self.malformed_bodies.load(Ordering::Relaxed),
                redelivered: self.redeliveries.load(Ordering::Relaxed),
                settle_failures: self.settle_failures.load(Ordering::Relaxed),
                in_flight: self.in_flight.load(Ordering::Relaxed),
                max_in_flight: self.max_in_flight.load(Ordering::Relaxed),
                avg_processing_time_ms,
                p50_processing_time_ms,
                p95_processing_time_ms,
            },
            publishing: PublishMetrics {
                published: self.messages_published.load(Ordering::Relaxed),
                publish_failures: self.publish_failures.load(Ordering::Relaxed),
                dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
                dead_letter_failures: self.dead_letter_failures.load(Ordering::Relaxed),
                routed_by_queue,
            },
            uptime_seconds: now.saturating_sub(self.started_at.load(Ordering::Relaxed)),
            timestamp: now,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerMetricsSnapshot {
    pub stage: String,
    pub deliveries: DeliveryMetrics,
    pub publishing: PublishMetrics,
    pub uptime_seconds: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeliveryMetrics {
    pub received: u64,
    pub acked: u64,
    pub rejected: u64,
    pub dropped: u64,
    pub malformed: u64,
    pub redelivered: u64,
    pub settle_failures: u64,
    pub in_flight: u64,
    pub max_in_flight: u64,
    pub avg_processing_time_ms: f64,
    pub p50_processing_time_ms: f64,
    pub p95_processing_time_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublishMetrics {
    pub published: u64,
    pub publish_failures: u64,
    pub dead_lettered: u64,
    pub dead_letter_failures: u64,
    pub routed_by_queue: HashMap<String, u64>,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let index = (percentile / 100.0) * (sorted_data.len() - 1) as f64;
    let lower = sorted_data[index.floor() as usize] as f64;
    let upper = sorted_data[index.ceil() as usize] as f64;
    lower + (upper - lower) * index.fract()
}
