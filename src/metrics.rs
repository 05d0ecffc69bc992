use crate::error::Result;
use crate::target::PublishOutcome;
use hdrhistogram::Histogram;
use reqwest::StatusCode;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::warn;

// =============================================================================
// Metrics
// =============================================================================

/// Upper bound of the latency histogram, in microseconds.
const MAX_LATENCY_MICROS: u64 = 60_000_000;

/// Run-scoped counters shared by every virtual client.
///
/// Counters are plain atomics, so increments from different clients never
/// contend and never get lost. Only the latency histogram sits behind a lock.
#[derive(Clone)]
pub struct Metrics {
    events_published: Arc<AtomicU64>,
    duplicates_sent: Arc<AtomicU64>,
    requests_failed: Arc<AtomicU64>,
    status_check_failed: Arc<AtomicU64>,
    body_check_failed: Arc<AtomicU64>,
    publish_latency: Arc<Mutex<Histogram<u64>>>,
    active_clients: Arc<AtomicUsize>,
}

/// Frozen copy of [`Metrics`], taken once every client has stopped.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub events_published: u64,
    pub duplicates_sent: u64,
    pub requests_failed: u64,
    pub status_check_failed: u64,
    pub body_check_failed: u64,
    pub latency: Histogram<u64>,
}

/// Latency percentiles in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatencySummary {
    pub samples: u64,
    pub min_ms: f64,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

fn micros_to_ms(micros: u64) -> f64 {
    micros as f64 / 1000.0
}

impl Metrics {
    pub fn new() -> Result<Self> {
        Ok(Self {
            events_published: Arc::new(AtomicU64::new(0)),
            duplicates_sent: Arc::new(AtomicU64::new(0)),
            requests_failed: Arc::new(AtomicU64::new(0)),
            status_check_failed: Arc::new(AtomicU64::new(0)),
            body_check_failed: Arc::new(AtomicU64::new(0)),
            publish_latency: Arc::new(Mutex::new(Histogram::<u64>::new_with_bounds(
                1,
                MAX_LATENCY_MICROS,
                3,
            )?)),
            active_clients: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Records one completed iteration. The duplicate counter reflects what
    /// was offered to the aggregator, so it is bumped whatever the outcome.
    pub async fn record_iteration(&self, is_duplicate: bool, outcome: &PublishOutcome) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
        if is_duplicate {
            self.duplicates_sent.fetch_add(1, Ordering::Relaxed);
        }

        match outcome {
            PublishOutcome::Response {
                status,
                accepted,
                latency,
            } => {
                if !status.is_success() {
                    self.requests_failed.fetch_add(1, Ordering::Relaxed);
                }
                if *status != StatusCode::OK {
                    self.status_check_failed.fetch_add(1, Ordering::Relaxed);
                }
                if !accepted {
                    self.body_check_failed.fetch_add(1, Ordering::Relaxed);
                }
                self.record_latency(*latency).await;
            }
            PublishOutcome::Transport(_) => {
                self.requests_failed.fetch_add(1, Ordering::Relaxed);
                self.status_check_failed.fetch_add(1, Ordering::Relaxed);
                self.body_check_failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// An event that could not even be encoded. Counted as a failed attempt.
    pub fn record_unsendable(&self, is_duplicate: bool) {
        warn!("Dropping iteration: event could not be encoded");
        self.events_published.fetch_add(1, Ordering::Relaxed);
        if is_duplicate {
            self.duplicates_sent.fetch_add(1, Ordering::Relaxed);
        }
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
        self.status_check_failed.fetch_add(1, Ordering::Relaxed);
        self.body_check_failed.fetch_add(1, Ordering::Relaxed);
    }

    async fn record_latency(&self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX).max(1);
        self.publish_latency.lock().await.saturating_record(micros);
    }

    pub fn client_started(&self) {
        self.active_clients.fetch_add(1, Ordering::Relaxed);
    }

    pub fn client_stopped(&self) {
        self.active_clients.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn active_clients(&self) -> usize {
        self.active_clients.load(Ordering::Relaxed)
    }

    /// Live counter values for progress logging. Not a consistent snapshot.
    pub fn progress(&self) -> (u64, u64) {
        (
            self.events_published.load(Ordering::Relaxed),
            self.requests_failed.load(Ordering::Relaxed),
        )
    }

    /// Only the scheduler calls this, after joining every client.
    pub(crate) async fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_published: self.events_published.load(Ordering::Acquire),
            duplicates_sent: self.duplicates_sent.load(Ordering::Acquire),
            requests_failed: self.requests_failed.load(Ordering::Acquire),
            status_check_failed: self.status_check_failed.load(Ordering::Acquire),
            body_check_failed: self.body_check_failed.load(Ordering::Acquire),
            latency: self.publish_latency.lock().await.clone(),
        }
    }
}

impl MetricsSnapshot {
    /// Share of attempts flagged as duplicates; NaN before any attempt.
    pub fn offered_duplicate_rate(&self) -> f64 {
        if self.events_published == 0 {
            return f64::NAN;
        }
        self.duplicates_sent as f64 / self.events_published as f64
    }

    /// Share of attempts that failed at the HTTP level; NaN before any attempt.
    pub fn failure_rate(&self) -> f64 {
        if self.events_published == 0 {
            return f64::NAN;
        }
        self.requests_failed as f64 / self.events_published as f64
    }

    pub fn latency_summary(&self) -> Option<LatencySummary> {
        let hist = &self.latency;
        if hist.is_empty() {
            return None;
        }
        Some(LatencySummary {
            samples: hist.len(),
            min_ms: micros_to_ms(hist.min()),
            mean_ms: hist.mean() / 1000.0,
            p50_ms: micros_to_ms(hist.value_at_quantile(0.50)),
            p95_ms: micros_to_ms(hist.value_at_quantile(0.95)),
            p99_ms: micros_to_ms(hist.value_at_quantile(0.99)),
            max_ms: micros_to_ms(hist.max()),
        })
    }
}
