use crate::config::Thresholds;
use crate::error::{HarnessError, Result};
use crate::metrics::{LatencySummary, MetricsSnapshot};
use crate::target::ServerStats;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

// =============================================================================
// Reconciliation Report
// =============================================================================

/// Client-side view of the run, frozen after every client stopped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientTotals {
    pub events_published: u64,
    pub duplicates_sent: u64,
    pub requests_failed: u64,
    pub status_check_failed: u64,
    pub body_check_failed: u64,
    pub clients_crashed: usize,
    pub clients_aborted: usize,
}

/// Server counters that grew between the baseline and final stats samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ServerDelta {
    pub received: u64,
    pub unique_processed: u64,
    pub duplicated_dropped: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub elapsed: Duration,
    /// `None` when the final stats sample could not be fetched.
    pub server: Option<ServerStats>,
    /// `duplicated_dropped / received`; NaN when nothing was received or the
    /// stats are missing.
    pub duplicate_rate: f64,
    /// `received / elapsed_secs`; NaN when nothing was received or the stats
    /// are missing.
    pub throughput: f64,
    pub client: ClientTotals,
    /// `duplicates_sent / events_published`; NaN before any attempt.
    pub offered_duplicate_rate: f64,
    pub failure_rate: f64,
    pub latency: Option<LatencySummary>,
    pub delta: Option<ServerDelta>,
    pub thresholds: Thresholds,
}

/// Everything the reconciliation needs, gathered by the coordinator.
pub struct ReconcileInput<'a> {
    pub elapsed: Duration,
    pub metrics: &'a MetricsSnapshot,
    pub clients_crashed: usize,
    pub clients_aborted: usize,
    pub baseline: Option<&'a ServerStats>,
    pub server: Option<&'a ServerStats>,
    pub thresholds: Thresholds,
}

/// Pure: the same input always yields the same report.
pub fn reconcile(input: &ReconcileInput<'_>) -> RunReport {
    let (duplicate_rate, throughput) = match input.server {
        Some(server) => server_rates(server, input.elapsed),
        None => (f64::NAN, f64::NAN),
    };

    let metrics = input.metrics;
    let delta = input.baseline.zip(input.server).map(|(baseline, server)| ServerDelta {
        received: server.received.saturating_sub(baseline.received),
        unique_processed: server
            .unique_processed
            .saturating_sub(baseline.unique_processed),
        duplicated_dropped: server
            .duplicated_dropped
            .saturating_sub(baseline.duplicated_dropped),
    });

    RunReport {
        elapsed: input.elapsed,
        server: input.server.cloned(),
        duplicate_rate,
        throughput,
        client: ClientTotals {
            events_published: metrics.events_published,
            duplicates_sent: metrics.duplicates_sent,
            requests_failed: metrics.requests_failed,
            status_check_failed: metrics.status_check_failed,
            body_check_failed: metrics.body_check_failed,
            clients_crashed: input.clients_crashed,
            clients_aborted: input.clients_aborted,
        },
        offered_duplicate_rate: metrics.offered_duplicate_rate(),
        failure_rate: metrics.failure_rate(),
        latency: metrics.latency_summary(),
        delta,
        thresholds: input.thresholds,
    }
}

/// Duplicate rate and throughput derived from a stats sample. Both are NaN
/// when the aggregator received nothing.
pub fn server_rates(stats: &ServerStats, elapsed: Duration) -> (f64, f64) {
    if stats.received == 0 {
        return (f64::NAN, f64::NAN);
    }
    let received = stats.received as f64;
    let duplicate_rate = stats.duplicated_dropped as f64 / received;
    let elapsed_secs = elapsed.as_secs_f64();
    let throughput = if elapsed_secs > 0.0 {
        received / elapsed_secs
    } else {
        f64::NAN
    };
    (duplicate_rate, throughput)
}

fn percent(rate: f64) -> String {
    if rate.is_finite() {
        format!("{:.2}%", rate * 100.0)
    } else {
        "n/a".to_string()
    }
}

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

#[derive(Serialize)]
struct JsonReport<'a> {
    duration_secs: f64,
    received: Option<u64>,
    unique_processed: Option<u64>,
    duplicated_dropped: Option<u64>,
    duplicate_rate: Option<f64>,
    throughput: Option<f64>,
    topics: Option<&'a [String]>,
    client: &'a ClientTotals,
    offered_duplicate_rate: Option<f64>,
    failure_rate: Option<f64>,
    latency: Option<&'a LatencySummary>,
    delta: Option<&'a ServerDelta>,
    p95_threshold_ms: u64,
    max_failure_rate: f64,
}

impl RunReport {
    pub fn log_summary(&self) {
        info!("╔════════════════════════════════════════════════════════════╗");
        info!("║                    BENCHMARK RESULTS                       ║");
        info!("╚════════════════════════════════════════════════════════════╝");
        info!("Duration:           {:.2}s", self.elapsed.as_secs_f64());
        match &self.server {
            Some(server) => {
                info!("Events Received:    {}", server.received);
                info!("Unique Processed:   {}", server.unique_processed);
                info!("Duplicates Dropped: {}", server.duplicated_dropped);
                info!("Duplicate Rate:     {}", percent(self.duplicate_rate));
                if self.throughput.is_finite() {
                    info!("Throughput:         {:.2} events/s", self.throughput);
                } else {
                    info!("Throughput:         n/a");
                }
                info!("Topics:             {}", server.topics.join(", "));

                if server.received == 0 {
                    warn!("Aggregator reported zero received events; rates are undefined");
                }
            }
            None => warn!("Aggregator stats unavailable; server-side reconciliation skipped"),
        }

        if let Some(delta) = &self.delta {
            info!("");
            info!("During This Run:");
            info!("  Received:           +{}", delta.received);
            info!("  Unique Processed:   +{}", delta.unique_processed);
            info!("  Duplicates Dropped: +{}", delta.duplicated_dropped);
        }

        info!("");
        info!("Client Metrics:");
        info!("  Events Published:    {}", self.client.events_published);
        info!("  Duplicates Sent:     {}", self.client.duplicates_sent);
        info!("  Offered Dup Rate:    {}", percent(self.offered_duplicate_rate));
        info!("  Requests Failed:     {}", self.client.requests_failed);
        info!(
            "  Failure Rate:        {} (threshold {})",
            percent(self.failure_rate),
            percent(self.thresholds.max_failure_rate)
        );
        info!("  Status Check Failed: {}", self.client.status_check_failed);
        info!("  Body Check Failed:   {}", self.client.body_check_failed);
        if self.client.clients_crashed > 0 || self.client.clients_aborted > 0 {
            warn!(
                "  Clients crashed={}, aborted={}",
                self.client.clients_crashed, self.client.clients_aborted
            );
        }

        info!("");
        info!("Publish Latency (ms):");
        match &self.latency {
            Some(latency) => {
                info!("  Min:    {:.2}", latency.min_ms);
                info!("  Mean:   {:.2}", latency.mean_ms);
                info!("  p50:    {:.2}", latency.p50_ms);
                info!(
                    "  p95:    {:.2} (threshold {})",
                    latency.p95_ms,
                    self.thresholds.p95_latency.as_millis()
                );
                info!("  p99:    {:.2}", latency.p99_ms);
                info!("  Max:    {:.2}", latency.max_ms);
            }
            None => info!("  No data"),
        }

        info!("═══════════════════════════════════════════════════════════");
    }

    /// Pretty JSON; undefined rates are written as `null`.
    pub fn to_json(&self) -> Result<String> {
        let report = JsonReport {
            duration_secs: self.elapsed.as_secs_f64(),
            received: self.server.as_ref().map(|s| s.received),
            unique_processed: self.server.as_ref().map(|s| s.unique_processed),
            duplicated_dropped: self.server.as_ref().map(|s| s.duplicated_dropped),
            duplicate_rate: finite(self.duplicate_rate),
            throughput: finite(self.throughput),
            topics: self.server.as_ref().map(|s| s.topics.as_slice()),
            client: &self.client,
            offered_duplicate_rate: finite(self.offered_duplicate_rate),
            failure_rate: finite(self.failure_rate),
            latency: self.latency.as_ref(),
            delta: self.delta.as_ref(),
            p95_threshold_ms: u64::try_from(self.thresholds.p95_latency.as_millis()).unwrap_or(u64::MAX),
            max_failure_rate: self.thresholds.max_failure_rate,
        };
        sonic_rs::to_string_pretty(&report).map_err(HarnessError::ReportEncode)
    }

    pub async fn write_json(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;
        tokio::fs::write(path, json)
            .await
            .map_err(|source| HarnessError::ReportWrite {
                path: path.to_path_buf(),
                source,
            })?;
        info!("Report written to {:?}", path);
        Ok(())
    }
}
