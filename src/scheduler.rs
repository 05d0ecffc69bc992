use crate::client::{run_client, ClientOutcome};
use crate::config::RunSettings;
use crate::error::{HarnessError, Result};
use crate::event::expected_duplicates;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::target::Target;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{interval_at, sleep_until, timeout_at, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

// =============================================================================
// Constant-VU Schedule
// =============================================================================

/// Runs a fixed pool of virtual clients for a fixed wall-clock duration.
#[derive(Debug, Clone)]
pub struct Scheduler {
    pub vus: usize,
    pub duration: Duration,
    pub pacing: Duration,
    pub shutdown_grace: Duration,
    pub progress_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct ScheduleSummary {
    pub metrics: MetricsSnapshot,
    pub clients: Vec<ClientOutcome>,
    /// Clients that panicked before the deadline.
    pub crashed: usize,
    /// Clients still running after the grace period, aborted by the scheduler.
    pub aborted: usize,
}

impl ScheduleSummary {
    pub fn total_iterations(&self) -> u64 {
        self.clients.iter().map(|c| c.iterations).sum()
    }
}

struct JoinTally {
    metrics: Metrics,
    clients: Vec<ClientOutcome>,
    crashed: usize,
    aborted: usize,
}

impl JoinTally {
    fn tally(&mut self, result: std::result::Result<ClientOutcome, JoinError>) {
        match result {
            Ok(outcome) => self.clients.push(outcome),
            // The client never reached its own client_stopped().
            Err(e) if e.is_panic() => {
                error!("Client task panicked: {}", e);
                self.metrics.client_stopped();
                self.crashed += 1;
            }
            Err(_) => {
                self.metrics.client_stopped();
                self.aborted += 1;
            }
        }
    }
}

impl From<&RunSettings> for Scheduler {
    fn from(settings: &RunSettings) -> Self {
        Self {
            vus: settings.vus,
            duration: settings.duration,
            pacing: settings.pacing,
            shutdown_grace: settings.shutdown_grace,
            progress_interval: settings.progress_interval,
        }
    }
}

impl Scheduler {
    /// Starts every client at once, stops them all at the deadline, and
    /// returns only after each one has stopped. The metrics snapshot is taken
    /// after the join, so it can no longer change.
    pub async fn run(&self, target: &Target) -> Result<ScheduleSummary> {
        let metrics = Metrics::new()?;
        let start = Instant::now();
        let deadline = checked_deadline(start, self.duration, "run duration")?;
        let period = self.progress_interval.max(Duration::from_millis(1));
        let first_progress = checked_deadline(start, period, "progress interval")?;
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let mut tasks = JoinSet::new();

        info!(
            "Starting {} clients for {:.1}s",
            self.vus,
            self.duration.as_secs_f64()
        );

        for id in 0..self.vus {
            tasks.spawn(run_client(
                id,
                target.clone(),
                metrics.clone(),
                self.pacing,
                shutdown_tx.subscribe(),
            ));
        }

        let mut progress = interval_at(first_progress, period);
        progress.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = sleep_until(deadline) => break,
                _ = progress.tick() => {
                    let (published, failed) = metrics.progress();
                    info!(
                        "Running: elapsed={:.0}s, active={}, published={}, failed={}",
                        start.elapsed().as_secs_f64(),
                        metrics.active_clients(),
                        published,
                        failed
                    );
                }
            }
        }

        info!("Duration reached, stopping {} clients", self.vus);
        // No receivers left only if every client already exited.
        shutdown_tx.send(()).ok();

        let mut joined = JoinTally {
            metrics: metrics.clone(),
            clients: Vec::with_capacity(self.vus),
            crashed: 0,
            aborted: 0,
        };

        // Validated settings keep this representable; saturate to "no grace" otherwise.
        let now = Instant::now();
        let grace_deadline = now.checked_add(self.shutdown_grace).unwrap_or(now);
        loop {
            match timeout_at(grace_deadline, tasks.join_next()).await {
                Ok(Some(result)) => joined.tally(result),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "{} clients still running after {}ms grace, aborting",
                        tasks.len(),
                        self.shutdown_grace.as_millis()
                    );
                    tasks.abort_all();
                    while let Some(result) = tasks.join_next().await {
                        joined.tally(result);
                    }
                    break;
                }
            }
        }

        joined.clients.sort_by_key(|c| c.client_id);
        let summary = ScheduleSummary {
            metrics: metrics.snapshot().await,
            clients: joined.clients,
            crashed: joined.crashed,
            aborted: joined.aborted,
        };

        info!(
            "All clients stopped: iterations={}, crashed={}, aborted={}",
            summary.total_iterations(),
            summary.crashed,
            summary.aborted
        );

        // Aborted or crashed clients leave counted iterations behind with no outcome.
        let expected_dups: u64 = summary
            .clients
            .iter()
            .map(|c| expected_duplicates(c.iterations))
            .sum();
        if summary.crashed == 0
            && summary.aborted == 0
            && expected_dups != summary.metrics.duplicates_sent
        {
            warn!(
                "Duplicate counter mismatch: counted={}, expected from iterations={}",
                summary.metrics.duplicates_sent, expected_dups
            );
        }

        Ok(summary)
    }
}

fn checked_deadline(start: Instant, after: Duration, what: &str) -> Result<Instant> {
    start.checked_add(after).ok_or_else(|| {
        HarnessError::InvalidConfig(format!(
            "{what} of {}s is too large",
            after.as_secs()
        ))
    })
}
