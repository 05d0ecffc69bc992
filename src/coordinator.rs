use crate::config::RunSettings;
use crate::error::Result;
use crate::report::{reconcile, ReconcileInput, RunReport};
use crate::scheduler::Scheduler;
use crate::target::Target;
use std::fmt;
use std::time::Instant;
use tokio::time::sleep;
use tracing::{error, info, warn};

// =============================================================================
// Run Lifecycle
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    HealthChecked,
    Running,
    Settling,
    Reconciled,
    Done,
}

impl Phase {
    fn next(self) -> Phase {
        match self {
            Phase::Init => Phase::HealthChecked,
            Phase::HealthChecked => Phase::Running,
            Phase::Running => Phase::Settling,
            Phase::Settling => Phase::Reconciled,
            Phase::Reconciled | Phase::Done => Phase::Done,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Init => "INIT",
            Phase::HealthChecked => "HEALTH_CHECKED",
            Phase::Running => "RUNNING",
            Phase::Settling => "SETTLING",
            Phase::Reconciled => "RECONCILED",
            Phase::Done => "DONE",
        };
        f.write_str(name)
    }
}

/// Drives one benchmark run through its phases, strictly in order. Only the
/// health check can abort the run before load is generated.
pub struct Coordinator {
    settings: RunSettings,
    target: Target,
    phase: Phase,
}

impl Coordinator {
    pub fn new(settings: RunSettings) -> Result<Self> {
        settings.validate()?;
        let target = Target::new(&settings.base_url, settings.request_timeout, settings.vus)?;
        Ok(Self {
            settings,
            target,
            phase: Phase::Init,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn advance(&mut self) {
        let next = self.phase.next();
        info!("Phase {} -> {}", self.phase, next);
        self.phase = next;
    }

    pub async fn run(&mut self) -> Result<RunReport> {
        if let Err(e) = self.target.health().await {
            error!("Aborting before load: {}", e);
            return Err(e);
        }
        info!("Aggregator healthy, publishing to {}", self.target.publish_url());
        self.advance();

        let baseline = match self.target.stats().await {
            Ok(stats) => {
                info!(
                    "Initial stats: received={}, unique_processed={}, duplicated_dropped={}",
                    stats.received, stats.unique_processed, stats.duplicated_dropped
                );
                Some(stats)
            }
            Err(e) => {
                warn!("Could not read initial stats: {}", e);
                None
            }
        };

        let start = Instant::now();
        self.advance();
        let summary = Scheduler::from(&self.settings).run(&self.target).await?;

        self.advance();
        if !self.settings.settle.is_zero() {
            info!(
                "Settling for {:.1}s before sampling stats",
                self.settings.settle.as_secs_f64()
            );
            sleep(self.settings.settle).await;
        }

        // Only the health check may abort; without final stats the report
        // still carries every client-side measurement.
        let server = match self.target.stats().await {
            Ok(stats) => Some(stats),
            Err(e) => {
                error!("Could not read final stats, reporting client metrics only: {}", e);
                None
            }
        };
        let elapsed = start.elapsed();
        let report = reconcile(&ReconcileInput {
            elapsed,
            metrics: &summary.metrics,
            clients_crashed: summary.crashed,
            clients_aborted: summary.aborted,
            baseline: baseline.as_ref(),
            server: server.as_ref(),
            thresholds: self.settings.thresholds,
        });
        self.advance();

        report.log_summary();
        self.advance();

        Ok(report)
    }
}
