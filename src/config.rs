use crate::error::{HarnessError, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

// =============================================================================
// Configuration
// =============================================================================

#[derive(Parser, Debug, Clone)]
#[command(name = "publish-benchmark")]
#[command(about = "Load and deduplication benchmark for the event aggregator", long_about = None)]
pub struct Config {
    /// Aggregator base URL
    #[arg(long, env = "AGGREGATOR_URL", default_value = "http://aggregator:8080")]
    pub aggregator_url: Url,

    /// Number of concurrent virtual clients
    #[arg(long, env = "VUS", default_value = "20")]
    pub vus: usize,

    /// Run duration in seconds
    #[arg(long, env = "DURATION", default_value = "60")]
    pub duration: u64,

    /// Delay between iterations of a single client in milliseconds
    #[arg(long, env = "PACING_MS", default_value = "10")]
    pub pacing_ms: u64,

    /// Wait after load stops before sampling aggregator stats, in seconds
    #[arg(long, env = "SETTLE_SECS", default_value = "5")]
    pub settle_secs: u64,

    /// Per-request timeout in milliseconds
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "10000")]
    pub request_timeout_ms: u64,

    /// How long to wait for clients to stop after the deadline before aborting them
    #[arg(long, env = "SHUTDOWN_GRACE_MS", default_value = "2000")]
    pub shutdown_grace_ms: u64,

    /// Progress log interval in seconds
    #[arg(long, env = "PROGRESS_INTERVAL_SECS", default_value = "5")]
    pub progress_interval_secs: u64,

    /// p95 publish latency threshold in milliseconds (reported, not enforced)
    #[arg(long, env = "P95_THRESHOLD_MS", default_value = "500")]
    pub p95_threshold_ms: u64,

    /// Maximum publish failure rate (reported, not enforced)
    #[arg(long, env = "MAX_FAILURE_RATE", default_value = "0.01")]
    pub max_failure_rate: f64,

    /// Write the final report as JSON to this path
    #[arg(long, env = "REPORT_JSON")]
    pub report_json: Option<PathBuf>,
}

/// Reporting thresholds. The harness prints them next to the measured
/// values; deciding pass/fail is left to whoever consumes the report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub p95_latency: Duration,
    pub max_failure_rate: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            p95_latency: Duration::from_millis(500),
            max_failure_rate: 0.01,
        }
    }
}

/// Upper bound for every configured duration. Keeps deadlines computed from
/// `Instant::now()` representable.
pub const MAX_DURATION: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Validated, typed view of [`Config`] used by the run itself.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub base_url: Url,
    pub vus: usize,
    pub duration: Duration,
    pub pacing: Duration,
    pub settle: Duration,
    pub request_timeout: Duration,
    pub shutdown_grace: Duration,
    pub progress_interval: Duration,
    pub thresholds: Thresholds,
}

impl RunSettings {
    /// Defaults matching the stock benchmark, pointed at `base_url`.
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            vus: 20,
            duration: Duration::from_secs(60),
            pacing: Duration::from_millis(10),
            settle: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(2),
            progress_interval: Duration::from_secs(5),
            thresholds: Thresholds::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.vus == 0 {
            return Err(HarnessError::InvalidConfig(
                "at least one virtual client is required".to_string(),
            ));
        }
        if self.duration.is_zero() {
            return Err(HarnessError::InvalidConfig(
                "run duration must be greater than zero".to_string(),
            ));
        }
        if self.progress_interval.is_zero() {
            return Err(HarnessError::InvalidConfig(
                "progress interval must be greater than zero".to_string(),
            ));
        }
        for (name, value) in [
            ("duration", self.duration),
            ("pacing", self.pacing),
            ("settle window", self.settle),
            ("request timeout", self.request_timeout),
            ("shutdown grace", self.shutdown_grace),
            ("progress interval", self.progress_interval),
        ] {
            if value > MAX_DURATION {
                return Err(HarnessError::InvalidConfig(format!(
                    "{name} of {}s exceeds the {}s limit",
                    value.as_secs(),
                    MAX_DURATION.as_secs()
                )));
            }
        }
        let rate = self.thresholds.max_failure_rate;
        if !(0.0..=1.0).contains(&rate) {
            return Err(HarnessError::InvalidConfig(format!(
                "max failure rate must be within [0, 1], got {rate}"
            )));
        }
        Ok(())
    }
}

impl Config {
    pub fn settings(&self) -> Result<RunSettings> {
        let mut settings = RunSettings::new(self.aggregator_url.clone());
        settings.vus = self.vus;
        settings.duration = Duration::from_secs(self.duration);
        settings.pacing = Duration::from_millis(self.pacing_ms);
        settings.settle = Duration::from_secs(self.settle_secs);
        settings.request_timeout = Duration::from_millis(self.request_timeout_ms);
        settings.shutdown_grace = Duration::from_millis(self.shutdown_grace_ms);
        settings.progress_interval = Duration::from_secs(self.progress_interval_secs);
        settings.thresholds = Thresholds {
            p95_latency: Duration::from_millis(self.p95_threshold_ms),
            max_failure_rate: self.max_failure_rate,
        };
        settings.validate()?;
        Ok(settings)
    }
}
