use reqwest::StatusCode;
use std::path::PathBuf;

/// Failures that stop a benchmark run. Per-request publish failures are
/// never represented here; they are counted in the metrics instead.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("aggregator not healthy: GET /health returned {status}")]
    Unhealthy { status: StatusCode },

    #[error("aggregator health probe failed: {0}")]
    HealthProbe(#[source] reqwest::Error),

    #[error("failed to fetch aggregator stats: {0}")]
    StatsFetch(#[source] reqwest::Error),

    #[error("aggregator stats request returned {status}")]
    StatsStatus { status: StatusCode },

    #[error("failed to decode aggregator stats: {0}")]
    StatsDecode(#[source] sonic_rs::Error),

    #[error("invalid aggregator url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error("failed to create latency histogram: {0}")]
    Histogram(#[from] hdrhistogram::CreationError),

    #[error("failed to encode report: {0}")]
    ReportEncode(#[source] sonic_rs::Error),

    #[error("failed to write report to {path:?}: {source}")]
    ReportWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, HarnessError>;
