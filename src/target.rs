use crate::error::{HarnessError, Result};
use crate::event::PublishRequest;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;
use url::Url;

// =============================================================================
// Aggregator HTTP Boundary
// =============================================================================

/// Aggregate counters reported by `GET /stats`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerStats {
    pub received: u64,
    pub unique_processed: u64,
    pub duplicated_dropped: u64,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct PublishResponse {
    #[serde(default)]
    status: Option<String>,
}

/// What happened to a single publish call.
#[derive(Debug)]
pub enum PublishOutcome {
    /// A response arrived. `accepted` is true when the body carried
    /// `"status": "success"`.
    Response {
        status: StatusCode,
        accepted: bool,
        latency: Duration,
    },
    /// No usable response: connect error, timeout, or a body that could not
    /// be read.
    Transport(reqwest::Error),
}

impl PublishOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            PublishOutcome::Response {
                status: StatusCode::OK,
                accepted: true,
                ..
            }
        )
    }
}

/// Cheap to clone; every virtual client holds one and they share the
/// underlying connection pool.
#[derive(Clone)]
pub struct Target {
    client: reqwest::Client,
    health_url: Url,
    stats_url: Url,
    publish_url: Url,
}

impl Target {
    pub fn new(base_url: &Url, request_timeout: Duration, pool_size: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .pool_max_idle_per_host(pool_size)
            .build()
            .map_err(HarnessError::HttpClient)?;

        // Url::join replaces the last path segment unless the base ends in '/'.
        let mut base = base_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            client,
            health_url: base.join("health")?,
            stats_url: base.join("stats")?,
            publish_url: base.join("publish")?,
        })
    }

    pub fn publish_url(&self) -> &Url {
        &self.publish_url
    }

    /// `GET /health`. Only a 200 counts as healthy.
    pub async fn health(&self) -> Result<()> {
        let response = self
            .client
            .get(self.health_url.clone())
            .send()
            .await
            .map_err(HarnessError::HealthProbe)?;

        match response.status() {
            StatusCode::OK => Ok(()),
            status => Err(HarnessError::Unhealthy { status }),
        }
    }

    /// `GET /stats`.
    pub async fn stats(&self) -> Result<ServerStats> {
        let response = self
            .client
            .get(self.stats_url.clone())
            .send()
            .await
            .map_err(HarnessError::StatsFetch)?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(HarnessError::StatsStatus { status });
        }

        let body = response.bytes().await.map_err(HarnessError::StatsFetch)?;
        sonic_rs::from_slice(&body).map_err(HarnessError::StatsDecode)
    }

    /// `POST /publish`. Never fails; every outcome is reported to the caller
    /// for counting.
    pub async fn publish(&self, body: String) -> PublishOutcome {
        let start = Instant::now();
        let response = match self
            .client
            .post(self.publish_url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return PublishOutcome::Transport(e),
        };

        let status = response.status();
        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => return PublishOutcome::Transport(e),
        };
        let latency = start.elapsed();

        let accepted = match sonic_rs::from_slice::<PublishResponse>(&bytes) {
            Ok(parsed) => parsed.status.as_deref() == Some("success"),
            Err(e) => {
                debug!("Failed to parse publish response: {}", e);
                false
            }
        };

        PublishOutcome::Response {
            status,
            accepted,
            latency,
        }
    }
}

/// Serializes a publish body. Returns `None` only if the event cannot be
/// encoded, which the caller treats like any other failed request.
pub fn encode_request(request: &PublishRequest) -> Option<String> {
    sonic_rs::to_string(request).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{synthesize, IterationContext};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn target_for(server: &MockServer) -> Target {
        let base = Url::parse(&server.uri()).unwrap();
        Target::new(&base, Duration::from_secs(5), 4).unwrap()
    }

    #[test]
    fn endpoints_keep_base_path() {
        let base = Url::parse("http://localhost:8080/aggregator").unwrap();
        let target = Target::new(&base, Duration::from_secs(1), 1).unwrap();
        assert_eq!(
            target.publish_url().as_str(),
            "http://localhost:8080/aggregator/publish"
        );
    }

    #[tokio::test]
    async fn health_accepts_200() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(r#"{"status":"healthy"}"#, "application/json"))
            .mount(&server)
            .await;

        assert!(target_for(&server).health().await.is_ok());
    }

    #[tokio::test]
    async fn health_rejects_503() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = target_for(&server).health().await.unwrap_err();
        assert!(matches!(
            err,
            HarnessError::Unhealthy {
                status: StatusCode::SERVICE_UNAVAILABLE
            }
        ));
    }

    #[tokio::test]
    async fn stats_decodes_body_with_uptime() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stats"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"{"received":10,"unique_processed":7,"duplicated_dropped":3,"topics":["a","b"],"uptime":42}"#,
                "application/json",
            ))
            .mount(&server)
            .await;

        let stats = target_for(&server).stats().await.unwrap();
        assert_eq!(stats.received, 10);
        assert_eq!(stats.unique_processed, 7);
        assert_eq!(stats.duplicated_dropped, 3);
        assert_eq!(stats.topics, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(stats.uptime, Some(42));
    }

    #[tokio::test]
    async fn stats_rejects_malformed_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stats"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("not json", "text/plain"))
            .mount(&server)
            .await;

        let err = target_for(&server).stats().await.unwrap_err();
        assert!(matches!(err, HarnessError::StatsDecode(_)));
    }

    #[tokio::test]
    async fn publish_sends_json_and_reads_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/publish"))
            .and(header("content-type", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"{"status":"success","message":"Published 1 events","events_count":1}"#,
                "application/json",
            ))
            .expect(1)
            .mount(&server)
            .await;

        let event = synthesize(&IterationContext::new(0, 0)).event;
        let body = encode_request(&PublishRequest::single(event)).unwrap();
        let outcome = target_for(&server).publish(body).await;
        assert!(outcome.is_success());

        let requests = server.received_requests().await.unwrap();
        let sent: PublishRequest = sonic_rs::from_slice(&requests[0].body).unwrap();
        assert_eq!(sent.events.len(), 1);
        assert_eq!(sent.events[0].event_id, "duplicate-vu-0");
    }

    #[tokio::test]
    async fn publish_flags_unexpected_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/publish"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(r#"{"status":"error"}"#, "application/json"))
            .mount(&server)
            .await;

        let outcome = target_for(&server).publish("{}".to_string()).await;
        assert!(!outcome.is_success());
        assert!(matches!(
            outcome,
            PublishOutcome::Response {
                status: StatusCode::OK,
                accepted: false,
                ..
            }
        ));
    }
}
