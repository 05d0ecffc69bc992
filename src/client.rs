use crate::event::{synthesize, ClientId, IterationContext, PublishEvent, PublishRequest};
use crate::metrics::Metrics;
use crate::target::{encode_request, PublishOutcome, Target};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{debug, warn};

// =============================================================================
// Virtual Client
// =============================================================================

/// What one client did before it was told to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientOutcome {
    pub client_id: ClientId,
    pub iterations: u64,
}

/// Runs one virtual client until `shutdown` fires.
///
/// Both the publish call and the pacing sleep race against the shutdown
/// signal, so a stopped client abandons at most one in-flight request. An
/// abandoned iteration is not counted; a completed one is always recorded.
pub async fn run_client(
    id: ClientId,
    target: Target,
    metrics: Metrics,
    pacing: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> ClientOutcome {
    metrics.client_started();
    debug!("Client {} started", id);

    let mut iteration: u64 = 0;

    loop {
        let ctx = IterationContext::new(id, iteration);
        let synthesized = synthesize(&ctx);

        let outcome = tokio::select! {
            biased;

            _ = shutdown.recv() => {
                debug!("Client {} received shutdown signal mid-iteration", id);
                break;
            }

            outcome = publish(&target, synthesized.event) => outcome,
        };

        match outcome {
            Some(outcome) => {
                log_failure(&ctx, &outcome);
                metrics
                    .record_iteration(synthesized.is_duplicate, &outcome)
                    .await;
            }
            None => metrics.record_unsendable(synthesized.is_duplicate),
        }

        iteration += 1;

        tokio::select! {
            biased;

            _ = shutdown.recv() => {
                debug!("Client {} received shutdown signal", id);
                break;
            }

            _ = sleep(pacing) => {}
        }
    }

    metrics.client_stopped();
    debug!("Client {} stopped after {} iterations", id, iteration);

    ClientOutcome {
        client_id: id,
        iterations: iteration,
    }
}

/// `None` when the event could not be encoded and nothing was sent.
async fn publish(target: &Target, event: PublishEvent) -> Option<PublishOutcome> {
    let body = encode_request(&PublishRequest::single(event))?;
    Some(target.publish(body).await)
}

fn log_failure(ctx: &IterationContext, outcome: &PublishOutcome) {
    match outcome {
        PublishOutcome::Response {
            status, accepted, ..
        } if !outcome.is_success() => {
            warn!(
                "Client {} iteration {} publish check failed: status={}, accepted={}",
                ctx.client_id, ctx.iteration, status, accepted
            );
        }
        PublishOutcome::Transport(e) => {
            warn!(
                "Client {} iteration {} publish failed: {}",
                ctx.client_id, ctx.iteration, e
            );
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::expected_duplicates;
    use url::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn target_for(server: &MockServer) -> Target {
        let base = Url::parse(&server.uri()).unwrap();
        Target::new(&base, Duration::from_secs(5), 4).unwrap()
    }

    async fn mount_publish(server: &MockServer, template: ResponseTemplate) {
        Mock::given(method("POST"))
            .and(path("/publish"))
            .respond_with(template)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn failed_publishes_do_not_stop_the_client() {
        let server = MockServer::start().await;
        mount_publish(&server, ResponseTemplate::new(500)).await;

        let metrics = Metrics::new().unwrap();
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(run_client(
            1,
            target_for(&server).await,
            metrics.clone(),
            Duration::from_millis(1),
            rx,
        ));

        sleep(Duration::from_millis(300)).await;
        tx.send(()).unwrap();
        let outcome = handle.await.unwrap();

        let snapshot = metrics.snapshot().await;
        assert!(outcome.iterations > 3);
        assert_eq!(snapshot.events_published, outcome.iterations);
        assert_eq!(snapshot.requests_failed, outcome.iterations);
        assert_eq!(snapshot.duplicates_sent, expected_duplicates(outcome.iterations));
        assert_eq!(metrics.active_clients(), 0);
    }

    #[tokio::test]
    async fn shutdown_interrupts_a_stalled_request() {
        let server = MockServer::start().await;
        mount_publish(
            &server,
            ResponseTemplate::new(200)
                .set_body_raw(r#"{"status":"success"}"#, "application/json")
                .set_delay(Duration::from_secs(10)),
        )
        .await;

        let metrics = Metrics::new().unwrap();
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(run_client(
            0,
            target_for(&server).await,
            metrics.clone(),
            Duration::from_millis(10),
            rx,
        ));

        sleep(Duration::from_millis(100)).await;
        tx.send(()).unwrap();
        let outcome = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("client did not stop")
            .unwrap();

        assert_eq!(outcome.iterations, 0);
        assert_eq!(metrics.snapshot().await.events_published, 0);
    }
}
