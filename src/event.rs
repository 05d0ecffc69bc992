use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Event Synthesis
// =============================================================================

/// Number of distinct topics clients are spread across.
pub const TOPIC_COUNT: usize = 5;

/// Out of every block of this many iterations, the first
/// [`DUPLICATES_PER_BLOCK`] are sent with the client's duplicate id.
pub const DUPLICATE_BLOCK: u64 = 10;
pub const DUPLICATES_PER_BLOCK: u64 = 3;

const EVENT_SOURCE: &str = "k6-benchmark";
const EVENT_MESSAGE: &str = "K6 load test event";

/// Identity of one virtual client, in `[0, vus)`.
pub type ClientId = usize;

/// Inputs to one iteration of a virtual client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationContext {
    pub client_id: ClientId,
    pub iteration: u64,
    pub start_time_unix_millis: i64,
}

impl IterationContext {
    pub fn new(client_id: ClientId, iteration: u64) -> Self {
        Self {
            client_id,
            iteration,
            start_time_unix_millis: Utc::now().timestamp_millis(),
        }
    }

    pub fn is_duplicate(&self) -> bool {
        self.iteration % DUPLICATE_BLOCK < DUPLICATES_PER_BLOCK
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishEvent {
    pub event_id: String,
    pub topic: String,
    pub source: String,
    pub payload: EventPayload,
    pub timestamp: DateTime<Utc>,
}

/// Body of `POST /publish`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishRequest {
    pub events: Vec<PublishEvent>,
}

impl PublishRequest {
    pub fn single(event: PublishEvent) -> Self {
        Self {
            events: vec![event],
        }
    }
}

/// A synthesized event and whether it was deliberately sent as a duplicate.
#[derive(Debug, Clone)]
pub struct SynthesizedEvent {
    pub event: PublishEvent,
    pub is_duplicate: bool,
}

pub fn duplicate_event_id(client_id: ClientId) -> String {
    format!("duplicate-vu-{}", client_id)
}

pub fn unique_event_id(ctx: &IterationContext) -> String {
    format!(
        "k6-{}-{}-{}",
        ctx.client_id, ctx.iteration, ctx.start_time_unix_millis
    )
}

pub fn topic_for(client_id: ClientId) -> String {
    format!("benchmark-topic-{}", client_id % TOPIC_COUNT)
}

/// Builds the event for one iteration.
///
/// Everything that identifies the event is derived from `ctx`; the wall clock
/// is only read for the `timestamp` fields, so the duplicate pattern does not
/// depend on timing.
pub fn synthesize(ctx: &IterationContext) -> SynthesizedEvent {
    let is_duplicate = ctx.is_duplicate();
    let event_id = if is_duplicate {
        duplicate_event_id(ctx.client_id)
    } else {
        unique_event_id(ctx)
    };
    let now = Utc::now();

    SynthesizedEvent {
        event: PublishEvent {
            event_id,
            topic: topic_for(ctx.client_id),
            source: EVENT_SOURCE.to_string(),
            payload: EventPayload {
                message: EVENT_MESSAGE.to_string(),
                timestamp: now,
            },
            timestamp: now,
        },
        is_duplicate,
    }
}

/// Number of duplicates a client sends over its first `iterations` iterations.
pub fn expected_duplicates(iterations: u64) -> u64 {
    let full_blocks = iterations / DUPLICATE_BLOCK;
    let remainder = iterations % DUPLICATE_BLOCK;
    full_blocks * DUPLICATES_PER_BLOCK + remainder.min(DUPLICATES_PER_BLOCK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn ctx(client_id: ClientId, iteration: u64) -> IterationContext {
        IterationContext {
            client_id,
            iteration,
            start_time_unix_millis: 1_700_000_000_000 + iteration as i64,
        }
    }

    #[test]
    fn identical_inputs_produce_identical_identity() {
        for iteration in 0..50 {
            let a = synthesize(&ctx(7, iteration));
            let b = synthesize(&ctx(7, iteration));
            assert_eq!(a.event.event_id, b.event.event_id);
            assert_eq!(a.event.topic, b.event.topic);
            assert_eq!(a.event.source, b.event.source);
            assert_eq!(a.is_duplicate, b.is_duplicate);
        }
    }

    #[test]
    fn three_of_every_ten_iterations_are_duplicates() {
        for block_start in (0..200).step_by(10) {
            let flagged: Vec<u64> = (block_start..block_start + 10)
                .filter(|&i| synthesize(&ctx(3, i)).is_duplicate)
                .map(|i| i - block_start)
                .collect();
            assert_eq!(flagged, vec![0, 1, 2]);
        }
    }

    #[test]
    fn duplicates_share_the_client_id() {
        let ids: HashSet<String> = (0..100)
            .map(|i| synthesize(&ctx(4, i)))
            .filter(|s| s.is_duplicate)
            .map(|s| s.event.event_id)
            .collect();
        assert_eq!(ids.len(), 1);
        assert!(ids.contains("duplicate-vu-4"));
    }

    #[test]
    fn unique_ids_never_repeat_within_a_client() {
        let unique: Vec<String> = (0..1000)
            .map(|i| synthesize(&ctx(2, i)))
            .filter(|s| !s.is_duplicate)
            .map(|s| s.event.event_id)
            .collect();
        let distinct: HashSet<&String> = unique.iter().collect();
        assert_eq!(unique.len(), 700);
        assert_eq!(distinct.len(), unique.len());
        assert!(unique.iter().all(|id| id.starts_with("k6-2-")));
    }

    #[test]
    fn duplicate_ids_differ_between_clients() {
        assert_ne!(
            synthesize(&ctx(0, 0)).event.event_id,
            synthesize(&ctx(1, 0)).event.event_id
        );
    }

    #[test]
    fn unique_id_embeds_iteration_and_start_time() {
        let event = synthesize(&ctx(9, 15)).event;
        assert_eq!(event.event_id, "k6-9-15-1700000000015");
    }

    #[test]
    fn topics_cycle_over_five_values() {
        assert_eq!(topic_for(0), "benchmark-topic-0");
        assert_eq!(topic_for(4), "benchmark-topic-4");
        assert_eq!(topic_for(5), "benchmark-topic-0");
        assert_eq!(topic_for(23), "benchmark-topic-3");

        let topics: HashSet<String> = (0..20).map(topic_for).collect();
        assert_eq!(topics.len(), TOPIC_COUNT);
    }

    #[test]
    fn expected_duplicates_counts_partial_blocks() {
        assert_eq!(expected_duplicates(0), 0);
        assert_eq!(expected_duplicates(1), 1);
        assert_eq!(expected_duplicates(3), 3);
        assert_eq!(expected_duplicates(9), 3);
        assert_eq!(expected_duplicates(10), 3);
        assert_eq!(expected_duplicates(12), 5);
        assert_eq!(expected_duplicates(6000), 1800);
    }

    #[test]
    fn request_serializes_with_snake_case_fields() {
        let request = PublishRequest::single(synthesize(&ctx(1, 5)).event);
        let json = sonic_rs::to_string(&request).unwrap();

        assert!(json.starts_with(r#"{"events":[{"event_id":"k6-1-5-"#));
        assert!(json.contains(r#""topic":"benchmark-topic-1""#));
        assert!(json.contains(r#""source":"k6-benchmark""#));
        assert!(json.contains(r#""message":"K6 load test event""#));
    }
}
