#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::*;
use crate::error::{Error, TransportError};
use crate::transport::memory::MemoryReceiver;
use crate::transport::{Delivery, MemoryBroker, QueueReceiver, QueueSender};
use async_trait::async_trait;
use chrono::TimeZone;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const JOBS: &str = "jobs";
const RESULTS: &str = "results";

/// Counts settle calls before delegating to the in-memory broker
struct SpyReceiver {
    inner: MemoryReceiver,
    acks: AtomicUsize,
    releases: AtomicUsize,
}

#[async_trait]
impl QueueReceiver for SpyReceiver {
    async fn receive_batch(&self, max_count: usize) -> Result<Vec<Delivery>> {
        self.inner.receive_batch(max_count).await
    }

    async fn acknowledge(&self, handle: &DeliveryHandle) -> Result<()> {
        self.acks.fetch_add(1, Ordering::SeqCst);
        self.inner.acknowledge(handle).await
    }

    async fn release(&self, handle: &DeliveryHandle) -> Result<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.inner.release(handle).await
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}

struct Harness {
    broker: MemoryBroker,
    spy: Arc<SpyReceiver>,
    correlator: JobCorrelator,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(QueueConfig::default())
    }

    fn with_config(config: QueueConfig) -> Self {
        let broker = MemoryBroker::new(Duration::from_secs(30));
        let spy = Arc::new(SpyReceiver {
            inner: broker.receiver(RESULTS),
            acks: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        });
        let client = QueueClient::new(
            Arc::new(broker.sender(JOBS)),
            spy.clone(),
            Duration::from_secs(5),
        );
        Self {
            correlator: JobCorrelator::new(client, &config),
            broker,
            spy,
        }
    }

    /// Publish a raw body to the result queue, as the worker would
    async fn worker_publishes(&self, body: &str) {
        self.broker
            .sender(RESULTS)
            .send(Bytes::from(body.to_string()))
            .await
            .unwrap();
    }

    fn acks(&self) -> usize {
        self.spy.acks.load(Ordering::SeqCst)
    }

    fn releases(&self) -> usize {
        self.spy.releases.load(Ordering::SeqCst)
    }
}

fn request(uuid: &str) -> JobRequest {
    JobRequest {
        prompt: Some("p".into()),
        prompt_guidance: Some("1.0".into()),
        strength: Some("0.5".into()),
        uuid: Some(uuid.into()),
        model_type: None,
        token: None,
    }
}

#[tokio::test]
async fn submit_publishes_job_and_returns_uuid_suffixed_key() {
    let h = Harness::new();

    let message_id = h.correlator.submit(&request("u1")).await.unwrap();

    assert!(!message_id.is_empty());
    assert!(message_id.ends_with("-u1"));
    let published = h.broker.bodies(JOBS).await;
    assert_eq!(published.len(), 1);
    assert_eq!(Message::decode(&published[0]).unwrap().message_id, message_id);
}

#[tokio::test]
async fn invalid_submission_never_reaches_the_queue() {
    let h = Harness::new();
    let mut req = request("u1");
    req.prompt_guidance = Some("abc".into());

    let err = h.correlator.submit(&req).await.unwrap_err();

    assert!(matches!(err, Error::InvalidInput { ref field, .. } if field == "prompt_guidance"));
    assert_eq!(h.broker.depth(JOBS).await, 0);
}

#[tokio::test]
async fn empty_queue_is_pending() {
    let h = Harness::new();

    let outcome = h.correlator.correlate("1-u1").await.unwrap();

    assert_eq!(outcome, CorrelationOutcome::Pending);
    assert_eq!(outcome.found(), ("", false));
}

#[tokio::test]
async fn match_is_acknowledged_once_and_not_found_again() {
    let h = Harness::new();
    h.worker_publishes(r#"{"message_id":"X","uuid_processed":"Y"}"#)
        .await;

    let outcome = h.correlator.correlate("X").await.unwrap();
    assert_eq!(outcome.found(), ("Y", true));
    assert_eq!(h.acks(), 1);

    let again = h.correlator.correlate("X").await.unwrap();
    assert_eq!(again.found(), ("", false));
    assert_eq!(h.acks(), 1);
    assert_eq!(h.broker.depth(RESULTS).await, 0);
}

#[tokio::test]
async fn non_matching_result_is_released_not_acknowledged() {
    let h = Harness::new();
    h.worker_publishes(r#"{"message_id":"other","uuid_processed":"Z"}"#)
        .await;

    let outcome = h.correlator.correlate("X").await.unwrap();

    assert_eq!(outcome, CorrelationOutcome::Pending);
    assert_eq!(h.acks(), 0);
    assert_eq!(h.releases(), 1);

    // Released, so the owner of the other job finds it right away.
    let owner = h.correlator.correlate("other").await.unwrap();
    assert_eq!(owner, CorrelationOutcome::Ready("Z".into()));
}

#[tokio::test]
async fn release_can_be_disabled() {
    let h = Harness::with_config(QueueConfig {
        release_unmatched: false,
        ..QueueConfig::default()
    });
    h.worker_publishes(r#"{"message_id":"other","uuid_processed":"Z"}"#)
        .await;

    h.correlator.correlate("X").await.unwrap();

    assert_eq!(h.releases(), 0);
    assert_eq!(h.acks(), 0);
    assert_eq!(h.broker.depth(RESULTS).await, 1);
}

#[tokio::test]
async fn matching_is_exact() {
    let h = Harness::new();
    h.worker_publishes(r#"{"message_id":"1-u1 ","uuid_processed":"a"}"#)
        .await;
    h.worker_publishes(r#"{"message_id":"1-U1","uuid_processed":"b"}"#)
        .await;

    let outcome = h.correlator.correlate("1-u1").await.unwrap();

    assert_eq!(outcome, CorrelationOutcome::Pending);
    assert_eq!(h.acks(), 0);
}

#[tokio::test]
async fn malformed_entries_do_not_hide_a_match() {
    let h = Harness::new();
    h.worker_publishes("not json").await;
    h.worker_publishes(r#"{"message_id":42}"#).await;
    h.worker_publishes(r#"{"message_id":"X","uuid_processed":"Y"}"#)
        .await;
    h.worker_publishes("[]").await;

    let outcome = h.correlator.correlate("X").await.unwrap();

    assert_eq!(outcome, CorrelationOutcome::Ready("Y".into()));
    assert_eq!(h.acks(), 1);
    // Undecodable entries on either side of the match are left locked.
    assert_eq!(h.releases(), 0);
    assert_eq!(h.broker.depth(RESULTS).await, 3);
}

#[tokio::test]
async fn first_match_wins_and_later_entries_are_released() {
    let h = Harness::new();
    h.worker_publishes(r#"{"message_id":"X","uuid_processed":"first"}"#)
        .await;
    h.worker_publishes(r#"{"message_id":"X","uuid_processed":"second"}"#)
        .await;

    let outcome = h.correlator.correlate("X").await.unwrap();
    assert_eq!(outcome, CorrelationOutcome::Ready("first".into()));
    assert_eq!(h.acks(), 1);
    assert_eq!(h.releases(), 1);

    // The duplicate is still deliverable and is found by the next poll.
    let duplicate = h.correlator.correlate("X").await.unwrap();
    assert_eq!(duplicate, CorrelationOutcome::Ready("second".into()));
}

#[tokio::test]
async fn match_without_artifact_is_malformed_but_consumed() {
    let h = Harness::new();
    h.worker_publishes(r#"{"message_id":"X"}"#).await;

    let err = h.correlator.correlate("X").await.unwrap_err();
    assert!(matches!(
        err,
        Error::MalformedMessage { message_id: Some(ref id), .. } if id == "X"
    ));
    assert_eq!(h.acks(), 1);

    let again = h.correlator.correlate("X").await.unwrap();
    assert_eq!(again, CorrelationOutcome::Pending);
}

#[tokio::test]
async fn batch_size_bounds_the_scan() {
    let h = Harness::with_config(QueueConfig {
        receive_batch_size: 2,
        ..QueueConfig::default()
    });
    h.worker_publishes(r#"{"message_id":"a","uuid_processed":"1"}"#)
        .await;
    h.worker_publishes(r#"{"message_id":"b","uuid_processed":"2"}"#)
        .await;
    h.worker_publishes(r#"{"message_id":"X","uuid_processed":"Y"}"#)
        .await;

    let first = h.correlator.correlate("X").await.unwrap();
    assert_eq!(first, CorrelationOutcome::Pending);

    let second = h.correlator.correlate("X").await.unwrap();
    assert_eq!(second, CorrelationOutcome::Pending);
}

#[tokio::test]
async fn submit_then_worker_result_round_trip() {
    let h = Harness::new();
    let t = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

    let message_id = h.correlator.submit_at(&request("u1"), t).await.unwrap();
    assert_eq!(message_id, "1700000000-u1");

    h.worker_publishes(r#"{"message_id":"1700000000-u1","uuid_processed":"artifact-1"}"#)
        .await;

    let outcome = h.correlator.correlate(&message_id).await.unwrap();
    assert_eq!(outcome.found(), ("artifact-1", true));
}

#[tokio::test]
async fn closed_client_fails_fast() {
    let h = Harness::new();
    h.correlator.client().close().await;

    assert!(matches!(
        h.correlator.submit(&request("u1")).await,
        Err(Error::Transport(TransportError::Closed))
    ));
    assert!(matches!(
        h.correlator.correlate("X").await,
        Err(Error::Transport(TransportError::Closed))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_polls_each_consume_only_their_own_result() {
    let h = Harness::new();
    h.worker_publishes(r#"{"message_id":"A","uuid_processed":"artifact-a"}"#)
        .await;
    h.worker_publishes(r#"{"message_id":"B","uuid_processed":"artifact-b"}"#)
        .await;

    let poll_until_ready = |target: &'static str| {
        let correlator = h.correlator.clone();
        tokio::spawn(async move {
            for _ in 0..50 {
                if let CorrelationOutcome::Ready(artifact) =
                    correlator.correlate(target).await.unwrap()
                {
                    return Some(artifact);
                }
                tokio::task::yield_now().await;
            }
            None
        })
    };

    let (a, b) = tokio::join!(poll_until_ready("A"), poll_until_ready("B"));

    assert_eq!(a.unwrap().as_deref(), Some("artifact-a"));
    assert_eq!(b.unwrap().as_deref(), Some("artifact-b"));
    assert_eq!(h.acks(), 2);
    assert_eq!(h.broker.depth(RESULTS).await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn submissions_proceed_while_polls_are_scanning() {
    let h = Harness::new();
    for i in 0..20 {
        h.worker_publishes(&format!(
            r#"{{"message_id":"other-{i}","uuid_processed":"z"}}"#
        ))
        .await;
    }

    let mut tasks = Vec::new();
    for i in 0..10 {
        let correlator = h.correlator.clone();
        tasks.push(tokio::spawn(async move {
            correlator.submit(&request(&format!("u{i}"))).await.map(|_| ())
        }));
        let correlator = h.correlator.clone();
        tasks.push(tokio::spawn(async move {
            correlator.correlate("X").await.map(|outcome| {
                assert_eq!(outcome, CorrelationOutcome::Pending);
            })
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(h.broker.depth(JOBS).await, 10);
    assert_eq!(h.acks(), 0);
    // Every foreign result is still there for its owner.
    assert_eq!(h.broker.depth(RESULTS).await, 20);
}
