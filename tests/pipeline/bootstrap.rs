//! Broker readiness, retry limits and topic provisioning.

use crate::support::{Pipeline, GROUP};
use event_types::TopicRegistry;
use guildstream::testing::{MemoryLog, MemoryOp};
use guildstream_kafka_source::{
    ConnectionManager, ConsumerState, Error, RetryPolicy, StopReason, TopicProvisioning,
};
use std::time::Duration;

fn manager(log: &MemoryLog, attempts: u32) -> ConnectionManager<MemoryLog> {
    ConnectionManager::new(
        log.clone(),
        RetryPolicy::new(attempts, Duration::from_secs(5)),
        TopicProvisioning::default(),
    )
}

#[tokio::test(start_paused = true)]
async fn test_retry_stops_at_configured_attempts() {
    let log = MemoryLog::default();
    log.fail_next(MemoryOp::Probe, 100);
    let connections = manager(&log, 5);

    let result = connections.establish().await;

    match result {
        Err(Error::RetriesExhausted { attempts, .. }) => assert_eq!(attempts, 5),
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
    assert_eq!(log.calls(MemoryOp::Probe), 5);
    assert!(!connections.is_established());
}

#[tokio::test(start_paused = true)]
async fn test_broker_that_comes_up_late_is_waited_for() {
    let log = MemoryLog::default();
    log.fail_next(MemoryOp::Probe, 3);
    let connections = manager(&log, 5);

    connections.establish().await.unwrap();

    assert!(connections.is_established());
    assert_eq!(log.calls(MemoryOp::Probe), 4);
}

#[tokio::test(start_paused = true)]
async fn test_ensure_topics_creates_only_on_first_run() {
    let log = MemoryLog::default();
    let connections = manager(&log, 5);
    let topics = TopicRegistry::default().consumed_topics();

    let first = connections.ensure_topics(&topics).await.unwrap();
    let second = connections.ensure_topics(&topics).await.unwrap();

    assert_eq!(first.len(), 4);
    assert!(second.is_empty());
    assert_eq!(log.create_requests().len(), 1);
    assert_eq!(log.calls(MemoryOp::Probe), 1);
}

#[tokio::test(start_paused = true)]
async fn test_topic_creation_failures_are_retried() {
    let log = MemoryLog::default();
    log.fail_next(MemoryOp::CreateTopics, 2);
    let connections = manager(&log, 5);
    let topics = TopicRegistry::default().all_topics();

    let created = connections.ensure_topics(&topics).await.unwrap();

    assert_eq!(created.len(), 5);
    assert_eq!(log.calls(MemoryOp::CreateTopics), 3);
    assert_eq!(log.topic_names().len(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_consumer_start_retries_session_connect() {
    let pipeline = Pipeline::provisioned(1).await;
    let connections = manager(&pipeline.log, 5);
    let consumer = pipeline.consumer();
    consumer.shutdown_token().cancel();

    let mut session = Some(pipeline.session());
    let reason = consumer
        .start(&connections, |attempt| {
            let ready = if attempt >= 3 { session.take() } else { None };
            async move { ready.ok_or_else(|| Error::Consumer(format!("group {GROUP} not ready"))) }
        })
        .await
        .unwrap();

    assert_eq!(reason, StopReason::Requested);
    assert_eq!(consumer.state(), ConsumerState::Stopped);
    assert!(session.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_consumer_start_gives_up_after_max_attempts() {
    let pipeline = Pipeline::provisioned(1).await;
    let connections = manager(&pipeline.log, 2);
    let consumer = pipeline.consumer();
    let mut calls = 0;

    let result = consumer
        .start(&connections, |_| {
            calls += 1;
            async {
                Err::<guildstream::testing::MemorySession, _>(Error::Consumer(
                    "coordinator unavailable".to_string(),
                ))
            }
        })
        .await;

    assert!(matches!(
        result,
        Err(Error::RetriesExhausted { attempts: 2, .. })
    ));
    assert_eq!(calls, 2);
    assert_eq!(consumer.state(), ConsumerState::Stopped);
}
