//! Bad records, failing handlers, rebalances, evictions and stops.

use crate::support::{member, message, Call, Pipeline, GROUP};
use event_types::Snowflake;
use guildstream::testing::MemoryOp;
use guildstream_kafka_producer::{EmitOutcome, SourceEvent};
use guildstream_kafka_source::{ConsumerState, StopReason};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[tokio::test(start_paused = true)]
async fn test_malformed_record_does_not_block_later_records() {
    let pipeline = Pipeline::provisioned(1).await;
    pipeline
        .log
        .append_raw("discord.messages", 0, Some("1"), Some(b"{\"category\":".to_vec()))
        .unwrap();
    pipeline
        .log
        .append_raw("discord.messages", 0, Some("2"), None)
        .unwrap();
    pipeline
        .producer
        .publish_record(&message(3, "still delivered"))
        .await
        .unwrap();
    let consumer = pipeline.consumer();

    pipeline
        .run_until(&consumer, |h| !h.calls().is_empty())
        .await;

    let calls = pipeline.handlers.calls();
    assert_eq!(calls.len(), 1);
    assert!(matches!(&calls[0], Call::Message(r) if r.subject == Snowflake(3)));
    assert_eq!(pipeline.log.committed(GROUP, "discord.messages", 0), Some(3));
    let stats = consumer.stats().snapshot();
    assert_eq!(stats.records_skipped, 2);
    assert_eq!(stats.records_parsed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_failing_handler_does_not_affect_siblings() {
    let pipeline = Pipeline::provisioned(1).await;
    pipeline.handlers.fail_subject(13);
    for id in [12, 13, 14] {
        pipeline.producer.publish_record(&member(id)).await.unwrap();
    }
    let consumer = pipeline.consumer();

    pipeline
        .run_until(&consumer, |h| h.calls().len() >= 3)
        .await;

    let stats = consumer.stats().snapshot();
    assert_eq!(stats.records_handled, 2);
    assert_eq!(stats.handler_failures, 1);
    // Failures are not retried, so the batch still commits past them.
    assert_eq!(pipeline.log.committed(GROUP, "discord.members", 0), Some(3));
}

#[tokio::test(start_paused = true)]
async fn test_rebalance_abandons_remaining_groups_and_redelivers() {
    let pipeline = Pipeline::provisioned(1).await;
    pipeline
        .producer
        .publish_record(&message(99, "rebalance trigger"))
        .await
        .unwrap();
    pipeline.producer.publish_record(&member(7)).await.unwrap();

    let log = pipeline.log.clone();
    let fired = Arc::new(AtomicBool::new(false));
    let hook_fired = Arc::clone(&fired);
    pipeline.handlers.on_message(move |_| {
        if !hook_fired.swap(true, Ordering::SeqCst) {
            log.rebalance();
        }
    });
    let consumer = pipeline.consumer();

    pipeline
        .run_until(&consumer, |h| {
            h.calls().iter().any(|c| matches!(c, Call::Member(_)))
        })
        .await;

    let calls = pipeline.handlers.calls();
    let messages = calls.iter().filter(|c| matches!(c, Call::Message(_))).count();
    let members = calls.iter().filter(|c| matches!(c, Call::Member(_))).count();
    // The message group ran before the rebalance was noticed and runs again
    // on redelivery; the member group ran only after it.
    assert_eq!(messages, 2);
    assert_eq!(members, 1);
    assert!(fired.load(Ordering::SeqCst));
    assert!(consumer.stats().snapshot().groups_abandoned >= 1);
}

#[tokio::test(start_paused = true)]
async fn test_eviction_stops_the_consumer() {
    let pipeline = Pipeline::provisioned(1).await;
    pipeline.log.evict();
    let consumer = pipeline.consumer();

    let reason = consumer.run(pipeline.session()).await;

    assert_eq!(reason, StopReason::SessionLost);
    assert_eq!(consumer.state(), ConsumerState::Stopped);
    assert_eq!(pipeline.log.closed_sessions(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_token_moves_consumer_to_stopped() {
    let pipeline = Pipeline::provisioned(1).await;
    let consumer = pipeline.consumer();
    let mut states = consumer.subscribe_state();

    let reason = pipeline.run_until(&consumer, |_| true).await;

    assert_eq!(reason, StopReason::Requested);
    assert_eq!(*states.borrow_and_update(), ConsumerState::Stopped);
    assert_eq!(pipeline.log.closed_sessions(), 1);
    assert_eq!(pipeline.log.commits(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_pull_is_retried() {
    let pipeline = Pipeline::provisioned(1).await;
    pipeline.log.fail_next(MemoryOp::Pull, 2);
    pipeline.producer.publish_record(&member(1)).await.unwrap();
    let consumer = pipeline.consumer();

    pipeline
        .run_until(&consumer, |h| !h.calls().is_empty())
        .await;

    assert_eq!(pipeline.handlers.calls().len(), 1);
    assert!(pipeline.log.calls(MemoryOp::Pull) >= 3);
}

#[tokio::test(start_paused = true)]
async fn test_publish_failure_is_not_retried() {
    let pipeline = Pipeline::provisioned(1).await;
    pipeline.log.fail_next(MemoryOp::Append, 1);

    let outcome = pipeline
        .producer
        .emit(
            SourceEvent::MemberJoined {
                user_id: Snowflake(5),
                username: "ada".to_string(),
                guild_id: Snowflake(1),
                joined_at: None,
            },
            chrono::Utc::now(),
        )
        .await;

    assert_eq!(outcome, EmitOutcome::Failed);
    assert_eq!(pipeline.log.calls(MemoryOp::Append), 1);
    assert!(pipeline.log.records("discord.members").is_empty());
    assert_eq!(pipeline.producer.failed_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_group_still_sends_heartbeats() {
    let pipeline = Pipeline::provisioned(1).await;
    pipeline.handlers.delay_calls(std::time::Duration::from_secs(4));
    for id in 1..=2 {
        pipeline.producer.publish_record(&member(id)).await.unwrap();
    }
    let consumer = pipeline.consumer();

    pipeline
        .run_until(&consumer, |h| h.calls().len() >= 2)
        .await;

    assert_eq!(pipeline.handlers.calls().len(), 2);
    assert!(pipeline.log.heartbeats() >= 1);
    assert_eq!(pipeline.log.committed(GROUP, "discord.members", 0), Some(2));
}
