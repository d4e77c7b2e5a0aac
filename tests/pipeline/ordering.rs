//! Topic groups of one batch run strictly one after another.

use crate::support::{member, message, Pipeline};

fn position(trace: &[String], entry: &str) -> usize {
    trace
        .iter()
        .position(|e| e == entry)
        .unwrap_or_else(|| panic!("'{entry}' missing from {trace:?}"))
}

#[tokio::test(start_paused = true)]
async fn test_first_group_completes_before_second_begins() {
    let pipeline = Pipeline::provisioned(1).await;
    for id in 1..=3 {
        pipeline
            .producer
            .publish_record(&message(id, "hello world"))
            .await
            .unwrap();
    }
    for id in 10..=11 {
        pipeline.producer.publish_record(&member(id)).await.unwrap();
    }
    let consumer = pipeline.consumer();

    pipeline
        .run_until(&consumer, |h| h.calls().len() >= 5)
        .await;

    let trace = pipeline.handlers.trace();
    let last_message_end = ["end message 1", "end message 2", "end message 3"]
        .iter()
        .map(|entry| position(&trace, entry))
        .max()
        .unwrap();
    let first_member_start = ["start member 10", "start member 11"]
        .iter()
        .map(|entry| position(&trace, entry))
        .min()
        .unwrap();
    assert!(
        last_message_end < first_member_start,
        "member group started early: {trace:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn test_records_of_a_group_are_dispatched_concurrently() {
    let pipeline = Pipeline::provisioned(1).await;
    for id in 1..=2 {
        pipeline.producer.publish_record(&member(id)).await.unwrap();
    }
    let consumer = pipeline.consumer();

    pipeline
        .run_until(&consumer, |h| h.calls().len() >= 2)
        .await;

    let trace = pipeline.handlers.trace();
    // Both calls are in flight before either finishes.
    assert!(position(&trace, "start member 2") < position(&trace, "end member 1"));
}
