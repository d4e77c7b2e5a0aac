//! Records published through the producer come out of the router intact.

use crate::support::{at, Call, Pipeline};
use event_types::{ReactionAction, Snowflake};
use guildstream_kafka_producer::{
    EmitOutcome, LogAppender, ReactionEvent, SkipReason, SourceEvent,
};

fn reaction_event() -> ReactionEvent {
    ReactionEvent {
        message_id: Snowflake(111),
        guild_id: Some(Snowflake(1)),
        channel_id: Snowflake(2),
        user_id: Snowflake(3),
        emoji_name: Some("thumbsup".to_string()),
        emoji_id: None,
    }
}

#[tokio::test(start_paused = true)]
async fn test_message_subject_text_reaches_handler_as_integer() {
    let pipeline = Pipeline::provisioned(3).await;
    let payload = br#"{"category":"message","subject":"111","guildId":"1","content":"hi"}"#;
    pipeline
        .log
        .append("discord.messages", "111", payload)
        .await
        .unwrap();
    let consumer = pipeline.consumer();

    pipeline
        .run_until(&consumer, |h| !h.calls().is_empty())
        .await;

    let calls = pipeline.handlers.calls();
    assert_eq!(calls.len(), 1);
    match &calls[0] {
        Call::Message(record) => {
            assert_eq!(record.subject.get(), 111u64);
            assert_eq!(record.guild_id, Snowflake(1));
            assert_eq!(record.content, "hi");
            assert_eq!(record.author_id, None);
        }
        other => panic!("expected a message call, got {other:?}"),
    }
    let stats = consumer.stats().snapshot();
    assert_eq!(stats.records_parsed, 1);
    assert_eq!(stats.records_skipped, 0);
}

#[tokio::test(start_paused = true)]
async fn test_reaction_add_then_remove_arrive_in_order() {
    let pipeline = Pipeline::provisioned(4).await;

    let added = pipeline
        .producer
        .emit(SourceEvent::ReactionAdded(reaction_event()), at(1_000))
        .await;
    let removed = pipeline
        .producer
        .emit(SourceEvent::ReactionRemoved(reaction_event()), at(2_000))
        .await;
    assert_eq!(added, EmitOutcome::Published);
    assert_eq!(removed, EmitOutcome::Published);

    let consumer = pipeline.consumer();
    pipeline
        .run_until(&consumer, |h| h.calls().len() >= 2)
        .await;

    let actions: Vec<ReactionAction> = pipeline
        .handlers
        .calls()
        .into_iter()
        .map(|call| match call {
            Call::Reaction(record) => {
                assert_eq!(record.subject, Snowflake(111));
                assert_eq!(record.emoji_name, "thumbsup");
                record.action
            }
            other => panic!("expected a reaction call, got {other:?}"),
        })
        .collect();
    assert_eq!(actions, vec![ReactionAction::Add, ReactionAction::Remove]);
}

#[tokio::test(start_paused = true)]
async fn test_records_sharing_a_key_keep_publish_order() {
    let pipeline = Pipeline::provisioned(4).await;

    // Interleave two users reacting to the same message.
    for i in 0..10u64 {
        for user in [3u64, 4] {
            let mut event = reaction_event();
            event.user_id = Snowflake(user);
            let source = if i % 2 == 0 {
                SourceEvent::ReactionAdded(event)
            } else {
                SourceEvent::ReactionRemoved(event)
            };
            pipeline.producer.emit(source, at(i as i64)).await;
        }
    }

    let consumer = pipeline.consumer();
    pipeline
        .run_until(&consumer, |h| h.calls().len() >= 20)
        .await;

    for user in [3u64, 4] {
        let actions: Vec<ReactionAction> = pipeline
            .handlers
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Reaction(record) if record.user_id == Snowflake(user) => Some(record.action),
                _ => None,
            })
            .collect();
        let expected: Vec<ReactionAction> = (0..10)
            .map(|i| {
                if i % 2 == 0 {
                    ReactionAction::Add
                } else {
                    ReactionAction::Remove
                }
            })
            .collect();
        assert_eq!(actions, expected, "order for user {user}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_filtered_events_never_reach_the_log() {
    let pipeline = Pipeline::provisioned(1).await;

    let outcome = pipeline
        .producer
        .emit(
            SourceEvent::MessageCreated {
                id: Snowflake(9),
                content: "beep boop".to_string(),
                author_id: Snowflake(2),
                author_is_bot: true,
                guild_id: Some(Snowflake(1)),
                channel_id: Snowflake(3),
                created_at: at(0),
            },
            at(0),
        )
        .await;

    assert_eq!(outcome, EmitOutcome::Skipped(SkipReason::BotAuthor));
    assert!(pipeline.log.records("discord.messages").is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_every_category_is_dispatched_once() {
    let pipeline = Pipeline::provisioned(2).await;
    let consumer = pipeline.consumer();

    pipeline
        .producer
        .publish_record(&crate::support::message(1, "hello"))
        .await
        .unwrap();
    pipeline
        .producer
        .publish_record(&crate::support::member(2))
        .await
        .unwrap();
    pipeline
        .producer
        .emit(SourceEvent::ReactionAdded(reaction_event()), at(5))
        .await;

    pipeline
        .run_until(&consumer, |h| h.calls().len() >= 3)
        .await;

    let calls = pipeline.handlers.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(consumer.stats().snapshot().records_handled, 3);
    assert!(pipeline.log.commits() >= 1);
}
