//! The event producer.

use crate::appender::LogAppender;
use crate::error::Result;
use crate::source::{normalize, Normalized, SkipReason, SourceEvent};
use chrono::{DateTime, Utc};
use event_types::{EventRecord, TopicRegistry};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error};

/// What happened to an event handed to [`EventProducer::emit`].
#[derive(Debug, Clone, PartialEq)]
pub enum EmitOutcome {
    Published,
    Skipped(SkipReason),
    /// The append failed and was logged. The event is dropped.
    Failed,
}

/// Publishes records to the log.
///
/// Publishing is one-shot: a failed append is reported (or, through
/// [`EventProducer::emit`], logged) and never retried here, so the publish
/// path is at-most-once. Adding retries would change the delivery guarantee
/// seen by consumers.
pub struct EventProducer<A: LogAppender> {
    appender: A,
    topics: TopicRegistry,
    published: AtomicU64,
    failed: AtomicU64,
}

impl<A: LogAppender> EventProducer<A> {
    pub fn new(appender: A, topics: TopicRegistry) -> Self {
        Self {
            appender,
            topics,
            published: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn topics(&self) -> &TopicRegistry {
        &self.topics
    }

    pub fn appender(&self) -> &A {
        &self.appender
    }

    /// Append exactly one record to `topic` under `key`.
    pub async fn publish(&self, topic: &str, key: &str, record: &EventRecord) -> Result<()> {
        let payload = record.encode()?;
        self.appender.append(topic, key, &payload).await?;
        self.published.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Published {} record {} to '{}' (key {})",
            record.category(),
            record.subject(),
            topic,
            key
        );
        Ok(())
    }

    /// Publish a record to its category's topic under its derived key.
    pub async fn publish_record(&self, record: &EventRecord) -> Result<()> {
        let topic = self.topics.topic(record.category());
        let key = record.partition_key();
        self.publish(topic, &key, record).await
    }

    /// Normalize and publish a live event.
    ///
    /// This is the call site used by event listeners: failures are logged and
    /// swallowed, so a broken broker never takes the listener down.
    pub async fn emit(&self, event: SourceEvent, now: DateTime<Utc>) -> EmitOutcome {
        let kind = event.kind();
        let record = match normalize(event, now) {
            Normalized::Record(record) => record,
            Normalized::Skipped(reason) => {
                debug!("Skipping {kind} event: {reason}");
                return EmitOutcome::Skipped(reason);
            }
        };

        match self.publish_record(&record).await {
            Ok(()) => EmitOutcome::Published,
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                error!(
                    "Failed to publish {} record {} (guild {}): {}",
                    record.category(),
                    record.subject(),
                    record.guild_id(),
                    e
                );
                EmitOutcome::Failed
            }
        }
    }

    /// Number of records appended so far.
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Number of events dropped because their append failed.
    pub fn failed_count(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::source::ReactionEvent;
    use event_types::Snowflake;
    use std::sync::Mutex;

    /// Records appends; fails every append while `fail` is set.
    #[derive(Default)]
    struct RecordingAppender {
        fail: bool,
        attempts: Mutex<Vec<(String, String, Vec<u8>)>>,
    }

    #[async_trait::async_trait]
    impl LogAppender for RecordingAppender {
        async fn append(&self, topic: &str, key: &str, payload: &[u8]) -> Result<()> {
            self.attempts.lock().unwrap().push((
                topic.to_string(),
                key.to_string(),
                payload.to_vec(),
            ));
            if self.fail {
                return Err(Error::Append {
                    topic: topic.to_string(),
                    message: "broker unavailable".to_string(),
                });
            }
            Ok(())
        }
    }

    fn reaction_added() -> SourceEvent {
        SourceEvent::ReactionAdded(ReactionEvent {
            message_id: Snowflake(111),
            guild_id: Some(Snowflake(1)),
            channel_id: Snowflake(2),
            user_id: Snowflake(3),
            emoji_name: Some("wave".to_string()),
            emoji_id: None,
        })
    }

    #[tokio::test]
    async fn test_emit_routes_to_category_topic_with_derived_key() {
        let producer = EventProducer::new(RecordingAppender::default(), TopicRegistry::default());

        let outcome = producer.emit(reaction_added(), Utc::now()).await;

        assert_eq!(outcome, EmitOutcome::Published);
        let attempts = producer.appender().attempts.lock().unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].0, "discord.reactions");
        assert_eq!(attempts[0].1, "111-3");
        let decoded = EventRecord::decode(&attempts[0].2).unwrap();
        assert_eq!(decoded.subject(), Snowflake(111));
    }

    #[tokio::test]
    async fn test_failed_publish_is_logged_and_not_retried() {
        let appender = RecordingAppender {
            fail: true,
            ..Default::default()
        };
        let producer = EventProducer::new(appender, TopicRegistry::default());

        let outcome = producer.emit(reaction_added(), Utc::now()).await;

        assert_eq!(outcome, EmitOutcome::Failed);
        assert_eq!(producer.appender().attempts.lock().unwrap().len(), 1);
        assert_eq!(producer.failed_count(), 1);
        assert_eq!(producer.published_count(), 0);
    }

    #[tokio::test]
    async fn test_skipped_event_is_not_appended() {
        let producer = EventProducer::new(RecordingAppender::default(), TopicRegistry::default());
        let event = SourceEvent::MessageCreated {
            id: Snowflake(1),
            content: "ok".to_string(),
            author_id: Snowflake(2),
            author_is_bot: false,
            guild_id: Some(Snowflake(3)),
            channel_id: Snowflake(4),
            created_at: Utc::now(),
        };

        let outcome = producer.emit(event, Utc::now()).await;

        assert_eq!(outcome, EmitOutcome::Skipped(SkipReason::ContentTooShort));
        assert!(producer.appender().attempts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_publish_surfaces_error_to_caller() {
        let appender = RecordingAppender {
            fail: true,
            ..Default::default()
        };
        let producer = EventProducer::new(appender, TopicRegistry::default());
        let record = match normalize(reaction_added(), Utc::now()) {
            Normalized::Record(record) => record,
            other => panic!("unexpected {other:?}"),
        };

        let result = producer.publish("custom-topic", "k", &record).await;

        assert!(matches!(result, Err(Error::Append { topic, .. }) if topic == "custom-topic"));
    }
}
