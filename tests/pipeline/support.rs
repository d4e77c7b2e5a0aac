//! Shared fixtures: a provisioned in-memory log, recording handlers and a
//! helper that runs the consumer until a condition holds.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use event_types::{
    EventRecord, MemberRecord, MessageRecord, PresenceRecord, ReactionRecord, Snowflake,
    TopicRegistry,
};
use guildstream::testing::{MemoryLog, MemorySession};
use guildstream_kafka_producer::EventProducer;
use guildstream_kafka_source::{
    BatchConsumer, BatchSettings, ConnectionManager, EventHandlers, RetryPolicy, StopReason,
    TopicProvisioning, TopicRouter,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const GROUP: &str = "discord-consumer-group";

/// What a handler saw, in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Message(MessageRecord),
    Reaction(ReactionRecord),
    Member(MemberRecord),
    Presence(PresenceRecord),
}

type MessageHook = Box<dyn Fn(&MessageRecord) + Send + Sync>;

#[derive(Default)]
pub struct RecordingHandlers {
    calls: Mutex<Vec<Call>>,
    trace: Mutex<Vec<String>>,
    failing: Mutex<HashSet<u64>>,
    on_message: Mutex<Option<MessageHook>>,
    delay: Mutex<Duration>,
}

impl RecordingHandlers {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// `start`/`end` markers around every call, for ordering checks.
    pub fn trace(&self) -> Vec<String> {
        self.trace.lock().unwrap().clone()
    }

    /// Make every handler call for `subject` fail.
    pub fn fail_subject(&self, subject: u64) {
        self.failing.lock().unwrap().insert(subject);
    }

    /// Make every handler call take `delay`.
    pub fn delay_calls(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Run `hook` inside every message handler call.
    pub fn on_message(&self, hook: impl Fn(&MessageRecord) + Send + Sync + 'static) {
        *self.on_message.lock().unwrap() = Some(Box::new(hook));
    }

    async fn record(&self, label: &str, subject: Snowflake, call: Call) -> anyhow::Result<()> {
        self.trace
            .lock()
            .unwrap()
            .push(format!("start {label} {subject}"));
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.calls.lock().unwrap().push(call);
        self.trace.lock().unwrap().push(format!("end {label} {subject}"));

        if self.failing.lock().unwrap().contains(&subject.get()) {
            anyhow::bail!("handler refused {label} {subject}");
        }
        Ok(())
    }
}

#[async_trait]
impl EventHandlers for RecordingHandlers {
    async fn handle_message(&self, record: &MessageRecord) -> anyhow::Result<()> {
        if let Some(hook) = self.on_message.lock().unwrap().as_ref() {
            hook(record);
        }
        self.record("message", record.subject, Call::Message(record.clone()))
            .await
    }

    async fn handle_reaction(&self, record: &ReactionRecord) -> anyhow::Result<()> {
        self.record("reaction", record.subject, Call::Reaction(record.clone()))
            .await
    }

    async fn handle_member(&self, record: &MemberRecord) -> anyhow::Result<()> {
        self.record("member", record.subject, Call::Member(record.clone()))
            .await
    }

    async fn handle_presence(&self, record: &PresenceRecord) -> anyhow::Result<()> {
        self.record("presence", record.subject, Call::Presence(record.clone()))
            .await
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(10))
}

pub fn at(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).unwrap()
}

pub fn message(id: u64, content: &str) -> EventRecord {
    EventRecord::Message(MessageRecord {
        subject: Snowflake(id),
        guild_id: Snowflake(1),
        timestamp: at(1_700_000_000_000),
        author_id: Some(Snowflake(2)),
        channel_id: Some(Snowflake(3)),
        content: content.to_string(),
    })
}

pub fn member(id: u64) -> EventRecord {
    EventRecord::Member(MemberRecord {
        subject: Snowflake(id),
        guild_id: Snowflake(1),
        timestamp: at(1_700_000_000_000),
        username: format!("user{id}"),
    })
}

/// A log with every category topic provisioned, plus a producer and
/// recording handlers wired to it.
pub struct Pipeline {
    pub log: MemoryLog,
    pub registry: TopicRegistry,
    pub producer: EventProducer<MemoryLog>,
    pub handlers: Arc<RecordingHandlers>,
}

impl Pipeline {
    pub async fn provisioned(partitions: usize) -> Self {
        let log = MemoryLog::new(partitions);
        let registry = TopicRegistry::default();
        let connections = ConnectionManager::new(
            log.clone(),
            fast_retry(),
            TopicProvisioning {
                partitions: partitions as i32,
                replication: 1,
            },
        );
        connections
            .ensure_topics(&registry.all_topics())
            .await
            .unwrap();

        Self {
            producer: EventProducer::new(log.clone(), registry.clone()),
            log,
            registry,
            handlers: Arc::default(),
        }
    }

    pub fn consumer(&self) -> BatchConsumer<Arc<RecordingHandlers>> {
        BatchConsumer::new(
            TopicRouter::new(Arc::clone(&self.handlers)),
            self.registry.clone(),
            BatchSettings::default(),
        )
    }

    pub fn session(&self) -> MemorySession {
        self.log
            .session(GROUP, &self.registry.consumed_topics(), 100)
    }

    /// Run `consumer` until `done` holds, then stop it.
    pub async fn run_until(
        &self,
        consumer: &BatchConsumer<Arc<RecordingHandlers>>,
        done: impl Fn(&RecordingHandlers) -> bool,
    ) -> StopReason {
        let token = consumer.shutdown_token();
        let handlers = Arc::clone(&self.handlers);
        let (reason, _) = tokio::join!(consumer.run(self.session()), async move {
            for _ in 0..500 {
                if done(&handlers) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            token.cancel();
        });
        reason
    }
}
