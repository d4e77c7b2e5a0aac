//! Consumer-group sessions.
//!
//! A [`LogSession`] is one membership in the consumer group: it hands out
//! batches, tracks which records have been processed, keeps the membership
//! alive and commits. [`KafkaSession`] is the rdkafka implementation.

use crate::error::{Error, Result};
use async_trait::async_trait;
use event_types::LogRecord;
use rdkafka::client::ClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{
    BaseConsumer, CommitMode, Consumer, ConsumerContext, Rebalance, StreamConsumer,
};
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::TopicPartitionList;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Whether the session may keep processing the batch in hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Processing may continue.
    Live,
    /// The group rebalanced since the batch was pulled. The batch's partitions
    /// may belong to another member now, so the rest of it must be dropped.
    Stale,
    /// The membership is gone for good. The consumer has to stop.
    Lost,
}

/// One membership in the consumer group.
#[async_trait]
pub trait LogSession: Send {
    /// Pull the next batch. An empty batch means the wait elapsed with nothing
    /// to read.
    async fn next_batch(&mut self) -> Result<Vec<LogRecord>>;

    /// Mark `record` processed; it will not be redelivered once committed.
    fn resolve_offset(&mut self, record: &LogRecord) -> Result<()>;

    /// Tell the broker this member is alive.
    async fn heartbeat(&mut self) -> Result<()>;

    /// Checked before each topic group of a batch is dispatched.
    fn liveness(&self) -> Liveness;

    /// Commit everything resolved so far.
    async fn commit(&mut self) -> Result<()>;

    /// Leave the group.
    async fn close(&mut self) -> Result<()>;
}

/// Configuration for a [`KafkaSession`].
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Kafka brokers (comma-separated list)
    pub brokers: String,
    /// Client identifier reported to the broker
    pub client_id: String,
    /// Consumer group ID
    pub group_id: String,
    /// Topics to subscribe to
    pub topics: Vec<String>,
    /// Where to start when the group has no committed offset
    pub auto_offset_reset: String,
    /// Time without heartbeats after which the broker evicts this member
    pub session_timeout: Duration,
    /// Upper bound on a rebalance round, and on the time between two pulls
    pub rebalance_timeout: Duration,
    /// Heartbeat cadence
    pub heartbeat_interval: Duration,
    /// Longest time a pull waits for the first record of a batch
    pub max_batch_wait: Duration,
    /// Per-partition fetch limit in bytes
    pub max_bytes_per_partition: usize,
    /// Maximum number of records in one batch
    pub max_batch_size: usize,
    /// Timeout for the metadata request issued right after subscribing
    pub metadata_timeout: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            client_id: "discord-bot".to_string(),
            group_id: "discord-consumer-group".to_string(),
            topics: Vec::new(),
            auto_offset_reset: "earliest".to_string(),
            session_timeout: Duration::from_secs(30),
            rebalance_timeout: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(3),
            max_batch_wait: Duration::from_secs(5),
            max_bytes_per_partition: 1024 * 1024,
            max_batch_size: 500,
            metadata_timeout: Duration::from_secs(10),
        }
    }
}

impl ConsumerConfig {
    fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.brokers)
            .set("client.id", &self.client_id)
            .set("group.id", &self.group_id)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("enable.partition.eof", "false")
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set(
                "session.timeout.ms",
                self.session_timeout.as_millis().to_string(),
            )
            .set(
                "heartbeat.interval.ms",
                self.heartbeat_interval.as_millis().to_string(),
            )
            .set(
                "max.poll.interval.ms",
                self.rebalance_timeout.as_millis().to_string(),
            )
            .set(
                "fetch.wait.max.ms",
                self.max_batch_wait.as_millis().to_string(),
            )
            .set(
                "max.partition.fetch.bytes",
                self.max_bytes_per_partition.to_string(),
            );
        config
    }

    fn validate(&self) -> Result<()> {
        if self.topics.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one topic must be subscribed".to_string(),
            ));
        }
        if self.max_batch_size == 0 {
            return Err(Error::InvalidConfig(
                "max batch size must be positive".to_string(),
            ));
        }
        if self.heartbeat_interval >= self.session_timeout {
            return Err(Error::InvalidConfig(format!(
                "heartbeat interval ({:?}) must be shorter than the session timeout ({:?})",
                self.heartbeat_interval, self.session_timeout
            )));
        }
        Ok(())
    }
}

/// Membership state shared between the rebalance callbacks and the session.
#[derive(Debug, Default)]
struct Membership {
    generation: AtomicU64,
    lost: AtomicBool,
}

/// Consumer context that records rebalances.
pub struct SessionContext {
    membership: Arc<Membership>,
}

impl ClientContext for SessionContext {}

impl ConsumerContext for SessionContext {
    fn pre_rebalance(&self, _consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Revoke(partitions) => {
                self.membership.generation.fetch_add(1, Ordering::AcqRel);
                warn!("Partitions revoked: {}", partitions.count());
            }
            Rebalance::Assign(partitions) => {
                self.membership.lost.store(false, Ordering::Release);
                info!("Partitions assigned: {}", partitions.count());
            }
            Rebalance::Error(e) => {
                self.membership.lost.store(true, Ordering::Release);
                error!("Rebalance failed: {e}");
            }
        }
    }

    fn commit_callback(&self, result: KafkaResult<()>, _offsets: &TopicPartitionList) {
        match result {
            Ok(()) => debug!("Offsets committed"),
            Err(KafkaError::ConsumerCommit(RDKafkaErrorCode::NoOffset)) => {}
            Err(e) => warn!("Offset commit failed: {e}"),
        }
    }
}

/// [`LogSession`] over an rdkafka [`StreamConsumer`].
pub struct KafkaSession {
    consumer: StreamConsumer<SessionContext>,
    membership: Arc<Membership>,
    batch_generation: u64,
    max_batch_wait: Duration,
    max_batch_size: usize,
}

impl KafkaSession {
    /// Join the group and subscribe to the configured topics.
    pub async fn connect(config: &ConsumerConfig) -> Result<Self> {
        config.validate()?;

        let membership = Arc::new(Membership::default());
        let context = SessionContext {
            membership: Arc::clone(&membership),
        };
        let consumer: StreamConsumer<SessionContext> =
            config.client_config().create_with_context(context)?;

        let topics: Vec<&str> = config.topics.iter().map(String::as_str).collect();
        consumer.subscribe(&topics)?;
        // Subscribing is lazy; a metadata round trip proves the broker is there.
        // fetch_metadata blocks the calling thread until the broker answers.
        let metadata_timeout = config.metadata_timeout;
        let consumer = tokio::task::spawn_blocking(move || {
            consumer
                .fetch_metadata(None, metadata_timeout)
                .map(|_| consumer)
        })
        .await
        .map_err(|e| Error::Consumer(format!("metadata task failed: {e}")))??;

        info!(
            "Consumer '{}' joined group '{}' for topics {:?}",
            config.client_id, config.group_id, config.topics
        );

        Ok(Self {
            consumer,
            membership,
            batch_generation: 0,
            max_batch_wait: config.max_batch_wait,
            max_batch_size: config.max_batch_size,
        })
    }

    fn to_record(message: &BorrowedMessage<'_>) -> LogRecord {
        LogRecord {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message.key().map(<[u8]>::to_vec),
            payload: message.payload().map(<[u8]>::to_vec),
            timestamp: message.timestamp().to_millis(),
        }
    }
}

#[async_trait]
impl LogSession for KafkaSession {
    async fn next_batch(&mut self) -> Result<Vec<LogRecord>> {
        let first = match tokio::time::timeout(self.max_batch_wait, self.consumer.recv()).await {
            Ok(received) => Self::to_record(&received?),
            Err(_) => return Ok(Vec::new()),
        };
        self.batch_generation = self.membership.generation.load(Ordering::Acquire);

        let mut batch = vec![first];
        while batch.len() < self.max_batch_size {
            match tokio::time::timeout(Duration::from_millis(10), self.consumer.recv()).await {
                Ok(Ok(message)) => batch.push(Self::to_record(&message)),
                Ok(Err(e)) => {
                    warn!("Error while filling batch: {e}");
                    break;
                }
                Err(_) => break,
            }
        }

        debug!("Pulled batch of {} records", batch.len());
        Ok(batch)
    }

    fn resolve_offset(&mut self, record: &LogRecord) -> Result<()> {
        // The stored offset is the next one to read.
        self.consumer
            .store_offset(&record.topic, record.partition, record.offset + 1)?;
        Ok(())
    }

    async fn heartbeat(&mut self) -> Result<()> {
        // librdkafka heartbeats from its own thread; this only surfaces a lost
        // membership to the batch loop.
        if self.membership.lost.load(Ordering::Acquire) {
            return Err(Error::SessionLost(
                "group membership was lost during rebalance".to_string(),
            ));
        }
        Ok(())
    }

    fn liveness(&self) -> Liveness {
        if self.membership.lost.load(Ordering::Acquire) {
            Liveness::Lost
        } else if self.membership.generation.load(Ordering::Acquire) != self.batch_generation {
            Liveness::Stale
        } else {
            Liveness::Live
        }
    }

    async fn commit(&mut self) -> Result<()> {
        match self.consumer.commit_consumer_state(CommitMode::Async) {
            Ok(()) => Ok(()),
            Err(KafkaError::ConsumerCommit(RDKafkaErrorCode::NoOffset)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.consumer.unsubscribe();
        info!("Consumer left the group");
        Ok(())
    }
}
