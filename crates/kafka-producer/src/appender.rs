//! Appending encoded records to the log.

use crate::error::{Error, Result};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::ClientConfig;
use std::time::Duration;

/// Appends one keyed record to a topic.
///
/// Implementations make a single delivery attempt. Retrying is a delivery
/// guarantee decision and belongs to the caller, which for
/// [`crate::EventProducer`] means not retrying at all.
#[async_trait::async_trait]
pub trait LogAppender: Send + Sync {
    async fn append(&self, topic: &str, key: &str, payload: &[u8]) -> Result<()>;
}

/// Configuration for the Kafka appender.
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Kafka brokers (comma-separated list)
    pub brokers: String,
    /// Client id reported to the brokers
    pub client_id: String,
    /// How long librdkafka may spend delivering one record, queueing included
    pub delivery_timeout: Duration,
    /// librdkafka partitioner. `murmur2_random` hashes keys the same way the
    /// Java client does, so keyed records land on the same partition no matter
    /// which client produced them.
    pub partitioner: String,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            client_id: "discord-bot".to_string(),
            delivery_timeout: Duration::from_secs(5),
            partitioner: "murmur2_random".to_string(),
        }
    }
}

/// [`LogAppender`] backed by an rdkafka [`FutureProducer`].
///
/// One instance is created by the composition root and shared by every
/// publishing call site.
pub struct KafkaAppender {
    producer: FutureProducer,
    delivery_timeout: Duration,
}

impl KafkaAppender {
    pub fn new(config: &ProducerConfig) -> Result<Self> {
        if config.brokers.trim().is_empty() {
            return Err(Error::InvalidConfig("no brokers configured".to_string()));
        }

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("client.id", &config.client_id)
            .set(
                "message.timeout.ms",
                config.delivery_timeout.as_millis().to_string(),
            )
            .set("partitioner", &config.partitioner)
            .create()?;

        Ok(Self {
            producer,
            delivery_timeout: config.delivery_timeout,
        })
    }

    /// Wait for queued records to be delivered. Called once at shutdown.
    pub fn flush(&self, timeout: Duration) -> Result<()> {
        self.producer.flush(timeout)?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl LogAppender for KafkaAppender {
    async fn append(&self, topic: &str, key: &str, payload: &[u8]) -> Result<()> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        self.producer
            .send(record, self.delivery_timeout)
            .await
            .map_err(|(err, _)| err)?;

        Ok(())
    }
}
