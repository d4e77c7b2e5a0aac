//! guildstream library
//!
//! Moves live guild events (messages, reactions, member joins, presence and
//! stream transitions) through Kafka into per-category handlers.
//!
//! # Crates
//!
//! - `event_types` - record schema, topic names and partition keys
//! - `guildstream_kafka_producer` - normalizes live events and appends them
//! - `guildstream_kafka_source` - broker bootstrap, batch consumer and router
//!
//! This crate holds what the binary needs on top of those: CLI options,
//! the JSONL event source, the logging handlers and an in-memory log used by
//! the test suite.
//!
//! # CLI Usage
//!
//! ```bash
//! # Create any missing topics
//! guildstream topics --brokers localhost:9092
//!
//! # Publish events read as JSON lines
//! guildstream publish --brokers localhost:9092 --input events.jsonl
//!
//! # Consume and log every record until Ctrl-C
//! guildstream consume --brokers localhost:9092 --group-id discord-consumer-group
//! ```

use clap::Parser;
use event_types::TopicRegistry;
use guildstream_kafka_producer::ProducerConfig;
use guildstream_kafka_source::{BatchSettings, ConsumerConfig, RetryPolicy, TopicProvisioning};
use std::time::Duration;

pub mod config;
pub mod handlers;
pub mod source;
pub mod testing;

pub use config::parse_duration;

/// Broker connection and topic names
#[derive(Parser, Clone, Debug)]
pub struct KafkaOpts {
    /// Kafka brokers (comma-separated list)
    #[arg(long, default_value = "localhost:9092", env = "KAFKA_BROKERS")]
    pub brokers: String,

    /// Client identifier reported to the brokers
    #[arg(long, default_value = "discord-bot", env = "KAFKA_CLIENT_ID")]
    pub client_id: String,

    /// Topic for message records
    #[arg(long, default_value = "discord.messages", env = "KAFKA_TOPIC_MESSAGES")]
    pub messages_topic: String,

    /// Topic for reaction records
    #[arg(long, default_value = "discord.reactions", env = "KAFKA_TOPIC_REACTIONS")]
    pub reactions_topic: String,

    /// Topic for member records
    #[arg(long, default_value = "discord.members", env = "KAFKA_TOPIC_MEMBERS")]
    pub members_topic: String,

    /// Topic for presence records
    #[arg(long, default_value = "discord.presences", env = "KAFKA_TOPIC_PRESENCES")]
    pub presences_topic: String,

    /// Topic for stream records
    #[arg(long, default_value = "discord.streams", env = "KAFKA_TOPIC_STREAMS")]
    pub streams_topic: String,

    /// Timeout for admin requests (metadata, topic creation)
    #[arg(long, default_value = "10s", value_parser = parse_duration)]
    pub admin_timeout: Duration,
}

impl KafkaOpts {
    pub fn topic_registry(&self) -> TopicRegistry {
        TopicRegistry {
            messages: self.messages_topic.clone(),
            reactions: self.reactions_topic.clone(),
            members: self.members_topic.clone(),
            presences: self.presences_topic.clone(),
            streams: self.streams_topic.clone(),
        }
    }
}

/// Startup retries and topic provisioning
#[derive(Parser, Clone, Debug)]
pub struct BootstrapOpts {
    /// Attempts for each broker-facing startup step
    #[arg(long, default_value = "5", env = "KAFKA_RETRY_ATTEMPTS")]
    pub retry_attempts: u32,

    /// Pause between startup attempts
    #[arg(long, default_value = "5s", value_parser = parse_duration)]
    pub retry_interval: Duration,

    /// Partitions for topics created at startup
    #[arg(long, default_value = "1")]
    pub topic_partitions: i32,

    /// Replication factor for topics created at startup
    #[arg(long, default_value = "1")]
    pub topic_replication: i32,
}

impl BootstrapOpts {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_attempts, self.retry_interval)
    }

    pub fn provisioning(&self) -> TopicProvisioning {
        TopicProvisioning {
            partitions: self.topic_partitions,
            replication: self.topic_replication,
        }
    }
}

/// Consumer group settings
#[derive(Parser, Clone, Debug)]
pub struct ConsumerOpts {
    /// Consumer group ID
    #[arg(long, default_value = "discord-consumer-group", env = "KAFKA_GROUP_ID")]
    pub group_id: String,

    /// Session timeout
    #[arg(long, default_value = "30s", value_parser = parse_duration)]
    pub session_timeout: Duration,

    /// Rebalance timeout (also the longest allowed gap between two pulls)
    #[arg(long, default_value = "60s", value_parser = parse_duration)]
    pub rebalance_timeout: Duration,

    /// Heartbeat interval
    #[arg(long, default_value = "3s", value_parser = parse_duration)]
    pub heartbeat_interval: Duration,

    /// Longest wait for the first record of a batch
    #[arg(long, default_value = "5s", value_parser = parse_duration)]
    pub max_batch_wait: Duration,

    /// Per-partition fetch limit in bytes
    #[arg(long, default_value = "1048576")]
    pub max_bytes_per_partition: usize,

    /// Maximum records per batch
    #[arg(long, default_value = "500")]
    pub max_batch_size: usize,

    /// Pause after a failed pull
    #[arg(long, default_value = "1s", value_parser = parse_duration)]
    pub pull_retry_interval: Duration,
}

impl ConsumerOpts {
    pub fn consumer_config(&self, kafka: &KafkaOpts, topics: Vec<String>) -> ConsumerConfig {
        ConsumerConfig {
            brokers: kafka.brokers.clone(),
            client_id: kafka.client_id.clone(),
            group_id: self.group_id.clone(),
            topics,
            session_timeout: self.session_timeout,
            rebalance_timeout: self.rebalance_timeout,
            heartbeat_interval: self.heartbeat_interval,
            max_batch_wait: self.max_batch_wait,
            max_bytes_per_partition: self.max_bytes_per_partition,
            max_batch_size: self.max_batch_size,
            metadata_timeout: kafka.admin_timeout,
            ..Default::default()
        }
    }

    pub fn batch_settings(&self) -> BatchSettings {
        BatchSettings {
            heartbeat_interval: self.heartbeat_interval,
            pull_retry_interval: self.pull_retry_interval,
        }
    }
}

/// Producer settings
#[derive(Parser, Clone, Debug)]
pub struct ProducerOpts {
    /// How long an append may wait for broker acknowledgement
    #[arg(long, default_value = "5s", value_parser = parse_duration)]
    pub delivery_timeout: Duration,

    /// librdkafka partitioner used to map keys to partitions
    #[arg(long, default_value = "murmur2_random")]
    pub partitioner: String,

    /// How long to wait for in-flight appends on exit
    #[arg(long, default_value = "10s", value_parser = parse_duration)]
    pub flush_timeout: Duration,
}

impl ProducerOpts {
    pub fn producer_config(&self, kafka: &KafkaOpts) -> ProducerConfig {
        ProducerConfig {
            brokers: kafka.brokers.clone(),
            client_id: kafka.client_id.clone(),
            delivery_timeout: self.delivery_timeout,
            partitioner: self.partitioner.clone(),
        }
    }
}
