//! Kafka consumer library for guildstream.
//!
//! This crate provides:
//! - Broker bootstrap with bounded retries and topic provisioning
//! - A batch consumer that groups records by topic and commits per batch
//! - A router that hands each decoded record to its category's handler
//!
//! # Features
//!
//! - Ordered groups: topic groups of a batch are dispatched one after another,
//!   records within a group concurrently
//! - Poison-record tolerance: a record that fails to decode is logged and
//!   skipped without holding back the rest of its batch
//! - Rebalance awareness: groups not yet dispatched when the session goes
//!   stale are abandoned and redelivered later
//! - Graceful stop: a [`tokio_util::sync::CancellationToken`] stops the loop
//!   between topic groups
//!
//! # Usage
//!
//! ```rust,no_run
//! use guildstream_kafka_source::{
//!     BatchConsumer, BatchSettings, ConnectionManager, ConsumerConfig, EventHandlers,
//!     KafkaAdmin, KafkaSession, RetryPolicy, TopicProvisioning, TopicRouter,
//! };
//! use event_types::TopicRegistry;
//! use std::time::Duration;
//!
//! # async fn example(handlers: impl EventHandlers) -> anyhow::Result<()> {
//! let registry = TopicRegistry::default();
//! let admin = KafkaAdmin::new("localhost:9092", "discord-bot", Duration::from_secs(10))?;
//! let connections = ConnectionManager::new(admin, RetryPolicy::default(), TopicProvisioning::default());
//! connections.ensure_topics(&registry.consumed_topics()).await?;
//!
//! let config = ConsumerConfig {
//!     topics: registry.consumed_topics(),
//!     ..Default::default()
//! };
//! let consumer = BatchConsumer::new(TopicRouter::new(handlers), registry, BatchSettings::default());
//! consumer
//!     .start(&connections, |_| KafkaSession::connect(&config))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod connection;
pub mod consumer;
pub mod error;
pub mod router;
pub mod session;

pub use batch::{group_batch, Heartbeat, ParseSummary, ParsedRecord, TopicGroup};
pub use connection::{
    BrokerAdmin, ConnectionManager, KafkaAdmin, RetryPolicy, TopicProvisioning, TopicSpec,
};
pub use consumer::{
    BatchConsumer, BatchSettings, ConsumerState, ConsumerStats, StatsSnapshot, StopReason,
};
pub use error::{Error, Result};
pub use router::{Dispatch, EventHandlers, GroupOutcome, TopicRouter};
pub use session::{ConsumerConfig, KafkaSession, Liveness, LogSession};
