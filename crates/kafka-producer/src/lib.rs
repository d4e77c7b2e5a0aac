//! Kafka producer library for guildstream
//!
//! This library turns live guild events into [`event_types::EventRecord`]s and
//! appends them to Kafka under a per-category key.
//!
//! ## Features
//!
//! - **Normalization**: [`normalize`] filters and shapes [`SourceEvent`]s
//! - **Keyed publishing**: records land on the topic of their category, keyed
//!   by [`event_types::EventRecord::partition_key`]
//! - **One-shot delivery**: failed appends are logged by [`EventProducer::emit`]
//!   and never retried
//!
//! ## Usage
//!
//! ```rust,no_run
//! use guildstream_kafka_producer::{EventProducer, KafkaAppender, ProducerConfig};
//! use event_types::TopicRegistry;
//!
//! # async fn example(event: guildstream_kafka_producer::SourceEvent) -> anyhow::Result<()> {
//! let appender = KafkaAppender::new(&ProducerConfig::default())?;
//! let producer = EventProducer::new(appender, TopicRegistry::default());
//!
//! producer.emit(event, chrono::Utc::now()).await;
//! # Ok(())
//! # }
//! ```

pub mod appender;
pub mod error;
pub mod producer;
pub mod source;

pub use appender::{KafkaAppender, LogAppender, ProducerConfig};
pub use error::{Error, Result};
pub use producer::{EmitOutcome, EventProducer};
pub use source::{normalize, Normalized, ReactionEvent, SkipReason, SourceEvent, VoiceState};
