//! Event record types for guildstream.
//!
//! This crate defines the wire schema shared by the producer and the consumer:
//!
//! - [`record`] - The tagged [`EventRecord`] union and its per-category payloads
//! - [`presence`] - Presence snapshots carried by presence records
//! - [`snowflake`] - 64-bit platform identifiers encoded as decimal strings
//! - [`category`] - Categories and the category ↔ topic name registry
//! - [`message`] - The raw record shape read from the log, before decoding
//! - [`error`] - Error types for encoding and decoding
//!
//! # Wire Format
//!
//! ```text
//! {"category":"reaction","subject":"111","guildId":"1","timestamp":"2024-01-01T00:00:00Z",
//!  "userId":"42","channelId":"7","emojiName":"👍","action":"add"}
//! ```
//!
//! # Dependency Direction
//!
//! Both `guildstream-kafka-producer` and `guildstream-kafka-source` depend on this
//! crate. It depends on neither, so it carries no Kafka client dependency.

pub mod category;
pub mod error;
pub mod message;
pub mod presence;
pub mod record;
pub mod snowflake;

pub use category::{Category, TopicRegistry};
pub use error::{EventTypesError, Result};
pub use message::LogRecord;
pub use presence::{Activity, ActivityKind, PresenceSnapshot, PresenceStatus};
pub use record::{
    EventRecord, MemberRecord, MessageRecord, PresenceRecord, ReactionAction, ReactionRecord,
    StreamAction, StreamRecord,
};
pub use snowflake::Snowflake;
