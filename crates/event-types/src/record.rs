//! Event records.
//!
//! [`EventRecord`] is the closed set of records that travel through the log.
//! It is encoded as one flat JSON object whose `category` field selects the
//! variant, so a consumer decodes straight into a typed variant and never
//! dispatches on strings.

use crate::category::Category;
use crate::error::{EventTypesError, Result};
use crate::presence::PresenceSnapshot;
use crate::snowflake::Snowflake;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message posted in a guild channel. `subject` is the message id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub subject: Snowflake,
    pub guild_id: Snowflake,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<Snowflake>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<Snowflake>,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionAction {
    Add,
    Remove,
}

/// A reaction added to or removed from a message. `subject` is the message id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionRecord {
    pub subject: Snowflake,
    pub guild_id: Snowflake,
    pub timestamp: DateTime<Utc>,
    pub user_id: Snowflake,
    pub channel_id: Snowflake,
    pub emoji_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emoji_id: Option<Snowflake>,
    pub action: ReactionAction,
}

/// A user joining a guild. `subject` is the user id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberRecord {
    pub subject: Snowflake,
    pub guild_id: Snowflake,
    pub timestamp: DateTime<Utc>,
    pub username: String,
}

/// A presence transition. `subject` is the user id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub subject: Snowflake,
    pub guild_id: Snowflake,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub old_presence: Option<PresenceSnapshot>,
    pub new_presence: PresenceSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StreamAction {
    Start,
    Stop,
}

/// A user starting or stopping a stream in a voice channel. `subject` is the
/// user id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRecord {
    pub subject: Snowflake,
    pub guild_id: Snowflake,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub channel_id: Option<Snowflake>,
    pub action: StreamAction,
    #[serde(default)]
    pub member_tag: Option<String>,
    #[serde(default)]
    pub channel_name: Option<String>,
}

/// A record in the log, one variant per category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "lowercase")]
pub enum EventRecord {
    Message(MessageRecord),
    Reaction(ReactionRecord),
    Member(MemberRecord),
    Presence(PresenceRecord),
    Stream(StreamRecord),
}

impl EventRecord {
    pub fn category(&self) -> Category {
        match self {
            EventRecord::Message(_) => Category::Message,
            EventRecord::Reaction(_) => Category::Reaction,
            EventRecord::Member(_) => Category::Member,
            EventRecord::Presence(_) => Category::Presence,
            EventRecord::Stream(_) => Category::Stream,
        }
    }

    pub fn subject(&self) -> Snowflake {
        match self {
            EventRecord::Message(r) => r.subject,
            EventRecord::Reaction(r) => r.subject,
            EventRecord::Member(r) => r.subject,
            EventRecord::Presence(r) => r.subject,
            EventRecord::Stream(r) => r.subject,
        }
    }

    pub fn guild_id(&self) -> Snowflake {
        match self {
            EventRecord::Message(r) => r.guild_id,
            EventRecord::Reaction(r) => r.guild_id,
            EventRecord::Member(r) => r.guild_id,
            EventRecord::Presence(r) => r.guild_id,
            EventRecord::Stream(r) => r.guild_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            EventRecord::Message(r) => r.timestamp,
            EventRecord::Reaction(r) => r.timestamp,
            EventRecord::Member(r) => r.timestamp,
            EventRecord::Presence(r) => r.timestamp,
            EventRecord::Stream(r) => r.timestamp,
        }
    }

    /// The key the record is published under.
    ///
    /// Records with equal keys land in the same partition and are therefore
    /// read back in publish order:
    /// - message: the message id
    /// - reaction: message id and reacting user, so an add followed by a
    ///   remove from the same user is never reordered
    /// - member: the user id
    /// - presence, stream: user id and record time in milliseconds, spreading
    ///   a busy user's transitions across partitions
    pub fn partition_key(&self) -> String {
        match self {
            EventRecord::Message(r) => r.subject.to_string(),
            EventRecord::Reaction(r) => format!("{}-{}", r.subject, r.user_id),
            EventRecord::Member(r) => r.subject.to_string(),
            EventRecord::Presence(r) => {
                format!("{}-{}", r.subject, r.timestamp.timestamp_millis())
            }
            EventRecord::Stream(r) => {
                format!("{}-{}", r.subject, r.timestamp.timestamp_millis())
            }
        }
    }

    /// Encode as a flat JSON object.
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(EventTypesError::Encode)
    }

    /// Decode a payload of unknown category.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(EventTypesError::Decode)
    }

    /// Decode a payload read from the topic of `expected`, rejecting records
    /// whose embedded category disagrees with the topic.
    pub fn decode_for(expected: Category, payload: &[u8]) -> Result<Self> {
        Self::check_category(expected, Self::decode(payload)?)
    }

    /// Like [`decode_for`](Self::decode_for), but a payload without a
    /// `timestamp` takes `fallback`, usually the time the log stored it.
    pub fn decode_for_at(
        expected: Category,
        payload: &[u8],
        fallback: DateTime<Utc>,
    ) -> Result<Self> {
        let mut value: serde_json::Value =
            serde_json::from_slice(payload).map_err(EventTypesError::Decode)?;
        if let Some(object) = value.as_object_mut() {
            if matches!(object.get("timestamp"), None | Some(serde_json::Value::Null)) {
                object.insert(
                    "timestamp".to_string(),
                    serde_json::to_value(fallback).map_err(EventTypesError::Encode)?,
                );
            }
        }
        let record = serde_json::from_value(value).map_err(EventTypesError::Decode)?;
        Self::check_category(expected, record)
    }

    fn check_category(expected: Category, record: Self) -> Result<Self> {
        let found = record.category();
        if found != expected {
            return Err(EventTypesError::CategoryMismatch { expected, found });
        }
        Ok(record)
    }
}
