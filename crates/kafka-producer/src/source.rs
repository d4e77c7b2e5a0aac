//! Live platform events and their normalization into records.
//!
//! [`SourceEvent`] is what a gateway listener hands to the producer. It keeps
//! the optional fields the gateway may leave empty (guild, user, emoji name),
//! and [`normalize`] decides whether an event becomes a record at all.

use chrono::{DateTime, Utc};
use event_types::{
    EventRecord, MemberRecord, MessageRecord, PresenceRecord, PresenceSnapshot, ReactionAction,
    ReactionRecord, Snowflake, StreamAction, StreamRecord,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Messages shorter than this are not published. Length is measured in
/// UTF-16 code units, the way the gateway client reports it, so an emoji
/// outside the basic plane counts twice.
pub const MIN_CONTENT_LEN: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionEvent {
    pub message_id: Snowflake,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    pub channel_id: Snowflake,
    pub user_id: Snowflake,
    #[serde(default)]
    pub emoji_name: Option<String>,
    #[serde(default)]
    pub emoji_id: Option<Snowflake>,
}

/// One side of a voice state transition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceState {
    #[serde(default)]
    pub member_id: Option<Snowflake>,
    #[serde(default)]
    pub member_tag: Option<String>,
    #[serde(default)]
    pub channel_id: Option<Snowflake>,
    #[serde(default)]
    pub channel_name: Option<String>,
    #[serde(default)]
    pub streaming: bool,
}

/// Events emitted by the live event source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum SourceEvent {
    MessageCreated {
        id: Snowflake,
        content: String,
        author_id: Snowflake,
        #[serde(default)]
        author_is_bot: bool,
        #[serde(default)]
        guild_id: Option<Snowflake>,
        channel_id: Snowflake,
        created_at: DateTime<Utc>,
    },
    ReactionAdded(ReactionEvent),
    ReactionRemoved(ReactionEvent),
    MemberJoined {
        user_id: Snowflake,
        username: String,
        guild_id: Snowflake,
        #[serde(default)]
        joined_at: Option<DateTime<Utc>>,
    },
    PresenceChanged {
        #[serde(default)]
        user_id: Option<Snowflake>,
        #[serde(default)]
        guild_id: Option<Snowflake>,
        #[serde(default)]
        old_presence: Option<PresenceSnapshot>,
        new_presence: PresenceSnapshot,
    },
    VoiceStateChanged {
        #[serde(default)]
        guild_id: Option<Snowflake>,
        old_state: VoiceState,
        new_state: VoiceState,
    },
}

impl SourceEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            SourceEvent::MessageCreated { .. } => "message_created",
            SourceEvent::ReactionAdded(_) => "reaction_added",
            SourceEvent::ReactionRemoved(_) => "reaction_removed",
            SourceEvent::MemberJoined { .. } => "member_joined",
            SourceEvent::PresenceChanged { .. } => "presence_changed",
            SourceEvent::VoiceStateChanged { .. } => "voice_state_changed",
        }
    }
}

/// Why an event did not become a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    BotAuthor,
    OutsideGuild,
    ContentTooShort,
    MissingEmoji,
    MissingUser,
    NoStreamTransition,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            SkipReason::BotAuthor => "author is a bot",
            SkipReason::OutsideGuild => "event is not scoped to a guild",
            SkipReason::ContentTooShort => "message content is too short",
            SkipReason::MissingEmoji => "reaction emoji has no name",
            SkipReason::MissingUser => "user is unknown",
            SkipReason::NoStreamTransition => "streaming state did not change",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Record(EventRecord),
    Skipped(SkipReason),
}

/// Turn a live event into the record to publish.
///
/// `now` stamps records whose event carries no time of its own (presence and
/// stream transitions, joins with an unknown join time).
pub fn normalize(event: SourceEvent, now: DateTime<Utc>) -> Normalized {
    match event {
        SourceEvent::MessageCreated {
            id,
            content,
            author_id,
            author_is_bot,
            guild_id,
            channel_id,
            created_at,
        } => {
            if author_is_bot {
                return Normalized::Skipped(SkipReason::BotAuthor);
            }
            let Some(guild_id) = guild_id else {
                return Normalized::Skipped(SkipReason::OutsideGuild);
            };
            if content.encode_utf16().count() < MIN_CONTENT_LEN {
                return Normalized::Skipped(SkipReason::ContentTooShort);
            }
            Normalized::Record(EventRecord::Message(MessageRecord {
                subject: id,
                guild_id,
                timestamp: created_at,
                author_id: Some(author_id),
                channel_id: Some(channel_id),
                content,
            }))
        }
        SourceEvent::ReactionAdded(reaction) => {
            normalize_reaction(reaction, ReactionAction::Add, now)
        }
        SourceEvent::ReactionRemoved(reaction) => {
            normalize_reaction(reaction, ReactionAction::Remove, now)
        }
        SourceEvent::MemberJoined {
            user_id,
            username,
            guild_id,
            joined_at,
        } => Normalized::Record(EventRecord::Member(MemberRecord {
            subject: user_id,
            guild_id,
            timestamp: joined_at.unwrap_or(now),
            username,
        })),
        SourceEvent::PresenceChanged {
            user_id,
            guild_id,
            old_presence,
            new_presence,
        } => {
            let Some(guild_id) = guild_id else {
                return Normalized::Skipped(SkipReason::OutsideGuild);
            };
            let Some(user_id) = user_id else {
                return Normalized::Skipped(SkipReason::MissingUser);
            };
            Normalized::Record(EventRecord::Presence(PresenceRecord {
                subject: user_id,
                guild_id,
                timestamp: now,
                old_presence,
                new_presence,
            }))
        }
        SourceEvent::VoiceStateChanged {
            guild_id,
            old_state,
            new_state,
        } => {
            let Some(guild_id) = guild_id else {
                return Normalized::Skipped(SkipReason::OutsideGuild);
            };
            let action = match (old_state.streaming, new_state.streaming) {
                (false, true) => StreamAction::Start,
                (true, false) => StreamAction::Stop,
                _ => return Normalized::Skipped(SkipReason::NoStreamTransition),
            };
            let Some(user_id) = new_state.member_id.or(old_state.member_id) else {
                return Normalized::Skipped(SkipReason::MissingUser);
            };
            Normalized::Record(EventRecord::Stream(StreamRecord {
                subject: user_id,
                guild_id,
                timestamp: now,
                channel_id: new_state.channel_id.or(old_state.channel_id),
                action,
                member_tag: new_state.member_tag.or(old_state.member_tag),
                channel_name: new_state.channel_name.or(old_state.channel_name),
            }))
        }
    }
}

fn normalize_reaction(
    reaction: ReactionEvent,
    action: ReactionAction,
    now: DateTime<Utc>,
) -> Normalized {
    let Some(guild_id) = reaction.guild_id else {
        return Normalized::Skipped(SkipReason::OutsideGuild);
    };
    let Some(emoji_name) = reaction.emoji_name else {
        return Normalized::Skipped(SkipReason::MissingEmoji);
    };
    Normalized::Record(EventRecord::Reaction(ReactionRecord {
        subject: reaction.message_id,
        guild_id,
        timestamp: now,
        user_id: reaction.user_id,
        channel_id: reaction.channel_id,
        emoji_name,
        emoji_id: reaction.emoji_id,
        action,
    }))
}
