//! Handlers that log every record they receive.
//!
//! These stand in for the storage-backed handlers of a full deployment.

use async_trait::async_trait;
use event_types::{
    ActivityKind, MemberRecord, MessageRecord, PresenceRecord, PresenceSnapshot, ReactionRecord,
};
use guildstream_kafka_source::EventHandlers;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

#[derive(Debug, Default)]
pub struct TracingHandlers {
    handled: AtomicU64,
}

impl TracingHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records handled so far, across all categories.
    pub fn handled(&self) -> u64 {
        self.handled.load(Ordering::Relaxed)
    }

    fn count(&self) {
        self.handled.fetch_add(1, Ordering::Relaxed);
    }
}

fn summarize(snapshot: &PresenceSnapshot) -> String {
    let activities: Vec<String> = snapshot
        .activities
        .iter()
        .map(|activity| match activity.kind {
            ActivityKind::Listening if activity.name == "Spotify" => {
                format!("spotify:{}", activity.details.as_deref().unwrap_or("?"))
            }
            ActivityKind::Playing => format!("game:{}", activity.name),
            _ => activity.name.clone(),
        })
        .collect();
    format!("{:?} {:?}", snapshot.status, activities)
}

#[async_trait]
impl EventHandlers for TracingHandlers {
    async fn handle_message(&self, record: &MessageRecord) -> anyhow::Result<()> {
        self.count();
        info!(
            "Message {} in guild {} channel {:?} by {:?}: {} chars",
            record.subject,
            record.guild_id,
            record.channel_id.map(|id| id.get()),
            record.author_id.map(|id| id.get()),
            record.content.chars().count()
        );
        Ok(())
    }

    async fn handle_reaction(&self, record: &ReactionRecord) -> anyhow::Result<()> {
        self.count();
        info!(
            "Reaction {:?} on message {} by {}: {}",
            record.action, record.subject, record.user_id, record.emoji_name
        );
        Ok(())
    }

    async fn handle_member(&self, record: &MemberRecord) -> anyhow::Result<()> {
        self.count();
        info!(
            "Member {} ({}) joined guild {}",
            record.subject, record.username, record.guild_id
        );
        Ok(())
    }

    async fn handle_presence(&self, record: &PresenceRecord) -> anyhow::Result<()> {
        self.count();
        let old = record
            .old_presence
            .as_ref()
            .map(summarize)
            .unwrap_or_else(|| "unknown".to_string());
        info!(
            "Presence of {} in guild {}: {} -> {}",
            record.subject,
            record.guild_id,
            old,
            summarize(&record.new_presence)
        );
        Ok(())
    }
}
