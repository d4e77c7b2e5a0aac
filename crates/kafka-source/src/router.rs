//! Dispatching decoded records to their category's handler.

use crate::batch::{ParsedRecord, TopicGroup};
use async_trait::async_trait;
use event_types::{EventRecord, MemberRecord, MessageRecord, PresenceRecord, ReactionRecord};
use futures::future::join_all;
use tracing::{debug, error};

/// Per-category record handlers.
///
/// Handlers may be invoked concurrently for records of the same topic group,
/// so implementations must not rely on being called one at a time.
#[async_trait]
pub trait EventHandlers: Send + Sync {
    async fn handle_message(&self, record: &MessageRecord) -> anyhow::Result<()>;
    async fn handle_reaction(&self, record: &ReactionRecord) -> anyhow::Result<()>;
    async fn handle_member(&self, record: &MemberRecord) -> anyhow::Result<()>;
    async fn handle_presence(&self, record: &PresenceRecord) -> anyhow::Result<()>;
}

#[async_trait]
impl<H: EventHandlers + ?Sized> EventHandlers for std::sync::Arc<H> {
    async fn handle_message(&self, record: &MessageRecord) -> anyhow::Result<()> {
        (**self).handle_message(record).await
    }

    async fn handle_reaction(&self, record: &ReactionRecord) -> anyhow::Result<()> {
        (**self).handle_reaction(record).await
    }

    async fn handle_member(&self, record: &MemberRecord) -> anyhow::Result<()> {
        (**self).handle_member(record).await
    }

    async fn handle_presence(&self, record: &PresenceRecord) -> anyhow::Result<()> {
        (**self).handle_presence(record).await
    }
}

/// What the router did with one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Handled,
    /// The category has no handler; the record is acknowledged and dropped.
    Unhandled,
}

/// Tally for one dispatched topic group.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GroupOutcome {
    pub handled: u64,
    pub unhandled: u64,
    pub failed: u64,
}

/// Routes each record to the handler for its category.
pub struct TopicRouter<H: EventHandlers> {
    handlers: H,
}

impl<H: EventHandlers> TopicRouter<H> {
    pub fn new(handlers: H) -> Self {
        Self { handlers }
    }

    pub fn handlers(&self) -> &H {
        &self.handlers
    }

    /// Hand one record to its handler.
    pub async fn dispatch(&self, record: &EventRecord) -> anyhow::Result<Dispatch> {
        match record {
            EventRecord::Message(r) => self.handlers.handle_message(r).await?,
            EventRecord::Reaction(r) => self.handlers.handle_reaction(r).await?,
            EventRecord::Member(r) => self.handlers.handle_member(r).await?,
            EventRecord::Presence(r) => self.handlers.handle_presence(r).await?,
            EventRecord::Stream(_) => return Ok(Dispatch::Unhandled),
        }
        Ok(Dispatch::Handled)
    }

    /// Dispatch every record of `group` concurrently and wait for all of them.
    ///
    /// A failing handler is logged with the record's coordinates and does not
    /// affect the other records of the group.
    pub async fn dispatch_group(&self, group: &TopicGroup) -> GroupOutcome {
        let results = join_all(
            group
                .records
                .iter()
                .map(|parsed| async move { (parsed, self.dispatch(&parsed.record).await) }),
        )
        .await;

        let mut outcome = GroupOutcome::default();
        for (parsed, result) in results {
            match result {
                Ok(Dispatch::Handled) => outcome.handled += 1,
                Ok(Dispatch::Unhandled) => {
                    debug!(
                        "No handler for {} record at {}[{}]@{}",
                        parsed.record.category(),
                        parsed.topic,
                        parsed.partition,
                        parsed.offset
                    );
                    outcome.unhandled += 1;
                }
                Err(e) => {
                    log_handler_failure(parsed, &e);
                    outcome.failed += 1;
                }
            }
        }

        debug!(
            "Dispatched {} records from '{}': {:?}",
            group.records.len(),
            group.topic,
            outcome
        );
        outcome
    }
}

fn log_handler_failure(parsed: &ParsedRecord, e: &anyhow::Error) {
    error!(
        "Handler failed for {} record {} at {}[{}]@{}: {:#}",
        parsed.record.category(),
        parsed.record.subject(),
        parsed.topic,
        parsed.partition,
        parsed.offset,
        e
    );
}
