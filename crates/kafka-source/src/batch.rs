//! Turning a pulled batch into per-topic groups of decoded records.

use crate::error::Result;
use crate::session::LogSession;
use chrono::Utc;
use event_types::{Category, EventRecord, LogRecord, TopicRegistry};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error};

/// A decoded record together with its position in the log.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub record: EventRecord,
}

/// All decoded records of one topic within a batch, in log order.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicGroup {
    pub topic: String,
    pub category: Category,
    pub records: Vec<ParsedRecord>,
}

/// Counts of what happened to the records of a batch while grouping.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ParseSummary {
    pub parsed: u64,
    pub empty: u64,
    pub malformed: u64,
    pub unrouted: u64,
}

impl ParseSummary {
    pub fn skipped(&self) -> u64 {
        self.empty + self.malformed + self.unrouted
    }
}

/// Throttles heartbeats to at most one per interval.
#[derive(Debug)]
pub struct Heartbeat {
    interval: Duration,
    last: Instant,
}

impl Heartbeat {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Instant::now(),
        }
    }

    /// Send a heartbeat if at least one interval has passed since the last.
    pub async fn beat<S: LogSession + ?Sized>(&mut self, session: &mut S) -> Result<bool> {
        if self.last.elapsed() < self.interval {
            return Ok(false);
        }
        session.heartbeat().await?;
        self.last = Instant::now();
        Ok(true)
    }
}

/// Decode every record of `batch` and group the results by topic.
///
/// Groups come out in the order their topic first appears in the batch.
/// Decoded records and records of topics without a category have their offsets
/// resolved immediately; empty and malformed payloads are logged and skipped
/// without being resolved. A payload without a `timestamp` takes the time the
/// log stored it. Offset and heartbeat failures abort the batch.
pub async fn group_batch<S: LogSession + ?Sized>(
    session: &mut S,
    registry: &TopicRegistry,
    batch: Vec<LogRecord>,
    heartbeat: &mut Heartbeat,
) -> Result<(Vec<TopicGroup>, ParseSummary)> {
    let mut groups: Vec<TopicGroup> = Vec::new();
    let mut summary = ParseSummary::default();

    for raw in batch {
        let Some(payload) = raw.payload.as_deref() else {
            debug!(
                "Skipping empty record at {}[{}]@{}",
                raw.topic, raw.partition, raw.offset
            );
            summary.empty += 1;
            heartbeat.beat(session).await?;
            continue;
        };

        let Some(category) = registry.category_of(&raw.topic) else {
            debug!(
                "No category for topic '{}'; acknowledging offset {} without dispatch",
                raw.topic, raw.offset
            );
            session.resolve_offset(&raw)?;
            summary.unrouted += 1;
            heartbeat.beat(session).await?;
            continue;
        };

        let fallback_time = raw.stored_at().unwrap_or_else(Utc::now);
        let record = match EventRecord::decode_for_at(category, payload, fallback_time) {
            Ok(record) => record,
            Err(e) => {
                error!(
                    "Failed to parse record at {}[{}]@{} (key {:?}): {}",
                    raw.topic,
                    raw.partition,
                    raw.offset,
                    raw.key_str(),
                    e
                );
                summary.malformed += 1;
                heartbeat.beat(session).await?;
                continue;
            }
        };

        session.resolve_offset(&raw)?;
        summary.parsed += 1;

        let parsed = ParsedRecord {
            topic: raw.topic,
            partition: raw.partition,
            offset: raw.offset,
            record,
        };
        match groups.iter_mut().find(|group| group.topic == parsed.topic) {
            Some(group) => group.records.push(parsed),
            None => groups.push(TopicGroup {
                topic: parsed.topic.clone(),
                category,
                records: vec![parsed],
            }),
        }

        heartbeat.beat(session).await?;
    }

    Ok((groups, summary))
}
