//! Raw log records.
//!
//! The consumer copies each record it pulls from the log into a [`LogRecord`]
//! before decoding, so that batches can be grouped and dispatched after the
//! transport's borrowed message has been released.

use chrono::{DateTime, TimeZone, Utc};

/// A record as read from the log, before its payload is decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Topic name
    pub topic: String,
    /// Partition number
    pub partition: i32,
    /// Offset within the partition
    pub offset: i64,
    /// Record key (if any)
    pub key: Option<Vec<u8>>,
    /// Raw payload; `None` for tombstones
    pub payload: Option<Vec<u8>>,
    /// Broker timestamp in milliseconds since epoch (if available)
    pub timestamp: Option<i64>,
}

impl LogRecord {
    /// The key as UTF-8 text, for log output.
    pub fn key_str(&self) -> Option<&str> {
        self.key
            .as_deref()
            .and_then(|key| std::str::from_utf8(key).ok())
    }

    /// When the log stored the record, if the broker reported it.
    pub fn stored_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
    }
}
