//! Test infrastructure
//!
//! [`MemoryLog`] is an in-process stand-in for the Kafka cluster: it keeps
//! keyed, partitioned topics, provisions them through the admin interface,
//! accepts appends from the producer and hands out consumer-group sessions.
//! It also lets tests inject broker failures and force rebalances.

pub mod memory_log;

pub use memory_log::{MemoryLog, MemoryOp, MemorySession};
