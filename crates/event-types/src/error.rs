//! Error types for event-types crate.

use crate::category::Category;
use thiserror::Error;

/// Errors that can occur while encoding or decoding event records.
#[derive(Error, Debug)]
pub enum EventTypesError {
    #[error("JSON encoding error: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("JSON decoding error: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("Record has no payload")]
    EmptyPayload,

    #[error("Record category '{found}' does not match topic category '{expected}'")]
    CategoryMismatch { expected: Category, found: Category },

    #[error("Invalid snowflake '{0}'")]
    InvalidSnowflake(String),

    #[error("Unknown category: {0}")]
    UnknownCategory(String),
}

/// Result type alias for event-types operations.
pub type Result<T> = std::result::Result<T, EventTypesError>;
