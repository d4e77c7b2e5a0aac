use event_types::EventTypesError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("Record error: {0}")]
    Record(#[from] EventTypesError),

    #[error("Append to topic '{topic}' failed: {message}")]
    Append { topic: String, message: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, Error>;
