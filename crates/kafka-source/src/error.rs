use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("Admin error: {0}")]
    Admin(String),

    #[error("Failed to create topic '{topic}': {message}")]
    TopicCreation { topic: String, message: String },

    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        last_error: Box<Error>,
    },

    #[error("Consumer error: {0}")]
    Consumer(String),

    #[error("Consumer session lost: {0}")]
    SessionLost(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, Error>;
