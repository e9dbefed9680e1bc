use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("Consumer error: {0}")]
    Consumer(String),

    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    #[error("Delegate error: {0}")]
    Delegate(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Producer error: {0}")]
    Producer(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Wrap an arbitrary delegate failure so it can travel through the engine.
    pub fn delegate<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Delegate(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
