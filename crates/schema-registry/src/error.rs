//! Error types for registry access.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Registry returned {status} (error code {code:?}): {message}")]
    Registry {
        status: u16,
        code: Option<i32>,
        message: String,
    },

    #[error("Malformed change-log record at offset {offset}: {message}")]
    Decode { offset: i64, message: String },

    #[error("Cache bootstrap did not complete: {0}")]
    Incomplete(String),

    #[error("Consumer error: {0}")]
    Consumer(#[from] kafka_reconcile_consumer::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Unwrap a registry error a delegate passed through the engine, so
    /// decode failures keep their own variant.
    pub fn from_engine(err: kafka_reconcile_consumer::Error) -> Self {
        match err {
            kafka_reconcile_consumer::Error::Delegate(inner) => match inner.downcast::<Error>() {
                Ok(err) => *err,
                Err(other) => Error::Consumer(kafka_reconcile_consumer::Error::Delegate(other)),
            },
            other => Error::Consumer(other),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Registry { status: 404, .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_engine_keeps_decode_errors() {
        let wrapped = kafka_reconcile_consumer::Error::delegate(Error::Decode {
            offset: 3,
            message: "bad".to_string(),
        });
        assert!(matches!(Error::from_engine(wrapped), Error::Decode { offset: 3, .. }));

        let other = kafka_reconcile_consumer::Error::UnknownTopic("_schemas".to_string());
        assert!(matches!(
            Error::from_engine(other),
            Error::Consumer(kafka_reconcile_consumer::Error::UnknownTopic(_))
        ));
    }
}
