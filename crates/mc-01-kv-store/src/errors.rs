//! Key-value store errors.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KvError {
    #[error("kv store i/o error: {message}")]
    Io { message: String },

    #[error("column family [{0}] is not open")]
    MissingColumnFamily(&'static str),

    #[error("kv store corruption: {message}")]
    Corruption { message: String },
}

impl KvError {
    pub fn io(message: impl Into<String>) -> Self {
        KvError::Io {
            message: message.into(),
        }
    }
}
