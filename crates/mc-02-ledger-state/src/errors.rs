//! State store errors.

use mc_01_kv_store::KvError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error(transparent)]
    Kv(#[from] KvError),

    #[error("state serialization failure: {0}")]
    Serialization(String),

    #[error("unknown transaction-set state backing [{0}]")]
    UnknownBacking(String),
}

impl StateError {
    pub fn serialization(msg: impl std::fmt::Display) -> Self {
        StateError::Serialization(msg.to_string())
    }
}
