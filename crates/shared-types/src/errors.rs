//! Ledger-wide error taxonomy.
//!
//! Every public ledger operation reports one of these variants; subsystem
//! crates keep their own finer-grained errors and convert at the boundary.

use crate::wire::WireError;
use thiserror::Error;

/// Classification tag carried by every [`LedgerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller supplied data violating a ledger invariant.
    InvalidArgument,
    /// A block-number query past the chain head.
    OutOfBounds,
    /// A referenced resource (typically a transaction set) does not exist.
    ResourceNotFound,
    /// A block looked up by hash or number is missing.
    BlockNotFound,
    /// The underlying store failed; the batch may be retried from scratch.
    TransientIo,
    /// Encoding or decoding of a persisted message failed.
    Serialization,
    /// Corruption detected while recovering; the process must terminate.
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("out of bounds: {0}")]
    OutOfBounds(String),

    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    #[error("block not found: {0}")]
    BlockNotFound(String),

    #[error("transient i/o failure: {0}")]
    TransientIo(String),

    #[error("serialization failure: {0}")]
    Serialization(String),

    #[error("fatal ledger corruption: {0}")]
    Fatal(String),
}

impl LedgerError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        LedgerError::InvalidArgument(msg.into())
    }

    pub fn out_of_bounds(msg: impl Into<String>) -> Self {
        LedgerError::OutOfBounds(msg.into())
    }

    pub fn resource_not_found(msg: impl Into<String>) -> Self {
        LedgerError::ResourceNotFound(msg.into())
    }

    pub fn block_not_found(msg: impl Into<String>) -> Self {
        LedgerError::BlockNotFound(msg.into())
    }

    pub fn transient_io(msg: impl Into<String>) -> Self {
        LedgerError::TransientIo(msg.into())
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        LedgerError::Serialization(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        LedgerError::Fatal(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            LedgerError::OutOfBounds(_) => ErrorKind::OutOfBounds,
            LedgerError::ResourceNotFound(_) => ErrorKind::ResourceNotFound,
            LedgerError::BlockNotFound(_) => ErrorKind::BlockNotFound,
            LedgerError::TransientIo(_) => ErrorKind::TransientIo,
            LedgerError::Serialization(_) => ErrorKind::Serialization,
            LedgerError::Fatal(_) => ErrorKind::Fatal,
        }
    }
}

impl From<WireError> for LedgerError {
    fn from(err: WireError) -> Self {
        LedgerError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tagging() {
        assert_eq!(
            LedgerError::invalid_argument("bad nonce").kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(
            LedgerError::out_of_bounds("past head").kind(),
            ErrorKind::OutOfBounds
        );
    }

    #[test]
    fn test_wire_error_conversion() {
        let err: LedgerError = WireError::TruncatedVarint.into();
        assert_eq!(err.kind(), ErrorKind::Serialization);
        assert!(err.to_string().contains("truncated varint"));
    }
}
