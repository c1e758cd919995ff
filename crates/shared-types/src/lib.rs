//! # shared-types
//!
//! Shared domain types for the mutachain ledger.
//!
//! ## Role in System
//!
//! - **Single Vocabulary**: every subsystem crate speaks these types
//! - **Wire Format Authority**: the varint TLV codec lives here so that
//!   encodings stay identical across subsystems
//! - **Error Taxonomy**: the ledger-wide error kinds consumed by callers
//!
//! Nothing in this crate performs I/O.

pub mod block;
pub mod entities;
pub mod errors;
pub mod transaction;
pub mod wire;

pub use block::{Block, BlockchainInfo, NonHashData};
pub use entities::{TxSetId, TxSetIndexEntry, TxSetStateValue};
pub use errors::{ErrorKind, LedgerError};
pub use transaction::{
    ChaincodeAction, ChaincodeEvent, ConfidentialityLevel, InBlockTransaction, MutantTransaction,
    SetStateQuery, TransactionResult, TransactionSet, TransactionVariant, TxSpec,
};

/// 32-byte cryptographic hash (SHA3-256 everywhere in this workspace).
pub type Hash = [u8; 32];

/// Block numbers start at zero for the genesis block.
pub type BlockNumber = u64;
