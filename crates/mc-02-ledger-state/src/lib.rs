//! # mc-02-ledger-state
//!
//! Two-tier state management for the mutachain ledger.
//!
//! ## Role in System
//!
//! - **Transaction-Set State**: which member of every transaction set is
//!   active, tracked as versioned [`shared_types::TxSetStateValue`] records
//! - **Chaincode World State**: the key-value state chaincodes read and write
//! - **Two-Tier Deltas**: per-transaction changes stage in a `current` delta,
//!   completed transactions accumulate in a `committed` delta, and one atomic
//!   batch per block persists everything
//!
//! Both stores share the same shape: in-memory deltas over a persistent
//! backing, a per-transaction begin/finish protocol, and delta history kept
//! for a sliding window of blocks.

pub mod chaincode;
pub mod config;
pub mod errors;
pub mod keys;
pub mod snapshot;
pub mod txset;

pub use chaincode::{ChaincodeState, ChaincodeStateDelta, UpdatedKv};
pub use config::StateConfig;
pub use errors::StateError;
pub use snapshot::StateSnapshot;
pub use txset::{
    new_tx_set_backing, HashableTxSetState, RawTxSetStore, TxSetState, TxSetStateDelta,
    UpdatedValue, RAW_STATE_HASH,
};
