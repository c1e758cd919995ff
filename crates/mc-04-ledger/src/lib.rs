//! # mc-04-ledger
//!
//! The ledger façade of mutachain.
//!
//! ## Role in System
//!
//! - **Batch Lifecycle**: begin / commit / rollback of transaction batches,
//!   with one atomic store write per committed block
//! - **Invariant Gate**: every transaction-set state write passes the
//!   invariant-enforcing writer before it is staged
//! - **Default Resolution**: maps a set's active index to the concrete
//!   candidate payload, across intro and extension blocks
//! - **State Transfer**: snapshots and per-block deltas for peers catching up
//!
//! The ledger is an explicit context object threaded through the executor;
//! there is no process-wide singleton. It is not concurrency safe: one
//! writer owns it, and parallel readers go through the snapshot API.

pub mod cipher;
pub mod events;
pub mod ledger;

pub use cipher::{NoopTxSetCipher, TxSetCipher};
pub use events::{BlockEventSink, NoopEventSink};
pub use ledger::{BatchId, Ledger, LedgerConfig};
