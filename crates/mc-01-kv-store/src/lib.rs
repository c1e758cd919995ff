//! # mc-01-kv-store
//!
//! Column-family key-value engine for the mutachain ledger.
//!
//! ## Role in System
//!
//! - **Persistence Foundation**: every other subsystem persists through the
//!   [`KvStore`] port defined here
//! - **Atomicity Authority**: a multi-family [`LedgerBatch`] commits all of
//!   its operations or none of them
//! - **Point-in-Time Views**: [`OwnedSnapshot`] freezes selected column
//!   families for state transfer
//!
//! Production uses the RocksDB adapter; tests use the in-memory adapter.

pub mod adapters;
pub mod batch;
pub mod column_family;
pub mod errors;
pub mod ports;

pub use adapters::memory::InMemoryKvStore;
pub use adapters::rocks::{RocksDbConfig, RocksDbStore};
pub use batch::{BatchOp, LedgerBatch};
pub use column_family::ColumnFamily;
pub use errors::KvError;
pub use ports::{KvStore, OwnedSnapshot};
