//! # mc-03-block-log
//!
//! Ordered block storage for the mutachain ledger.
//!
//! ## Role in System
//!
//! - **Chain Authority**: block number → block bytes, hash linkage, cached
//!   chain size
//! - **Transaction Index**: transaction id → per-block in-block positions,
//!   the lookup the current-default resolver depends on
//! - **Reset Bookkeeping**: tracks the replay cursor while a mutation
//!   rewinds and re-executes the chain

pub mod block_log;
pub mod indexer;

pub use block_log::BlockLog;
pub use indexer::BlockIndexer;
