//! Event publication seam.
//!
//! Transport and fan-out of ledger events belong to a collaborator; the
//! core only owns the emission points.

use shared_types::{Block, ChaincodeEvent, InBlockTransaction};

pub trait BlockEventSink: Send + Sync {
    /// A block was durably committed.
    fn block_committed(&self, block: &Block);

    /// A chaincode event was produced by a committed transaction.
    fn chaincode_event(&self, event: &ChaincodeEvent);

    /// A transaction was rejected during execution.
    fn transaction_rejected(&self, tx: &InBlockTransaction, error: &str);
}

/// Sink that drops every event.
#[derive(Default)]
pub struct NoopEventSink;

impl BlockEventSink for NoopEventSink {
    fn block_committed(&self, _block: &Block) {}
    fn chaincode_event(&self, _event: &ChaincodeEvent) {}
    fn transaction_rejected(&self, _tx: &InBlockTransaction, _error: &str) {}
}
