//! # Block Log
//!
//! Ordered block storage with hash linkage. The log caches the chain size
//! and head hash in memory; both are confirmed only after the commit batch
//! lands, so a failed write never advances the chain.

use crate::indexer::{from_kv, BlockIndexer, TransactionIndexMap};
use mc_01_kv_store::{ColumnFamily, KvStore, LedgerBatch, OwnedSnapshot};
use mc_02_ledger_state::keys::block_number_key;
use shared_types::{Block, BlockNumber, BlockchainInfo, InBlockTransaction, LedgerError, TxSetId};
use std::sync::Arc;
use tracing::{debug, info};

/// Key of the persisted chain size inside the blockchain column family.
/// Block bytes live under 8-byte big-endian keys, so the text key cannot
/// collide.
const BLOCK_COUNT_KEY: &[u8] = b"blockCount";

struct PendingBlock {
    block_number: BlockNumber,
    block_hash: Vec<u8>,
}

pub struct BlockLog {
    store: Arc<dyn KvStore>,
    indexer: BlockIndexer,
    size: u64,
    last_block_hash: Vec<u8>,
    /// Head candidate staged by the current commit batch.
    pending: Option<PendingBlock>,
    is_resetting: bool,
    /// Next block to re-execute while resetting.
    reset_block: BlockNumber,
}

impl BlockLog {
    /// Open the log, recovering size and head hash from persistence.
    pub fn new(store: Arc<dyn KvStore>) -> Result<Self, LedgerError> {
        let size = Self::fetch_size(store.as_ref())?;
        let mut log = Self {
            indexer: BlockIndexer::new(store.clone()),
            store,
            size,
            last_block_hash: Vec::new(),
            pending: None,
            is_resetting: false,
            reset_block: 0,
        };
        if size > 0 {
            let head = log.get_block(size - 1)?;
            log.last_block_hash = head.hash().to_vec();
        }
        debug!("opened block log at height {}", size);
        Ok(log)
    }

    fn fetch_size(store: &dyn KvStore) -> Result<u64, LedgerError> {
        let bytes = store
            .get(ColumnFamily::Blockchain, BLOCK_COUNT_KEY)
            .map_err(from_kv)?;
        match bytes {
            Some(bytes) => {
                let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    LedgerError::serialization("blockchain size entry has wrong length")
                })?;
                Ok(u64::from_be_bytes(raw))
            }
            None => Ok(0),
        }
    }

    /// The chain size as of a frozen snapshot (must include the blockchain
    /// column family).
    pub fn size_from_snapshot(snapshot: &OwnedSnapshot) -> Result<u64, LedgerError> {
        match snapshot.get(ColumnFamily::Blockchain, BLOCK_COUNT_KEY) {
            Some(bytes) => {
                let raw: [u8; 8] = bytes.try_into().map_err(|_| {
                    LedgerError::serialization("blockchain size entry has wrong length")
                })?;
                Ok(u64::from_be_bytes(raw))
            }
            None => Ok(0),
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn last_block_hash(&self) -> &[u8] {
        &self.last_block_hash
    }

    pub fn get_block(&self, block_number: BlockNumber) -> Result<Block, LedgerError> {
        if block_number >= self.size {
            return Err(LedgerError::out_of_bounds(format!(
                "block [{}] requested, chain height is [{}]",
                block_number, self.size
            )));
        }
        let bytes = self
            .store
            .get(ColumnFamily::Blockchain, &block_number_key(block_number))
            .map_err(from_kv)?
            .ok_or_else(|| {
                LedgerError::block_not_found(format!("no block stored at [{}]", block_number))
            })?;
        Block::from_bytes(&bytes)
    }

    pub fn blockchain_info(&self) -> BlockchainInfo {
        let previous = if self.size > 1 {
            self.get_block(self.size - 1)
                .map(|b| b.previous_block_hash)
                .unwrap_or_default()
        } else {
            Vec::new()
        };
        BlockchainInfo {
            height: self.size,
            current_block_hash: self.last_block_hash.clone(),
            previous_block_hash: previous,
        }
    }

    /// Stamp linkage and state hashes onto a block without persisting it.
    /// Used for commit previews.
    pub fn build_block(
        &self,
        mut block: Block,
        state_hash: Vec<u8>,
        tx_set_state_hash: Vec<u8>,
    ) -> Block {
        block.previous_block_hash = self.last_block_hash.clone();
        block.state_hash = state_hash;
        block.tx_set_state_hash = tx_set_state_hash;
        block
    }

    /// Info the chain would report after committing `block` at `height`.
    pub fn info_for_block(&self, height: u64, block: &Block) -> BlockchainInfo {
        BlockchainInfo {
            height,
            current_block_hash: block.hash().to_vec(),
            previous_block_hash: block.previous_block_hash.clone(),
        }
    }

    /// Stage the persistence of a new head block into `batch`: block bytes,
    /// updated chain size and transaction index entries. Linkage and state
    /// hashes are stamped onto `block` in place. The in-memory head advances
    /// only when [`Self::block_persistence_status`] confirms the batch
    /// landed.
    pub fn add_persistence_changes_for_new_block(
        &mut self,
        block: &mut Block,
        state_hash: Vec<u8>,
        tx_set_state_hash: Vec<u8>,
        batch: &mut LedgerBatch,
    ) -> Result<BlockNumber, LedgerError> {
        let block_number = self.size;
        block.previous_block_hash = self.last_block_hash.clone();
        block.state_hash = state_hash;
        block.tx_set_state_hash = tx_set_state_hash;

        batch.put_cf(
            ColumnFamily::Blockchain,
            block_number_key(block_number).to_vec(),
            block.to_bytes(),
        );
        batch.put_cf(
            ColumnFamily::Blockchain,
            BLOCK_COUNT_KEY.to_vec(),
            (block_number + 1).to_be_bytes().to_vec(),
        );
        self.indexer.index_block(block, block_number, batch)?;

        self.pending = Some(PendingBlock {
            block_number,
            block_hash: block.hash().to_vec(),
        });
        Ok(block_number)
    }

    /// Confirm or discard the staged head after the commit batch outcome.
    pub fn block_persistence_status(&mut self, success: bool) {
        if let Some(pending) = self.pending.take() {
            if success {
                self.size = pending.block_number + 1;
                self.last_block_hash = pending.block_hash;
                info!(
                    "committed block {} (hash 0x{})",
                    pending.block_number,
                    hex::encode(&self.last_block_hash[..8.min(self.last_block_hash.len())])
                );
            }
        }
    }

    /// Store a block at an explicit height, bypassing the commit protocol.
    /// Only used for synchronization between peers.
    pub fn persist_raw_block(
        &mut self,
        block: &Block,
        block_number: BlockNumber,
    ) -> Result<(), LedgerError> {
        let mut batch = LedgerBatch::new();
        batch.put_cf(
            ColumnFamily::Blockchain,
            block_number_key(block_number).to_vec(),
            block.to_bytes(),
        );
        if block_number + 1 > self.size {
            batch.put_cf(
                ColumnFamily::Blockchain,
                BLOCK_COUNT_KEY.to_vec(),
                (block_number + 1).to_be_bytes().to_vec(),
            );
        }
        self.indexer.index_block(block, block_number, &mut batch)?;
        self.store.write_batch(batch).map_err(from_kv)?;

        if block_number + 1 > self.size {
            self.size = block_number + 1;
            self.last_block_hash = block.hash().to_vec();
        }
        Ok(())
    }

    /// Most recent in-block appearance of a transaction id.
    pub fn get_transaction_by_id(&self, txid: &TxSetId) -> Result<InBlockTransaction, LedgerError> {
        let map = self
            .indexer
            .fetch_transaction_index_map(txid)?
            .ok_or_else(|| {
                LedgerError::resource_not_found(format!("no transaction with id [{}]", txid))
            })?;
        let (&block_number, &position) = map.iter().next_back().ok_or_else(|| {
            LedgerError::resource_not_found(format!("empty index entry for [{}]", txid))
        })?;
        let block = self.get_block(block_number)?;
        block
            .transactions
            .get(position as usize)
            .cloned()
            .ok_or_else(|| {
                LedgerError::serialization(format!(
                    "index for [{}] points past block [{}]",
                    txid, block_number
                ))
            })
    }

    pub fn fetch_transaction_index_map(
        &self,
        txid: &TxSetId,
    ) -> Result<Option<TransactionIndexMap>, LedgerError> {
        self.indexer.fetch_transaction_index_map(txid)
    }

    // =========================================================================
    // Reset bookkeeping (mutation replay)
    // =========================================================================

    pub fn is_resetting(&self) -> bool {
        self.is_resetting
    }

    /// Enter reset mode with `block_number` as the first block to
    /// re-execute.
    pub fn start_reset_from_block(&mut self, block_number: BlockNumber) {
        info!("starting chain reset from block {}", block_number);
        self.is_resetting = true;
        self.reset_block = block_number;
    }

    /// The block the replay cursor sits at.
    pub fn size_reset(&self) -> BlockNumber {
        self.reset_block
    }

    /// Advance the replay cursor after a re-executed block committed.
    pub fn advance_reset_block(&mut self) -> Result<(), LedgerError> {
        if !self.is_resetting {
            return Err(LedgerError::invalid_argument(
                "cannot advance the reset block outside of a reset",
            ));
        }
        self.reset_block += 1;
        Ok(())
    }

    /// Leave reset mode.
    pub fn end_reset(&mut self) -> Result<(), LedgerError> {
        self.is_resetting = false;
        self.reset_block = 0;
        info!("chain reset concluded");
        Ok(())
    }

    /// Walk hash linkage from `high_block` down to `low_block`; returns the
    /// lowest block whose linkage verified. The first block is assumed
    /// valid.
    pub fn verify_chain(
        &self,
        high_block: BlockNumber,
        low_block: BlockNumber,
    ) -> Result<BlockNumber, LedgerError> {
        if high_block >= self.size {
            return Err(LedgerError::out_of_bounds(format!(
                "verify_chain high block [{}] past height [{}]",
                high_block, self.size
            )));
        }
        if high_block < low_block {
            return Err(LedgerError::out_of_bounds(
                "verify_chain low block above high block",
            ));
        }
        let mut current = self.get_block(high_block)?;
        for i in (low_block + 1..=high_block).rev() {
            let previous = match self.get_block(i - 1) {
                Ok(block) => block,
                Err(_) => return Ok(i),
            };
            if previous.hash().to_vec() != current.previous_block_hash {
                return Ok(i);
            }
            current = previous;
        }
        Ok(low_block)
    }
}
