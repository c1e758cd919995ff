//! # Ledger Façade
//!
//! Owns the block log and both state stores, and drives the block-commit
//! protocol: all chaincode changes, transaction-set changes, delta history
//! and the block itself land in one atomic store batch.

use crate::cipher::{NoopTxSetCipher, TxSetCipher};
use crate::events::{BlockEventSink, NoopEventSink};
use mc_01_kv_store::{ColumnFamily, KvError, KvStore, LedgerBatch};
use mc_02_ledger_state::{
    ChaincodeState, ChaincodeStateDelta, StateConfig, StateError, StateSnapshot, TxSetState,
    TxSetStateDelta,
};
use mc_03_block_log::BlockLog;
use shared_types::{
    Block, BlockNumber, BlockchainInfo, ChaincodeEvent, ConfidentialityLevel, Hash,
    InBlockTransaction, LedgerError, NonHashData, TransactionResult, TxSetId, TxSetStateValue,
    TxSpec,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Identifier of an in-flight transaction batch, assigned by consensus.
pub type BatchId = u64;

#[derive(Debug, Clone, Default)]
pub struct LedgerConfig {
    pub state: StateConfig,
}

pub struct Ledger {
    store: Arc<dyn KvStore>,
    block_log: BlockLog,
    chaincode_state: ChaincodeState,
    tx_set_state: TxSetState,
    current_batch_id: Option<BatchId>,
    cipher: Box<dyn TxSetCipher>,
    event_sink: Arc<dyn BlockEventSink>,
}

fn state_err(err: StateError) -> LedgerError {
    match err {
        StateError::Kv(kv) => LedgerError::transient_io(kv.to_string()),
        StateError::Serialization(msg) => LedgerError::Serialization(msg),
        StateError::UnknownBacking(name) => {
            LedgerError::invalid_argument(format!("unknown state backing [{}]", name))
        }
    }
}

fn kv_err(err: KvError) -> LedgerError {
    LedgerError::transient_io(err.to_string())
}

impl Ledger {
    pub fn new(store: Arc<dyn KvStore>, config: LedgerConfig) -> Result<Self, LedgerError> {
        let block_log = BlockLog::new(store.clone())?;
        let chaincode_state = ChaincodeState::new(store.clone(), &config.state);
        let tx_set_state = TxSetState::new(store.clone(), &config.state).map_err(state_err)?;
        Ok(Self {
            store,
            block_log,
            chaincode_state,
            tx_set_state,
            current_batch_id: None,
            cipher: Box::new(NoopTxSetCipher),
            event_sink: Arc::new(NoopEventSink),
        })
    }

    pub fn with_cipher(mut self, cipher: Box<dyn TxSetCipher>) -> Self {
        self.cipher = cipher;
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn BlockEventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    pub fn event_sink(&self) -> Arc<dyn BlockEventSink> {
        self.event_sink.clone()
    }

    // =========================================================================
    // Transaction-batch lifecycle
    // =========================================================================

    /// Invoked when the next round of transaction-batch execution begins.
    pub fn begin_tx_batch(&mut self, id: BatchId) -> Result<(), LedgerError> {
        self.check_valid_id_begin()?;
        self.current_batch_id = Some(id);
        Ok(())
    }

    /// Preview of the blockchain info that [`Self::commit_tx_batch`] with
    /// the same arguments would produce. State changes between the two
    /// calls change the contained hashes.
    pub fn get_tx_batch_preview_info(
        &mut self,
        id: BatchId,
        transactions: Vec<InBlockTransaction>,
        metadata: Vec<u8>,
    ) -> Result<BlockchainInfo, LedgerError> {
        self.check_valid_id_commit_or_rollback(id)?;
        let chaincode_hash = self.chaincode_state.hash().map_err(state_err)?;
        let tx_set_hash = self.tx_set_state.hash().map_err(state_err)?;
        let block = self.block_log.build_block(
            Block::new(transactions, metadata),
            chaincode_hash.to_vec(),
            tx_set_hash.to_vec(),
        );
        Ok(self.block_log.info_for_block(self.block_log.size() + 1, &block))
    }

    /// Commit the current transaction batch: returns successfully iff the
    /// block and every state change reached permanent storage.
    ///
    /// Any state-hash failure aborts the commit; both hashes gate equally.
    pub fn commit_tx_batch(
        &mut self,
        id: BatchId,
        transactions: Vec<InBlockTransaction>,
        transaction_results: &[TransactionResult],
        metadata: Vec<u8>,
    ) -> Result<(), LedgerError> {
        self.check_valid_id_commit_or_rollback(id)?;

        let chaincode_hash = match self.chaincode_state.hash() {
            Ok(hash) => hash,
            Err(err) => {
                self.reset_for_next_tx_group(false);
                self.block_log.block_persistence_status(false);
                return Err(state_err(err));
            }
        };
        let tx_set_hash = match self.tx_set_state.hash() {
            Ok(hash) => hash,
            Err(err) => {
                self.reset_for_next_tx_group(false);
                self.block_log.block_persistence_status(false);
                return Err(state_err(err));
            }
        };

        let mut block = Block::new(transactions, metadata);

        // One chaincode-event slot per transaction so events stay parallel
        // to the batch; transactions without an event get a placeholder.
        let mut erroneous = 0usize;
        let events: Vec<ChaincodeEvent> = transaction_results
            .iter()
            .map(|result| {
                if result.is_erroneous() {
                    info!(
                        "transaction [{}] contained errors: {}",
                        result.txid, result.error
                    );
                    erroneous += 1;
                }
                result.chaincode_event.clone().unwrap_or_default()
            })
            .collect();
        block.non_hash_data = Some(NonHashData {
            chaincode_events: events,
        });

        let mut batch = LedgerBatch::new();
        let block_number = match self.block_log.add_persistence_changes_for_new_block(
            &mut block,
            chaincode_hash.to_vec(),
            tx_set_hash.to_vec(),
            &mut batch,
        ) {
            Ok(number) => number,
            Err(err) => {
                self.reset_for_next_tx_group(false);
                self.block_log.block_persistence_status(false);
                return Err(err);
            }
        };
        if let Err(err) = self
            .chaincode_state
            .add_changes_for_persistence(block_number, &mut batch)
        {
            self.reset_for_next_tx_group(false);
            self.block_log.block_persistence_status(false);
            return Err(state_err(err));
        }
        if let Err(err) = self
            .tx_set_state
            .add_changes_for_persistence(block_number, &mut batch)
        {
            self.reset_for_next_tx_group(false);
            self.block_log.block_persistence_status(false);
            return Err(state_err(err));
        }

        if let Err(err) = self.store.write_batch(batch) {
            self.reset_for_next_tx_group(false);
            self.block_log.block_persistence_status(false);
            return Err(kv_err(err));
        }

        self.reset_for_next_tx_group(true);
        self.block_log.block_persistence_status(true);

        self.event_sink.block_committed(&block);
        for result in transaction_results {
            if let Some(event) = &result.chaincode_event {
                if !event.chaincode_id.is_empty() {
                    self.event_sink.chaincode_event(event);
                }
            }
        }
        if erroneous != 0 {
            debug!("{} erroneous transactions in committed batch", erroneous);
        }
        Ok(())
    }

    /// Commit one re-executed block during a mutation replay. Only
    /// chaincode state is written; transaction-set state already holds its
    /// post-mutation target.
    pub fn commit_reset_tx_batch(&mut self) -> Result<(), LedgerError> {
        if !self.block_log.is_resetting() {
            return Err(LedgerError::invalid_argument(
                "cannot commit a reset tx batch because the blockchain is not resetting",
            ));
        }
        let block_number = self.current_block_ex();
        let mut batch = LedgerBatch::new();
        self.chaincode_state
            .add_changes_for_persistence(block_number, &mut batch)
            .map_err(state_err)?;
        if let Err(err) = self.store.write_batch(batch) {
            self.reset_for_next_tx_group(false);
            self.block_log.block_persistence_status(false);
            return Err(kv_err(err));
        }
        self.chaincode_state.clear_in_memory_changes(true);
        self.block_log.advance_reset_block()
    }

    /// Discard all state changes of the current batch.
    pub fn rollback_tx_batch(&mut self, id: BatchId) -> Result<(), LedgerError> {
        debug!("rollback_tx_batch for id [{}]", id);
        self.check_valid_id_commit_or_rollback(id)?;
        self.reset_for_next_tx_group(false);
        Ok(())
    }

    /// Mark the begin of a chaincode-state transaction in the batch.
    pub fn chain_tx_begin(&mut self, txid: &TxSetId) {
        self.chaincode_state.tx_begin(txid);
    }

    /// Finish the ongoing chaincode-state transaction; failed transactions
    /// discard their staged changes.
    pub fn chain_tx_finished(&mut self, txid: &TxSetId, successful: bool) {
        self.chaincode_state.tx_finish(txid, successful);
    }

    /// Mark the begin of a transaction-set state transaction in the batch.
    pub fn set_tx_begin(&mut self, txid: &TxSetId) {
        self.tx_set_state.tx_begin(txid);
    }

    /// Finish the ongoing transaction-set state transaction.
    pub fn set_tx_finished(&mut self, txid: &TxSetId, successful: bool) {
        self.tx_set_state.tx_finish(txid, successful);
    }

    // =========================================================================
    // World state
    // =========================================================================

    /// Chaincode state hash including the changes of the current batch.
    pub fn temp_state_hash(&mut self) -> Result<Hash, LedgerError> {
        self.chaincode_state.hash().map_err(state_err)
    }

    /// Transaction-set state hash including the changes of the current
    /// batch.
    pub fn temp_tx_set_state_hash(&mut self) -> Result<Hash, LedgerError> {
        self.tx_set_state.hash().map_err(state_err)
    }

    /// State hash plus the per-transaction delta hashes of successful
    /// transactions.
    pub fn temp_state_hash_with_tx_delta_hashes(
        &mut self,
    ) -> Result<(Hash, HashMap<TxSetId, Option<Hash>>), LedgerError> {
        let hash = self.chaincode_state.hash().map_err(state_err)?;
        Ok((hash, self.chaincode_state.tx_delta_hashes().clone()))
    }

    /// Transaction-set state hash plus per-transaction delta hashes.
    pub fn temp_tx_set_state_hash_with_tx_delta_hashes(
        &mut self,
    ) -> Result<(Hash, HashMap<TxSetId, Option<Hash>>), LedgerError> {
        let hash = self.tx_set_state.hash().map_err(state_err)?;
        Ok((hash, self.tx_set_state.tx_delta_hashes().clone()))
    }

    /// Read chaincode state. `committed == false` consults the in-memory
    /// tiers first.
    pub fn get_state(
        &self,
        chaincode_id: &str,
        key: &str,
        committed: bool,
    ) -> Result<Option<Vec<u8>>, LedgerError> {
        self.chaincode_state
            .get(chaincode_id, key, committed)
            .map_err(state_err)
    }

    /// Stage a chaincode-state write. Does not touch the store until commit.
    pub fn set_state(
        &mut self,
        chaincode_id: &str,
        key: &str,
        value: Vec<u8>,
    ) -> Result<(), LedgerError> {
        if key.is_empty() {
            return Err(LedgerError::invalid_argument(
                "an empty string key is not supported",
            ));
        }
        self.chaincode_state
            .set(chaincode_id, key, value)
            .map_err(state_err)
    }

    /// Stage a chaincode-state deletion.
    pub fn delete_state(&mut self, chaincode_id: &str, key: &str) -> Result<(), LedgerError> {
        self.chaincode_state
            .delete(chaincode_id, key)
            .map_err(state_err)
    }

    pub fn get_state_multiple_keys(
        &self,
        chaincode_id: &str,
        keys: &[String],
        committed: bool,
    ) -> Result<Vec<Option<Vec<u8>>>, LedgerError> {
        self.chaincode_state
            .get_multiple_keys(chaincode_id, keys, committed)
            .map_err(state_err)
    }

    pub fn set_state_multiple_keys(
        &mut self,
        chaincode_id: &str,
        kvs: &HashMap<String, Vec<u8>>,
    ) -> Result<(), LedgerError> {
        self.chaincode_state
            .set_multiple_keys(chaincode_id, kvs)
            .map_err(state_err)
    }

    /// Copy all key-values of one chaincode onto another.
    pub fn copy_state(&mut self, source: &str, dest: &str) -> Result<(), LedgerError> {
        self.chaincode_state
            .copy_state(source, dest)
            .map_err(state_err)
    }

    /// Keys of one chaincode between `start_key` and `end_key` in lexical
    /// order; empty bounds are open.
    pub fn get_state_range_scan(
        &self,
        chaincode_id: &str,
        start_key: &str,
        end_key: &str,
        committed: bool,
    ) -> Result<Vec<(String, Vec<u8>)>, LedgerError> {
        self.chaincode_state
            .range_scan(chaincode_id, start_key, end_key, committed)
            .map_err(state_err)
    }

    // =========================================================================
    // Transaction-set state
    // =========================================================================

    /// Read the state of a transaction set.
    pub fn get_tx_set_state(
        &self,
        tx_set_id: &TxSetId,
        committed: bool,
    ) -> Result<Option<TxSetStateValue>, LedgerError> {
        self.tx_set_state
            .get(tx_set_id, committed)
            .map_err(state_err)
    }

    /// The invariant-enforcing writer: validates `value` against the
    /// committed previous value and stages it only when every transition
    /// rule holds. Violations reject the write and leave state untouched.
    pub fn set_tx_set_state(
        &mut self,
        tx_set_id: &TxSetId,
        value: TxSetStateValue,
    ) -> Result<(), LedgerError> {
        let previous = self
            .get_tx_set_state(tx_set_id, true)
            .map_err(|err| {
                LedgerError::resource_not_found(format!(
                    "error retrieving the previous state for tx_set_id [{}]: {}",
                    tx_set_id, err
                ))
            })?
            .unwrap_or_default();

        if value.nonce != previous.nonce + 1 {
            return Err(LedgerError::invalid_argument(format!(
                "wrong nonce update; previous nonce: {}, new nonce: {}",
                previous.nonce, value.nonce
            )));
        }
        if previous.intro_block != 0 && previous.intro_block != value.intro_block {
            return Err(LedgerError::invalid_argument(format!(
                "a mutation or extension cannot modify the intro block; \
                 previous: [{}], new: [{}]",
                previous.intro_block, value.intro_block
            )));
        }
        if previous.intro_block != 0 && previous.index != value.index {
            previous.is_valid_mutation(&value)?;
        } else {
            previous.is_valid_block_extension(&value)?;
        }
        self.tx_set_state.set(tx_set_id, value).map_err(state_err)
    }

    /// The earliest block whose active selection changed in the current
    /// batch, or `None` when no mutant ran.
    pub fn older_mutated_block(&self) -> Option<BlockNumber> {
        self.tx_set_state.older_block_mod()
    }

    // =========================================================================
    // Mutation replay support
    // =========================================================================

    /// Roll chaincode state back to its value at the end of `block_number`
    /// and enter reset mode with the next block as the replay cursor.
    pub fn reset_to_block(&mut self, block_number: BlockNumber) -> Result<(), LedgerError> {
        let restore = self
            .chaincode_state
            .fetch_block_state_delta(block_number)
            .map_err(state_err)?
            .ok_or_else(|| {
                LedgerError::resource_not_found(format!(
                    "unable to reset to block [{}]: no cumulative state stored for it",
                    block_number
                ))
            })?;
        self.chaincode_state.delete_state().map_err(state_err)?;
        self.chaincode_state.apply_state_delta(restore);
        self.chaincode_state
            .commit_state_delta()
            .map_err(state_err)?;
        self.chaincode_state.clear_in_memory_changes(true);
        self.block_log.start_reset_from_block(block_number + 1);
        Ok(())
    }

    /// Leave reset mode.
    pub fn conclude_reset(&mut self) -> Result<(), LedgerError> {
        self.block_log.end_reset()
    }

    /// The block number transactions execute against right now: the replay
    /// cursor while resetting, the chain height otherwise.
    pub fn current_block_ex(&self) -> BlockNumber {
        if self.block_log.is_resetting() {
            self.block_log.size_reset()
        } else {
            self.block_log.size()
        }
    }

    pub fn is_resetting(&self) -> bool {
        self.block_log.is_resetting()
    }

    // =========================================================================
    // Current-default resolution
    // =========================================================================

    /// The active candidate of the set named by `tx_set_id`.
    pub fn get_current_default_by_id(&self, tx_set_id: &TxSetId) -> Result<TxSpec, LedgerError> {
        let in_block_tx = self.block_log.get_transaction_by_id(tx_set_id)?;
        self.get_current_default(&in_block_tx, false)
    }

    /// Resolve the active candidate of a transaction set.
    ///
    /// When the set state lives in an earlier block, the transaction index
    /// locates the contributing block and the in-block offset of the active
    /// member. Confidential payloads pass through the cipher seam before
    /// decoding.
    pub fn get_current_default(
        &self,
        in_block_tx: &InBlockTransaction,
        committed: bool,
    ) -> Result<TxSpec, LedgerError> {
        let state_value = self
            .get_tx_set_state(&in_block_tx.txid, committed)
            .map_err(|err| {
                LedgerError::resource_not_found(format!(
                    "failed to retrieve the tx set state for [{}]: {}",
                    in_block_tx.txid, err
                ))
            })?;

        let mut default_bytes: Option<Vec<u8>> = None;
        if let Some(set) = in_block_tx.transaction_set() {
            default_bytes = set.transactions.get(set.default_index as usize).cloned();
        }

        let active_index = match &state_value {
            None => {
                // No tracked state: the transaction encapsulates a single
                // candidate.
                let set = in_block_tx.transaction_set().ok_or_else(|| {
                    LedgerError::invalid_argument(
                        "the given transaction is not a transactions set",
                    )
                })?;
                let first = set.transactions.first().ok_or_else(|| {
                    LedgerError::invalid_argument(
                        "the given transaction is not a transactions set",
                    )
                })?;
                default_bytes = Some(first.clone());
                0
            }
            Some(value) => {
                let (def_block, local_index) = value.block_for_index(value.index)?;
                if def_block < self.block_log.size() {
                    // The active member was committed in an earlier block.
                    let index_map = self
                        .block_log
                        .fetch_transaction_index_map(&in_block_tx.txid)?
                        .ok_or_else(|| {
                            LedgerError::resource_not_found(format!(
                                "no index entry for tx set [{}]",
                                in_block_tx.txid
                            ))
                        })?;
                    let position = *index_map.get(&def_block).ok_or_else(|| {
                        LedgerError::resource_not_found(format!(
                            "unable to find set [{}] at its current default block [{}]",
                            in_block_tx.txid, def_block
                        ))
                    })?;
                    let block = self.block_log.get_block(def_block)?;
                    let carrier = block.transactions.get(position as usize).ok_or_else(|| {
                        LedgerError::serialization(format!(
                            "index for [{}] points past block [{}]",
                            in_block_tx.txid, def_block
                        ))
                    })?;
                    let set = carrier.transaction_set().ok_or_else(|| {
                        LedgerError::invalid_argument(format!(
                            "the default block [{}] does not carry a tx set for [{}]",
                            def_block, in_block_tx.txid
                        ))
                    })?;
                    default_bytes =
                        Some(set.transactions.get(local_index as usize).cloned().ok_or_else(
                            || {
                                LedgerError::invalid_argument(format!(
                                    "active member [{}] out of range in block [{}]",
                                    local_index, def_block
                                ))
                            },
                        )?);
                }
                value.index
            }
        };

        let mut payload = default_bytes.ok_or_else(|| {
            LedgerError::resource_not_found(format!(
                "no candidate payload resolvable for tx set [{}]",
                in_block_tx.txid
            ))
        })?;

        if in_block_tx.confidentiality_level == ConfidentialityLevel::Confidential {
            payload = self
                .cipher
                .decrypt_candidate(&in_block_tx.nonce, &payload, active_index)?;
        }

        TxSpec::from_bytes(&payload)
    }

    // =========================================================================
    // Blockchain reads
    // =========================================================================

    pub fn blockchain_info(&self) -> BlockchainInfo {
        self.block_log.blockchain_info()
    }

    pub fn get_block_by_number(&self, block_number: BlockNumber) -> Result<Block, LedgerError> {
        self.block_log.get_block(block_number)
    }

    pub fn blockchain_size(&self) -> u64 {
        self.block_log.size()
    }

    pub fn get_transaction_by_id(&self, txid: &TxSetId) -> Result<InBlockTransaction, LedgerError> {
        self.block_log.get_transaction_by_id(txid)
    }

    /// Store a raw block at an explicit height (peer synchronization only).
    pub fn put_raw_block(
        &mut self,
        block: &Block,
        block_number: BlockNumber,
    ) -> Result<(), LedgerError> {
        self.block_log.persist_raw_block(block, block_number)?;
        self.event_sink.block_committed(block);
        Ok(())
    }

    /// Verify hash linkage between `low_block` and `high_block`; returns
    /// the lowest block number that verified.
    pub fn verify_chain(
        &self,
        high_block: BlockNumber,
        low_block: BlockNumber,
    ) -> Result<BlockNumber, LedgerError> {
        self.block_log.verify_chain(high_block, low_block)
    }

    // =========================================================================
    // State transfer
    // =========================================================================

    /// Point-in-time snapshots of both state families for transfer to
    /// another peer, each frozen together with the chain height it belongs
    /// to.
    pub fn state_snapshots(&self) -> Result<(StateSnapshot, StateSnapshot), LedgerError> {
        let chaincode_view = self
            .store
            .snapshot(&[ColumnFamily::Blockchain, ColumnFamily::State])
            .map_err(kv_err)?;
        let tx_set_view = self
            .store
            .snapshot(&[ColumnFamily::Blockchain, ColumnFamily::TxSetState])
            .map_err(kv_err)?;

        let height = BlockLog::size_from_snapshot(&chaincode_view)?;
        if height == 0 {
            return Err(LedgerError::out_of_bounds(
                "blockchain has no blocks, cannot determine block number",
            ));
        }
        let chaincode_snapshot = self
            .chaincode_state
            .snapshot(height - 1, &chaincode_view)
            .map_err(state_err)?;
        let tx_set_snapshot = self
            .tx_set_state
            .snapshot(height - 1, &tx_set_view)
            .map_err(state_err)?;
        Ok((chaincode_snapshot, tx_set_snapshot))
    }

    /// The per-block deltas stored for `block_number`, or `None` once the
    /// sliding window discarded them.
    pub fn get_state_delta(
        &self,
        block_number: BlockNumber,
    ) -> Result<(Option<ChaincodeStateDelta>, Option<TxSetStateDelta>), LedgerError> {
        if block_number >= self.blockchain_size() {
            return Err(LedgerError::out_of_bounds("ledger: out of bounds"));
        }
        let chaincode_delta = self
            .chaincode_state
            .fetch_state_delta(block_number)
            .map_err(state_err)?;
        let tx_set_delta = self
            .tx_set_state
            .fetch_state_delta(block_number)
            .map_err(state_err)?;
        Ok((chaincode_delta, tx_set_delta))
    }

    /// The cumulative chaincode delta from genesis up to `block_number`.
    pub fn get_delta_from_genesis(
        &self,
        block_number: BlockNumber,
    ) -> Result<Option<ChaincodeStateDelta>, LedgerError> {
        self.chaincode_state
            .fetch_block_state_delta(block_number)
            .map_err(state_err)
    }

    /// Install externally prepared deltas as the in-memory state (state
    /// transfer). [`Self::commit_state_delta`] persists them. Order
    /// checking is up to the caller.
    pub fn apply_state_delta(
        &mut self,
        id: BatchId,
        chaincode_delta: ChaincodeStateDelta,
        tx_set_delta: TxSetStateDelta,
    ) -> Result<(), LedgerError> {
        self.check_valid_id_begin()?;
        self.current_batch_id = Some(id);
        self.chaincode_state.apply_state_delta(chaincode_delta);
        self.tx_set_state.apply_state_delta(tx_set_delta);
        Ok(())
    }

    /// Persist the deltas installed by [`Self::apply_state_delta`].
    pub fn commit_state_delta(&mut self, id: BatchId) -> Result<(), LedgerError> {
        self.check_valid_id_commit_or_rollback(id)?;
        let result = self
            .chaincode_state
            .commit_state_delta()
            .and_then(|_| self.tx_set_state.commit_state_delta())
            .map_err(state_err);
        self.reset_for_next_tx_group(true);
        result
    }

    /// Discard the deltas installed by [`Self::apply_state_delta`].
    pub fn rollback_state_delta(&mut self, id: BatchId) -> Result<(), LedgerError> {
        self.check_valid_id_commit_or_rollback(id)?;
        self.reset_for_next_tx_group(false);
        Ok(())
    }

    /// Wipe both state families. Only used when repopulating from a
    /// transferred snapshot.
    pub fn delete_all_state_keys_and_values(&mut self) -> Result<(), LedgerError> {
        self.chaincode_state.delete_state().map_err(state_err)?;
        self.tx_set_state.delete_state().map_err(state_err)
    }

    // =========================================================================
    // Internal
    // =========================================================================

    fn check_valid_id_begin(&self) -> Result<(), LedgerError> {
        if let Some(current) = self.current_batch_id {
            return Err(LedgerError::invalid_argument(format!(
                "another tx group [{}] is already in progress",
                current
            )));
        }
        Ok(())
    }

    fn check_valid_id_commit_or_rollback(&self, id: BatchId) -> Result<(), LedgerError> {
        if self.current_batch_id != Some(id) {
            return Err(LedgerError::invalid_argument(format!(
                "another tx group [{:?}] is already in progress",
                self.current_batch_id
            )));
        }
        Ok(())
    }

    fn reset_for_next_tx_group(&mut self, committed: bool) {
        debug!("resetting ledger state for the next transaction batch");
        self.current_batch_id = None;
        self.chaincode_state.clear_in_memory_changes(committed);
        self.tx_set_state.clear_in_memory_changes(committed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mc_01_kv_store::InMemoryKvStore;
    use shared_types::{ErrorKind, TxSetIndexEntry};

    fn new_ledger() -> Ledger {
        let store: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        Ledger::new(store, LedgerConfig::default()).unwrap()
    }

    fn intro_value(intro_block: u64, index: u64, members: u64) -> TxSetStateValue {
        TxSetStateValue {
            nonce: 1,
            intro_block,
            last_modified_at_block: intro_block,
            index,
            tx_number: members,
            index_at_block: vec![TxSetIndexEntry::new(intro_block, members - 1)],
        }
    }

    /// Commit a block carrying `transactions`, applying `stage` inside the
    /// batch first.
    fn commit_block(
        ledger: &mut Ledger,
        id: BatchId,
        transactions: Vec<InBlockTransaction>,
        stage: impl FnOnce(&mut Ledger),
    ) {
        ledger.begin_tx_batch(id).unwrap();
        stage(ledger);
        let results: Vec<TransactionResult> = transactions
            .iter()
            .map(|tx| TransactionResult::success(tx.txid.clone(), Vec::new(), None))
            .collect();
        ledger
            .commit_tx_batch(id, transactions, &results, Vec::new())
            .unwrap();
    }

    #[test]
    fn test_batch_id_discipline() {
        let mut ledger = new_ledger();
        ledger.begin_tx_batch(1).unwrap();
        assert!(ledger.begin_tx_batch(2).is_err());
        assert!(ledger.rollback_tx_batch(9).is_err());
        ledger.rollback_tx_batch(1).unwrap();
        ledger.begin_tx_batch(2).unwrap();
        ledger.rollback_tx_batch(2).unwrap();
    }

    #[test]
    fn test_commit_produces_block_and_clears_memory() {
        let mut ledger = new_ledger();
        let tx = InBlockTransaction::new_set("set-a", vec![b"t0".to_vec()], 0);
        commit_block(&mut ledger, 1, vec![tx], |ledger| {
            let txid: TxSetId = "set-a".into();
            ledger.chain_tx_begin(&txid);
            ledger.set_state("cc1", "k", b"v".to_vec()).unwrap();
            ledger.chain_tx_finished(&txid, true);
        });

        assert_eq!(ledger.blockchain_size(), 1);
        assert_eq!(
            ledger.get_state("cc1", "k", true).unwrap(),
            Some(b"v".to_vec())
        );
        let block = ledger.get_block_by_number(0).unwrap();
        assert_eq!(block.transactions.len(), 1);
        assert_eq!(block.non_hash_data.unwrap().chaincode_events.len(), 1);
    }

    #[test]
    fn test_invariant_writer_nonce() {
        let mut ledger = new_ledger();
        ledger.begin_tx_batch(1).unwrap();
        let id: TxSetId = "set-a".into();
        ledger.set_tx_begin(&id);
        let mut value = intro_value(1, 0, 3);
        value.nonce = 5;
        let err = ledger.set_tx_set_state(&id, value).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(err.to_string().contains("wrong nonce"));
        ledger.set_tx_finished(&id, false);
        ledger.rollback_tx_batch(1).unwrap();
    }

    #[test]
    fn test_invariant_writer_accepts_introduction() {
        let mut ledger = new_ledger();
        ledger.begin_tx_batch(1).unwrap();
        let id: TxSetId = "set-a".into();
        ledger.set_tx_begin(&id);
        ledger.set_tx_set_state(&id, intro_value(1, 1, 3)).unwrap();
        ledger.set_tx_finished(&id, true);
        assert_eq!(
            ledger.get_tx_set_state(&id, false).unwrap().unwrap().index,
            1
        );
        ledger.rollback_tx_batch(1).unwrap();
    }

    #[test]
    fn test_invariant_writer_intro_block_frozen() {
        let mut ledger = new_ledger();
        let id: TxSetId = "set-a".into();
        commit_block(&mut ledger, 1, Vec::new(), |ledger| {
            ledger.set_tx_begin(&id);
            ledger.set_tx_set_state(&id, intro_value(1, 0, 3)).unwrap();
            ledger.set_tx_finished(&id, true);
        });

        ledger.begin_tx_batch(2).unwrap();
        ledger.set_tx_begin(&id);
        let mut moved = intro_value(1, 0, 3);
        moved.nonce = 2;
        moved.intro_block = 2;
        let err = ledger.set_tx_set_state(&id, moved).unwrap_err();
        assert!(err.to_string().contains("intro block"));
        ledger.set_tx_finished(&id, false);
        ledger.rollback_tx_batch(2).unwrap();
    }

    #[test]
    fn test_invariant_writer_valid_mutation() {
        let mut ledger = new_ledger();
        let id: TxSetId = "set-a".into();
        commit_block(&mut ledger, 1, Vec::new(), |ledger| {
            ledger.set_tx_begin(&id);
            ledger.set_tx_set_state(&id, intro_value(1, 0, 3)).unwrap();
            ledger.set_tx_finished(&id, true);
        });

        commit_block(&mut ledger, 2, Vec::new(), |ledger| {
            ledger.set_tx_begin(&id);
            let mut mutated = intro_value(1, 0, 3);
            mutated.nonce = 2;
            mutated.index = 2;
            mutated.last_modified_at_block = 2;
            ledger.set_tx_set_state(&id, mutated).unwrap();
            ledger.set_tx_finished(&id, true);
        });

        assert_eq!(
            ledger.get_tx_set_state(&id, true).unwrap().unwrap().index,
            2
        );
    }

    #[test]
    fn test_preview_matches_commit() {
        let mut ledger = new_ledger();
        let tx = InBlockTransaction::new_set("set-a", vec![b"t0".to_vec()], 0);

        ledger.begin_tx_batch(1).unwrap();
        let preview = ledger
            .get_tx_batch_preview_info(1, vec![tx.clone()], Vec::new())
            .unwrap();
        let results = [TransactionResult::success(tx.txid.clone(), Vec::new(), None)];
        ledger
            .commit_tx_batch(1, vec![tx], &results, Vec::new())
            .unwrap();

        let info = ledger.blockchain_info();
        assert_eq!(preview.height, info.height);
        // The committed block embeds events in non-hashed data only, so the
        // hashes must agree.
        assert_eq!(preview.current_block_hash, info.current_block_hash);
    }

    #[test]
    fn test_get_state_delta_bounds() {
        let mut ledger = new_ledger();
        commit_block(&mut ledger, 1, Vec::new(), |_| {});
        assert!(ledger.get_state_delta(0).is_ok());
        let err = ledger.get_state_delta(5).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfBounds);
    }

    #[test]
    fn test_state_snapshot_transfer_roundtrip() {
        let mut ledger = new_ledger();
        let id: TxSetId = "set-a".into();
        commit_block(&mut ledger, 1, Vec::new(), |ledger| {
            ledger.chain_tx_begin(&id);
            ledger.set_state("cc1", "k", b"v".to_vec()).unwrap();
            ledger.chain_tx_finished(&id, true);
            ledger.set_tx_begin(&id);
            ledger.set_tx_set_state(&id, intro_value(1, 0, 2)).unwrap();
            ledger.set_tx_finished(&id, true);
        });

        let (chaincode_snap, tx_set_snap) = ledger.state_snapshots().unwrap();
        assert_eq!(chaincode_snap.block_number(), 0);
        assert_eq!(chaincode_snap.len(), 1);
        assert_eq!(tx_set_snap.len(), 1);

        // Re-seed a second ledger from the snapshots.
        let store: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        let mut peer = Ledger::new(store.clone(), LedgerConfig::default()).unwrap();
        for (key, value) in chaincode_snap.entries() {
            store.put(ColumnFamily::State, key, value).unwrap();
        }
        for (key, value) in tx_set_snap.entries() {
            store.put(ColumnFamily::TxSetState, key, value).unwrap();
        }
        assert_eq!(
            peer.get_state("cc1", "k", true).unwrap(),
            Some(b"v".to_vec())
        );
        assert_eq!(
            peer.get_tx_set_state(&id, true).unwrap().unwrap().intro_block,
            1
        );
        peer.delete_all_state_keys_and_values().unwrap();
        assert!(peer.get_state("cc1", "k", true).unwrap().is_none());
    }

    #[test]
    fn test_snapshot_on_empty_chain_fails() {
        let ledger = new_ledger();
        let err = ledger.state_snapshots().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfBounds);
    }

    #[test]
    fn test_apply_and_commit_state_delta() {
        let mut ledger = new_ledger();
        let mut chaincode_delta = ChaincodeStateDelta::new();
        chaincode_delta.set("cc1", "k", b"v".to_vec(), None);
        let mut tx_set_delta = TxSetStateDelta::new();
        tx_set_delta.set("set-a".into(), intro_value(1, 0, 2), None);

        ledger.apply_state_delta(7, chaincode_delta, tx_set_delta).unwrap();
        ledger.commit_state_delta(7).unwrap();

        assert_eq!(
            ledger.get_state("cc1", "k", true).unwrap(),
            Some(b"v".to_vec())
        );
        assert!(ledger
            .get_tx_set_state(&"set-a".into(), true)
            .unwrap()
            .is_some());
    }
}
