//! # Chaincode World-State Store
//!
//! The chaincode twin of the transaction-set store: a `current` delta for
//! the transaction in progress, a `committed` delta for the block, and the
//! State column family underneath.
//!
//! Persistence additionally maintains the cumulative delta-from-genesis per
//! block (blockState family), which is what the replay engine restores from
//! when a mutation rewinds the chain.
//!
//! The state hash is a full-scan hash over the would-be-committed world
//! state. A Merkleizing backing can replace it behind the same method.

use crate::chaincode::delta::ChaincodeStateDelta;
use crate::config::StateConfig;
use crate::errors::StateError;
use crate::keys::{block_number_key, composite_key, split_composite_key};
use crate::snapshot::StateSnapshot;
use mc_01_kv_store::{ColumnFamily, KvStore, LedgerBatch, OwnedSnapshot};
use shared_types::{BlockNumber, Hash, TxSetId};
use sha3::{Digest, Sha3_256};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

pub struct ChaincodeState {
    store: Arc<dyn KvStore>,
    /// Changes accumulated by completed transactions of the current block.
    committed: ChaincodeStateDelta,
    /// Changes staged by the transaction in progress.
    current: ChaincodeStateDelta,
    current_txid: Option<TxSetId>,
    tx_delta_hashes: HashMap<TxSetId, Option<Hash>>,
    cached_hash: Option<Hash>,
    history_delta_size: u64,
}

impl ChaincodeState {
    pub fn new(store: Arc<dyn KvStore>, config: &StateConfig) -> Self {
        Self {
            store,
            committed: ChaincodeStateDelta::new(),
            current: ChaincodeStateDelta::new(),
            current_txid: None,
            tx_delta_hashes: HashMap::new(),
            cached_hash: None,
            history_delta_size: config.delta_history_size,
        }
    }

    /// Mark the begin of a new transaction.
    ///
    /// # Panics
    ///
    /// Panics when a transaction is already in progress.
    pub fn tx_begin(&mut self, txid: &TxSetId) {
        debug!("chaincode tx_begin() for txid [{}]", txid);
        if let Some(current) = &self.current_txid {
            panic!(
                "a tx [{}] is already in progress; received begin for [{}]",
                current, txid
            );
        }
        self.current_txid = Some(txid.clone());
    }

    /// Mark the completion of the transaction in progress.
    ///
    /// # Panics
    ///
    /// Panics when `txid` differs from the transaction begun.
    pub fn tx_finish(&mut self, txid: &TxSetId, tx_successful: bool) {
        debug!(
            "chaincode tx_finish() for txid [{}], successful [{}]",
            txid, tx_successful
        );
        if self.current_txid.as_ref() != Some(txid) {
            panic!(
                "different txid in tx-begin [{:?}] and tx-finish [{}]",
                self.current_txid, txid
            );
        }
        if tx_successful {
            if !self.current.is_empty() {
                let staged = std::mem::take(&mut self.current);
                self.tx_delta_hashes
                    .insert(txid.clone(), Some(staged.compute_crypto_hash()));
                self.committed.apply_changes(staged);
                self.cached_hash = None;
            } else {
                self.tx_delta_hashes.insert(txid.clone(), None);
            }
        }
        self.current = ChaincodeStateDelta::new();
        self.current_txid = None;
    }

    pub fn tx_in_progress(&self) -> bool {
        self.current_txid.is_some()
    }

    /// Read a key. With `committed == false` the in-memory tiers are
    /// consulted first; with `committed == true` only persisted state.
    pub fn get(
        &self,
        chaincode_id: &str,
        key: &str,
        committed: bool,
    ) -> Result<Option<Vec<u8>>, StateError> {
        if !committed {
            if let Some(update) = self.current.get(chaincode_id, key) {
                return Ok(update.value.clone());
            }
            if let Some(update) = self.committed.get(chaincode_id, key) {
                return Ok(update.value.clone());
            }
        }
        Ok(self
            .store
            .get(ColumnFamily::State, &composite_key(chaincode_id, key))?)
    }

    /// Values for multiple keys of one chaincode.
    pub fn get_multiple_keys(
        &self,
        chaincode_id: &str,
        keys: &[String],
        committed: bool,
    ) -> Result<Vec<Option<Vec<u8>>>, StateError> {
        keys.iter()
            .map(|key| self.get(chaincode_id, key, committed))
            .collect()
    }

    /// Stage a write.
    ///
    /// # Panics
    ///
    /// Panics when no transaction is in progress.
    pub fn set(&mut self, chaincode_id: &str, key: &str, value: Vec<u8>) -> Result<(), StateError> {
        assert!(
            self.tx_in_progress(),
            "state can be changed only in the context of a tx"
        );
        let previous = self.get(chaincode_id, key, true)?;
        self.current.set(chaincode_id, key, value, previous);
        Ok(())
    }

    /// Stage writes for multiple keys of one chaincode.
    pub fn set_multiple_keys(
        &mut self,
        chaincode_id: &str,
        kvs: &HashMap<String, Vec<u8>>,
    ) -> Result<(), StateError> {
        for (key, value) in kvs {
            self.set(chaincode_id, key, value.clone())?;
        }
        Ok(())
    }

    /// Stage a deletion.
    ///
    /// # Panics
    ///
    /// Panics when no transaction is in progress.
    pub fn delete(&mut self, chaincode_id: &str, key: &str) -> Result<(), StateError> {
        assert!(
            self.tx_in_progress(),
            "state can be changed only in the context of a tx"
        );
        let previous = self.get(chaincode_id, key, true)?;
        self.current.delete(chaincode_id, key, previous);
        Ok(())
    }

    /// Copy every committed key of `source` onto `dest`.
    pub fn copy_state(&mut self, source: &str, dest: &str) -> Result<(), StateError> {
        let entries = self.range_scan(source, "", "", true)?;
        for (key, value) in entries {
            self.set(dest, &key, value)?;
        }
        Ok(())
    }

    /// Keys of one chaincode between `start_key` and `end_key` (lexical,
    /// inclusive; empty bounds are open). With `committed == false` the
    /// in-memory tiers overlay the persisted entries.
    pub fn range_scan(
        &self,
        chaincode_id: &str,
        start_key: &str,
        end_key: &str,
        committed: bool,
    ) -> Result<Vec<(String, Vec<u8>)>, StateError> {
        let in_range = |key: &str| {
            (start_key.is_empty() || key >= start_key) && (end_key.is_empty() || key <= end_key)
        };

        let mut merged: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        for (raw_key, value) in self.store.iter_cf(ColumnFamily::State)? {
            let Some((cc, key)) = split_composite_key(&raw_key) else {
                continue;
            };
            if cc == chaincode_id && in_range(&key) {
                merged.insert(key, value);
            }
        }

        if !committed {
            for delta in [&self.committed, &self.current] {
                if let Some(updates) = delta.updates_for(chaincode_id) {
                    for (key, update) in updates {
                        if !in_range(key) {
                            continue;
                        }
                        match &update.value {
                            Some(value) => {
                                merged.insert(key.clone(), value.clone());
                            }
                            None => {
                                merged.remove(key);
                            }
                        }
                    }
                }
            }
        }

        Ok(merged.into_iter().collect())
    }

    /// Hash of the world state with the block's accumulated delta applied.
    /// Recomputed only when the delta changed since the last call.
    pub fn hash(&mut self) -> Result<Hash, StateError> {
        if let Some(hash) = self.cached_hash {
            return Ok(hash);
        }
        let mut world: BTreeMap<Vec<u8>, Vec<u8>> =
            self.store.iter_cf(ColumnFamily::State)?.into_iter().collect();
        for (chaincode_id, key, update) in self.committed.iter() {
            let composite = composite_key(chaincode_id, key);
            match &update.value {
                Some(value) => {
                    world.insert(composite, value.clone());
                }
                None => {
                    world.remove(&composite);
                }
            }
        }
        let mut hasher = Sha3_256::new();
        for (key, value) in &world {
            hasher.update(key);
            hasher.update([0xff]);
            hasher.update(value);
        }
        let hash: Hash = hasher.finalize().into();
        self.cached_hash = Some(hash);
        Ok(hash)
    }

    pub fn tx_delta_hashes(&self) -> &HashMap<TxSetId, Option<Hash>> {
        &self.tx_delta_hashes
    }

    /// Append this block's state writes to `batch`: world-state puts and
    /// deletes, the per-block delta (sliding window), and the cumulative
    /// delta-from-genesis for the replay engine.
    pub fn add_changes_for_persistence(
        &mut self,
        block_number: BlockNumber,
        batch: &mut LedgerBatch,
    ) -> Result<(), StateError> {
        for (chaincode_id, key, update) in self.committed.iter() {
            let composite = composite_key(chaincode_id, key);
            match &update.value {
                Some(value) => batch.put_cf(ColumnFamily::State, composite, value.clone()),
                None => batch.delete_cf(ColumnFamily::State, composite),
            }
        }

        debug!("adding chaincode state delta for block [{}]", block_number);
        batch.put_cf(
            ColumnFamily::StateDelta,
            block_number_key(block_number).to_vec(),
            self.committed.marshal(),
        );
        if block_number >= self.history_delta_size {
            let to_delete = block_number - self.history_delta_size;
            batch.delete_cf(
                ColumnFamily::StateDelta,
                block_number_key(to_delete).to_vec(),
            );
        }

        // Cumulative delta: everything from genesis up to and including this
        // block, the restore point for mutation replay.
        let mut cumulative = if block_number == 0 {
            ChaincodeStateDelta::new()
        } else {
            self.fetch_block_state_delta(block_number - 1)?
                .unwrap_or_default()
        };
        cumulative.apply_changes(self.committed.clone());
        batch.put_cf(
            ColumnFamily::BlockState,
            block_number_key(block_number).to_vec(),
            cumulative.marshal(),
        );
        Ok(())
    }

    /// Drop all in-memory changes.
    pub fn clear_in_memory_changes(&mut self, _changes_persisted: bool) {
        self.committed = ChaincodeStateDelta::new();
        self.tx_delta_hashes.clear();
        self.cached_hash = None;
    }

    /// Changes accumulated since the last [`Self::clear_in_memory_changes`].
    pub fn state_delta(&self) -> &ChaincodeStateDelta {
        &self.committed
    }

    /// Snapshot of the persisted world state for state transfer.
    pub fn snapshot(
        &self,
        block_number: BlockNumber,
        db_snapshot: &OwnedSnapshot,
    ) -> Result<StateSnapshot, StateError> {
        let entries = db_snapshot
            .iter(ColumnFamily::State)
            .map(|(k, v)| (k.to_vec(), v.to_vec()))
            .collect();
        Ok(StateSnapshot::new(block_number, entries))
    }

    /// The per-block delta stored for `block_number`, or `None` once the
    /// sliding window discarded it.
    pub fn fetch_state_delta(
        &self,
        block_number: BlockNumber,
    ) -> Result<Option<ChaincodeStateDelta>, StateError> {
        match self
            .store
            .get(ColumnFamily::StateDelta, &block_number_key(block_number))?
        {
            Some(bytes) => ChaincodeStateDelta::unmarshal(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// The cumulative delta-from-genesis stored for `block_number`.
    pub fn fetch_block_state_delta(
        &self,
        block_number: BlockNumber,
    ) -> Result<Option<ChaincodeStateDelta>, StateError> {
        match self
            .store
            .get(ColumnFamily::BlockState, &block_number_key(block_number))?
        {
            Some(bytes) => ChaincodeStateDelta::unmarshal(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Replace the committed tier with an externally prepared delta
    /// (state transfer, replay restore).
    pub fn apply_state_delta(&mut self, delta: ChaincodeStateDelta) {
        self.committed = delta;
        self.cached_hash = None;
    }

    /// Persist the delta installed by [`Self::apply_state_delta`] without
    /// touching delta history.
    pub fn commit_state_delta(&mut self) -> Result<(), StateError> {
        let mut batch = LedgerBatch::new();
        for (chaincode_id, key, update) in self.committed.iter() {
            let composite = composite_key(chaincode_id, key);
            match &update.value {
                Some(value) => batch.put_cf(ColumnFamily::State, composite, value.clone()),
                None => batch.delete_cf(ColumnFamily::State, composite),
            }
        }
        self.store.write_batch(batch)?;
        Ok(())
    }

    /// Wipe all persisted world state. Used before applying a restore point
    /// or a transferred snapshot.
    pub fn delete_state(&mut self) -> Result<(), StateError> {
        self.clear_in_memory_changes(false);
        self.store.drop_and_recreate(ColumnFamily::State)?;
        self.store.drop_and_recreate(ColumnFamily::StateDelta)?;
        Ok(())
    }
}
