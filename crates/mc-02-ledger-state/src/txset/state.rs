//! # Transaction-Set State Store
//!
//! Two in-memory delta tiers over the persistent backing:
//!
//! - `current` stages changes made by the transaction in progress
//! - `committed` accumulates the changes of completed transactions within
//!   the current block
//!
//! A set identifier may be written at most once per block; the second write
//! is skipped with a warning. This is the dependency-cycle guard that keeps
//! mutant ordering inside a block well defined.
//!
//! Not thread safe: the single ledger writer owns it.

use crate::config::StateConfig;
use crate::errors::StateError;
use crate::keys::block_number_key;
use crate::snapshot::StateSnapshot;
use crate::txset::backing::{new_tx_set_backing, HashableTxSetState};
use crate::txset::delta::TxSetStateDelta;
use mc_01_kv_store::{ColumnFamily, KvStore, LedgerBatch, OwnedSnapshot};
use shared_types::{BlockNumber, Hash, TxSetId, TxSetStateValue};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct TxSetState {
    store: Arc<dyn KvStore>,
    backing: Box<dyn HashableTxSetState>,
    /// Changes accumulated by completed transactions of the current block.
    committed: TxSetStateDelta,
    /// Changes staged by the transaction in progress.
    current: TxSetStateDelta,
    current_txid: Option<TxSetId>,
    /// Per-transaction delta hashes; `None` for transactions that changed
    /// nothing.
    tx_delta_hashes: HashMap<TxSetId, Option<Hash>>,
    /// Backing working set is stale and must be re-prepared before hashing.
    update_backing: bool,
    history_delta_size: u64,
}

impl TxSetState {
    pub fn new(store: Arc<dyn KvStore>, config: &StateConfig) -> Result<Self, StateError> {
        let backing = new_tx_set_backing(config, store.clone())?;
        debug!(
            "initialized tx set state with backing [{}]",
            config.tx_set_backing
        );
        Ok(Self {
            store,
            backing,
            committed: TxSetStateDelta::new(),
            current: TxSetStateDelta::new(),
            current_txid: None,
            tx_delta_hashes: HashMap::new(),
            update_backing: false,
            history_delta_size: config.delta_history_size,
        })
    }

    /// Mark the begin of a new transaction.
    ///
    /// # Panics
    ///
    /// Panics when a transaction is already in progress; the caller protocol
    /// guarantees strict begin/finish pairing.
    pub fn tx_begin(&mut self, txid: &TxSetId) {
        debug!("tx_begin() for txid [{}]", txid);
        if let Some(current) = &self.current_txid {
            panic!(
                "a tx [{}] is already in progress; received begin for [{}]",
                current, txid
            );
        }
        self.current_txid = Some(txid.clone());
    }

    /// Mark the completion of the transaction in progress. On success the
    /// staged changes merge into the block's committed tier.
    ///
    /// # Panics
    ///
    /// Panics when `txid` differs from the transaction begun.
    pub fn tx_finish(&mut self, txid: &TxSetId, tx_successful: bool) {
        debug!("tx_finish() for txid [{}], successful [{}]", txid, tx_successful);
        if self.current_txid.as_ref() != Some(txid) {
            panic!(
                "different txid in tx-begin [{:?}] and tx-finish [{}]",
                self.current_txid, txid
            );
        }
        if tx_successful {
            if !self.current.is_empty() {
                debug!("tx_finish() for txid [{}] merging state changes", txid);
                let staged = std::mem::take(&mut self.current);
                self.tx_delta_hashes
                    .insert(txid.clone(), Some(staged.compute_crypto_hash()));
                self.committed.apply_changes(staged);
                self.update_backing = true;
            } else {
                self.tx_delta_hashes.insert(txid.clone(), None);
            }
        }
        self.current = TxSetStateDelta::new();
        self.current_txid = None;
    }

    pub fn tx_in_progress(&self) -> bool {
        self.current_txid.is_some()
    }

    /// Read the state of a set. With `committed == false` the in-memory
    /// tiers are consulted first (current, then the block's committed tier);
    /// with `committed == true` only persisted state is read.
    pub fn get(
        &self,
        id: &TxSetId,
        committed: bool,
    ) -> Result<Option<TxSetStateValue>, StateError> {
        if !committed {
            if let Some(update) = self.current.get(id) {
                return Ok(update.value().cloned());
            }
            if let Some(update) = self.committed.get(id) {
                return Ok(update.value().cloned());
            }
        }
        self.backing.get(id)
    }

    /// Stage a new value for a set. A set already updated in this block is
    /// left untouched (warning only): an index can change once per block.
    ///
    /// # Panics
    ///
    /// Panics when no transaction is in progress.
    pub fn set(&mut self, id: &TxSetId, value: TxSetStateValue) -> Result<(), StateError> {
        debug!("set() tx_set_id [{}], index [{}]", id, value.index);
        assert!(
            self.tx_in_progress(),
            "state can be changed only in the context of a tx"
        );

        if self.current.is_updated_value_set(id) || self.committed.is_updated_value_set(id) {
            warn!(
                "potential dependency cycle avoided by not changing the already \
                 modified tx set value [{}]",
                id
            );
            return Ok(());
        }

        let previous = self.get(id, true)?;
        self.current.set(id.clone(), value, previous);
        Ok(())
    }

    /// Stage the deletion of a set's state. Unreachable from block
    /// execution; kept for state synchronization tooling.
    pub fn delete(&mut self, id: &TxSetId) -> Result<(), StateError> {
        debug!("delete() tx_set_id [{}]", id);
        assert!(
            self.tx_in_progress(),
            "state can be changed only in the context of a tx"
        );
        let previous = self.get(id, true)?;
        self.current.delete(id.clone(), previous);
        Ok(())
    }

    /// Copy the committed state of one set onto another.
    pub fn copy_state(&mut self, source: &TxSetId, dest: &TxSetId) -> Result<(), StateError> {
        let Some(value) = self.get(source, true)? else {
            return Ok(());
        };
        self.set(dest, value)
    }

    /// The earliest intro-block among mutant-bearing updates accumulated in
    /// this block, or `None` when no mutant ran. This is the block the
    /// replay engine must rewind to.
    pub fn older_block_mod(&self) -> Option<BlockNumber> {
        self.committed
            .iter()
            .filter(|(_, update)| update.is_mutant)
            .filter_map(|(_, update)| update.value().map(|v| v.intro_block))
            .min()
    }

    /// State hash with the block's accumulated delta applied. Re-prepares
    /// the backing working set only when the delta changed since the last
    /// call.
    pub fn hash(&mut self) -> Result<Hash, StateError> {
        if self.update_backing {
            debug!("updating tx set state backing with working set");
            self.backing.prepare_working_set(&self.committed)?;
            self.update_backing = false;
        }
        self.backing.compute_crypto_hash()
    }

    /// Per-transaction delta hashes recorded since the last clear. Only
    /// successful transactions appear.
    pub fn tx_delta_hashes(&self) -> &HashMap<TxSetId, Option<Hash>> {
        &self.tx_delta_hashes
    }

    /// Append this block's state writes to `batch`: every updated set value,
    /// the serialized block delta, and the sliding-window delete of the
    /// delta that falls out of history.
    pub fn add_changes_for_persistence(
        &mut self,
        block_number: BlockNumber,
        batch: &mut LedgerBatch,
    ) -> Result<(), StateError> {
        if self.update_backing {
            self.backing.prepare_working_set(&self.committed)?;
            self.update_backing = false;
        }
        self.backing.add_changes_for_persistence(batch)?;

        debug!("adding tx set state delta for block [{}]", block_number);
        batch.put_cf(
            ColumnFamily::TxSetStateDelta,
            block_number_key(block_number).to_vec(),
            self.committed.marshal(),
        );
        if block_number >= self.history_delta_size {
            let to_delete = block_number - self.history_delta_size;
            debug!("deleting tx set state delta for block [{}]", to_delete);
            batch.delete_cf(
                ColumnFamily::TxSetStateDelta,
                block_number_key(to_delete).to_vec(),
            );
        }
        Ok(())
    }

    /// Drop all in-memory changes and reset the backing working set.
    pub fn clear_in_memory_changes(&mut self, changes_persisted: bool) {
        self.committed = TxSetStateDelta::new();
        self.tx_delta_hashes.clear();
        self.update_backing = false;
        self.backing.clear_working_set(changes_persisted);
    }

    /// Changes accumulated since the last [`Self::clear_in_memory_changes`].
    pub fn state_delta(&self) -> &TxSetStateDelta {
        &self.committed
    }

    /// Snapshot of the persisted set state for state transfer, bound to the
    /// frozen `db_snapshot` view.
    pub fn snapshot(
        &self,
        block_number: BlockNumber,
        db_snapshot: &OwnedSnapshot,
    ) -> Result<StateSnapshot, StateError> {
        let entries = self.backing.snapshot_entries(db_snapshot)?;
        Ok(StateSnapshot::new(block_number, entries))
    }

    /// The serialized delta stored for `block_number`, or `None` once the
    /// sliding window discarded it.
    pub fn fetch_state_delta(
        &self,
        block_number: BlockNumber,
    ) -> Result<Option<TxSetStateDelta>, StateError> {
        let bytes = self
            .store
            .get(ColumnFamily::TxSetStateDelta, &block_number_key(block_number))?;
        match bytes {
            Some(bytes) => TxSetStateDelta::unmarshal(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Replace the committed tier with an externally prepared delta
    /// (state transfer). [`Self::commit_state_delta`] persists it.
    pub fn apply_state_delta(&mut self, delta: TxSetStateDelta) {
        self.committed = delta;
        self.update_backing = true;
    }

    /// Persist the delta installed by [`Self::apply_state_delta`].
    pub fn commit_state_delta(&mut self) -> Result<(), StateError> {
        if self.update_backing {
            self.backing.prepare_working_set(&self.committed)?;
            self.update_backing = false;
        }
        let mut batch = LedgerBatch::new();
        self.backing.add_changes_for_persistence(&mut batch)?;
        self.store.write_batch(batch)?;
        Ok(())
    }

    /// Wipe all persisted transaction-set state. Used when repopulating from
    /// a transferred snapshot.
    pub fn delete_state(&mut self) -> Result<(), StateError> {
        self.clear_in_memory_changes(false);
        self.store.drop_and_recreate(ColumnFamily::TxSetState)?;
        self.store.drop_and_recreate(ColumnFamily::TxSetStateDelta)?;
        Ok(())
    }
}
