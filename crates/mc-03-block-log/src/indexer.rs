//! # Transaction-Id Indexer
//!
//! Maps a transaction id to every block that carried it and the in-block
//! position there: `txid → { block_nr → in_block_index }`. A transaction
//! set appears once per contributing block (introduction plus extensions),
//! so the map grows by at most one entry per block.

use mc_01_kv_store::{ColumnFamily, KvError, KvStore, LedgerBatch};
use shared_types::{Block, BlockNumber, LedgerError, TxSetId};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Per-block positions of one transaction id.
pub type TransactionIndexMap = BTreeMap<BlockNumber, u64>;

pub struct BlockIndexer {
    store: Arc<dyn KvStore>,
}

impl BlockIndexer {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Append index updates for every transaction of `block` to `batch`.
    pub fn index_block(
        &self,
        block: &Block,
        block_number: BlockNumber,
        batch: &mut LedgerBatch,
    ) -> Result<(), LedgerError> {
        for (position, tx) in block.transactions.iter().enumerate() {
            let mut map = self.fetch_transaction_index_map(&tx.txid)?.unwrap_or_default();
            map.insert(block_number, position as u64);
            let encoded = bincode::serialize(&map)
                .map_err(|e| LedgerError::serialization(e.to_string()))?;
            batch.put_cf(ColumnFamily::Indexes, tx.txid.as_bytes().to_vec(), encoded);
        }
        Ok(())
    }

    /// The per-block position table of a transaction id, or `None` when the
    /// id never appeared on the chain.
    pub fn fetch_transaction_index_map(
        &self,
        txid: &TxSetId,
    ) -> Result<Option<TransactionIndexMap>, LedgerError> {
        let bytes = self
            .store
            .get(ColumnFamily::Indexes, txid.as_bytes())
            .map_err(from_kv)?;
        match bytes {
            Some(bytes) => bincode::deserialize(&bytes)
                .map(Some)
                .map_err(|e| LedgerError::serialization(e.to_string())),
            None => Ok(None),
        }
    }
}

pub(crate) fn from_kv(err: KvError) -> LedgerError {
    LedgerError::transient_io(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mc_01_kv_store::InMemoryKvStore;
    use shared_types::InBlockTransaction;

    fn indexer_with_store() -> (Arc<dyn KvStore>, BlockIndexer) {
        let store: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        (store.clone(), BlockIndexer::new(store))
    }

    #[test]
    fn test_index_block_records_positions() {
        let (store, indexer) = indexer_with_store();
        let block = Block::new(
            vec![
                InBlockTransaction::new_set("set-a", vec![b"t0".to_vec()], 0),
                InBlockTransaction::new_mutant("mut-1", "set-z", 0),
            ],
            Vec::new(),
        );

        let mut batch = LedgerBatch::new();
        indexer.index_block(&block, 4, &mut batch).unwrap();
        store.write_batch(batch).unwrap();

        let map = indexer
            .fetch_transaction_index_map(&"set-a".into())
            .unwrap()
            .unwrap();
        assert_eq!(map[&4], 0);
        let map = indexer
            .fetch_transaction_index_map(&"mut-1".into())
            .unwrap()
            .unwrap();
        assert_eq!(map[&4], 1);
    }

    #[test]
    fn test_index_accumulates_across_blocks() {
        let (store, indexer) = indexer_with_store();
        let intro = Block::new(
            vec![InBlockTransaction::new_set("set-a", vec![b"t0".to_vec()], 0)],
            Vec::new(),
        );
        let extension = Block::new(
            vec![
                InBlockTransaction::new_query("q-1", "set-a"),
                InBlockTransaction::new_extension("set-a", vec![b"t1".to_vec()]),
            ],
            Vec::new(),
        );

        let mut batch = LedgerBatch::new();
        indexer.index_block(&intro, 3, &mut batch).unwrap();
        store.write_batch(batch).unwrap();

        let mut batch = LedgerBatch::new();
        indexer.index_block(&extension, 5, &mut batch).unwrap();
        store.write_batch(batch).unwrap();

        let map = indexer
            .fetch_transaction_index_map(&"set-a".into())
            .unwrap()
            .unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map[&3], 0);
        assert_eq!(map[&5], 1);
    }

    #[test]
    fn test_unknown_txid() {
        let (_store, indexer) = indexer_with_store();
        assert!(indexer
            .fetch_transaction_index_map(&"missing".into())
            .unwrap()
            .is_none());
    }
}
