//! In-memory storage adapter for unit and integration tests.

use crate::batch::{BatchOp, LedgerBatch};
use crate::column_family::ColumnFamily;
use crate::errors::KvError;
use crate::ports::{KvStore, OwnedSnapshot};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

/// Map-backed store with the same observable semantics as the RocksDB
/// adapter: per-family ordered keys, atomic batches, frozen snapshots.
#[derive(Default)]
pub struct InMemoryKvStore {
    families: RwLock<HashMap<ColumnFamily, BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for InMemoryKvStore {
    fn get(&self, cf: ColumnFamily, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        let families = self.families.read();
        Ok(families.get(&cf).and_then(|m| m.get(key).cloned()))
    }

    fn put(&self, cf: ColumnFamily, key: &[u8], value: &[u8]) -> Result<(), KvError> {
        let mut families = self.families.write();
        families
            .entry(cf)
            .or_default()
            .insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, cf: ColumnFamily, key: &[u8]) -> Result<(), KvError> {
        let mut families = self.families.write();
        if let Some(family) = families.get_mut(&cf) {
            family.remove(key);
        }
        Ok(())
    }

    fn write_batch(&self, batch: LedgerBatch) -> Result<(), KvError> {
        // The whole batch is applied under one write lock, so readers never
        // observe a partially applied batch.
        let mut families = self.families.write();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { cf, key, value } => {
                    families.entry(cf).or_default().insert(key, value);
                }
                BatchOp::Delete { cf, key } => {
                    if let Some(family) = families.get_mut(&cf) {
                        family.remove(&key);
                    }
                }
            }
        }
        Ok(())
    }

    fn iter_cf(&self, cf: ColumnFamily) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError> {
        let families = self.families.read();
        Ok(families
            .get(&cf)
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    fn snapshot(&self, cfs: &[ColumnFamily]) -> Result<OwnedSnapshot, KvError> {
        let families = self.families.read();
        let captured = cfs
            .iter()
            .map(|cf| (*cf, families.get(cf).cloned().unwrap_or_default()))
            .collect();
        Ok(OwnedSnapshot::from_families(captured))
    }

    fn drop_and_recreate(&self, cf: ColumnFamily) -> Result<(), KvError> {
        let mut families = self.families.write();
        families.insert(cf, BTreeMap::new());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_delete() {
        let store = InMemoryKvStore::new();
        store.put(ColumnFamily::State, b"k", b"v").unwrap();
        assert_eq!(
            store.get(ColumnFamily::State, b"k").unwrap(),
            Some(b"v".to_vec())
        );
        // Families are isolated.
        assert_eq!(store.get(ColumnFamily::TxSetState, b"k").unwrap(), None);

        store.delete(ColumnFamily::State, b"k").unwrap();
        assert_eq!(store.get(ColumnFamily::State, b"k").unwrap(), None);
    }

    #[test]
    fn test_batch_spans_families() {
        let store = InMemoryKvStore::new();
        let mut batch = LedgerBatch::new();
        batch.put_cf(ColumnFamily::Blockchain, b"0".to_vec(), b"block".to_vec());
        batch.put_cf(ColumnFamily::TxSetState, b"set-a".to_vec(), b"v".to_vec());
        batch.delete_cf(ColumnFamily::State, b"gone".to_vec());
        store.write_batch(batch).unwrap();

        assert!(store.get(ColumnFamily::Blockchain, b"0").unwrap().is_some());
        assert!(store.get(ColumnFamily::TxSetState, b"set-a").unwrap().is_some());
    }

    #[test]
    fn test_snapshot_is_frozen() {
        let store = InMemoryKvStore::new();
        store.put(ColumnFamily::TxSetState, b"a", b"1").unwrap();

        let snap = store.snapshot(&[ColumnFamily::TxSetState]).unwrap();
        store.put(ColumnFamily::TxSetState, b"a", b"2").unwrap();
        store.put(ColumnFamily::TxSetState, b"b", b"3").unwrap();

        assert_eq!(snap.get(ColumnFamily::TxSetState, b"a"), Some(&b"1"[..]));
        assert_eq!(snap.get(ColumnFamily::TxSetState, b"b"), None);
        assert_eq!(snap.len(ColumnFamily::TxSetState), 1);
    }

    #[test]
    fn test_iter_is_ordered() {
        let store = InMemoryKvStore::new();
        store.put(ColumnFamily::State, b"b", b"2").unwrap();
        store.put(ColumnFamily::State, b"a", b"1").unwrap();
        store.put(ColumnFamily::State, b"c", b"3").unwrap();

        let keys: Vec<_> = store
            .iter_cf(ColumnFamily::State)
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn test_drop_and_recreate_empties_family() {
        let store = InMemoryKvStore::new();
        store.put(ColumnFamily::State, b"k", b"v").unwrap();
        store.put(ColumnFamily::Blockchain, b"0", b"b").unwrap();

        store.drop_and_recreate(ColumnFamily::State).unwrap();

        assert_eq!(store.get(ColumnFamily::State, b"k").unwrap(), None);
        // Other families untouched.
        assert!(store.get(ColumnFamily::Blockchain, b"0").unwrap().is_some());
    }
}
