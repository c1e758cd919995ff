//! # Storage Port
//!
//! The interface every storage adapter implements, plus the owned
//! point-in-time snapshot handed out for state transfer.

use crate::batch::LedgerBatch;
use crate::column_family::ColumnFamily;
use crate::errors::KvError;
use std::collections::{BTreeMap, HashMap};

/// Abstract column-family key-value store.
///
/// Production: [`crate::RocksDbStore`]. Testing: [`crate::InMemoryKvStore`].
///
/// All methods take `&self`; adapters use interior mutability so the store
/// can be shared behind an `Arc` by the single ledger writer and concurrent
/// snapshot readers.
pub trait KvStore: Send + Sync {
    /// Get a value from a column family.
    fn get(&self, cf: ColumnFamily, key: &[u8]) -> Result<Option<Vec<u8>>, KvError>;

    /// Put a single key-value pair.
    fn put(&self, cf: ColumnFamily, key: &[u8], value: &[u8]) -> Result<(), KvError>;

    /// Delete a key.
    fn delete(&self, cf: ColumnFamily, key: &[u8]) -> Result<(), KvError>;

    /// Commit a multi-family batch atomically: every operation lands or
    /// none does.
    fn write_batch(&self, batch: LedgerBatch) -> Result<(), KvError>;

    /// All key-value pairs of a column family in ascending key order.
    fn iter_cf(&self, cf: ColumnFamily) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError>;

    /// Capture a point-in-time view of the given column families. The
    /// returned snapshot is consistent across all requested families and
    /// independent of later writes.
    fn snapshot(&self, cfs: &[ColumnFamily]) -> Result<OwnedSnapshot, KvError>;

    /// Drop a column family and recreate it empty. Used when wiping state
    /// before applying a transferred snapshot.
    fn drop_and_recreate(&self, cf: ColumnFamily) -> Result<(), KvError>;
}

/// A frozen view of selected column families.
///
/// The capture happens under a single storage-engine snapshot; all native
/// handles involved are released before this value is returned, so dropping
/// an `OwnedSnapshot` can never leak engine resources.
#[derive(Debug, Default)]
pub struct OwnedSnapshot {
    families: HashMap<ColumnFamily, BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl OwnedSnapshot {
    pub(crate) fn from_families(
        families: HashMap<ColumnFamily, BTreeMap<Vec<u8>, Vec<u8>>>,
    ) -> Self {
        Self { families }
    }

    /// Get a value as of snapshot time. `None` when the key was absent or
    /// the family was not captured.
    pub fn get(&self, cf: ColumnFamily, key: &[u8]) -> Option<&[u8]> {
        self.families.get(&cf)?.get(key).map(Vec::as_slice)
    }

    /// Iterate a captured family in ascending key order.
    pub fn iter(&self, cf: ColumnFamily) -> impl Iterator<Item = (&[u8], &[u8])> + '_ {
        self.families
            .get(&cf)
            .into_iter()
            .flat_map(|m| m.iter().map(|(k, v)| (k.as_slice(), v.as_slice())))
    }

    /// Number of entries captured for a family.
    pub fn len(&self, cf: ColumnFamily) -> usize {
        self.families.get(&cf).map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self, cf: ColumnFamily) -> bool {
        self.len(cf) == 0
    }
}
