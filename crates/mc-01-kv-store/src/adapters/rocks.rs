//! # RocksDB Storage Adapter
//!
//! Production implementation of the [`KvStore`] port.
//!
//! ## Features
//!
//! - Atomic multi-family batch writes (WriteBatch)
//! - One column family per ledger concern (nine families total)
//! - Snappy compression and bloom filters
//! - fsync on write for durability (disabled in the testing profile)
//!
//! Native engine resources (snapshots, iterators, write options) are only
//! ever held inside method scopes; nothing borrowed from the engine escapes
//! this module.

use crate::batch::{BatchOp, LedgerBatch};
use crate::column_family::ColumnFamily;
use crate::errors::KvError;
use crate::ports::{KvStore, OwnedSnapshot};
use parking_lot::RwLock;
use rocksdb::{ColumnFamilyDescriptor, IteratorMode, Options, WriteOptions, DB};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// RocksDB tuning knobs.
#[derive(Debug, Clone)]
pub struct RocksDbConfig {
    /// Path to the database directory.
    pub path: String,
    /// Block cache size in bytes (default: 256MB).
    pub block_cache_size: usize,
    /// Write buffer size in bytes (default: 64MB).
    pub write_buffer_size: usize,
    /// Maximum number of write buffers (default: 3).
    pub max_write_buffer_number: i32,
    /// Enable fsync after each write (default: true for durability).
    pub sync_writes: bool,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            path: "./data/ledger-db".to_string(),
            block_cache_size: 256 * 1024 * 1024,
            write_buffer_size: 64 * 1024 * 1024,
            max_write_buffer_number: 3,
            sync_writes: true,
        }
    }
}

impl RocksDbConfig {
    /// Config for tests: small buffers, no sync.
    pub fn for_testing(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            write_buffer_size: 4 * 1024 * 1024,
            max_write_buffer_number: 2,
            sync_writes: false,
        }
    }
}

/// RocksDB-backed ledger store.
pub struct RocksDbStore {
    db: RwLock<DB>,
    config: RocksDbConfig,
}

impl RocksDbStore {
    /// Open or create the database with all nine ledger column families.
    pub fn open(config: RocksDbConfig) -> Result<Self, KvError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.set_max_write_buffer_number(config.max_write_buffer_number);
        opts.set_compression_type(rocksdb::DBCompressionType::Snappy);

        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        block_opts.set_block_cache(&rocksdb::Cache::new_lru_cache(config.block_cache_size));
        opts.set_block_based_table_factory(&block_opts);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ColumnFamily::ALL
            .iter()
            .map(|cf| ColumnFamilyDescriptor::new(cf.name(), Self::cf_options()))
            .collect();

        let db = DB::open_cf_descriptors(&opts, &config.path, cf_descriptors)
            .map_err(|e| KvError::io(format!("failed to open RocksDB: {}", e)))?;

        tracing::info!("[mc-01] opened ledger database at {}", config.path);

        Ok(Self {
            db: RwLock::new(db),
            config,
        })
    }

    /// Open with a path and default tuning.
    pub fn open_at(path: impl AsRef<Path>) -> Result<Self, KvError> {
        Self::open(RocksDbConfig {
            path: path.as_ref().to_string_lossy().to_string(),
            ..Default::default()
        })
    }

    fn cf_options() -> Options {
        let mut cf_opts = Options::default();
        cf_opts.set_compression_type(rocksdb::DBCompressionType::Snappy);
        cf_opts
    }

    fn write_options(&self) -> WriteOptions {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        write_opts
    }
}

impl KvStore for RocksDbStore {
    fn get(&self, cf: ColumnFamily, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        let db = self.db.read();
        let handle = db
            .cf_handle(cf.name())
            .ok_or(KvError::MissingColumnFamily(cf.name()))?;
        db.get_cf(handle, key)
            .map_err(|e| KvError::io(format!("RocksDB get failed: {}", e)))
    }

    fn put(&self, cf: ColumnFamily, key: &[u8], value: &[u8]) -> Result<(), KvError> {
        let db = self.db.read();
        let handle = db
            .cf_handle(cf.name())
            .ok_or(KvError::MissingColumnFamily(cf.name()))?;
        db.put_cf_opt(handle, key, value, &self.write_options())
            .map_err(|e| KvError::io(format!("RocksDB put failed: {}", e)))
    }

    fn delete(&self, cf: ColumnFamily, key: &[u8]) -> Result<(), KvError> {
        let db = self.db.read();
        let handle = db
            .cf_handle(cf.name())
            .ok_or(KvError::MissingColumnFamily(cf.name()))?;
        db.delete_cf_opt(handle, key, &self.write_options())
            .map_err(|e| KvError::io(format!("RocksDB delete failed: {}", e)))
    }

    fn write_batch(&self, batch: LedgerBatch) -> Result<(), KvError> {
        let db = self.db.read();
        let mut wb = rocksdb::WriteBatch::default();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { cf, key, value } => {
                    let handle = db
                        .cf_handle(cf.name())
                        .ok_or(KvError::MissingColumnFamily(cf.name()))?;
                    wb.put_cf(handle, key, value);
                }
                BatchOp::Delete { cf, key } => {
                    let handle = db
                        .cf_handle(cf.name())
                        .ok_or(KvError::MissingColumnFamily(cf.name()))?;
                    wb.delete_cf(handle, key);
                }
            }
        }
        db.write_opt(wb, &self.write_options())
            .map_err(|e| KvError::io(format!("RocksDB batch write failed: {}", e)))
    }

    fn iter_cf(&self, cf: ColumnFamily) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError> {
        let db = self.db.read();
        let handle = db
            .cf_handle(cf.name())
            .ok_or(KvError::MissingColumnFamily(cf.name()))?;
        let mut entries = Vec::new();
        for item in db.iterator_cf(handle, IteratorMode::Start) {
            let (key, value) =
                item.map_err(|e| KvError::io(format!("RocksDB scan failed: {}", e)))?;
            entries.push((key.to_vec(), value.to_vec()));
        }
        Ok(entries)
    }

    fn snapshot(&self, cfs: &[ColumnFamily]) -> Result<OwnedSnapshot, KvError> {
        let db = self.db.read();
        // One engine snapshot keeps all requested families consistent with
        // each other; it is released when this scope ends.
        let snap = db.snapshot();
        let mut families = HashMap::new();
        for cf in cfs {
            let handle = db
                .cf_handle(cf.name())
                .ok_or(KvError::MissingColumnFamily(cf.name()))?;
            let mut entries = BTreeMap::new();
            for item in snap.iterator_cf(handle, IteratorMode::Start) {
                let (key, value) =
                    item.map_err(|e| KvError::io(format!("RocksDB snapshot scan failed: {}", e)))?;
                entries.insert(key.to_vec(), value.to_vec());
            }
            families.insert(*cf, entries);
        }
        Ok(OwnedSnapshot::from_families(families))
    }

    fn drop_and_recreate(&self, cf: ColumnFamily) -> Result<(), KvError> {
        let mut db = self.db.write();
        db.drop_cf(cf.name())
            .map_err(|e| KvError::io(format!("failed to drop {}: {}", cf.name(), e)))?;
        db.create_cf(cf.name(), &Self::cf_options())
            .map_err(|e| KvError::io(format!("failed to recreate {}: {}", cf.name(), e)))?;
        tracing::debug!("[mc-01] dropped and recreated column family {}", cf.name());
        Ok(())
    }
}
