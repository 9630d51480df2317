//! Transactional multi-table key-value store (C3).
//!
//! Built over RocksDB's [`TransactionDB`], one column family per table
//! (§3.4). A write transaction ([`WriteTxn`]) is acquired with scoped
//! acquisition and must be explicitly committed or aborted; dropping one
//! without committing aborts it (RocksDB rolls back uncommitted
//! transactions on drop). Reads open a snapshot-isolated [`ReadTxn`] that
//! sees a consistent point-in-time view even while a writer is active.
//!
//! Table layout follows a column-family-per-table convention, one CF per
//! table this ledger needs.

pub mod tables;

use std::path::Path;
use std::sync::Arc;

use rocksdb::{
    ColumnFamilyDescriptor, IteratorMode, Options, TransactionDB, TransactionDBOptions,
    TransactionOptions, WriteOptions,
};

pub use tables::*;

/// All column family (table) names, in the order §3.4 lists them.
pub const TABLE_NAMES: &[&str] = &[
    "frontiers",
    "accounts",
    "state_blocks",
    "comment_blocks",
    "pending",
    "blocks_info",
    "representation",
    "unchecked",
    "checksum",
    "vote",
    "meta",
];

/// Current on-disk schema version. Bump this and add an upgrade step in
/// [`Store::open`] whenever a table's encoding changes incompatibly.
pub const SCHEMA_VERSION: u32 = 1;

const META_KEY_VERSION: &[u8] = b"version";
const META_KEY_NODE_ID: &[u8] = b"node_id";

#[derive(Debug)]
pub enum StoreError {
    RocksDb(rocksdb::Error),
    MissingColumnFamily(&'static str),
    Encoding(String),
    /// The on-disk schema version is newer than this build understands.
    UnsupportedVersion { found: u32, supported: u32 },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::RocksDb(e) => write!(f, "store I/O error: {e}"),
            StoreError::MissingColumnFamily(name) => write!(f, "missing column family: {name}"),
            StoreError::Encoding(msg) => write!(f, "encoding error: {msg}"),
            StoreError::UnsupportedVersion { found, supported } => write!(
                f,
                "store schema version {found} is newer than the {supported} this build supports"
            ),
        }
    }
}
impl std::error::Error for StoreError {}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::RocksDb(e)
    }
}

#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub path: String,
    pub create_if_missing: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "data/mikron-db".to_string(),
            create_if_missing: true,
        }
    }
}

/// The ledger's embedded database: one file per data directory, tables as
/// named column families (§6.5).
pub struct Store {
    db: TransactionDB,
}

impl Store {
    /// Opens (or creates) the store at `cfg.path`, then runs schema
    /// upgrade hooks in a single transaction and bumps `meta["version"]`.
    /// Opening a store whose on-disk version is newer than
    /// [`SCHEMA_VERSION`] fails outright (§4.2 "schema versioning").
    pub fn open(cfg: &StoreConfig) -> Result<Self, StoreError> {
        let path = Path::new(&cfg.path);

        let mut opts = Options::default();
        opts.create_if_missing(cfg.create_if_missing);
        opts.create_missing_column_families(cfg.create_if_missing);

        let cfs: Vec<ColumnFamilyDescriptor> = TABLE_NAMES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let txn_db_opts = TransactionDBOptions::default();
        let db = TransactionDB::open_cf_descriptors(&opts, &txn_db_opts, path, cfs)?;

        let store = Store { db };
        store.run_schema_upgrades()?;
        Ok(store)
    }

    fn run_schema_upgrades(&self) -> Result<(), StoreError> {
        let txn = self.begin_write();
        let on_disk = txn.meta_get(META_KEY_VERSION)?.map(|bytes| {
            let mut arr = [0u8; 4];
            arr.copy_from_slice(&bytes[..4.min(bytes.len())]);
            u32::from_be_bytes(arr)
        });

        match on_disk {
            None => {
                // Fresh database: stamp the current version, nothing to
                // migrate.
                txn.meta_put(META_KEY_VERSION, &SCHEMA_VERSION.to_be_bytes())?;
            }
            Some(found) if found > SCHEMA_VERSION => {
                txn.abort();
                return Err(StoreError::UnsupportedVersion {
                    found,
                    supported: SCHEMA_VERSION,
                });
            }
            Some(found) if found < SCHEMA_VERSION => {
                // No migrations defined yet between any shipped versions;
                // a future bump adds steps here before re-stamping.
                txn.meta_put(META_KEY_VERSION, &SCHEMA_VERSION.to_be_bytes())?;
            }
            Some(_) => {}
        }
        txn.commit()
    }

    pub fn node_id(&self) -> Result<Option<Vec<u8>>, StoreError> {
        self.begin_write().meta_get(META_KEY_NODE_ID)
    }

    pub fn set_node_id(&self, id: &[u8]) -> Result<(), StoreError> {
        let txn = self.begin_write();
        txn.meta_put(META_KEY_NODE_ID, id)?;
        txn.commit()
    }

    /// Acquires a single-writer write transaction. Only one may be
    /// outstanding at a time per RocksDB's pessimistic transaction
    /// semantics; concurrent writers block until released.
    pub fn begin_write(&self) -> WriteTxn<'_> {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(false);
        let txn_opts = TransactionOptions::default();
        let txn = self.db.transaction_opt(&write_opts, &txn_opts);
        WriteTxn { db: &self.db, txn: Some(txn) }
    }

    /// Opens an MVCC read snapshot: readers never block writers and never
    /// observe a torn write.
    pub fn begin_read(&self) -> ReadTxn<'_> {
        ReadTxn {
            db: &self.db,
            snapshot: self.db.snapshot(),
        }
    }

    fn cf<'a>(db: &'a TransactionDB, name: &'static str) -> Result<Arc<rocksdb::BoundColumnFamily<'a>>, StoreError> {
        db.cf_handle(name).ok_or(StoreError::MissingColumnFamily(name))
    }
}

/// A single-writer write transaction over every table. Dropping this
/// without calling [`WriteTxn::commit`] aborts all writes made through it.
pub struct WriteTxn<'a> {
    db: &'a TransactionDB,
    txn: Option<rocksdb::Transaction<'a, TransactionDB>>,
}

impl<'a> WriteTxn<'a> {
    fn inner(&self) -> &rocksdb::Transaction<'a, TransactionDB> {
        self.txn.as_ref().expect("transaction used after commit/abort")
    }

    fn cf(&self, name: &'static str) -> Result<Arc<rocksdb::BoundColumnFamily<'a>>, StoreError> {
        Store::cf(self.db, name)
    }

    pub fn get_cf(&self, table: &'static str, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let cf = self.cf(table)?;
        Ok(self.inner().get_cf(&cf, key)?)
    }

    pub fn put_cf(&self, table: &'static str, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let cf = self.cf(table)?;
        self.inner().put_cf(&cf, key, value)?;
        Ok(())
    }

    pub fn delete_cf(&self, table: &'static str, key: &[u8]) -> Result<(), StoreError> {
        let cf = self.cf(table)?;
        self.inner().delete_cf(&cf, key)?;
        Ok(())
    }

    /// Iterates a table from the start, in key order.
    pub fn iter_cf(&self, table: &'static str) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>, StoreError> {
        let cf = self.cf(table)?;
        let iter = self.inner().iterator_cf(&cf, IteratorMode::Start);
        let mut out = Vec::new();
        for item in iter {
            let (k, v) = item?;
            out.push((k, v));
        }
        Ok(out)
    }

    /// Iterates a table starting from (and including, if present) `key`.
    pub fn iter_cf_from(
        &self,
        table: &'static str,
        key: &[u8],
    ) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>, StoreError> {
        let cf = self.cf(table)?;
        let iter = self
            .inner()
            .iterator_cf(&cf, IteratorMode::From(key, rocksdb::Direction::Forward));
        let mut out = Vec::new();
        for item in iter {
            let (k, v) = item?;
            out.push((k, v));
        }
        Ok(out)
    }

    fn meta_get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.get_cf("meta", key)
    }

    fn meta_put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.put_cf("meta", key, value)
    }

    /// Commits every write made through this transaction. Any failure
    /// aborts it and bubbles the error up (§4.2, §7 "store I/O errors").
    pub fn commit(mut self) -> Result<(), StoreError> {
        let txn = self.txn.take().expect("single commit/abort");
        txn.commit()?;
        Ok(())
    }

    /// Explicitly discards every write made through this transaction.
    pub fn abort(mut self) {
        if let Some(txn) = self.txn.take() {
            let _ = txn.rollback();
        }
    }
}

impl<'a> Drop for WriteTxn<'a> {
    fn drop(&mut self) {
        if let Some(txn) = self.txn.take() {
            let _ = txn.rollback();
        }
    }
}

/// A snapshot-isolated read transaction. Holding one open does not block
/// concurrent writers.
pub struct ReadTxn<'a> {
    db: &'a TransactionDB,
    snapshot: rocksdb::SnapshotWithThreadMode<'a, TransactionDB>,
}

impl<'a> ReadTxn<'a> {
    fn cf(&self, name: &'static str) -> Result<Arc<rocksdb::BoundColumnFamily<'a>>, StoreError> {
        Store::cf(self.db, name)
    }

    pub fn get_cf(&self, table: &'static str, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let cf = self.cf(table)?;
        Ok(self.snapshot.get_cf(&cf, key)?)
    }

    pub fn iter_cf(&self, table: &'static str) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>, StoreError> {
        let cf = self.cf(table)?;
        let iter = self.snapshot.iterator_cf(&cf, IteratorMode::Start);
        let mut out = Vec::new();
        for item in iter {
            let (k, v) = item?;
            out.push((k, v));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_temp() -> (TempDir, Store) {
        let tmp = TempDir::new().expect("tempdir");
        let cfg = StoreConfig {
            path: tmp.path().to_string_lossy().to_string(),
            create_if_missing: true,
        };
        let store = Store::open(&cfg).expect("open store");
        (tmp, store)
    }

    #[test]
    fn fresh_store_stamps_schema_version() {
        let (_tmp, store) = open_temp();
        let txn = store.begin_write();
        let raw = txn.meta_get(META_KEY_VERSION).unwrap().expect("version stamped");
        let mut arr = [0u8; 4];
        arr.copy_from_slice(&raw);
        assert_eq!(u32::from_be_bytes(arr), SCHEMA_VERSION);
        txn.abort();
    }

    #[test]
    fn write_txn_commit_is_visible_to_new_read_txn() {
        let (_tmp, store) = open_temp();
        {
            let txn = store.begin_write();
            txn.put_cf("meta", b"k", b"v").unwrap();
            txn.commit().unwrap();
        }
        let read = store.begin_read();
        assert_eq!(read.get_cf("meta", b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn write_txn_drop_without_commit_aborts() {
        let (_tmp, store) = open_temp();
        {
            let txn = store.begin_write();
            txn.put_cf("meta", b"uncommitted", b"v").unwrap();
            // dropped here without commit()
        }
        let read = store.begin_read();
        assert_eq!(read.get_cf("meta", b"uncommitted").unwrap(), None);
    }

    #[test]
    fn read_snapshot_does_not_see_later_writes() {
        let (_tmp, store) = open_temp();
        let txn = store.begin_write();
        txn.put_cf("meta", b"a", b"1").unwrap();
        txn.commit().unwrap();

        let read = store.begin_read();
        let txn2 = store.begin_write();
        txn2.put_cf("meta", b"a", b"2").unwrap();
        txn2.commit().unwrap();

        // the snapshot taken before txn2 committed still sees the old value
        assert_eq!(read.get_cf("meta", b"a").unwrap(), Some(b"1".to_vec()));
    }
}
