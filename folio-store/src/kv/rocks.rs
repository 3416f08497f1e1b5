//! RocksDB-backed engine.
//!
//! Column families:
//! - `records`  — every namespace, keyed `len(ns):u16 BE | ns | key`
//! - `counters` — monotonic id counters, same key layout, u64 BE values
//!
//! Namespaces are contiguous key ranges inside `records`, so a namespace scan
//! is a bounded iterator and adding a namespace costs nothing.
//!
//! Writers to one key are serialized through a striped lock table; that is
//! what makes [`KvStore::compare_and_swap`] and [`KvStore::counter`] atomic
//! under concurrent callers. Counter writes are always fsynced.
//!
//! Reference: Kleppmann — DDIA, Chapter 3 (LSM Trees, SSTables)

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::ops::Bound;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    Direction, IteratorMode, Options, SingleThreaded, WriteOptions,
};

use super::{physical_key, poisoned, KvStore, Order, Scan, ScanPlan};
use crate::codec::{u64_from_bytes, u64_to_bytes};
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::keys::Namespace;

/// Column family names.
const CF_RECORDS: &str = "records";
const CF_COUNTERS: &str = "counters";

/// All column family names for initialization.
const COLUMN_FAMILIES: &[&str] = &[CF_RECORDS, CF_COUNTERS];

/// Number of per-key write lock stripes.
const LOCK_STRIPES: usize = 64;

/// RocksDB-backed key-value store.
pub struct RocksStore {
    /// RocksDB instance (single-threaded mode — column families are fixed)
    db: DBWithThreadMode<SingleThreaded>,
    /// Store configuration
    config: StoreConfig,
    /// Striped per-key write locks
    stripes: Vec<Mutex<()>>,
}

impl RocksStore {
    /// Open the store at the configured path.
    ///
    /// Creates the database and column families if they don't exist.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);
        db_opts.increase_parallelism(num_cpus());

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        log::info!("Opened store at {}", config.path.display());

        Ok(Self {
            db,
            config,
            stripes: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        })
    }

    /// Build column-family-specific options.
    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        block_opts.set_block_size(16 * 1024); // 16KB blocks
        opts.set_block_based_table_factory(&block_opts);

        opts.set_compression_type(DBCompressionType::Lz4);
        opts.set_write_buffer_size(config.write_buffer_size);

        match name {
            CF_RECORDS => {
                // Point lookups and short range scans in equal measure
                opts.set_max_write_buffer_number(4);
            }
            CF_COUNTERS => {
                // Tiny values, hot keys
                opts.set_max_write_buffer_number(2);
                opts.optimize_for_point_lookup(8 * 1024 * 1024);
                opts.set_compression_type(DBCompressionType::None);
            }
            _ => {}
        }

        opts
    }

    /// Get the database path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    // ─── Helpers ──────────────────────────────────────────────────────

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::StorageIo(format!("column family '{name}' not found")))
    }

    fn write_opts(&self, sync: bool) -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(sync || self.config.sync_writes);
        opts
    }

    /// Lock the stripe owning `physical`.
    fn lock(&self, physical: &[u8]) -> Result<MutexGuard<'_, ()>> {
        let mut hasher = DefaultHasher::new();
        physical.hash(&mut hasher);
        let stripe = (hasher.finish() as usize) % self.stripes.len();
        self.stripes[stripe].lock().map_err(poisoned)
    }
}

impl KvStore for RocksStore {
    fn get(&self, ns: &Namespace, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf = self.cf(CF_RECORDS)?;
        Ok(self.db.get_cf(cf, physical_key(ns, key))?)
    }

    fn set(&self, ns: &Namespace, key: &[u8], value: &[u8]) -> Result<()> {
        let cf = self.cf(CF_RECORDS)?;
        let physical = physical_key(ns, key);
        let _guard = self.lock(&physical)?;
        self.db.put_cf_opt(cf, &physical, value, &self.write_opts(false))?;
        Ok(())
    }

    fn delete(&self, ns: &Namespace, key: &[u8]) -> Result<bool> {
        let cf = self.cf(CF_RECORDS)?;
        let physical = physical_key(ns, key);
        let _guard = self.lock(&physical)?;
        let existed = self.db.get_pinned_cf(cf, &physical)?.is_some();
        if existed {
            self.db.delete_cf_opt(cf, &physical, &self.write_opts(false))?;
        }
        Ok(existed)
    }

    fn counter(&self, ns: &Namespace, name: &str) -> Result<u64> {
        let cf = self.cf(CF_COUNTERS)?;
        let physical = physical_key(ns, name.as_bytes());
        let _guard = self.lock(&physical)?;

        let current = match self.db.get_pinned_cf(cf, &physical)? {
            Some(bytes) => u64_from_bytes(&bytes)
                .ok_or_else(|| StoreError::Codec(format!("corrupt counter {ns}/{name}")))?,
            None => 0,
        };
        let next = current + 1;
        self.db.put_cf_opt(cf, &physical, u64_to_bytes(next), &self.write_opts(true))?;
        Ok(next)
    }

    fn compare_and_swap(
        &self,
        ns: &Namespace,
        key: &[u8],
        expected: Option<&[u8]>,
        new: Option<&[u8]>,
    ) -> Result<bool> {
        let cf = self.cf(CF_RECORDS)?;
        let physical = physical_key(ns, key);
        let _guard = self.lock(&physical)?;

        let current = self.db.get_pinned_cf(cf, &physical)?;
        if current.as_deref() != expected {
            return Ok(false);
        }
        match new {
            Some(value) => self.db.put_cf_opt(cf, &physical, value, &self.write_opts(false))?,
            None => self.db.delete_cf_opt(cf, &physical, &self.write_opts(false))?,
        }
        Ok(true)
    }

    fn scan(&self, ns: &Namespace, scan: &Scan) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let cf = self.cf(CF_RECORDS)?;
        let plan = ScanPlan::new(ns, scan);

        // Seek position, plus an exact key to skip for exclusive bounds
        let (mode, skip) = match (&plan.start, scan.order) {
            (Bound::Included(k), Order::Ascending) => {
                (IteratorMode::From(k.as_slice(), Direction::Forward), None)
            }
            (Bound::Excluded(k), Order::Ascending) => {
                (IteratorMode::From(k.as_slice(), Direction::Forward), Some(k.as_slice()))
            }
            (Bound::Included(k), Order::Descending) => {
                (IteratorMode::From(k.as_slice(), Direction::Reverse), None)
            }
            (Bound::Excluded(k), Order::Descending) => {
                (IteratorMode::From(k.as_slice(), Direction::Reverse), Some(k.as_slice()))
            }
            (Bound::Unbounded, Order::Ascending) => (IteratorMode::Start, None),
            (Bound::Unbounded, Order::Descending) => (IteratorMode::End, None),
        };

        let mut skipped = 0usize;
        let take = scan.take();
        let mut out = Vec::new();

        for item in self.db.iterator_cf(cf, mode) {
            let (key, value) = item?;
            if skip == Some(&key[..]) {
                continue;
            }
            if !key.starts_with(&plan.base) {
                break;
            }
            if skipped < scan.offset {
                skipped += 1;
                continue;
            }
            out.push((plan.strip(&key).to_vec(), value.to_vec()));
            if out.len() >= take {
                break;
            }
        }

        Ok(out)
    }

    fn count(&self, ns: &Namespace) -> Result<u64> {
        let cf = self.cf(CF_RECORDS)?;
        let plan = ScanPlan::new(ns, &Scan::ascending());
        let mut count = 0u64;
        for item in self.db.iterator_cf(cf, IteratorMode::From(&plan.base, Direction::Forward)) {
            let (key, _) = item?;
            if !key.starts_with(&plan.base) {
                break;
            }
            count += 1;
        }
        Ok(count)
    }

    /// Force a memtable flush of every column family.
    fn flush(&self) -> Result<()> {
        for name in COLUMN_FAMILIES {
            self.db.flush_cf(self.cf(name)?)?;
        }
        Ok(())
    }
}

/// Get number of CPU cores for RocksDB parallelism.
fn num_cpus() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open(dir: &Path) -> RocksStore {
        RocksStore::open(StoreConfig::for_testing(dir.join("db"))).unwrap()
    }

    #[test]
    fn test_store_open_close() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());
        assert!(store.path().exists());
    }

    #[test]
    fn test_get_set_delete() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());
        let ns = Namespace::users("en");

        assert_eq!(store.get(&ns, b"alice").unwrap(), None);
        store.set(&ns, b"alice", b"record").unwrap();
        assert_eq!(store.get(&ns, b"alice").unwrap(), Some(b"record".to_vec()));
        assert!(store.delete(&ns, b"alice").unwrap());
        assert!(!store.delete(&ns, b"alice").unwrap());
        assert!(!store.has(&ns, b"alice").unwrap());
    }

    #[test]
    fn test_scan_exclusive_bounds() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());
        let ns = Namespace::feed("en");
        for id in 1u32..=20 {
            store.set(&ns, &id.to_be_bytes(), b"alice").unwrap();
        }
        store.set(&Namespace::feed("en-gb"), &1u32.to_be_bytes(), b"x").unwrap();

        let ids = |keys: Vec<Vec<u8>>| -> Vec<u32> {
            keys.iter().map(|k| u32::from_be_bytes(k[..4].try_into().unwrap())).collect()
        };

        let desc = store.keys(&ns, &Scan::descending().limit(3)).unwrap();
        assert_eq!(ids(desc), vec![20, 19, 18]);

        let from = 10u32.to_be_bytes().to_vec();
        let desc = store.keys(&ns, &Scan::descending().after(from.clone()).limit(3)).unwrap();
        assert_eq!(ids(desc), vec![9, 8, 7]);

        let asc = store.keys(&ns, &Scan::ascending().after(from).offset(2).limit(2)).unwrap();
        assert_eq!(ids(asc), vec![13, 14]);

        assert_eq!(store.count(&ns).unwrap(), 20);
    }

    #[test]
    fn test_scan_prefix_descending() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());
        let ns = Namespace::reverse("en", "fol");
        for key in ["bob:alice", "bob:carol", "bobby:dan", "carl:bob"] {
            store.set(&ns, key.as_bytes(), &[]).unwrap();
        }

        let keys = store.keys(&ns, &Scan::descending().prefix(b"bob:".to_vec())).unwrap();
        assert_eq!(keys, vec![b"bob:carol".to_vec(), b"bob:alice".to_vec()]);
    }

    #[test]
    fn test_counter_recovery() {
        let dir = tempdir().unwrap();
        let ns = Namespace::counters("en");
        {
            let store = open(dir.path());
            assert_eq!(store.counter(&ns, "aid").unwrap(), 1);
            assert_eq!(store.counter(&ns, "aid").unwrap(), 2);
            assert_eq!(store.counter(&ns, "aid").unwrap(), 3);
        }

        // Reopen — the counter continues, never reuses
        let store = open(dir.path());
        assert_eq!(store.counter(&ns, "aid").unwrap(), 4);
    }

    #[test]
    fn test_compare_and_swap_insert_if_absent() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());
        let ns = Namespace::users("en");

        assert!(store.compare_and_swap(&ns, b"alice", None, Some(b"v1")).unwrap());
        assert!(!store.compare_and_swap(&ns, b"alice", None, Some(b"v2")).unwrap());
        assert!(store.compare_and_swap(&ns, b"alice", Some(b"v1"), Some(b"v2")).unwrap());
        assert_eq!(store.get(&ns, b"alice").unwrap(), Some(b"v2".to_vec()));
    }
}
