//! The record layer entry point.
//!
//! ```text
//!                       ┌───────────────────────────┐
//!   request handlers ──►│ Store<K>                  │
//!                       │  users · articles · feeds │
//!                       │  mentions · stats         │
//!                       └──────┬──────────┬─────────┘
//!                              │          │
//!                    RelationIndex    page::select
//!                              │          │
//!                              ▼          ▼
//!                          trait KvStore (RocksStore | MemoryStore)
//! ```
//!
//! Operations are grouped into `impl` blocks in their own modules; this file
//! holds construction and the helpers they share. Record and index writes
//! are not atomic together: the primary record is written first, index
//! writes follow, and every index write is idempotent so a retried operation
//! completes a partially indexed record.
//!
//! Reference: Kleppmann — Designing Data-Intensive Applications, Chapter 3

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec;
use crate::config::{FolioConfig, Limits};
use crate::error::{Result, StoreError};
use crate::keys::Namespace;
use crate::kv::{KvStore, RocksStore};
use crate::relation::{RelationIndex, RelationKind, RepairReport};

/// Per-family outcome of [`Store::repair_relations`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelationRepair {
    pub follows: RepairReport,
    pub favorites: RepairReport,
}

/// Typed records and indexes on top of a [`KvStore`].
pub struct Store<K: KvStore = RocksStore> {
    kv: K,
    limits: Limits,
}

impl Store<RocksStore> {
    /// Open (or create) the on-disk store described by `config`.
    pub fn open(config: &FolioConfig) -> Result<Self> {
        let kv = RocksStore::open(config.store.clone())?;
        Ok(Self::new(kv, config.limits.clone()))
    }
}

impl<K: KvStore> Store<K> {
    pub fn new(kv: K, limits: Limits) -> Self {
        Self { kv, limits }
    }

    pub fn kv(&self) -> &K {
        &self.kv
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn flush(&self) -> Result<()> {
        self.kv.flush()
    }

    /// Reconcile one-sided follow and favorite entries of `lang`.
    pub fn repair_relations(&self, lang: &str) -> Result<RelationRepair> {
        let report = RelationRepair {
            follows: self.follow_index(lang).repair()?,
            favorites: self.favorite_index(lang).repair()?,
        };
        log::info!("Relation repair for {lang}: {report:?}");
        Ok(report)
    }

    // ─── Shared helpers ──────────────────────────────────────────────

    pub(crate) fn follow_index(&self, lang: &str) -> RelationIndex<'_, K> {
        RelationIndex::new(&self.kv, lang, RelationKind::Follow)
    }

    pub(crate) fn favorite_index(&self, lang: &str) -> RelationIndex<'_, K> {
        RelationIndex::new(&self.kv, lang, RelationKind::Favorite)
    }

    /// Allocate the next id of `counter` in `lang`.
    pub(crate) fn next_id(&self, lang: &str, counter: &str) -> Result<u32> {
        let value = self.kv.counter(&Namespace::counters(lang), counter)?;
        u32::try_from(value)
            .map_err(|_| StoreError::LimitExceeded(format!("{counter} id space exhausted")))
    }

    pub(crate) fn load<T: DeserializeOwned>(&self, ns: &Namespace, key: &[u8]) -> Result<Option<T>> {
        self.kv.get(ns, key)?.map(|bytes| codec::decode(&bytes)).transpose()
    }

    pub(crate) fn save<T: Serialize>(&self, ns: &Namespace, key: &[u8], value: &T) -> Result<()> {
        self.kv.set(ns, key, &codec::encode(value)?)
    }

    /// Store `value` only if `key` is free.
    pub(crate) fn insert<T: Serialize>(&self, ns: &Namespace, key: &[u8], value: &T) -> Result<bool> {
        self.kv.compare_and_swap(ns, key, None, Some(&codec::encode(value)?))
    }

    /// Versioned read-modify-write of one record.
    ///
    /// `modify` sees the current value and returns `Ok(Some(new))` to write,
    /// `Ok(None)` to leave the record untouched. Retries on concurrent writes
    /// up to the configured budget, then fails with a retryable conflict.
    pub(crate) fn update_with<T, F>(
        &self,
        ns: &Namespace,
        key: &[u8],
        what: &str,
        mut modify: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut(T) -> Result<Option<T>>,
    {
        for _ in 0..self.limits.cas_retries.max(1) {
            let Some(current) = self.kv.get(ns, key)? else {
                return Err(StoreError::not_found(what));
            };
            let value: T = codec::decode(&current)?;
            let Some(next) = modify(value)? else {
                return codec::decode(&current);
            };
            let encoded = codec::encode(&next)?;
            if self.kv.compare_and_swap(ns, key, Some(&current), Some(&encoded))? {
                return Ok(next);
            }
            log::debug!("Concurrent write on {ns}, retrying");
        }
        Err(StoreError::conflict(format!(
            "{} on {what}",
            crate::error::CONCURRENT_UPDATE
        )))
    }
}
