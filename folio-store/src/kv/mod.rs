//! Minimal ordered key-value contract every higher layer is written against.
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ RelationIndex│   │ page::select │   │users/articles│
//! └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!        └──────────────────┼──────────────────┘
//!                           ▼
//!                  ┌─────────────────┐
//!                  │  trait KvStore  │
//!                  └────────┬────────┘
//!                ┌──────────┴──────────┐
//!                ▼                     ▼
//!         ┌────────────┐        ┌─────────────┐
//!         │ RocksStore │        │ MemoryStore │
//!         └────────────┘        └─────────────┘
//! ```
//!
//! Keys inside a namespace are ordered lexicographically. Writers to the same
//! key are serialized (last write wins); nothing spans keys.

pub mod memory;
pub mod rocks;
#[cfg(test)]
pub(crate) mod flaky;

use std::ops::Bound;
use std::sync::PoisonError;

use crate::error::{Result, StoreError};
use crate::keys::Namespace;

pub use memory::MemoryStore;
pub use rocks::RocksStore;

/// Scan direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    Ascending,
    Descending,
}

impl Order {
    pub fn reverse(self) -> Self {
        match self {
            Order::Ascending => Order::Descending,
            Order::Descending => Order::Ascending,
        }
    }
}

/// A bounded range scan over one namespace.
///
/// - `from`: exclusive resume point; `None` starts at the beginning
///   (ascending) or end (descending) of the selected range.
/// - `prefix`: restrict the scan to keys starting with these bytes.
/// - `offset`: matches skipped after the bound before collecting.
/// - `limit`: maximum results, `0` for all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scan {
    pub from: Option<Vec<u8>>,
    pub prefix: Option<Vec<u8>>,
    pub limit: usize,
    pub offset: usize,
    pub order: Order,
}

impl Scan {
    pub fn ascending() -> Self {
        Self::default()
    }

    pub fn descending() -> Self {
        Self { order: Order::Descending, ..Self::default() }
    }

    pub fn order(mut self, order: Order) -> Self {
        self.order = order;
        self
    }

    pub fn after(mut self, from: impl Into<Vec<u8>>) -> Self {
        self.from = Some(from.into());
        self
    }

    pub fn after_opt(mut self, from: Option<Vec<u8>>) -> Self {
        self.from = from;
        self
    }

    pub fn prefix(mut self, prefix: impl Into<Vec<u8>>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub(crate) fn take(&self) -> usize {
        if self.limit == 0 { usize::MAX } else { self.limit }
    }
}

/// Ordered key-value store partitioned into namespaces.
pub trait KvStore: Send + Sync {
    /// Point lookup.
    fn get(&self, ns: &Namespace, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Insert or overwrite.
    fn set(&self, ns: &Namespace, key: &[u8], value: &[u8]) -> Result<()>;

    /// Remove a key, reporting whether it existed.
    fn delete(&self, ns: &Namespace, key: &[u8]) -> Result<bool>;

    fn has(&self, ns: &Namespace, key: &[u8]) -> Result<bool> {
        Ok(self.get(ns, key)?.is_some())
    }

    /// Atomically increment a named durable counter and return the new value.
    /// The first call returns 1.
    fn counter(&self, ns: &Namespace, name: &str) -> Result<u64>;

    /// Replace the value only if the current one equals `expected`
    /// (`None` = absent). `new = None` deletes. Returns whether it swapped.
    fn compare_and_swap(
        &self,
        ns: &Namespace,
        key: &[u8],
        expected: Option<&[u8]>,
        new: Option<&[u8]>,
    ) -> Result<bool>;

    /// Range scan returning keys with their values.
    fn scan(&self, ns: &Namespace, scan: &Scan) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Range scan returning keys only.
    fn keys(&self, ns: &Namespace, scan: &Scan) -> Result<Vec<Vec<u8>>> {
        Ok(self.scan(ns, scan)?.into_iter().map(|(k, _)| k).collect())
    }

    /// Number of keys in a namespace.
    fn count(&self, ns: &Namespace) -> Result<u64>;

    /// Make every acknowledged write durable.
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

// ─── Physical key layout shared by the engines ───────────────────────

/// `len(ns):u16 BE | ns` — the physical prefix of a namespace.
pub(crate) fn ns_prefix(ns: &Namespace) -> Vec<u8> {
    let name = ns.as_bytes();
    let mut out = Vec::with_capacity(name.len() + 2);
    out.extend_from_slice(&(name.len() as u16).to_be_bytes());
    out.extend_from_slice(name);
    out
}

/// Physical key of `key` inside `ns`.
pub(crate) fn physical_key(ns: &Namespace, key: &[u8]) -> Vec<u8> {
    let mut out = ns_prefix(ns);
    out.extend_from_slice(key);
    out
}

/// Smallest byte string greater than every string starting with `prefix`.
pub(crate) fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut out = prefix.to_vec();
    while let Some(last) = out.pop() {
        if last < u8::MAX {
            out.push(last + 1);
            return Some(out);
        }
    }
    None
}

/// Physical bounds of a scan, shared by both engines.
pub(crate) struct ScanPlan {
    /// Every matching physical key starts with this.
    pub base: Vec<u8>,
    /// Length of the namespace part to strip from results.
    pub ns_len: usize,
    /// Where iteration starts: lower bound (ascending) or upper bound (descending).
    pub start: Bound<Vec<u8>>,
}

impl ScanPlan {
    pub fn new(ns: &Namespace, scan: &Scan) -> Self {
        let ns_bytes = ns_prefix(ns);
        let ns_len = ns_bytes.len();
        let mut base = ns_bytes.clone();
        if let Some(prefix) = &scan.prefix {
            base.extend_from_slice(prefix);
        }
        let from = scan.from.as_ref().map(|f| {
            let mut key = ns_bytes.clone();
            key.extend_from_slice(f);
            key
        });

        let start = match scan.order {
            Order::Ascending => match from {
                Some(from) if from >= base => Bound::Excluded(from),
                _ => Bound::Included(base.clone()),
            },
            Order::Descending => {
                let ceiling = prefix_successor(&base);
                match (from, ceiling) {
                    (Some(from), Some(ceiling)) if from < ceiling => Bound::Excluded(from),
                    (Some(from), None) => Bound::Excluded(from),
                    (_, Some(ceiling)) => Bound::Excluded(ceiling),
                    (None, None) => Bound::Unbounded,
                }
            }
        };

        Self { base, ns_len, start }
    }

    pub fn strip<'a>(&self, physical: &'a [u8]) -> &'a [u8] {
        &physical[self.ns_len..]
    }
}

pub(crate) fn poisoned<T>(_: PoisonError<T>) -> StoreError {
    StoreError::StorageIo("lock poisoned".into())
}
