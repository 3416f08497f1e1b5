//! In-memory engine: one ordered map behind a lock.
//!
//! Same physical layout and scan semantics as [`super::RocksStore`], no
//! durability. Used by unit tests and by embedders that want a throwaway store.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::{Mutex, RwLock};

use super::{physical_key, poisoned, KvStore, Order, Scan, ScanPlan};
use crate::error::Result;
use crate::keys::Namespace;

#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    counters: Mutex<HashMap<Vec<u8>, u64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, ns: &Namespace, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records.get(&physical_key(ns, key)).cloned())
    }

    fn set(&self, ns: &Namespace, key: &[u8], value: &[u8]) -> Result<()> {
        let mut records = self.records.write().map_err(poisoned)?;
        records.insert(physical_key(ns, key), value.to_vec());
        Ok(())
    }

    fn delete(&self, ns: &Namespace, key: &[u8]) -> Result<bool> {
        let mut records = self.records.write().map_err(poisoned)?;
        Ok(records.remove(&physical_key(ns, key)).is_some())
    }

    fn counter(&self, ns: &Namespace, name: &str) -> Result<u64> {
        let mut counters = self.counters.lock().map_err(poisoned)?;
        let value = counters.entry(physical_key(ns, name.as_bytes())).or_insert(0);
        *value += 1;
        Ok(*value)
    }

    fn compare_and_swap(
        &self,
        ns: &Namespace,
        key: &[u8],
        expected: Option<&[u8]>,
        new: Option<&[u8]>,
    ) -> Result<bool> {
        let mut records = self.records.write().map_err(poisoned)?;
        let physical = physical_key(ns, key);
        if records.get(&physical).map(Vec::as_slice) != expected {
            return Ok(false);
        }
        match new {
            Some(value) => {
                records.insert(physical, value.to_vec());
            }
            None => {
                records.remove(&physical);
            }
        }
        Ok(true)
    }

    fn scan(&self, ns: &Namespace, scan: &Scan) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let plan = ScanPlan::new(ns, scan);
        let records = self.records.read().map_err(poisoned)?;

        let range: Box<dyn Iterator<Item = (&Vec<u8>, &Vec<u8>)>> = match scan.order {
            Order::Ascending => {
                Box::new(records.range::<Vec<u8>, _>((plan.start.clone(), Bound::Unbounded)))
            }
            Order::Descending => Box::new(
                records
                    .range::<Vec<u8>, _>((Bound::Unbounded, plan.start.clone()))
                    .rev(),
            ),
        };

        Ok(range
            .take_while(|(k, _)| k.starts_with(&plan.base))
            .skip(scan.offset)
            .take(scan.take())
            .map(|(k, v)| (plan.strip(k).to_vec(), v.clone()))
            .collect())
    }

    fn count(&self, ns: &Namespace) -> Result<u64> {
        Ok(self.keys(ns, &Scan::ascending())?.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ns() -> Namespace {
        Namespace::feed("en")
    }

    fn filled() -> MemoryStore {
        let store = MemoryStore::new();
        for id in 1u32..=10 {
            store.set(&ns(), &id.to_be_bytes(), b"alice").unwrap();
        }
        // neighbour namespace must never leak into scans
        store.set(&Namespace::feed("en2"), &[0, 0, 0, 1], b"x").unwrap();
        store
    }

    fn ids(keys: Vec<Vec<u8>>) -> Vec<u32> {
        keys.iter().map(|k| u32::from_be_bytes(k[..4].try_into().unwrap())).collect()
    }

    #[test]
    fn test_get_set_delete() {
        let store = MemoryStore::new();
        assert_eq!(store.get(&ns(), b"k").unwrap(), None);
        store.set(&ns(), b"k", b"v").unwrap();
        assert!(store.has(&ns(), b"k").unwrap());
        assert!(store.delete(&ns(), b"k").unwrap());
        assert!(!store.delete(&ns(), b"k").unwrap());
    }

    #[test]
    fn test_counter_starts_at_one() {
        let store = MemoryStore::new();
        let ns = Namespace::counters("en");
        assert_eq!(store.counter(&ns, "aid").unwrap(), 1);
        assert_eq!(store.counter(&ns, "aid").unwrap(), 2);
        assert_eq!(store.counter(&ns, "cid").unwrap(), 1);
    }

    #[test]
    fn test_scan_ascending_descending() {
        let store = filled();
        let asc = store.keys(&ns(), &Scan::ascending().limit(3)).unwrap();
        assert_eq!(ids(asc), vec![1, 2, 3]);
        let desc = store.keys(&ns(), &Scan::descending().limit(3)).unwrap();
        assert_eq!(ids(desc), vec![10, 9, 8]);
        assert_eq!(store.count(&ns()).unwrap(), 10);
    }

    #[test]
    fn test_scan_from_is_exclusive_with_offset() {
        let store = filled();
        let from = 5u32.to_be_bytes().to_vec();
        let asc = store.keys(&ns(), &Scan::ascending().after(from.clone()).limit(2)).unwrap();
        assert_eq!(ids(asc), vec![6, 7]);
        let desc = store
            .keys(&ns(), &Scan::descending().after(from).offset(1).limit(2))
            .unwrap();
        assert_eq!(ids(desc), vec![3, 2]);
    }

    #[test]
    fn test_scan_prefix() {
        let store = MemoryStore::new();
        let rel = Namespace::forward("en", "fol");
        for key in ["alice:bob", "alice:carol", "alicia:dan", "bob:alice"] {
            store.set(&rel, key.as_bytes(), b"").unwrap();
        }
        let keys = store.keys(&rel, &Scan::ascending().prefix(b"alice:".to_vec())).unwrap();
        assert_eq!(keys, vec![b"alice:bob".to_vec(), b"alice:carol".to_vec()]);
        let keys = store.keys(&rel, &Scan::descending().prefix(b"alice:".to_vec())).unwrap();
        assert_eq!(keys, vec![b"alice:carol".to_vec(), b"alice:bob".to_vec()]);
    }

    #[test]
    fn test_compare_and_swap() {
        let store = MemoryStore::new();
        assert!(store.compare_and_swap(&ns(), b"k", None, Some(b"1")).unwrap());
        assert!(!store.compare_and_swap(&ns(), b"k", None, Some(b"2")).unwrap());
        assert!(store.compare_and_swap(&ns(), b"k", Some(b"1"), Some(b"2")).unwrap());
        assert_eq!(store.get(&ns(), b"k").unwrap(), Some(b"2".to_vec()));
        assert!(store.compare_and_swap(&ns(), b"k", Some(b"2"), None).unwrap());
        assert!(!store.has(&ns(), b"k").unwrap());
    }
}
