//! Test engine that fails chosen operations on demand.

use std::sync::atomic::{AtomicBool, Ordering};

use super::{KvStore, MemoryStore, Scan};
use crate::error::{Result, StoreError};
use crate::keys::Namespace;

/// [`MemoryStore`] with switchable write failures.
#[derive(Default)]
pub(crate) struct FlakyStore {
    pub inner: MemoryStore,
    pub fail_set: AtomicBool,
    pub fail_counter: AtomicBool,
    pub fail_cas: AtomicBool,
}

fn check(flag: &AtomicBool, op: &str) -> Result<()> {
    if flag.load(Ordering::SeqCst) {
        return Err(StoreError::StorageIo(format!("injected {op} failure")));
    }
    Ok(())
}

impl KvStore for FlakyStore {
    fn get(&self, ns: &Namespace, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner.get(ns, key)
    }

    fn set(&self, ns: &Namespace, key: &[u8], value: &[u8]) -> Result<()> {
        check(&self.fail_set, "set")?;
        self.inner.set(ns, key, value)
    }

    fn delete(&self, ns: &Namespace, key: &[u8]) -> Result<bool> {
        self.inner.delete(ns, key)
    }

    fn counter(&self, ns: &Namespace, name: &str) -> Result<u64> {
        check(&self.fail_counter, "counter")?;
        self.inner.counter(ns, name)
    }

    fn compare_and_swap(
        &self,
        ns: &Namespace,
        key: &[u8],
        expected: Option<&[u8]>,
        new: Option<&[u8]>,
    ) -> Result<bool> {
        check(&self.fail_cas, "compare_and_swap")?;
        self.inner.compare_and_swap(ns, key, expected, new)
    }

    fn scan(&self, ns: &Namespace, scan: &Scan) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.inner.scan(ns, scan)
    }

    fn count(&self, ns: &Namespace) -> Result<u64> {
        self.inner.count(ns)
    }
}
