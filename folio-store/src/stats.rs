//! Durable view counters and daily/weekly visitor sets.

use std::collections::HashSet;

use chrono::{Days, NaiveDate};

use crate::cache::EphemeralCache;
use crate::codec::{id_to_bytes, u64_from_bytes, u64_to_bytes};
use crate::error::Result;
use crate::keys::Namespace;
use crate::kv::{KvStore, Scan};
use crate::store::Store;

impl<K: KvStore> Store<K> {
    /// Last flushed view count of an article, `0` when never flushed.
    pub fn view_count(&self, lang: &str, id: u32) -> Result<u64> {
        Ok(self
            .kv()
            .get(&Namespace::views(lang), &id_to_bytes(id))?
            .and_then(|bytes| u64_from_bytes(&bytes))
            .unwrap_or(0))
    }

    pub fn store_view_count(&self, lang: &str, id: u32, count: u64) -> Result<()> {
        self.kv().set(&Namespace::views(lang), &id_to_bytes(id), &u64_to_bytes(count))
    }

    /// Count a view from `ip` and return the current total.
    pub fn view_article(&self, cache: &EphemeralCache, lang: &str, id: u32, ip: &str) -> Result<u64> {
        cache.register_view(lang, id, ip, || self.view_count(lang, id))
    }

    /// Write every dirty cached view counter to durable storage.
    ///
    /// Counters that could not be written are handed back to the cache and
    /// the error is returned for the caller to report.
    pub fn flush_views(&self, cache: &EphemeralCache) -> Result<usize> {
        let mut pending = cache.take_dirty_views()?.into_iter();
        let mut written = 0;
        while let Some(view) = pending.next() {
            if let Err(e) = self.store_view_count(&view.lang, view.id, view.count) {
                let mut failed = vec![view];
                failed.extend(pending);
                cache.requeue_views(failed)?;
                return Err(e);
            }
            written += 1;
        }
        if written > 0 {
            log::debug!("Flushed {written} view counters");
        }
        Ok(written)
    }

    pub fn record_visit(&self, lang: &str, visitor: &str, day: NaiveDate) -> Result<()> {
        self.kv().set(&Namespace::visitors(lang, day), visitor.as_bytes(), &[])
    }

    /// Distinct visitors on `day`.
    pub fn daily_visitors(&self, lang: &str, day: NaiveDate) -> Result<u64> {
        self.kv().count(&Namespace::visitors(lang, day))
    }

    /// Distinct visitors over the seven days ending with `today`.
    pub fn weekly_visitors(&self, lang: &str, today: NaiveDate) -> Result<u64> {
        let mut seen = HashSet::new();
        for back in 0..7 {
            let Some(day) = today.checked_sub_days(Days::new(back)) else { break };
            seen.extend(self.kv().keys(&Namespace::visitors(lang, day), &Scan::ascending())?);
        }
        Ok(seen.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use crate::config::{CacheConfig, Limits};
    use crate::kv::MemoryStore;
    use chrono::Utc;
    use std::sync::Arc;

    fn store() -> Store<MemoryStore> {
        Store::new(MemoryStore::new(), Limits::default())
    }

    #[test]
    fn test_view_counts_persist_through_flush() {
        let store = store();
        let cache = EphemeralCache::new(CacheConfig::default(), Arc::new(ManualClock::new(Utc::now())));
        store.store_view_count("en", 1, 10).unwrap();

        assert_eq!(store.view_article(&cache, "en", 1, "1.1.1.1").unwrap(), 11);
        assert_eq!(store.view_article(&cache, "en", 1, "1.1.1.1").unwrap(), 11);
        assert_eq!(store.view_article(&cache, "en", 1, "2.2.2.2").unwrap(), 12);
        assert_eq!(store.view_count("en", 1).unwrap(), 10);

        assert_eq!(store.flush_views(&cache).unwrap(), 1);
        assert_eq!(store.view_count("en", 1).unwrap(), 12);
        assert_eq!(store.flush_views(&cache).unwrap(), 0);
    }

    #[test]
    fn test_restart_reseeds_from_durable() {
        let store = store();
        store.store_view_count("en", 5, 100).unwrap();
        let fresh = EphemeralCache::new(CacheConfig::default(), Arc::new(ManualClock::new(Utc::now())));
        assert_eq!(store.view_article(&fresh, "en", 5, "9.9.9.9").unwrap(), 101);
        assert_eq!(store.view_article(&fresh, "en", 6, "9.9.9.9").unwrap(), 1);
    }

    #[test]
    fn test_daily_and_weekly_visitors() {
        let store = store();
        let today = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let day = |n: u64| today.checked_sub_days(Days::new(n)).unwrap();

        store.record_visit("en", "alice", today).unwrap();
        store.record_visit("en", "alice", today).unwrap();
        store.record_visit("en", "bob", today).unwrap();
        store.record_visit("en", "alice", day(3)).unwrap();
        store.record_visit("en", "carol", day(6)).unwrap();
        store.record_visit("en", "dave", day(7)).unwrap();

        assert_eq!(store.daily_visitors("en", today).unwrap(), 2);
        assert_eq!(store.daily_visitors("en", day(1)).unwrap(), 0);
        assert_eq!(store.weekly_visitors("en", today).unwrap(), 3);
        assert_eq!(store.daily_visitors("ru", today).unwrap(), 0);
    }
}
