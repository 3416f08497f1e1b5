//! Background upkeep of the ephemeral cache.
//!
//! ```text
//!   every flush interval   ──► Store::flush_views   (dirty view counters)
//!   every purge interval   ──► EphemeralCache::purge_expired
//!   shutdown               ──► final flush, task exits
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::cache::EphemeralCache;
use crate::error::StoreError;
use crate::kv::KvStore;
use crate::store::Store;

/// Handle of the running janitor task.
pub struct Janitor {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Janitor {
    /// Start the janitor on the current tokio runtime. View counters are
    /// flushed every `flush_interval` (normally the cache's
    /// `view_flush_interval`); expired entries are purged on the cache's own
    /// janitor interval.
    pub fn spawn<K>(store: Arc<Store<K>>, cache: Arc<EphemeralCache>, flush_interval: Duration) -> Self
    where
        K: KvStore + 'static,
    {
        let (shutdown, mut stop) = watch::channel(false);
        let purge_interval = cache.config().janitor_interval;

        let handle = tokio::spawn(async move {
            let mut flush = tokio::time::interval(flush_interval.max(Duration::from_millis(1)));
            let mut purge = tokio::time::interval(purge_interval.max(Duration::from_millis(1)));
            flush.set_missed_tick_behavior(MissedTickBehavior::Delay);
            purge.set_missed_tick_behavior(MissedTickBehavior::Delay);
            log::info!("Janitor started (flush every {flush_interval:?}, purge every {purge_interval:?})");

            loop {
                tokio::select! {
                    _ = flush.tick() => {
                        // unwritten counters stay queued for the next tick
                        if let Err(e) = store.flush_views(&cache) {
                            log_flush_error("View flush", &e);
                        }
                    }
                    _ = purge.tick() => {
                        match cache.purge_expired() {
                            Ok(0) => {}
                            Ok(n) => log::debug!("Purged {n} expired cache entries"),
                            Err(e) => log::error!("Cache purge failed: {e}"),
                        }
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }

            if let Err(e) = store.flush_views(&cache) {
                log_flush_error("Final view flush", &e);
            }
            log::info!("Janitor stopped");
        });

        Self { shutdown, handle }
    }

    /// Stop the task after a final flush.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            log::error!("Janitor task failed: {e}");
        }
    }
}

fn log_flush_error(what: &str, e: &StoreError) {
    match e.detail() {
        Some(detail) => log::error!("{what} failed: {detail}"),
        None => log::error!("{what} failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use crate::config::{CacheConfig, Limits};
    use crate::kv::flaky::FlakyStore;
    use crate::kv::MemoryStore;
    use chrono::Utc;
    use std::sync::atomic::Ordering;

    fn setup() -> (Arc<Store<MemoryStore>>, Arc<EphemeralCache>) {
        setup_on(MemoryStore::new())
    }

    fn setup_on<K: KvStore>(kv: K) -> (Arc<Store<K>>, Arc<EphemeralCache>) {
        let store = Arc::new(Store::new(kv, Limits::default()));
        let clock = Arc::new(ManualClock::new(Utc::now()));
        (store, Arc::new(EphemeralCache::new(CacheConfig::default(), clock)))
    }

    #[tokio::test]
    async fn test_shutdown_flushes_views() {
        let (store, cache) = setup();
        let interval = cache.config().view_flush_interval;
        let janitor = Janitor::spawn(store.clone(), cache.clone(), interval);

        store.view_article(&cache, "en", 1, "1.1.1.1").unwrap();
        store.view_article(&cache, "en", 1, "2.2.2.2").unwrap();
        janitor.shutdown().await;

        assert_eq!(store.view_count("en", 1).unwrap(), 2);
    }

    #[tokio::test]
    async fn test_periodic_flush() {
        let (store, cache) = setup();
        let janitor = Janitor::spawn(store.clone(), cache.clone(), Duration::from_millis(10));

        store.view_article(&cache, "en", 7, "1.1.1.1").unwrap();
        let mut flushed = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if store.view_count("en", 7).unwrap() == 1 {
                flushed = true;
                break;
            }
        }
        janitor.shutdown().await;
        assert!(flushed);
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_views_queued() {
        let (store, cache) = setup_on(FlakyStore::default());
        store.kv().fail_set.store(true, Ordering::SeqCst);
        let janitor = Janitor::spawn(store.clone(), cache.clone(), Duration::from_millis(10));

        store.view_article(&cache, "en", 3, "1.1.1.1").unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.view_count("en", 3).unwrap(), 0);
        assert_eq!(cache.cached_views("en", 3).unwrap(), Some(1));

        store.kv().fail_set.store(false, Ordering::SeqCst);
        janitor.shutdown().await;
        assert_eq!(store.view_count("en", 3).unwrap(), 1);
    }
}
