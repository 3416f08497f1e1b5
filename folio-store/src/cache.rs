//! Ephemeral, TTL-bound counters in front of the durable store.
//!
//! ```text
//!   request ──► EphemeralCache ──────────────┐
//!               │ rate-limit timestamps      │ dirty view counters
//!               │ daily vote counters        ▼
//!               │ bans                    Janitor ──► Store::store_view_count
//!               │ view dedup + aggregates    (periodic flush, purge)
//!               └─────────────────────────────
//! ```
//!
//! Nothing here survives a restart. Unique views are deduplicated per
//! `(lang, article, ip)`; the aggregate per `(lang, article)` is reseeded
//! from the durable counter whenever it is missing, so a restart or an
//! eviction loses at most the views not yet flushed.
//!
//! Time comes from an injected [`Clock`], so tests drive expiry with
//! [`ManualClock`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};

use crate::config::CacheConfig;
use crate::error::{Result, StoreError};
use crate::kv::poisoned;

// ─── Clock ───────────────────────────────────────────────────────────

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
        }
    }

    pub fn set(&self, to: DateTime<Utc>) {
        if let Ok(mut now) = self.now.lock() {
            *now = to;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map(|now| *now).unwrap_or_else(|_| Utc::now())
    }
}

// ─── Keys ────────────────────────────────────────────────────────────

/// A throttled action and who performs it.
///
/// Authors are only unique within a locale, so their keys carry it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RateKey {
    /// Account registration, per client IP
    Register(String),
    /// Publishing an article
    Post { lang: String, author: String },
    /// Posting a comment
    Comment { lang: String, author: String },
}

impl RateKey {
    pub fn post(lang: &str, author: &str) -> Self {
        RateKey::Post { lang: lang.to_string(), author: author.to_string() }
    }

    pub fn comment(lang: &str, author: &str) -> Self {
        RateKey::Comment { lang: lang.to_string(), author: author.to_string() }
    }
}

/// A view counter that changed since the last flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirtyView {
    pub lang: String,
    pub id: u32,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum VoteKey {
    Article { lang: String, user: String, day: NaiveDate },
    Comment { lang: String, user: String, day: NaiveDate },
}

#[derive(Debug)]
struct Expiring<T> {
    value: T,
    expires: DateTime<Utc>,
}

#[derive(Debug)]
struct ViewCounter {
    count: u64,
    dirty: bool,
}

#[derive(Default)]
struct Entries {
    actions: HashMap<RateKey, Expiring<DateTime<Utc>>>,
    votes: HashMap<VoteKey, Expiring<u32>>,
    /// (lang, comment id, user) → remembered vote
    comment_votes: HashMap<(String, u32, String), Expiring<()>>,
    bans: HashMap<String, Expiring<()>>,
    /// (lang, article id, ip)
    viewers: HashMap<(String, u32, String), Expiring<()>>,
    /// (lang, article id)
    views: HashMap<(String, u32), Expiring<ViewCounter>>,
}

/// Shared TTL cache. Cheap to share behind an `Arc`.
pub struct EphemeralCache {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    entries: Mutex<Entries>,
}

impl EphemeralCache {
    pub fn new(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock, entries: Mutex::new(Entries::default()) }
    }

    pub fn with_system_clock(config: CacheConfig) -> Self {
        Self::new(config, Arc::new(SystemClock))
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Entries>> {
        self.entries.lock().map_err(poisoned)
    }

    fn window(&self, key: &RateKey) -> Duration {
        match key {
            RateKey::Register(_) => self.config.register_window,
            RateKey::Post { .. } => self.config.post_window,
            RateKey::Comment { .. } => self.config.comment_window,
        }
    }

    fn expiry(&self, now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
        now + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500))
    }

    // ─── Rate limits ─────────────────────────────────────────────────

    /// Remember that `key` acted now.
    pub fn record_action(&self, key: RateKey) -> Result<()> {
        let now = self.now();
        let expires = self.expiry(now, self.window(&key));
        self.lock()?.actions.insert(key, Expiring { value: now, expires });
        Ok(())
    }

    /// `max(0, window - (now - last_action))`.
    pub fn remaining_wait(&self, key: &RateKey) -> Result<Duration> {
        let now = self.now();
        let window = self.window(key);
        let entries = self.lock()?;
        let Some(last) = entries.actions.get(key) else {
            return Ok(Duration::ZERO);
        };
        let elapsed = (now - last.value).to_std().unwrap_or(Duration::ZERO);
        Ok(window.saturating_sub(elapsed))
    }

    /// `RateLimited` while `key` is still inside its window.
    pub fn check(&self, key: &RateKey) -> Result<()> {
        let wait = self.remaining_wait(key)?;
        if wait.is_zero() {
            Ok(())
        } else {
            Err(StoreError::RateLimited { wait })
        }
    }

    pub fn clear_action(&self, key: &RateKey) -> Result<()> {
        self.lock()?.actions.remove(key);
        Ok(())
    }

    // ─── Votes ───────────────────────────────────────────────────────

    /// Count one article vote by `user` of `lang` against today's cap.
    pub fn count_article_vote(&self, lang: &str, user: &str) -> Result<u32> {
        let now = self.now();
        let key = VoteKey::Article { lang: lang.to_string(), user: user.to_string(), day: now.date_naive() };
        let cap = self.config.article_votes_per_day;
        let mut entries = self.lock()?;
        self.bump_vote(&mut entries, key, cap, now)
    }

    /// Give back an article vote whose stored write failed.
    pub fn refund_article_vote(&self, lang: &str, user: &str) -> Result<()> {
        let now = self.now();
        let key = VoteKey::Article { lang: lang.to_string(), user: user.to_string(), day: now.date_naive() };
        let mut entries = self.lock()?;
        Self::drop_vote(&mut entries, &key, now);
        Ok(())
    }

    /// Count one vote by `user` on comment `cid` of `lang`: once per comment,
    /// capped per day.
    pub fn count_comment_vote(&self, lang: &str, user: &str, cid: u32) -> Result<u32> {
        let now = self.now();
        let mut entries = self.lock()?;
        let remembered = (lang.to_string(), cid, user.to_string());
        if entries.comment_votes.get(&remembered).is_some_and(|e| e.expires > now) {
            return Err(StoreError::conflict("already voted on this comment"));
        }
        let key = VoteKey::Comment { lang: lang.to_string(), user: user.to_string(), day: now.date_naive() };
        let used = self.bump_vote(&mut entries, key, self.config.comment_votes_per_day, now)?;
        let expires = self.expiry(now, self.config.comment_vote_memory);
        entries.comment_votes.insert(remembered, Expiring { value: (), expires });
        Ok(used)
    }

    /// Undo [`Self::count_comment_vote`] after the stored write failed: the
    /// comment forgets the voter and the daily quota gets the vote back.
    pub fn refund_comment_vote(&self, lang: &str, user: &str, cid: u32) -> Result<()> {
        let now = self.now();
        let key = VoteKey::Comment { lang: lang.to_string(), user: user.to_string(), day: now.date_naive() };
        let mut entries = self.lock()?;
        entries.comment_votes.remove(&(lang.to_string(), cid, user.to_string()));
        Self::drop_vote(&mut entries, &key, now);
        Ok(())
    }

    fn drop_vote(entries: &mut Entries, key: &VoteKey, now: DateTime<Utc>) {
        if let Some(entry) = entries.votes.get_mut(key) {
            if entry.expires > now {
                entry.value = entry.value.saturating_sub(1);
            }
        }
    }

    fn bump_vote(
        &self,
        entries: &mut Entries,
        key: VoteKey,
        cap: u32,
        now: DateTime<Utc>,
    ) -> Result<u32> {
        let expires = self.expiry(now, self.config.default_ttl);
        let entry = entries.votes.entry(key).or_insert(Expiring { value: 0, expires });
        if entry.expires <= now {
            *entry = Expiring { value: 0, expires };
        }
        if entry.value >= cap {
            return Err(StoreError::LimitExceeded(format!("at most {cap} votes per day")));
        }
        entry.value += 1;
        Ok(entry.value)
    }

    // ─── Bans ────────────────────────────────────────────────────────

    pub fn ban(&self, subject: &str) -> Result<()> {
        let expires = self.expiry(self.now(), self.config.ban_ttl);
        log::info!("Banned {subject} until {expires}");
        self.lock()?.bans.insert(subject.to_string(), Expiring { value: (), expires });
        Ok(())
    }

    pub fn is_banned(&self, subject: &str) -> Result<bool> {
        let now = self.now();
        Ok(self.lock()?.bans.get(subject).is_some_and(|e| e.expires > now))
    }

    // ─── Views ───────────────────────────────────────────────────────

    /// Register a view of article `id` from `ip` and return the aggregate.
    ///
    /// Only the first view per ip within the TTL increments the aggregate.
    /// A missing or evicted aggregate always continues from the durable
    /// value supplied by `seed`, which is read outside the cache lock.
    pub fn register_view(
        &self,
        lang: &str,
        id: u32,
        ip: &str,
        seed: impl FnOnce() -> Result<u64>,
    ) -> Result<u64> {
        let now = self.now();
        let expires = self.expiry(now, self.config.default_ttl);
        let aggregate = (lang.to_string(), id);
        let mut seed = Some(seed);
        let mut durable = None;

        loop {
            let mut entries = self.lock()?;
            let live = entries
                .views
                .get(&aggregate)
                .is_some_and(|e| e.expires > now || e.value.dirty);
            if !live && durable.is_none() {
                if let Some(seed) = seed.take() {
                    drop(entries);
                    durable = Some(seed()?);
                    // the aggregate may have changed meanwhile; look again
                    continue;
                }
            }

            let viewer = (lang.to_string(), id, ip.to_string());
            let first_view = !entries.viewers.get(&viewer).is_some_and(|e| e.expires > now);
            if first_view {
                entries.viewers.insert(viewer, Expiring { value: (), expires });
            }

            let counter = entries.views.entry(aggregate).or_insert_with(|| Expiring {
                value: ViewCounter { count: 0, dirty: false },
                expires: now,
            });
            if let (false, Some(durable)) = (live, durable) {
                log::debug!("Seeded view counter {lang}/{id} with {durable}");
                counter.value = ViewCounter { count: durable, dirty: false };
            }
            counter.expires = expires;
            if first_view {
                counter.value.count += 1;
                counter.value.dirty = true;
            }
            return Ok(counter.value.count);
        }
    }

    /// Cached aggregate, if any.
    pub fn cached_views(&self, lang: &str, id: u32) -> Result<Option<u64>> {
        let now = self.now();
        Ok(self
            .lock()?
            .views
            .get(&(lang.to_string(), id))
            .filter(|e| e.expires > now || e.value.dirty)
            .map(|e| e.value.count))
    }

    /// Drain every aggregate changed since the last call.
    pub fn take_dirty_views(&self) -> Result<Vec<DirtyView>> {
        let mut entries = self.lock()?;
        Ok(entries
            .views
            .iter_mut()
            .filter(|(_, e)| e.value.dirty)
            .map(|((lang, id), e)| {
                e.value.dirty = false;
                DirtyView { lang: lang.clone(), id: *id, count: e.value.count }
            })
            .collect())
    }

    /// Mark views dirty again after a failed flush.
    pub fn requeue_views(&self, views: Vec<DirtyView>) -> Result<()> {
        let expires = self.expiry(self.now(), self.config.default_ttl);
        let mut entries = self.lock()?;
        for view in views {
            let counter = entries.views.entry((view.lang, view.id)).or_insert(Expiring {
                value: ViewCounter { count: view.count, dirty: true },
                expires,
            });
            counter.value.count = counter.value.count.max(view.count);
            counter.value.dirty = true;
        }
        Ok(())
    }

    /// Drop forgotten aggregates of a deleted article.
    pub fn forget_views(&self, lang: &str, id: u32) -> Result<()> {
        let mut entries = self.lock()?;
        entries.views.remove(&(lang.to_string(), id));
        entries.viewers.retain(|(l, i, _), _| !(l == lang && *i == id));
        Ok(())
    }

    // ─── Maintenance ─────────────────────────────────────────────────

    /// Remove every expired entry. Dirty view counters wait for their flush.
    pub fn purge_expired(&self) -> Result<usize> {
        let now = self.now();
        let mut entries = self.lock()?;
        let before = entries.len();
        entries.actions.retain(|_, e| e.expires > now);
        entries.votes.retain(|_, e| e.expires > now);
        entries.comment_votes.retain(|_, e| e.expires > now);
        entries.bans.retain(|_, e| e.expires > now);
        entries.viewers.retain(|_, e| e.expires > now);
        entries.views.retain(|_, e| e.expires > now || e.value.dirty);
        Ok(before - entries.len())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl Entries {
    fn len(&self) -> usize {
        self.actions.len()
            + self.votes.len()
            + self.comment_votes.len()
            + self.bans.len()
            + self.viewers.len()
            + self.views.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn cache() -> (EphemeralCache, Arc<ManualClock>) {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        (EphemeralCache::new(CacheConfig::default(), clock.clone()), clock)
    }

    #[test]
    fn test_remaining_wait_inside_and_after_window() {
        let config = CacheConfig { comment_window: Duration::from_secs(60), ..CacheConfig::default() };
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = EphemeralCache::new(config, clock.clone());
        let key = RateKey::comment("en", "alice");

        assert_eq!(cache.remaining_wait(&key).unwrap(), Duration::ZERO);
        cache.record_action(key.clone()).unwrap();
        let wait = cache.remaining_wait(&key).unwrap();
        assert!(wait > Duration::ZERO && wait <= Duration::from_secs(60));
        assert!(matches!(cache.check(&key), Err(StoreError::RateLimited { .. })));

        clock.advance(Duration::from_secs(20));
        assert_eq!(cache.remaining_wait(&key).unwrap(), Duration::from_secs(40));

        clock.advance(Duration::from_secs(40));
        assert_eq!(cache.remaining_wait(&key).unwrap(), Duration::ZERO);
        assert!(cache.check(&key).is_ok());
    }

    #[test]
    fn test_rate_keys_are_independent() {
        let (cache, _) = cache();
        cache.record_action(RateKey::post("en", "alice")).unwrap();
        assert!(cache.check(&RateKey::post("en", "alice")).is_err());
        assert!(cache.check(&RateKey::post("en", "bob")).is_ok());
        assert!(cache.check(&RateKey::post("ru", "alice")).is_ok());
        assert!(cache.check(&RateKey::comment("en", "alice")).is_ok());
        cache.clear_action(&RateKey::post("en", "alice")).unwrap();
        assert!(cache.check(&RateKey::post("en", "alice")).is_ok());
    }

    #[test]
    fn test_daily_article_vote_cap() {
        let (cache, clock) = cache();
        for n in 1..=10 {
            assert_eq!(cache.count_article_vote("en", "bob").unwrap(), n);
        }
        assert!(matches!(cache.count_article_vote("en", "bob"), Err(StoreError::LimitExceeded(_))));
        assert!(cache.count_article_vote("en", "carol").is_ok());

        clock.advance(Duration::from_secs(24 * 3600));
        assert_eq!(cache.count_article_vote("en", "bob").unwrap(), 1);
    }

    #[test]
    fn test_comment_vote_once_per_comment() {
        let (cache, _) = cache();
        cache.count_comment_vote("en", "bob", 7).unwrap();
        assert!(matches!(cache.count_comment_vote("en", "bob", 7), Err(StoreError::Conflict(_))));
        assert_eq!(cache.count_comment_vote("en", "bob", 8).unwrap(), 2);
    }

    #[test]
    fn test_votes_are_scoped_by_locale() {
        let (cache, _) = cache();
        cache.count_comment_vote("en", "bob", 1).unwrap();
        // same comment id and username, different locale: a first vote
        assert_eq!(cache.count_comment_vote("ru", "bob", 1).unwrap(), 1);

        for _ in 0..10 {
            cache.count_article_vote("en", "bob").unwrap();
        }
        assert!(cache.count_article_vote("en", "bob").is_err());
        assert_eq!(cache.count_article_vote("ru", "bob").unwrap(), 1);
    }

    #[test]
    fn test_refunds_restore_quota_and_marker() {
        let (cache, _) = cache();
        cache.count_article_vote("en", "bob").unwrap();
        cache.count_article_vote("en", "bob").unwrap();
        cache.refund_article_vote("en", "bob").unwrap();
        assert_eq!(cache.count_article_vote("en", "bob").unwrap(), 2);

        cache.count_comment_vote("en", "bob", 7).unwrap();
        cache.refund_comment_vote("en", "bob", 7).unwrap();
        assert_eq!(cache.count_comment_vote("en", "bob", 7).unwrap(), 1);

        // nothing to refund: no underflow
        cache.refund_article_vote("ru", "dan").unwrap();
        assert_eq!(cache.count_article_vote("ru", "dan").unwrap(), 1);
    }

    #[test]
    fn test_ban_expires() {
        let (cache, clock) = cache();
        cache.ban("10.0.0.1").unwrap();
        assert!(cache.is_banned("10.0.0.1").unwrap());
        assert!(!cache.is_banned("10.0.0.2").unwrap());
        clock.advance(Duration::from_secs(24 * 3600 + 1));
        assert!(!cache.is_banned("10.0.0.1").unwrap());
    }

    #[test]
    fn test_unique_views_seeded_from_durable_value() {
        let (cache, _) = cache();
        let seeded = || Ok(41);
        assert_eq!(cache.register_view("en", 1, "1.1.1.1", seeded).unwrap(), 42);
        // same viewer again: no increment, no reseed
        let never = || -> Result<u64> { panic!("aggregate is cached") };
        assert_eq!(cache.register_view("en", 1, "1.1.1.1", never).unwrap(), 42);
        assert_eq!(cache.register_view("en", 1, "2.2.2.2", never).unwrap(), 43);

        let dirty = cache.take_dirty_views().unwrap();
        assert_eq!(dirty, vec![DirtyView { lang: "en".into(), id: 1, count: 43 }]);
        assert!(cache.take_dirty_views().unwrap().is_empty());
    }

    #[test]
    fn test_evicted_aggregate_is_reseeded() {
        let (cache, clock) = cache();
        cache.register_view("en", 1, "1.1.1.1", || Ok(0)).unwrap();
        cache.take_dirty_views().unwrap();

        clock.advance(Duration::from_secs(24 * 3600 + 1));
        assert!(cache.purge_expired().unwrap() >= 2);
        assert_eq!(cache.cached_views("en", 1).unwrap(), None);

        assert_eq!(cache.register_view("en", 1, "1.1.1.1", || Ok(1)).unwrap(), 2);
    }

    #[test]
    fn test_drained_and_purged_aggregate_reseeds_from_durable() {
        let (cache, clock) = cache();
        assert_eq!(cache.register_view("en", 9, "1.1.1.1", || Ok(1000)).unwrap(), 1001);

        // a flush drains the counter, then expiry and a purge drop it
        clock.advance(Duration::from_secs(24 * 3600 + 1));
        assert_eq!(cache.take_dirty_views().unwrap()[0].count, 1001);
        cache.purge_expired().unwrap();

        assert_eq!(cache.register_view("en", 9, "2.2.2.2", || Ok(1001)).unwrap(), 1002);
    }

    #[test]
    fn test_aggregate_created_while_seeding_wins() {
        let (cache, _) = cache();
        // another request seeds and counts while this one reads durable storage
        let count = cache
            .register_view("en", 4, "1.1.1.1", || {
                cache.register_view("en", 4, "2.2.2.2", || Ok(500))?;
                Ok(500)
            })
            .unwrap();
        assert_eq!(count, 502);
        assert_eq!(cache.cached_views("en", 4).unwrap(), Some(502));
    }

    #[test]
    fn test_purge_keeps_dirty_views() {
        let (cache, clock) = cache();
        cache.register_view("en", 3, "1.1.1.1", || Ok(0)).unwrap();
        clock.advance(Duration::from_secs(24 * 3600 + 1));
        cache.purge_expired().unwrap();
        assert_eq!(cache.cached_views("en", 3).unwrap(), Some(1));

        let failed = cache.take_dirty_views().unwrap();
        cache.requeue_views(failed).unwrap();
        assert_eq!(cache.take_dirty_views().unwrap().len(), 1);
    }
}
