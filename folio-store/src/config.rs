//! Store, paging and cache configuration.
//!
//! Every setting has a default so an embedding service can open a store with
//! zero configuration. `FolioConfig::from_env` overrides the few knobs an
//! operator usually touches.

use std::path::PathBuf;
use std::time::Duration;

/// RocksDB engine configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 128MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// fsync every record write (default: false). Counter writes are always synced.
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 512)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 64MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("folio_data"),
            block_cache_size: 128 * 1024 * 1024, // 128MB
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 512,
            write_buffer_size: 64 * 1024 * 1024, // 64MB
        }
    }
}

impl StoreConfig {
    /// Create config for testing (small caches, caller-owned directory).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024, // 8MB
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024, // 4MB
        }
    }
}

/// Paging and retry limits applied by the record layer.
#[derive(Debug, Clone)]
pub struct Limits {
    /// Articles per feed page
    pub page_size: usize,
    /// Candidates fetched per requested entry of a top list
    pub top_overfetch: usize,
    /// Items skipped backwards to locate the previous page
    pub prev_lookahead: usize,
    /// Upper bound on mentions read before sorting by time
    pub mention_scan_cap: usize,
    /// Attempts of a versioned read-modify-write before giving up
    pub cas_retries: usize,
    /// Upper bound on unseen articles counted per followed author
    pub unseen_scan_cap: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            page_size: 5,
            top_overfetch: 5,
            prev_lookahead: 5,
            mention_scan_cap: 1000,
            cas_retries: 16,
            unseen_scan_cap: 100,
        }
    }
}

/// Ephemeral cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Lifetime of entries stored without an explicit TTL
    pub default_ttl: Duration,
    /// How often the janitor drops expired entries
    pub janitor_interval: Duration,
    /// How often dirty view counters are written to durable storage
    pub view_flush_interval: Duration,
    /// Minimum gap between two registrations from one IP
    pub register_window: Duration,
    /// Minimum gap between two articles from one author
    pub post_window: Duration,
    /// Minimum gap between two comments from one author
    pub comment_window: Duration,
    /// Article votes a user may cast per day
    pub article_votes_per_day: u32,
    /// Comment votes a user may cast per day
    pub comment_votes_per_day: u32,
    /// How long a comment remembers who voted on it
    pub comment_vote_memory: Duration,
    /// How long a ban lasts
    pub ban_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(24 * 3600),
            janitor_interval: Duration::from_secs(10 * 60),
            view_flush_interval: Duration::from_secs(30),
            register_window: Duration::from_secs(10 * 60),
            post_window: Duration::from_secs(10 * 60),
            comment_window: Duration::from_secs(30),
            article_votes_per_day: 10,
            comment_votes_per_day: 10,
            comment_vote_memory: Duration::from_secs(30 * 24 * 3600),
            ban_ttl: Duration::from_secs(24 * 3600),
        }
    }
}

/// Complete configuration of an embedded store.
#[derive(Debug, Clone, Default)]
pub struct FolioConfig {
    pub store: StoreConfig,
    pub limits: Limits,
    pub cache: CacheConfig,
}

impl FolioConfig {
    /// Load overrides from environment variables.
    ///
    /// - `FOLIO_DATA_DIR` — database directory
    /// - `FOLIO_PAGE_SIZE` — articles per feed page
    /// - `FOLIO_SYNC_WRITES` — `true`/`false`
    /// - `FOLIO_VIEW_FLUSH_SECS` — view counter flush interval
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("FOLIO_DATA_DIR") {
            config.store.path = PathBuf::from(dir);
        }

        if let Ok(raw) = std::env::var("FOLIO_PAGE_SIZE") {
            match raw.parse::<usize>() {
                Ok(n) if n > 0 => {
                    config.limits.page_size = n;
                    config.limits.prev_lookahead = n;
                }
                _ => log::warn!("Invalid FOLIO_PAGE_SIZE {raw:?}, using default"),
            }
        }

        if let Ok(raw) = std::env::var("FOLIO_SYNC_WRITES") {
            match raw.parse::<bool>() {
                Ok(sync) => config.store.sync_writes = sync,
                Err(_) => log::warn!("Invalid FOLIO_SYNC_WRITES {raw:?}, using default"),
            }
        }

        if let Ok(raw) = std::env::var("FOLIO_VIEW_FLUSH_SECS") {
            match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => {
                    config.cache.view_flush_interval = Duration::from_secs(secs)
                }
                _ => log::warn!("Invalid FOLIO_VIEW_FLUSH_SECS {raw:?}, using default"),
            }
        }

        config
    }
}
