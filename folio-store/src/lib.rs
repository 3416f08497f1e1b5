//! # folio-store — storage core of a multi-locale publishing platform
//!
//! Users, articles, comments, follows, favorites, tags and mentions, kept in
//! an ordered key-value store with nothing but point operations, atomic
//! counters and bounded range scans.
//!
//! ## Architecture
//!
//! ```text
//!            ┌─────────────────────────────────────────────┐
//!            │ Store<K>: users · articles · feeds ·        │
//!            │           mentions · stats                  │
//!            └───┬──────────────┬──────────────┬───────────┘
//!                │              │              │
//!        ┌───────▼──────┐ ┌─────▼──────┐ ┌─────▼─────┐
//!        │ RelationIndex│ │ page       │ │ rank      │
//!        │ fwd / rev    │ │ cursors    │ │ decay     │
//!        └───────┬──────┘ └─────┬──────┘ └───────────┘
//!                └──────┬───────┘
//!                ┌──────▼──────┐        ┌────────────────┐
//!                │ trait       │        │ EphemeralCache │◄── Janitor
//!                │ KvStore     │        │ (TTL, in-mem)  │    (tokio)
//!                └──┬───────┬──┘        └────────────────┘
//!                   ▼       ▼
//!          RocksStore     MemoryStore
//! ```
//!
//! ## Modules
//!
//! - [`kv`] — the key-value contract and its RocksDB / in-memory engines
//! - [`keys`] — namespace naming and composite key layout
//! - [`codec`] — bincode + LZ4 value encoding
//! - [`relation`] — forward/reverse relation index with repair
//! - [`page`] — cursor pagination shared by every listing
//! - [`rank`] — time-decayed top/bottom lists
//! - [`cache`] / [`janitor`] — rate limits, vote caps, bans, view counters
//! - [`users`], [`articles`], [`feeds`], [`mentions`], [`stats`] — record operations on [`Store`]

pub mod articles;
pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod feeds;
pub mod janitor;
pub mod keys;
pub mod kv;
pub mod mentions;
pub mod models;
pub mod page;
pub mod password;
pub mod rank;
pub mod relation;
pub mod stats;
pub mod store;
pub mod users;

// Re-exports for convenience
pub use cache::{Clock, DirtyView, EphemeralCache, ManualClock, RateKey, SystemClock};
pub use config::{CacheConfig, FolioConfig, Limits, StoreConfig};
pub use error::{Result, StoreError};
pub use feeds::FeedPage;
pub use janitor::Janitor;
pub use keys::Namespace;
pub use kv::{KvStore, MemoryStore, Order, RocksStore, Scan};
pub use mentions::{mention_usernames, MentionOrigin};
pub use models::{
    Article, ArticleEdit, Comment, FollowedAuthor, Mention, NewArticle, NewComment, NewUser,
    NotifyChannel, RankMode, User, UserEdit, UserSettings, Vote,
};
pub use page::{Cursor, Navigation, Page, PageRequest};
pub use relation::{RelationIndex, RelationKind, RepairReport};
pub use store::{RelationRepair, Store};
pub use users::UserQuery;
