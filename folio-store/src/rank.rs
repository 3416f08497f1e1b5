//! Time-decayed ranking of recent articles.
//!
//! ```text
//!   score = votes / (age_minutes + 120) ^ 1.8
//! ```
//!
//! Nothing is persisted: every call rescores a fresh window of candidates,
//! trading CPU per request for rankings that are never stale.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use crate::models::{Article, RankMode};

/// Decay exponent.
pub const GRAVITY: f64 = 1.8;
/// Minutes added to every age so brand-new articles do not dominate.
pub const AGE_OFFSET_MINUTES: f64 = 120.0;

pub fn score(votes: u32, age_minutes: f64) -> f64 {
    f64::from(votes) / (age_minutes + AGE_OFFSET_MINUTES).powf(GRAVITY)
}

/// Whole minutes between `created` and `now`, never negative.
pub fn age_minutes(created: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (now - created).num_minutes().max(0) as f64
}

/// Order `candidates` by descending score at `now` and keep the best `count`.
///
/// The sort is stable, so ties keep the order the candidates came in.
pub fn rank(
    candidates: Vec<Article>,
    mode: RankMode,
    count: usize,
    now: DateTime<Utc>,
) -> Vec<Article> {
    let mut scored: Vec<(f64, Article)> = candidates
        .into_iter()
        .map(|a| (score(a.votes(mode), age_minutes(a.created_at, now)), a))
        .collect();
    scored.sort_by(|(a, _), (b, _)| b.partial_cmp(a).unwrap_or(Ordering::Equal));
    scored.into_iter().take(count).map(|(_, a)| a).collect()
}
