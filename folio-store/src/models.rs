//! Persisted records and the inputs that create them.
//!
//! Field values arrive already validated and rendered by the request
//! handlers and the content pipeline; they are stored verbatim.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Preferred delivery channel for notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NotifyChannel {
    #[default]
    None,
    Email,
    Telegram,
}

/// Per-user UI and notification settings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UserSettings {
    pub notify: NotifyChannel,
    /// Telegram channel to mirror new articles into
    pub telegram_channel: Option<String>,
    /// Mirror titles only, without article text
    pub telegram_no_text: bool,
    /// Render pages without scripts
    pub no_js: bool,
}

/// A registered user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: u32,
    pub username: String,
    pub email: Option<String>,
    /// Argon2 PHC string
    pub password_hash: String,
    pub bio: String,
    pub image: Option<String>,
    pub lang: String,
    pub settings: UserSettings,
    pub created_at: DateTime<Utc>,
}

/// Input of [`crate::Store::create_user`].
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub lang: String,
    pub username: String,
    pub email: Option<String>,
    pub password: String,
    pub bio: String,
    pub image: Option<String>,
}

/// Profile changes; `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct UserEdit {
    /// `Some(None)` removes the email
    pub email: Option<Option<String>>,
    pub bio: Option<String>,
    pub image: Option<Option<String>>,
    pub settings: Option<UserSettings>,
}

/// An author followed by some user, as seen by that user.
#[derive(Debug, Clone, PartialEq)]
pub struct FollowedAuthor {
    pub user: User,
    /// Newest article id the follower has seen (0 = none)
    pub last_seen: u32,
    /// Articles published after `last_seen`, saturating at
    /// [`Limits::unseen_scan_cap`](crate::config::Limits::unseen_scan_cap)
    pub unseen: u32,
}

/// A comment, stored inside its parent article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: u32,
    pub author: String,
    pub body: String,
    pub html: String,
    pub created_at: DateTime<Utc>,
    pub plus: u32,
    pub minus: u32,
}

/// An article with its embedded comments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: u32,
    pub lang: String,
    pub author: String,
    pub title: String,
    pub body: String,
    /// Rendered, sanitized HTML supplied by the content pipeline
    pub html: String,
    pub tag: Option<String>,
    pub image: Option<String>,
    pub og_image: Option<String>,
    pub created_at: DateTime<Utc>,
    pub plus: u32,
    pub minus: u32,
    pub comments: Vec<Comment>,
    pub reading_time: u32,
    pub word_count: u32,
    /// Bumped by every stored modification; guards read-modify-write cycles
    pub version: u64,
}

impl Article {
    pub fn comment(&self, cid: u32) -> Option<&Comment> {
        self.comments.iter().find(|c| c.id == cid)
    }

    /// Votes counted by a ranking mode.
    pub fn votes(&self, mode: RankMode) -> u32 {
        match mode {
            RankMode::Top => self.plus,
            RankMode::Bottom => self.minus,
        }
    }
}

/// Input of [`crate::Store::create_article`].
#[derive(Debug, Clone, Default)]
pub struct NewArticle {
    pub lang: String,
    pub author: String,
    pub title: String,
    pub body: String,
    pub html: String,
    pub tag: Option<String>,
    pub image: Option<String>,
    pub og_image: Option<String>,
}

/// Article changes; `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct ArticleEdit {
    pub title: Option<String>,
    /// Body and its rendering always change together
    pub body: Option<(String, String)>,
    /// `Some(None)` removes the tag
    pub tag: Option<Option<String>>,
    pub image: Option<Option<String>>,
    pub og_image: Option<Option<String>>,
}

/// Input of [`crate::Store::add_comment`].
#[derive(Debug, Clone, Default)]
pub struct NewComment {
    pub author: String,
    pub body: String,
    pub html: String,
}

/// Direction of a vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    Plus,
    Minus,
}

/// Which vote counter a ranked list is ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RankMode {
    /// Plus votes
    #[default]
    Top,
    /// Minus votes
    Bottom,
}

/// A pending notification that someone mentioned the recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mention {
    pub created_at: DateTime<Utc>,
    pub by_username: String,
    pub to_username: String,
    pub article_id: u32,
    pub comment_id: u32,
    pub text: String,
    /// Canonical path of the referenced content
    pub path: String,
}
