//! Pending mention notifications, one namespace per recipient.
//!
//! Entries are keyed by an opaque reference chosen by the caller (usually
//! the path of the mentioning content), so visiting that content clears the
//! mention with a single delete. Key order says nothing about time, so
//! listing reads a bounded window and sorts it in memory.

use chrono::Utc;

use crate::codec::decode;
use crate::error::Result;
use crate::keys::{validate_component, Namespace};
use crate::kv::{KvStore, Scan};
use crate::models::Mention;
use crate::store::Store;

/// Where a batch of mentions comes from.
#[derive(Debug, Clone, Default)]
pub struct MentionOrigin {
    pub by_username: String,
    pub article_id: u32,
    pub comment_id: u32,
    /// Short display text
    pub text: String,
    /// Opaque key the mention is stored and cleared under
    pub reference: String,
    /// Canonical path of the content
    pub path: String,
}

/// Distinct `@name` tokens of `text`, in order of first appearance.
///
/// A name is a run of `[a-z0-9]` right after `@`; a bare `@` is ignored.
pub fn mention_usernames(text: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'@' {
            i += 1;
            continue;
        }
        let start = i + 1;
        let mut end = start;
        while end < bytes.len() && (bytes[end].is_ascii_lowercase() || bytes[end].is_ascii_digit()) {
            end += 1;
        }
        if end > start {
            let name = &text[start..end];
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        i = end.max(start);
    }
    names
}

impl<K: KvStore> Store<K> {
    pub fn record_mention(&self, lang: &str, recipient: &str, reference: &str, mention: &Mention) -> Result<()> {
        validate_component("username", recipient)?;
        self.save(&Namespace::mentions(lang, recipient), reference.as_bytes(), mention)
    }

    /// Newest first; `limit == 0` for every mention within the scan cap.
    pub fn list_mentions(&self, lang: &str, recipient: &str, limit: usize) -> Result<Vec<Mention>> {
        let ns = Namespace::mentions(lang, recipient);
        let scan = Scan::ascending().limit(self.limits().mention_scan_cap);
        let mut mentions = Vec::new();
        for (key, value) in self.kv().scan(&ns, &scan)? {
            match decode::<Mention>(&value) {
                Ok(mention) => mentions.push(mention),
                Err(e) => log::warn!(
                    "Undecodable mention {} of {recipient} skipped: {e}",
                    String::from_utf8_lossy(&key)
                ),
            }
        }
        mentions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if limit > 0 {
            mentions.truncate(limit);
        }
        Ok(mentions)
    }

    pub fn clear_mention(&self, lang: &str, recipient: &str, reference: &str) -> Result<bool> {
        self.kv().delete(&Namespace::mentions(lang, recipient), reference.as_bytes())
    }

    /// Record a mention for every existing user named in `body` and return
    /// them for delivery. Unknown names are ignored.
    pub fn notify_mentions(&self, lang: &str, body: &str, origin: &MentionOrigin) -> Result<Vec<Mention>> {
        let mut recorded = Vec::new();
        for name in mention_usernames(body) {
            if !self.username_exists(lang, &name)? {
                continue;
            }
            let mention = Mention {
                created_at: Utc::now(),
                by_username: origin.by_username.clone(),
                to_username: name.clone(),
                article_id: origin.article_id,
                comment_id: origin.comment_id,
                text: origin.text.clone(),
                path: origin.path.clone(),
            };
            self.record_mention(lang, &name, &origin.reference, &mention)?;
            recorded.push(mention);
        }
        if !recorded.is_empty() {
            log::debug!("Recorded {} mentions from {}", recorded.len(), origin.by_username);
        }
        Ok(recorded)
    }
}
