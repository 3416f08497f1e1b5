//! Namespace naming and key layout.
//!
//! Every logical table is a [`Namespace`], partitioned by locale and, for
//! owner-scoped data, by owner, so an author's records are range-scannable
//! without a secondary filter:
//!
//! | Namespace              | Key                        | Value                 |
//! |------------------------|----------------------------|-----------------------|
//! | `{lang}/user`          | username                   | `User`                |
//! | `{lang}/usermail`      | email                      | username              |
//! | `{lang}/counter`       | counter name               | (counters CF)         |
//! | `{lang}/aids`          | id (4B BE)                 | author                |
//! | `{lang}/a/{author}`    | id (4B BE)                 | `Article`             |
//! | `{lang}/t/{tag}`       | tag `:` id (4B BE) `:` author | empty              |
//! | `{lang}/{cat}ms`       | master `:` slave           | empty                 |
//! | `{lang}/{cat}sm`       | slave `:` master           | payload (e.g. cursor) |
//! | `{lang}/m/{user}`      | opaque reference           | `Mention`             |
//! | `{lang}/view`          | id (4B BE)                 | u64 BE                |
//! | `{lang}/dau/{y}/{m}/{d}` | visitor                  | empty                 |
//!
//! Composite keys join components with [`SEP`]. String components must never
//! contain it; numeric components are fixed-width, so a separator byte inside
//! an encoded id cannot shift a component boundary.

use std::fmt;

use chrono::{Datelike, NaiveDate};

use crate::codec::id_to_bytes;
use crate::error::{Result, StoreError};
use crate::kv::Order;

/// Separator between components of a composite key.
pub const SEP: u8 = b':';

/// Counter allocating article ids.
pub const COUNTER_ARTICLE: &str = "aid";
/// Counter allocating comment ids.
pub const COUNTER_COMMENT: &str = "cid";
/// Counter allocating user ids.
pub const COUNTER_USER: &str = "uid";

const MAX_COMPONENT_LEN: usize = 64;

/// A named, independently scannable key space.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Namespace(String);

impl Namespace {
    pub fn users(lang: &str) -> Self {
        Self(format!("{lang}/user"))
    }

    pub fn user_emails(lang: &str) -> Self {
        Self(format!("{lang}/usermail"))
    }

    pub fn counters(lang: &str) -> Self {
        Self(format!("{lang}/counter"))
    }

    /// Locale-wide article feed: id → author.
    pub fn feed(lang: &str) -> Self {
        Self(format!("{lang}/aids"))
    }

    /// Records of one author.
    pub fn author(lang: &str, author: &str) -> Self {
        Self(format!("{lang}/a/{author}"))
    }

    pub fn tag(lang: &str, tag: &str) -> Self {
        Self(format!("{lang}/t/{tag}"))
    }

    pub fn forward(lang: &str, category: &str) -> Self {
        Self(format!("{lang}/{category}ms"))
    }

    pub fn reverse(lang: &str, category: &str) -> Self {
        Self(format!("{lang}/{category}sm"))
    }

    pub fn mentions(lang: &str, recipient: &str) -> Self {
        Self(format!("{lang}/m/{recipient}"))
    }

    pub fn views(lang: &str) -> Self {
        Self(format!("{lang}/view"))
    }

    /// Distinct visitors of one calendar day.
    pub fn visitors(lang: &str, day: NaiveDate) -> Self {
        Self(format!("{lang}/dau/{}/{}/{}", day.year(), day.month(), day.day()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reject values that would break namespace names or composite keys.
pub fn validate_component(kind: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(StoreError::invalid(format!("{kind} must not be empty")));
    }
    if value.len() > MAX_COMPONENT_LEN {
        return Err(StoreError::invalid(format!("{kind} is too long")));
    }
    if value.bytes().any(|b| b == SEP || b == b'/' || b.is_ascii_control()) {
        return Err(StoreError::invalid(format!(
            "{kind} must not contain ':', '/' or control characters"
        )));
    }
    Ok(())
}

/// Join components with [`SEP`].
pub fn composite(parts: &[&[u8]]) -> Vec<u8> {
    let len = parts.iter().map(|p| p.len() + 1).sum();
    let mut key = Vec::with_capacity(len);
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            key.push(SEP);
        }
        key.extend_from_slice(part);
    }
    key
}

/// `component ':'` — the prefix selecting every composite key led by `component`.
pub fn prefix_of(component: &[u8]) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(component.len() + 1);
    prefix.extend_from_slice(component);
    prefix.push(SEP);
    prefix
}

/// Split `head ':' rest` where `head` is `head_len` bytes long.
pub fn split_after(key: &[u8], head_len: usize) -> Option<(&[u8], &[u8])> {
    if key.len() <= head_len || key[head_len] != SEP {
        return None;
    }
    Some((&key[..head_len], &key[head_len + 1..]))
}

/// Exclusive scan bound that resumes just past article `id`.
///
/// `prefix` is whatever precedes the id inside the key. When the id is
/// followed by more components (`suffixed`), an ascending scan must also skip
/// every key that merely extends `prefix + id`, so the bound is pushed past
/// the separator.
pub fn id_bound(prefix: &[u8], id: u32, order: Order, suffixed: bool) -> Vec<u8> {
    let mut bound = Vec::with_capacity(prefix.len() + 5);
    bound.extend_from_slice(prefix);
    bound.extend_from_slice(&id_to_bytes(id));
    if suffixed && order == Order::Ascending {
        bound.push(SEP + 1);
    }
    bound
}

/// Key of a tag index entry.
pub fn tag_key(tag: &str, id: u32, author: &str) -> Vec<u8> {
    composite(&[tag.as_bytes(), &id_to_bytes(id), author.as_bytes()])
}

/// Decode `(id, author)` from a tag index key.
pub fn parse_tag_key<'a>(tag: &str, key: &'a [u8]) -> Option<(u32, &'a [u8])> {
    let (_, rest) = split_after(key, tag.len())?;
    let (id, author) = split_after(rest, 4)?;
    Some((crate::codec::id_from_bytes(id)?, author))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_names() {
        assert_eq!(Namespace::author("en", "alice").as_str(), "en/a/alice");
        assert_eq!(Namespace::forward("ru", "fol").as_str(), "ru/folms");
        assert_eq!(Namespace::reverse("ru", "fav").as_str(), "ru/favsm");
        let day = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(Namespace::visitors("en", day).as_str(), "en/dau/2024/3/9");
    }

    #[test]
    fn test_validate_component() {
        assert!(validate_component("username", "alice").is_ok());
        assert!(validate_component("username", "").is_err());
        assert!(validate_component("username", "a:b").is_err());
        assert!(validate_component("tag", "go/rust").is_err());
        assert!(validate_component("tag", &"x".repeat(65)).is_err());
    }

    #[test]
    fn test_composite_and_split() {
        let key = composite(&[b"bob", b"alice"]);
        assert_eq!(key, b"bob:alice");
        let (head, rest) = split_after(&key, 3).unwrap();
        assert_eq!(head, b"bob");
        assert_eq!(rest, b"alice");
        assert!(split_after(&key, 2).is_none());
    }

    #[test]
    fn test_tag_key_with_separator_byte_in_id() {
        // 58 encodes as 00 00 00 3A, i.e. ends in ':'
        let key = tag_key("go", 58, "alice");
        let (id, author) = parse_tag_key("go", &key).unwrap();
        assert_eq!(id, 58);
        assert_eq!(author, b"alice");
    }

    #[test]
    fn test_id_bound_skips_suffixed_entry() {
        let entry = tag_key("go", 7, "alice");
        let prefix = prefix_of(b"go");

        let desc = id_bound(&prefix, 7, Order::Descending, true);
        assert!(entry > desc, "descending scan below the bound excludes id 7");

        let asc = id_bound(&prefix, 7, Order::Ascending, true);
        assert!(entry < asc, "ascending scan above the bound excludes id 7");
        assert!(tag_key("go", 8, "aaa") > asc);
    }
}
