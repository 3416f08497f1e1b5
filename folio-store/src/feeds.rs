//! Article feeds: locale, tag, author timelines and ranked lists.
//!
//! All of them page through [`page::select`] newest first; cursors handed to
//! callers are plain article ids.

use chrono::{DateTime, Utc};

use crate::codec::{decode, id_from_bytes, id_to_bytes};
use crate::error::{Result, StoreError};
use crate::keys::{id_bound, parse_tag_key, prefix_of, validate_component, Namespace};
use crate::kv::{KvStore, Order};
use crate::models::{Article, RankMode};
use crate::page::{self, Cursor, Navigation, PageRequest};
use crate::rank;
use crate::store::Store;

/// One page of a feed.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeedPage {
    pub articles: Vec<Article>,
    pub nav: Navigation<u32>,
}

impl<K: KvStore> Store<K> {
    /// The locale feed, or the feed of one tag.
    pub fn feed(&self, lang: &str, from: Cursor<u32>, tag: Option<&str>) -> Result<FeedPage> {
        match tag {
            Some(tag) => self.tag_feed(lang, tag, from),
            None => self.locale_feed(lang, from),
        }
    }

    fn locale_feed(&self, lang: &str, from: Cursor<u32>) -> Result<FeedPage> {
        let ns = Namespace::feed(lang);
        let req = self
            .feed_request()
            .cursor(from.map(|id| id_to_bytes(id).to_vec()));
        let page = page::select(self.kv(), &ns, &req)?;

        let mut articles = Vec::with_capacity(page.entries.len());
        for (key, author) in &page.entries {
            let Some(id) = id_from_bytes(key) else { continue };
            let author = String::from_utf8_lossy(author);
            if let Some(article) = self.indexed_article(lang, &author, id)? {
                articles.push(article);
            }
        }
        let nav = page::navigate(self.kv(), &ns, &req, &page, self.limits().prev_lookahead)?;
        Ok(FeedPage { articles, nav: nav.map(|key| id_from_bytes(&key).unwrap_or(0)) })
    }

    fn tag_feed(&self, lang: &str, tag: &str, from: Cursor<u32>) -> Result<FeedPage> {
        validate_component("tag", tag)?;
        let ns = Namespace::tag(lang, tag);
        let prefix = prefix_of(tag.as_bytes());
        let mut req = self.feed_request().prefix(prefix.clone());
        if let Cursor::After(id) = from {
            req = req.after(id_bound(&prefix, id, Order::Descending, true));
        }
        let page = page::select(self.kv(), &ns, &req)?;

        let mut articles = Vec::with_capacity(page.entries.len());
        for (key, _) in &page.entries {
            let Some((id, author)) = parse_tag_key(tag, key) else {
                log::warn!("Malformed tag index key in {ns} skipped");
                continue;
            };
            let author = String::from_utf8_lossy(author);
            if let Some(article) = self.indexed_article(lang, &author, id)? {
                articles.push(article);
            }
        }
        let nav = page::navigate(self.kv(), &ns, &req, &page, self.limits().prev_lookahead)?;
        Ok(FeedPage {
            articles,
            nav: nav.map(|key| parse_tag_key(tag, &key).map_or(0, |(id, _)| id)),
        })
    }

    /// Timeline of one author. When `viewer` follows the author, their
    /// reading position advances to the newest article shown.
    pub fn author_feed(
        &self,
        lang: &str,
        viewer: Option<&str>,
        author: &str,
        from: Cursor<u32>,
    ) -> Result<FeedPage> {
        let ns = Namespace::author(lang, author);
        let req = self
            .feed_request()
            .cursor(from.map(|id| id_to_bytes(id).to_vec()));
        let page = page::select(self.kv(), &ns, &req)?;
        let articles = page
            .entries
            .iter()
            .map(|(_, value)| decode::<Article>(value))
            .collect::<Result<Vec<_>>>()?;

        if let (Some(viewer), Some(newest)) = (viewer, articles.iter().map(|a| a.id).max()) {
            if viewer != author {
                self.mark_seen(lang, viewer, author, newest)?;
            }
        }
        let nav = page::navigate(self.kv(), &ns, &req, &page, self.limits().prev_lookahead)?;
        Ok(FeedPage { articles, nav: nav.map(|key| id_from_bytes(&key).unwrap_or(0)) })
    }

    /// The `count` best recent articles by time-decayed votes.
    pub fn top(&self, lang: &str, count: usize, mode: RankMode) -> Result<FeedPage> {
        self.top_at(lang, count, mode, Utc::now())
    }

    /// [`Store::top`] evaluated at a fixed instant.
    pub fn top_at(
        &self,
        lang: &str,
        count: usize,
        mode: RankMode,
        now: DateTime<Utc>,
    ) -> Result<FeedPage> {
        if count == 0 {
            return Ok(FeedPage::default());
        }
        let ns = Namespace::feed(lang);
        let window = count.saturating_mul(self.limits().top_overfetch.max(1));
        let req = PageRequest::new(window).order(Order::Descending);
        let page = page::select(self.kv(), &ns, &req)?;

        let mut candidates = Vec::with_capacity(page.entries.len());
        for (key, author) in &page.entries {
            let Some(id) = id_from_bytes(key) else { continue };
            if let Some(article) = self.indexed_article(lang, &String::from_utf8_lossy(author), id)? {
                candidates.push(article);
            }
        }
        Ok(FeedPage { articles: rank::rank(candidates, mode, count, now), nav: Navigation::default() })
    }

    fn feed_request(&self) -> PageRequest {
        PageRequest::new(self.limits().page_size.max(1)).order(Order::Descending)
    }

    /// Resolve an index entry, skipping entries whose record is gone.
    fn indexed_article(&self, lang: &str, author: &str, id: u32) -> Result<Option<Article>> {
        match self.get_article(lang, author, id) {
            Ok(article) => Ok(Some(article)),
            Err(StoreError::NotFound(_)) => {
                log::warn!("Index entry {lang}/{id} points at a missing article");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
