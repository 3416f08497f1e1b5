//! Articles, their embedded comments, votes and favorites.
//!
//! ```text
//!   {lang}/a/{author}   id → Article (comments embedded)      primary
//!   {lang}/aids         id → author                           feed index
//!   {lang}/t/{tag}      tag:id:author → ()                    tag index
//!   {lang}/fav{ms,sm}   id:user / user:id                     favorites
//! ```
//!
//! The primary record is written first and the indexes after it. A failed
//! index write surfaces as an error while the record stays committed;
//! [`Store::reindex_article`] finishes the job and is safe to repeat.
//!
//! Every mutation of a stored article is a versioned read-modify-write, so
//! concurrent commenters and voters never overwrite each other.

use chrono::Utc;

use crate::cache::EphemeralCache;
use crate::codec::id_to_bytes;
use crate::error::{Result, StoreError, CONCURRENT_UPDATE};
use crate::keys::{tag_key, validate_component, Namespace, COUNTER_ARTICLE, COUNTER_COMMENT};
use crate::kv::{KvStore, Order};
use crate::models::{Article, ArticleEdit, Comment, NewArticle, NewComment, Vote};
use crate::relation::article_master;
use crate::store::Store;

/// Reading speed used for reading-time estimates.
pub const WORDS_PER_MINUTE: u32 = 220;

/// `(word count, reading minutes)` of a text, at least one minute.
pub fn reading_stats(body: &str) -> (u32, u32) {
    let words = body.split_whitespace().count() as u32;
    (words, words.div_ceil(WORDS_PER_MINUTE).max(1))
}

impl<K: KvStore> Store<K> {
    pub fn create_article(&self, new: NewArticle) -> Result<Article> {
        validate_component("lang", &new.lang)?;
        validate_component("author", &new.author)?;
        let tag = new.tag.filter(|t| !t.is_empty());
        if let Some(tag) = &tag {
            validate_component("tag", tag)?;
        }
        if !self.username_exists(&new.lang, &new.author)? {
            return Err(StoreError::not_found("author"));
        }

        let (word_count, reading_time) = reading_stats(&new.body);
        let article = Article {
            id: self.next_id(&new.lang, COUNTER_ARTICLE)?,
            lang: new.lang,
            author: new.author,
            title: new.title,
            body: new.body,
            html: new.html,
            tag,
            image: new.image,
            og_image: new.og_image,
            created_at: Utc::now(),
            plus: 0,
            minus: 0,
            comments: Vec::new(),
            reading_time,
            word_count,
            version: 1,
        };

        let ns = Namespace::author(&article.lang, &article.author);
        if !self.insert(&ns, &id_to_bytes(article.id), &article)? {
            return Err(StoreError::conflict("article id already in use"));
        }
        self.reindex_article(&article)?;
        log::info!("Created article {}/{} by {}", article.lang, article.id, article.author);
        Ok(article)
    }

    /// Write the feed and tag index entries of a stored article. Idempotent.
    pub fn reindex_article(&self, article: &Article) -> Result<()> {
        let id = id_to_bytes(article.id);
        let indexed = self
            .kv()
            .set(&Namespace::feed(&article.lang), &id, article.author.as_bytes())
            .and_then(|()| match &article.tag {
                Some(tag) => self.kv().set(
                    &Namespace::tag(&article.lang, tag),
                    &tag_key(tag, article.id, &article.author),
                    &[],
                ),
                None => Ok(()),
            });
        if let Err(e) = &indexed {
            log::warn!("Article {}/{} is partially indexed: {e}", article.lang, article.id);
        }
        indexed
    }

    pub fn get_article(&self, lang: &str, author: &str, id: u32) -> Result<Article> {
        self.load(&Namespace::author(lang, author), &id_to_bytes(id))?
            .ok_or_else(|| StoreError::not_found("article"))
    }

    /// Author of article `id`, through the feed index.
    pub fn article_author(&self, lang: &str, id: u32) -> Result<Option<String>> {
        Ok(self
            .kv()
            .get(&Namespace::feed(lang), &id_to_bytes(id))?
            .map(|author| String::from_utf8_lossy(&author).into_owned()))
    }

    /// Article `id` without knowing its author.
    pub fn find_article(&self, lang: &str, id: u32) -> Result<Article> {
        let author = self
            .article_author(lang, id)?
            .ok_or_else(|| StoreError::not_found("article"))?;
        self.get_article(lang, &author, id)
    }

    /// Apply `edit` if the stored article is still at `expected_version`.
    pub fn update_article(
        &self,
        lang: &str,
        author: &str,
        id: u32,
        expected_version: u64,
        mut edit: ArticleEdit,
    ) -> Result<Article> {
        // an empty tag clears it, as on create
        edit.tag = edit.tag.map(|tag| tag.filter(|t| !t.is_empty()));
        if let Some(Some(tag)) = &edit.tag {
            validate_component("tag", tag)?;
        }
        self.modify_article(lang, author, id, |article| {
            if article.version != expected_version {
                return Err(StoreError::conflict(format!(
                    "{CONCURRENT_UPDATE}: article is at version {}",
                    article.version
                )));
            }
            if let Some(title) = &edit.title {
                article.title = title.clone();
            }
            if let Some((body, html)) = &edit.body {
                article.body = body.clone();
                article.html = html.clone();
                (article.word_count, article.reading_time) = reading_stats(body);
            }
            if let Some(tag) = &edit.tag {
                article.tag = tag.clone();
            }
            if let Some(image) = &edit.image {
                article.image = image.clone();
            }
            if let Some(og_image) = &edit.og_image {
                article.og_image = og_image.clone();
            }
            Ok(())
        })
    }

    /// Versioned read-modify-write of one article.
    ///
    /// `modify` may run several times when writers race. A changed tag is
    /// re-indexed afterwards; the new entry is written before the old one is
    /// removed, so the article never drops out of the tag feeds.
    pub fn modify_article<F>(&self, lang: &str, author: &str, id: u32, mut modify: F) -> Result<Article>
    where
        F: FnMut(&mut Article) -> Result<()>,
    {
        let ns = Namespace::author(lang, author);
        let mut old_tag = None;
        let updated = self.update_with(&ns, &id_to_bytes(id), "article", |mut article: Article| {
            old_tag = article.tag.clone();
            modify(&mut article)?;
            article.version += 1;
            Ok(Some(article))
        })?;

        if updated.tag != old_tag {
            self.reindex_article(&updated)?;
            if let Some(old) = &old_tag {
                self.kv().delete(&Namespace::tag(lang, old), &tag_key(old, id, author))?;
            }
        }
        Ok(updated)
    }

    /// Remove an article with its indexes, favorites and view counter.
    pub fn delete_article(&self, lang: &str, author: &str, id: u32) -> Result<bool> {
        let article = match self.get_article(lang, author, id) {
            Ok(article) => article,
            Err(StoreError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        let key = id_to_bytes(id);
        self.kv().delete(&Namespace::author(lang, author), &key)?;
        self.kv().delete(&Namespace::feed(lang), &key)?;
        if let Some(tag) = &article.tag {
            self.kv().delete(&Namespace::tag(lang, tag), &tag_key(tag, id, author))?;
        }
        let favorites = self.favorite_index(lang).unlink_all(&article_master(id))?;
        self.kv().delete(&Namespace::views(lang), &key)?;
        log::info!(
            "Deleted article {lang}/{id} ({} comments, {favorites} favorites)",
            article.comments.len()
        );
        Ok(true)
    }

    // ─── Comments ────────────────────────────────────────────────────

    pub fn add_comment(&self, lang: &str, author: &str, id: u32, new: NewComment) -> Result<Comment> {
        validate_component("comment author", &new.author)?;
        // fail before burning a comment id
        self.get_article(lang, author, id)?;
        let comment = Comment {
            id: self.next_id(lang, COUNTER_COMMENT)?,
            author: new.author,
            body: new.body,
            html: new.html,
            created_at: Utc::now(),
            plus: 0,
            minus: 0,
        };
        self.modify_article(lang, author, id, |article| {
            article.comments.push(comment.clone());
            Ok(())
        })?;
        Ok(comment)
    }

    pub fn delete_comment(&self, lang: &str, author: &str, id: u32, cid: u32) -> Result<bool> {
        let mut removed = false;
        self.modify_article(lang, author, id, |article| {
            let before = article.comments.len();
            article.comments.retain(|c| c.id != cid);
            removed = article.comments.len() != before;
            Ok(())
        })?;
        Ok(removed)
    }

    /// One vote by `voter` on comment `cid`, under the daily cap.
    #[allow(clippy::too_many_arguments)]
    pub fn vote_comment(
        &self,
        cache: &EphemeralCache,
        lang: &str,
        voter: &str,
        author: &str,
        id: u32,
        cid: u32,
        vote: Vote,
    ) -> Result<Comment> {
        let article = self.get_article(lang, author, id)?;
        let comment = article.comment(cid).ok_or_else(|| StoreError::not_found("comment"))?;
        if comment.author == voter {
            return Err(StoreError::invalid("cannot vote on your own comment"));
        }
        cache.count_comment_vote(lang, voter, cid)?;

        let mut voted = None;
        let result = self.modify_article(lang, author, id, |article| {
            let comment = article
                .comments
                .iter_mut()
                .find(|c| c.id == cid)
                .ok_or_else(|| StoreError::not_found("comment"))?;
            match vote {
                Vote::Plus => comment.plus += 1,
                Vote::Minus => comment.minus += 1,
            }
            voted = Some(comment.clone());
            Ok(())
        });
        match (result, voted) {
            (Ok(_), Some(comment)) => Ok(comment),
            (Ok(_), None) => Err(StoreError::not_found("comment")),
            (Err(e), _) => {
                cache.refund_comment_vote(lang, voter, cid)?;
                Err(e)
            }
        }
    }

    /// One vote by `voter` on an article, under the daily cap.
    pub fn vote_article(
        &self,
        cache: &EphemeralCache,
        lang: &str,
        voter: &str,
        author: &str,
        id: u32,
        vote: Vote,
    ) -> Result<Article> {
        if voter == author {
            return Err(StoreError::invalid("cannot vote on your own article"));
        }
        self.get_article(lang, author, id)?;
        cache.count_article_vote(lang, voter)?;
        let result = self.modify_article(lang, author, id, |article| {
            match vote {
                Vote::Plus => article.plus += 1,
                Vote::Minus => article.minus += 1,
            }
            Ok(())
        });
        if result.is_err() {
            cache.refund_article_vote(lang, voter)?;
        }
        result
    }

    // ─── Favorites ───────────────────────────────────────────────────

    pub fn favorite(&self, lang: &str, user: &str, id: u32) -> Result<()> {
        validate_component("username", user)?;
        if self.article_author(lang, id)?.is_none() {
            return Err(StoreError::not_found("article"));
        }
        self.favorite_index(lang).link(&article_master(id), user.as_bytes())
    }

    pub fn unfavorite(&self, lang: &str, user: &str, id: u32) -> Result<bool> {
        self.favorite_index(lang).unlink(&article_master(id), user.as_bytes())
    }

    pub fn is_favorite(&self, lang: &str, user: &str, id: u32) -> Result<bool> {
        self.favorite_index(lang).exists(&article_master(id), user.as_bytes())
    }

    pub fn favorite_count(&self, lang: &str, id: u32) -> Result<u64> {
        self.favorite_index(lang).count(&article_master(id))
    }

    /// Articles `user` favorited, newest first; `limit == 0` for all.
    pub fn favorites(&self, lang: &str, user: &str, limit: usize) -> Result<Vec<Article>> {
        let edges = self.favorite_index(lang).list_reverse(user.as_bytes(), limit, 0, Order::Descending)?;
        let mut out = Vec::with_capacity(edges.len());
        for edge in edges {
            let Some(id) = crate::codec::id_from_bytes(&edge.master) else {
                log::warn!("Malformed favorite edge of {user} skipped");
                continue;
            };
            match self.find_article(lang, id) {
                Ok(article) => out.push(article),
                Err(StoreError::NotFound(_)) => {
                    log::warn!("Favorite of {user} points at missing article {lang}/{id}");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }
}
