//! Users, their unique email index and the follow relation.
//!
//! Usernames and emails are unique per locale. Both constraints are enforced
//! with insert-if-absent writes, so two concurrent registrations of the same
//! name cannot both succeed even though no multi-key transaction exists.

use chrono::Utc;

use crate::codec::{id_from_bytes, id_to_bytes};
use crate::error::{Result, StoreError};
use crate::keys::{validate_component, Namespace};
use crate::kv::{KvStore, Order, Scan};
use crate::models::{FollowedAuthor, NewUser, User, UserEdit};
use crate::password::{hash_password, verify_password};
use crate::store::Store;

/// How a user is looked up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserQuery {
    Username(String),
    Email(String),
}

impl<K: KvStore> Store<K> {
    /// Register a user. A duplicate username or email fails with `Conflict`
    /// and leaves nothing behind.
    pub fn create_user(&self, new: NewUser) -> Result<User> {
        validate_component("lang", &new.lang)?;
        validate_component("username", &new.username)?;
        let email = match new.email {
            Some(email) if email.trim().is_empty() => None,
            other => other,
        };
        let users = Namespace::users(&new.lang);
        let emails = Namespace::user_emails(&new.lang);

        if self.kv().has(&users, new.username.as_bytes())? {
            return Err(StoreError::conflict("username taken"));
        }
        let password_hash = hash_password(&new.password)?;

        if let Some(email) = &email {
            let reserved = self.kv().compare_and_swap(
                &emails,
                email.as_bytes(),
                None,
                Some(new.username.as_bytes()),
            )?;
            if !reserved {
                return Err(StoreError::conflict("email taken"));
            }
        }

        let created = self.next_id(&new.lang, crate::keys::COUNTER_USER).and_then(|id| {
            let user = User {
                id,
                username: new.username.clone(),
                email: email.clone(),
                password_hash,
                bio: new.bio.clone(),
                image: new.image.clone(),
                lang: new.lang.clone(),
                settings: Default::default(),
                created_at: Utc::now(),
            };
            if !self.insert(&users, user.username.as_bytes(), &user)? {
                return Err(StoreError::conflict("username taken"));
            }
            Ok(user)
        });

        match created {
            Ok(user) => {
                log::info!("Created user {}/{} (uid {})", user.lang, user.username, user.id);
                Ok(user)
            }
            Err(e) => {
                // the reservation must not outlive a user that was never stored
                if let Some(email) = &email {
                    if let Err(release) = self.release_email(&new.lang, email, &new.username) {
                        log::warn!("Could not release email of {}/{}: {release}", new.lang, new.username);
                    }
                }
                Err(e)
            }
        }
    }

    pub fn get_user(&self, lang: &str, username: &str) -> Result<User> {
        self.load(&Namespace::users(lang), username.as_bytes())?
            .ok_or_else(|| StoreError::not_found("user"))
    }

    pub fn find_user(&self, lang: &str, query: &UserQuery) -> Result<User> {
        match query {
            UserQuery::Username(name) if name.is_empty() => {
                Err(StoreError::invalid("username is required"))
            }
            UserQuery::Email(email) if email.is_empty() => {
                Err(StoreError::invalid("email is required"))
            }
            UserQuery::Username(name) => self.get_user(lang, name),
            UserQuery::Email(email) => {
                let username = self
                    .kv()
                    .get(&Namespace::user_emails(lang), email.as_bytes())?
                    .ok_or_else(|| StoreError::not_found("user"))?;
                let username = String::from_utf8(username)
                    .map_err(|_| StoreError::Codec("email index holds a non-utf8 username".into()))?;
                self.get_user(lang, &username)
            }
        }
    }

    pub fn username_exists(&self, lang: &str, username: &str) -> Result<bool> {
        if username.is_empty() {
            return Ok(false);
        }
        self.kv().has(&Namespace::users(lang), username.as_bytes())
    }

    /// The user, if `password` matches. Unknown users and wrong passwords
    /// are indistinguishable.
    pub fn authenticate(&self, lang: &str, username: &str, password: &str) -> Result<Option<User>> {
        let user = match self.get_user(lang, username) {
            Ok(user) => user,
            Err(StoreError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(verify_password(password, &user.password_hash)?.then_some(user))
    }

    /// Apply profile changes, keeping the email index in step.
    pub fn update_user(&self, lang: &str, username: &str, edit: UserEdit) -> Result<User> {
        let users = Namespace::users(lang);
        let current = self.get_user(lang, username)?;

        let new_email = match &edit.email {
            Some(Some(email)) if email.trim().is_empty() => Some(None),
            other => other.clone(),
        };
        let changed_email = new_email.filter(|email| *email != current.email);
        if let Some(Some(email)) = &changed_email {
            let reserved = self.kv().compare_and_swap(
                &Namespace::user_emails(lang),
                email.as_bytes(),
                None,
                Some(username.as_bytes()),
            )?;
            if !reserved {
                return Err(StoreError::conflict("email taken"));
            }
        }

        let updated = self.update_with(&users, username.as_bytes(), "user", |mut user: User| {
            if let Some(email) = &changed_email {
                user.email = email.clone();
            }
            if let Some(bio) = &edit.bio {
                user.bio = bio.clone();
            }
            if let Some(image) = &edit.image {
                user.image = image.clone();
            }
            if let Some(settings) = &edit.settings {
                user.settings = settings.clone();
            }
            Ok(Some(user))
        });

        match (updated, &changed_email) {
            (Ok(user), Some(_)) => {
                if let Some(old) = &current.email {
                    self.release_email(lang, old, username)?;
                }
                Ok(user)
            }
            (Ok(user), None) => Ok(user),
            (Err(e), Some(Some(email))) => {
                self.release_email(lang, email, username)?;
                Err(e)
            }
            (Err(e), _) => Err(e),
        }
    }

    pub fn set_password(&self, lang: &str, username: &str, password: &str) -> Result<()> {
        let password_hash = hash_password(password)?;
        self.update_with(&Namespace::users(lang), username.as_bytes(), "user", |mut user: User| {
            user.password_hash = password_hash.clone();
            Ok(Some(user))
        })?;
        Ok(())
    }

    /// Remove a user, their email reservation and every follow edge they
    /// take part in. Authored articles stay.
    pub fn delete_user(&self, lang: &str, username: &str) -> Result<bool> {
        let user = match self.get_user(lang, username) {
            Ok(user) => user,
            Err(StoreError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        self.kv().delete(&Namespace::users(lang), username.as_bytes())?;
        if let Some(email) = &user.email {
            self.release_email(lang, email, username)?;
        }
        let edges = self.follow_index(lang).unlink_all(username.as_bytes())?;
        log::info!("Deleted user {lang}/{username} ({edges} follow edges)");
        Ok(true)
    }

    /// Drop an email reservation if it still points at `username`.
    fn release_email(&self, lang: &str, email: &str, username: &str) -> Result<()> {
        self.kv().compare_and_swap(
            &Namespace::user_emails(lang),
            email.as_bytes(),
            Some(username.as_bytes()),
            None,
        )?;
        Ok(())
    }

    // ─── Follows ─────────────────────────────────────────────────────

    pub fn follow(&self, lang: &str, follower: &str, author: &str) -> Result<()> {
        if follower == author {
            return Err(StoreError::invalid("cannot follow yourself"));
        }
        if !self.username_exists(lang, author)? {
            return Err(StoreError::not_found("user"));
        }
        self.follow_index(lang).link(author.as_bytes(), follower.as_bytes())
    }

    pub fn unfollow(&self, lang: &str, follower: &str, author: &str) -> Result<bool> {
        self.follow_index(lang).unlink(author.as_bytes(), follower.as_bytes())
    }

    pub fn is_following(&self, lang: &str, follower: &str, author: &str) -> Result<bool> {
        self.follow_index(lang).exists(author.as_bytes(), follower.as_bytes())
    }

    pub fn follower_count(&self, lang: &str, author: &str) -> Result<u64> {
        self.follow_index(lang).count(author.as_bytes())
    }

    /// Usernames following `author`.
    pub fn followers(&self, lang: &str, author: &str, limit: usize, offset: usize) -> Result<Vec<String>> {
        Ok(self
            .follow_index(lang)
            .list_forward(author.as_bytes(), limit, offset, Order::Ascending)?
            .into_iter()
            .map(|name| String::from_utf8_lossy(&name).into_owned())
            .collect())
    }

    /// Authors `follower` follows, with their reading position.
    pub fn following(&self, lang: &str, follower: &str) -> Result<Vec<FollowedAuthor>> {
        let mut out = Vec::new();
        for edge in self.follow_index(lang).list_reverse(follower.as_bytes(), 0, 0, Order::Ascending)? {
            let author = String::from_utf8_lossy(&edge.master).into_owned();
            let user = match self.get_user(lang, &author) {
                Ok(user) => user,
                Err(StoreError::NotFound(_)) => {
                    log::warn!("Follow edge {follower} → {author} points at a missing user");
                    continue;
                }
                Err(e) => return Err(e),
            };
            let last_seen = id_from_bytes(&edge.payload).unwrap_or(0);
            let unseen = self
                .kv()
                .keys(
                    &Namespace::author(lang, &author),
                    &Scan::ascending()
                        .after(id_to_bytes(last_seen).to_vec())
                        .limit(self.limits().unseen_scan_cap),
                )?
                .len() as u32;
            out.push(FollowedAuthor { user, last_seen, unseen });
        }
        Ok(out)
    }

    /// Advance `follower`'s reading position in `author`'s timeline.
    /// Returns false when not following or the position is already further.
    pub fn mark_seen(&self, lang: &str, follower: &str, author: &str, article_id: u32) -> Result<bool> {
        let follows = self.follow_index(lang);
        let Some(payload) = follows.payload(author.as_bytes(), follower.as_bytes())? else {
            return Ok(false);
        };
        if id_from_bytes(&payload).unwrap_or(0) >= article_id {
            return Ok(false);
        }
        follows.set_payload(author.as_bytes(), follower.as_bytes(), &id_to_bytes(article_id))
    }
}
