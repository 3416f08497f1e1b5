//! Symmetric forward/reverse index for directed relations.
//!
//! A link `master → slave` is written twice:
//!
//! ```text
//!   forward  {lang}/{cat}ms   master ':' slave   → (empty)
//!   reverse  {lang}/{cat}sm   slave ':' master   → payload
//! ```
//!
//! For follows the master is the followed author and the slave the follower;
//! for favorites the master is the article id and the slave the user. So a
//! forward prefix scan answers "who follows / favorited X" and a reverse
//! prefix scan answers "whom / what does Y follow / favorite".
//!
//! The reverse entry is authoritative: [`RelationIndex::exists`] reads it,
//! `link` writes it last and `unlink` removes it first. A crash between the
//! two writes therefore never leaves `exists` true for a half-removed link,
//! and [`RelationIndex::repair`] can settle every one-sided entry by looking
//! at the reverse side alone.

use crate::codec::id_to_bytes;
use crate::error::Result;
use crate::keys::{composite, prefix_of, Namespace, SEP};
use crate::kv::{KvStore, Order, Scan};
use crate::page::{self, PageRequest};

/// Relation families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// author ← follower
    Follow,
    /// article id ← user
    Favorite,
}

impl RelationKind {
    pub fn category(self) -> &'static str {
        match self {
            RelationKind::Follow => "fol",
            RelationKind::Favorite => "fav",
        }
    }

    /// Fixed byte width of the master component, if it is numeric.
    fn master_width(self) -> Option<usize> {
        match self {
            RelationKind::Follow => None,
            RelationKind::Favorite => Some(4),
        }
    }
}

/// Master key of a favorite edge.
pub fn article_master(id: u32) -> [u8; 4] {
    id_to_bytes(id)
}

/// One edge as seen from its slave side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub master: Vec<u8>,
    pub payload: Vec<u8>,
}

/// Outcome of a reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// Forward entries without a reverse twin, deleted
    pub forward_removed: usize,
    /// Reverse entries without a forward twin, completed
    pub forward_restored: usize,
}

/// Forward/reverse index of one relation family in one locale.
pub struct RelationIndex<'a, K: KvStore + ?Sized> {
    kv: &'a K,
    kind: RelationKind,
    forward: Namespace,
    reverse: Namespace,
}

impl<'a, K: KvStore + ?Sized> RelationIndex<'a, K> {
    pub fn new(kv: &'a K, lang: &str, kind: RelationKind) -> Self {
        Self {
            kv,
            kind,
            forward: Namespace::forward(lang, kind.category()),
            reverse: Namespace::reverse(lang, kind.category()),
        }
    }

    /// Link `master → slave`. Re-linking is a no-op that keeps the payload.
    pub fn link(&self, master: &[u8], slave: &[u8]) -> Result<()> {
        self.kv.set(&self.forward, &composite(&[master, slave]), &[])?;
        let reverse_key = composite(&[slave, master]);
        if let Err(e) = self.kv.compare_and_swap(&self.reverse, &reverse_key, None, Some(&[])) {
            log::warn!(
                "Relation {} half-linked (forward only): {e}",
                self.kind.category()
            );
            return Err(e);
        }
        Ok(())
    }

    /// Remove `master → slave`, reporting whether the link existed.
    pub fn unlink(&self, master: &[u8], slave: &[u8]) -> Result<bool> {
        let existed = self.kv.delete(&self.reverse, &composite(&[slave, master]))?;
        if let Err(e) = self.kv.delete(&self.forward, &composite(&[master, slave])) {
            log::warn!(
                "Relation {} half-unlinked (forward left behind): {e}",
                self.kind.category()
            );
            return Err(e);
        }
        Ok(existed)
    }

    pub fn exists(&self, master: &[u8], slave: &[u8]) -> Result<bool> {
        self.kv.has(&self.reverse, &composite(&[slave, master]))
    }

    /// Number of slaves linked to `master`.
    pub fn count(&self, master: &[u8]) -> Result<u64> {
        let keys = self.kv.keys(&self.forward, &Scan::ascending().prefix(prefix_of(master)))?;
        Ok(keys.len() as u64)
    }

    /// Slaves linked to `master`, newest key order first when descending.
    pub fn list_forward(
        &self,
        master: &[u8],
        limit: usize,
        offset: usize,
        order: Order,
    ) -> Result<Vec<Vec<u8>>> {
        let prefix = prefix_of(master);
        let page = page::select(
            self.kv,
            &self.forward,
            &PageRequest::new(limit).prefix(prefix.clone()).offset(offset).order(order),
        )?;
        Ok(page
            .entries
            .into_iter()
            .map(|(key, _)| key[prefix.len()..].to_vec())
            .collect())
    }

    /// Masters linked from `slave`, with the payload stored on each edge.
    pub fn list_reverse(
        &self,
        slave: &[u8],
        limit: usize,
        offset: usize,
        order: Order,
    ) -> Result<Vec<Edge>> {
        let prefix = prefix_of(slave);
        let page = page::select(
            self.kv,
            &self.reverse,
            &PageRequest::new(limit).prefix(prefix.clone()).offset(offset).order(order),
        )?;
        Ok(page
            .entries
            .into_iter()
            .map(|(key, payload)| Edge { master: key[prefix.len()..].to_vec(), payload })
            .collect())
    }

    pub fn payload(&self, master: &[u8], slave: &[u8]) -> Result<Option<Vec<u8>>> {
        self.kv.get(&self.reverse, &composite(&[slave, master]))
    }

    /// Replace the payload of an existing edge. Returns false if there is no edge.
    pub fn set_payload(&self, master: &[u8], slave: &[u8], payload: &[u8]) -> Result<bool> {
        let key = composite(&[slave, master]);
        loop {
            let Some(current) = self.kv.get(&self.reverse, &key)? else {
                return Ok(false);
            };
            if self.kv.compare_and_swap(&self.reverse, &key, Some(&current), Some(payload))? {
                return Ok(true);
            }
        }
    }

    /// Remove every edge `entity` takes part in, on either side.
    pub fn unlink_all(&self, entity: &[u8]) -> Result<usize> {
        let mut removed = 0;
        let prefix = prefix_of(entity);
        for key in self.kv.keys(&self.forward, &Scan::ascending().prefix(prefix.clone()))? {
            if self.unlink(entity, &key[prefix.len()..])? {
                removed += 1;
            }
        }
        for key in self.kv.keys(&self.reverse, &Scan::ascending().prefix(prefix.clone()))? {
            if self.unlink(&key[prefix.len()..], entity)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Settle every one-sided entry. Idempotent; safe to run at any time.
    pub fn repair(&self) -> Result<RepairReport> {
        const CHUNK: usize = 512;
        let mut report = RepairReport::default();

        let mut from = None;
        loop {
            let scan = Scan::ascending().after_opt(from.take()).limit(CHUNK);
            let keys = self.kv.keys(&self.forward, &scan)?;
            for key in &keys {
                let Some((master, slave)) = self.split_forward(key) else {
                    log::warn!("Unparseable {} forward key skipped", self.kind.category());
                    continue;
                };
                if !self.kv.has(&self.reverse, &composite(&[slave, master]))? {
                    self.kv.delete(&self.forward, key)?;
                    report.forward_removed += 1;
                }
            }
            if keys.len() < CHUNK {
                break;
            }
            from = keys.last().cloned();
        }

        let mut from = None;
        loop {
            let scan = Scan::ascending().after_opt(from.take()).limit(CHUNK);
            let keys = self.kv.keys(&self.reverse, &scan)?;
            for key in &keys {
                let Some((slave, master)) = split_first(key) else {
                    log::warn!("Unparseable {} reverse key skipped", self.kind.category());
                    continue;
                };
                let forward_key = composite(&[master, slave]);
                if !self.kv.has(&self.forward, &forward_key)? {
                    self.kv.set(&self.forward, &forward_key, &[])?;
                    report.forward_restored += 1;
                }
            }
            if keys.len() < CHUNK {
                break;
            }
            from = keys.last().cloned();
        }

        if report != RepairReport::default() {
            log::warn!(
                "Repaired {} relation: {} forward removed, {} forward restored",
                self.kind.category(),
                report.forward_removed,
                report.forward_restored
            );
        }
        Ok(report)
    }

    fn split_forward<'k>(&self, key: &'k [u8]) -> Option<(&'k [u8], &'k [u8])> {
        match self.kind.master_width() {
            Some(width) => crate::keys::split_after(key, width),
            None => split_first(key),
        }
    }
}

/// Split at the first separator.
fn split_first(key: &[u8]) -> Option<(&[u8], &[u8])> {
    let at = key.iter().position(|b| *b == SEP)?;
    Some((&key[..at], &key[at + 1..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;

    #[test]
    fn test_link_exists_unlink() {
        let kv = MemoryStore::new();
        let follows = RelationIndex::new(&kv, "en", RelationKind::Follow);

        follows.link(b"alice", b"bob").unwrap();
        assert!(follows.exists(b"alice", b"bob").unwrap());
        assert!(!follows.exists(b"bob", b"alice").unwrap());

        assert!(follows.unlink(b"alice", b"bob").unwrap());
        assert!(!follows.exists(b"alice", b"bob").unwrap());
        assert!(!kv.has(&Namespace::reverse("en", "fol"), b"bob:alice").unwrap());
        assert!(!kv.has(&Namespace::forward("en", "fol"), b"alice:bob").unwrap());
        assert!(!follows.unlink(b"alice", b"bob").unwrap());
    }

    #[test]
    fn test_relink_keeps_payload() {
        let kv = MemoryStore::new();
        let follows = RelationIndex::new(&kv, "en", RelationKind::Follow);
        follows.link(b"alice", b"bob").unwrap();
        assert!(follows.set_payload(b"alice", b"bob", &[0, 0, 0, 9]).unwrap());

        follows.link(b"alice", b"bob").unwrap();
        assert_eq!(follows.payload(b"alice", b"bob").unwrap(), Some(vec![0, 0, 0, 9]));
        assert!(!follows.set_payload(b"alice", b"carol", b"x").unwrap());
    }

    #[test]
    fn test_count_and_listings() {
        let kv = MemoryStore::new();
        let follows = RelationIndex::new(&kv, "en", RelationKind::Follow);
        for follower in ["bob", "carol", "dave"] {
            follows.link(b"alice", follower.as_bytes()).unwrap();
        }
        follows.link(b"alicia", b"bob").unwrap();

        assert_eq!(follows.count(b"alice").unwrap(), 3);
        assert_eq!(follows.count(b"alicia").unwrap(), 1);

        let followers = follows.list_forward(b"alice", 0, 0, Order::Ascending).unwrap();
        assert_eq!(followers, vec![b"bob".to_vec(), b"carol".to_vec(), b"dave".to_vec()]);
        let page = follows.list_forward(b"alice", 1, 1, Order::Ascending).unwrap();
        assert_eq!(page, vec![b"carol".to_vec()]);

        let followed: Vec<Vec<u8>> = follows
            .list_reverse(b"bob", 0, 0, Order::Ascending)
            .unwrap()
            .into_iter()
            .map(|e| e.master)
            .collect();
        assert_eq!(followed, vec![b"alice".to_vec(), b"alicia".to_vec()]);
    }

    #[test]
    fn test_favorites_with_separator_byte_in_id() {
        let kv = MemoryStore::new();
        let favs = RelationIndex::new(&kv, "en", RelationKind::Favorite);
        let aid = article_master(58); // 00 00 00 3A
        favs.link(&aid, b"bob").unwrap();

        assert!(favs.exists(&aid, b"bob").unwrap());
        assert_eq!(favs.count(&aid).unwrap(), 1);
        let edges = favs.list_reverse(b"bob", 10, 0, Order::Descending).unwrap();
        assert_eq!(edges[0].master, aid.to_vec());

        // a healthy index needs no repair
        assert_eq!(favs.repair().unwrap(), RepairReport::default());
    }

    #[test]
    fn test_unlink_all() {
        let kv = MemoryStore::new();
        let follows = RelationIndex::new(&kv, "en", RelationKind::Follow);
        follows.link(b"alice", b"bob").unwrap();
        follows.link(b"carol", b"alice").unwrap();
        follows.link(b"carol", b"bob").unwrap();

        assert_eq!(follows.unlink_all(b"alice").unwrap(), 2);
        assert!(!follows.exists(b"alice", b"bob").unwrap());
        assert!(!follows.exists(b"carol", b"alice").unwrap());
        assert!(follows.exists(b"carol", b"bob").unwrap());
    }

    #[test]
    fn test_repair_settles_one_sided_entries() {
        let kv = MemoryStore::new();
        let follows = RelationIndex::new(&kv, "en", RelationKind::Follow);
        follows.link(b"alice", b"bob").unwrap();

        // interrupted link: forward only
        kv.set(&Namespace::forward("en", "fol"), b"alice:carol", &[]).unwrap();
        // lost forward write: reverse only
        kv.set(&Namespace::reverse("en", "fol"), b"dave:alice", &[]).unwrap();

        let report = follows.repair().unwrap();
        assert_eq!(report, RepairReport { forward_removed: 1, forward_restored: 1 });

        assert!(!follows.exists(b"alice", b"carol").unwrap());
        assert!(follows.exists(b"alice", b"dave").unwrap());
        assert_eq!(follows.count(b"alice").unwrap(), 2);
        assert_eq!(follows.repair().unwrap(), RepairReport::default());
    }
}
