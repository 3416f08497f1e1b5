//! Cursor pagination over one namespace.
//!
//! Every list the store produces (feeds, author timelines, tag feeds,
//! relation listings) goes through [`select`], so they all share the same
//! bound and navigation semantics:
//!
//! ```text
//!   descending feed, page size 3, from = After(k7)
//!
//!   k10  k9  k8  k7 │ k6  k5  k4 │ k3  k2  k1
//!   ▲               │ ▲       ▲  │ ▲
//!   prev = After    │ first   last│ next = After(k4)
//!   (lookahead past │            │ (only because k3 exists)
//!    first, reversed)
//! ```
//!
//! `prev` is found by scanning the opposite way from the page's first key
//! and stepping `lookahead` entries further. When fewer than `lookahead`
//! entries precede the page, `prev` is [`Cursor::Start`], whose page can
//! overlap the current one. Pages stay stable and exhaustive when walked
//! forward through `next`.

use crate::error::Result;
use crate::keys::Namespace;
use crate::kv::{KvStore, Order, Scan};

/// Where a page starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cursor<K = Vec<u8>> {
    /// Beginning of the list in its declared order
    Start,
    /// Just past this key (exclusive)
    After(K),
}

impl<K> Cursor<K> {
    pub fn map<T>(self, f: impl FnOnce(K) -> T) -> Cursor<T> {
        match self {
            Cursor::Start => Cursor::Start,
            Cursor::After(k) => Cursor::After(f(k)),
        }
    }

    pub fn into_key(self) -> Option<K> {
        match self {
            Cursor::Start => None,
            Cursor::After(k) => Some(k),
        }
    }
}

/// Parameters of [`select`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageRequest {
    pub from: Option<Vec<u8>>,
    pub prefix: Option<Vec<u8>>,
    /// Page size, `0` for everything
    pub limit: usize,
    pub offset: usize,
    pub order: Order,
}

impl PageRequest {
    pub fn new(limit: usize) -> Self {
        Self { limit, ..Self::default() }
    }

    pub fn after(mut self, from: impl Into<Vec<u8>>) -> Self {
        self.from = Some(from.into());
        self
    }

    pub fn cursor(mut self, cursor: Cursor) -> Self {
        self.from = cursor.into_key();
        self
    }

    pub fn prefix(mut self, prefix: impl Into<Vec<u8>>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn order(mut self, order: Order) -> Self {
        self.order = order;
        self
    }

    fn scan(&self) -> Scan {
        Scan {
            from: self.from.clone(),
            prefix: self.prefix.clone(),
            limit: self.limit,
            offset: self.offset,
            order: self.order,
        }
    }
}

/// One page of entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    pub entries: Vec<(Vec<u8>, Vec<u8>)>,
    /// Key of the first entry on the page
    pub first: Option<Vec<u8>>,
    /// Key of the last entry; the `from` of the following page
    pub last: Option<Vec<u8>>,
    /// At least one more entry follows `last`
    pub more: bool,
}

impl Page {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &[u8]> {
        self.entries.iter().map(|(k, _)| k.as_slice())
    }
}

/// Links from one page to its neighbours and to the ends of the list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Navigation<K = Vec<u8>> {
    pub first: Option<K>,
    pub last: Option<K>,
    pub prev: Option<Cursor<K>>,
    pub next: Option<Cursor<K>>,
    /// Greatest key of the whole list
    pub newest: Option<K>,
    /// Smallest key of the whole list
    pub oldest: Option<K>,
}

impl<K> Default for Navigation<K> {
    fn default() -> Self {
        Self { first: None, last: None, prev: None, next: None, newest: None, oldest: None }
    }
}

impl<K> Navigation<K> {
    /// Convert every key, e.g. raw index keys into article ids.
    pub fn map<T>(self, mut f: impl FnMut(K) -> T) -> Navigation<T> {
        Navigation {
            first: self.first.map(&mut f),
            last: self.last.map(&mut f),
            prev: self.prev.map(|c| c.map(&mut f)),
            next: self.next.map(|c| c.map(&mut f)),
            newest: self.newest.map(&mut f),
            oldest: self.oldest.map(&mut f),
        }
    }
}

/// Fetch one page.
pub fn select<K: KvStore + ?Sized>(kv: &K, ns: &Namespace, req: &PageRequest) -> Result<Page> {
    let mut scan = req.scan();
    if req.limit > 0 {
        scan.limit = req.limit + 1;
    }
    let mut entries = kv.scan(ns, &scan)?;
    let more = req.limit > 0 && entries.len() > req.limit;
    if more {
        entries.truncate(req.limit);
    }
    Ok(Page {
        first: entries.first().map(|(k, _)| k.clone()),
        last: entries.last().map(|(k, _)| k.clone()),
        entries,
        more,
    })
}

/// Greatest (`Descending`) or smallest (`Ascending`) key, via a 1-item scan.
pub fn edge<K: KvStore + ?Sized>(
    kv: &K,
    ns: &Namespace,
    prefix: Option<&[u8]>,
    order: Order,
) -> Result<Option<Vec<u8>>> {
    let mut scan = Scan::ascending().order(order).limit(1);
    scan.prefix = prefix.map(<[u8]>::to_vec);
    Ok(kv.keys(ns, &scan)?.pop())
}

/// Build the navigation of `page`, which was selected with `req`.
pub fn navigate<K: KvStore + ?Sized>(
    kv: &K,
    ns: &Namespace,
    req: &PageRequest,
    page: &Page,
    lookahead: usize,
) -> Result<Navigation> {
    let prefix = req.prefix.as_deref();
    let prev = match &page.first {
        Some(first) => {
            let behind = kv.keys(
                ns,
                &Scan {
                    from: Some(first.clone()),
                    prefix: req.prefix.clone(),
                    limit: lookahead + 1,
                    offset: 0,
                    order: req.order.reverse(),
                },
            )?;
            match behind.len() {
                0 => None,
                n if n > lookahead => behind.into_iter().nth(lookahead).map(Cursor::After),
                _ => Some(Cursor::Start),
            }
        }
        None => None,
    };

    Ok(Navigation {
        first: page.first.clone(),
        last: page.last.clone(),
        prev,
        next: if page.more { page.last.clone().map(Cursor::After) } else { None },
        newest: edge(kv, ns, prefix, Order::Descending)?,
        oldest: edge(kv, ns, prefix, Order::Ascending)?,
    })
}
