//! Key-addressed query store shared by the listing and mutation controllers.
//!
//! Values are held as `Arc<CachedValue>` and only ever replaced wholesale, so
//! a snapshot taken earlier keeps pointing at the exact prior value.
//!
//! Every write that originates from a remote read goes through a
//! [`FetchTicket`]. Cancelling in-flight fetches for a scope bumps the epoch
//! of each matching entry, and a ticket whose epoch no longer matches is
//! rejected on completion.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use lru::LruCache;
use metrics::counter;
use tracing::debug;

use crate::domain::{ImageRecord, ListingPage};

use super::config::CacheConfig;
use super::keys::{CacheKey, KeyScope};
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";

const METRIC_CACHE_HIT: &str = "pictura_cache_hit_total";
const METRIC_CACHE_MISS: &str = "pictura_cache_miss_total";
const METRIC_CACHE_EVICT: &str = "pictura_cache_evict_total";

/// Pages of an infinite listing, in load order.
///
/// `page_params[i]` is the cursor that produced `pages[i]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InfinitePages {
    pub pages: Vec<ListingPage>,
    pub page_params: Vec<u32>,
}

impl InfinitePages {
    pub fn first(page: ListingPage, param: u32) -> Self {
        Self {
            pages: vec![page],
            page_params: vec![param],
        }
    }

    pub fn push(&mut self, page: ListingPage, param: u32) {
        self.pages.push(page);
        self.page_params.push(param);
    }

    pub fn last_page(&self) -> Option<&ListingPage> {
        self.pages.last()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedValue {
    Page(ListingPage),
    Pages(InfinitePages),
    Detail(ImageRecord),
    /// The recent-uploads overlay.
    Images(Vec<ImageRecord>),
    Tags(Vec<String>),
}

impl CachedValue {
    pub fn as_page(&self) -> Option<&ListingPage> {
        match self {
            Self::Page(page) => Some(page),
            _ => None,
        }
    }

    pub fn as_pages(&self) -> Option<&InfinitePages> {
        match self {
            Self::Pages(pages) => Some(pages),
            _ => None,
        }
    }

    pub fn as_detail(&self) -> Option<&ImageRecord> {
        match self {
            Self::Detail(record) => Some(record),
            _ => None,
        }
    }

    pub fn as_images(&self) -> Option<&[ImageRecord]> {
        match self {
            Self::Images(images) => Some(images),
            _ => None,
        }
    }

    pub fn as_tags(&self) -> Option<&[String]> {
        match self {
            Self::Tags(tags) => Some(tags),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: Option<Arc<CachedValue>>,
    updated_at: Instant,
    stale: bool,
    epoch: u64,
}

impl Entry {
    fn pending(epoch: u64) -> Self {
        Self {
            value: None,
            updated_at: Instant::now(),
            stale: true,
            epoch,
        }
    }

    fn filled(value: Arc<CachedValue>, epoch: u64) -> Self {
        Self {
            value: Some(value),
            updated_at: Instant::now(),
            stale: false,
            epoch,
        }
    }

    fn is_fresh(&self, max_age: Duration) -> bool {
        !self.stale && self.updated_at.elapsed() < max_age
    }
}

/// Proof that a remote read started for `key` at a given epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    key: CacheKey,
    epoch: u64,
}

impl FetchTicket {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }
}

#[derive(Debug, Clone)]
struct SnapshotEntry {
    value: Arc<CachedValue>,
    updated_at: Instant,
    stale: bool,
}

/// Prior values of every entry rewritten by [`QueryStore::patch_matching`].
#[derive(Debug, Clone, Default)]
pub struct CacheSnapshot {
    entries: Vec<(CacheKey, SnapshotEntry)>,
}

impl CacheSnapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &CacheKey> {
        self.entries.iter().map(|(key, _)| key)
    }
}

pub struct QueryStore {
    entries: RwLock<LruCache<CacheKey, Entry>>,
    next_epoch: AtomicU64,
}

impl QueryStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(config.entry_limit_non_zero())),
            next_epoch: AtomicU64::new(1),
        }
    }

    fn epoch(&self) -> u64 {
        self.next_epoch.fetch_add(1, Ordering::Relaxed)
    }

    fn put(entries: &mut LruCache<CacheKey, Entry>, key: CacheKey, entry: Entry) {
        let kind = key.kind();
        let pushed = key.clone();
        if let Some((evicted, _)) = entries.push(key, entry)
            && evicted != pushed
        {
            counter!(METRIC_CACHE_EVICT, "kind" => evicted.kind()).increment(1);
            debug!(key = %evicted, inserted = kind, "Evicted cache entry");
        }
    }

    /// Current value regardless of freshness.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<CachedValue>> {
        let value = rw_write(&self.entries, SOURCE, "get")
            .get(key)
            .and_then(|entry| entry.value.clone());
        record_lookup(key, value.is_some());
        value
    }

    /// Value only if it is present, not invalidated and younger than `max_age`.
    pub fn get_fresh(&self, key: &CacheKey, max_age: Duration) -> Option<Arc<CachedValue>> {
        let value = rw_write(&self.entries, SOURCE, "get_fresh")
            .get(key)
            .filter(|entry| entry.is_fresh(max_age))
            .and_then(|entry| entry.value.clone());
        record_lookup(key, value.is_some());
        value
    }

    /// Replaces the entry and rejects any outstanding fetch for it.
    pub fn set(&self, key: CacheKey, value: CachedValue) -> Arc<CachedValue> {
        let value = Arc::new(value);
        let entry = Entry::filled(Arc::clone(&value), self.epoch());
        let mut entries = rw_write(&self.entries, SOURCE, "set");
        Self::put(&mut entries, key, entry);
        value
    }

    /// Set-with-updater. Returning `None` from `f` leaves the entry untouched.
    pub fn update<F>(&self, key: CacheKey, f: F) -> Option<Arc<CachedValue>>
    where
        F: FnOnce(Option<&CachedValue>) -> Option<CachedValue>,
    {
        let mut entries = rw_write(&self.entries, SOURCE, "update");
        let current = entries.peek(&key).and_then(|entry| entry.value.clone());
        let next = Arc::new(f(current.as_deref())?);
        let entry = Entry::filled(Arc::clone(&next), self.epoch());
        Self::put(&mut entries, key, entry);
        Some(next)
    }

    pub fn remove_matching(&self, scope: &KeyScope) -> usize {
        let mut entries = rw_write(&self.entries, SOURCE, "remove_matching");
        let doomed: Vec<CacheKey> = entries
            .iter()
            .filter(|(key, _)| scope.matches(key))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            entries.pop(key);
        }
        debug!(%scope, removed = doomed.len(), "Removed cache entries");
        doomed.len()
    }

    /// Marks matching entries stale; values stay readable through [`Self::get`].
    pub fn invalidate_matching(&self, scope: &KeyScope) -> usize {
        let mut entries = rw_write(&self.entries, SOURCE, "invalidate_matching");
        let mut count = 0;
        for (_, entry) in entries.iter_mut().filter(|(key, _)| scope.matches(key)) {
            entry.stale = true;
            count += 1;
        }
        debug!(%scope, invalidated = count, "Invalidated cache entries");
        count
    }

    /// Registers a remote read for `key`, superseding any earlier ticket.
    pub fn begin_fetch(&self, key: CacheKey) -> FetchTicket {
        let epoch = self.epoch();
        let mut entries = rw_write(&self.entries, SOURCE, "begin_fetch");
        match entries.get_mut(&key) {
            Some(entry) => entry.epoch = epoch,
            None => Self::put(&mut entries, key.clone(), Entry::pending(epoch)),
        }
        FetchTicket { key, epoch }
    }

    /// Writes `value` if the ticket is still current. Returns whether it was written.
    pub fn complete_fetch(&self, ticket: &FetchTicket, value: CachedValue) -> bool {
        self.complete_fetch_with(ticket, |_| value).is_some()
    }

    /// Like [`Self::complete_fetch`], deriving the new value from the current one.
    pub fn complete_fetch_with<F>(&self, ticket: &FetchTicket, f: F) -> Option<Arc<CachedValue>>
    where
        F: FnOnce(Option<&CachedValue>) -> CachedValue,
    {
        let mut entries = rw_write(&self.entries, SOURCE, "complete_fetch");
        let Some(entry) = entries.get_mut(&ticket.key) else {
            debug!(key = %ticket.key, "Dropped fetch result for removed entry");
            return None;
        };
        if entry.epoch != ticket.epoch {
            debug!(key = %ticket.key, "Dropped fetch result for cancelled ticket");
            return None;
        }
        let next = Arc::new(f(entry.value.as_deref()));
        entry.value = Some(Arc::clone(&next));
        entry.updated_at = Instant::now();
        entry.stale = false;
        Some(next)
    }

    /// Rejects every outstanding ticket for keys in `scope`.
    pub fn cancel_in_flight(&self, scope: &KeyScope) -> usize {
        let mut entries = rw_write(&self.entries, SOURCE, "cancel_in_flight");
        let mut count = 0;
        for (_, entry) in entries.iter_mut().filter(|(key, _)| scope.matches(key)) {
            entry.epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
            count += 1;
        }
        debug!(%scope, cancelled = count, "Cancelled in-flight fetches");
        count
    }

    /// Snapshots and rewrites every populated entry in `scope` under one lock.
    ///
    /// `f` returning `None` keeps that entry as is; it is still snapshotted.
    pub fn patch_matching<F>(&self, scope: &KeyScope, mut f: F) -> CacheSnapshot
    where
        F: FnMut(&CachedValue) -> Option<CachedValue>,
    {
        let mut entries = rw_write(&self.entries, SOURCE, "patch_matching");
        let mut snapshot = CacheSnapshot::default();
        for (key, entry) in entries.iter_mut().filter(|(key, _)| scope.matches(key)) {
            let Some(current) = entry.value.clone() else {
                continue;
            };
            let patched = f(&current);
            snapshot.entries.push((
                key.clone(),
                SnapshotEntry {
                    value: current,
                    updated_at: entry.updated_at,
                    stale: entry.stale,
                },
            ));
            if let Some(patched) = patched {
                entry.value = Some(Arc::new(patched));
            }
        }
        snapshot
    }

    /// Puts back exactly the values captured in `snapshot`.
    pub fn restore(&self, snapshot: CacheSnapshot) {
        let mut entries = rw_write(&self.entries, SOURCE, "restore");
        for (key, saved) in snapshot.entries {
            let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
            let entry = Entry {
                value: Some(saved.value),
                updated_at: saved.updated_at,
                stale: saved.stale,
                epoch,
            };
            match entries.get_mut(&key) {
                Some(existing) => *existing = entry,
                None => Self::put(&mut entries, key, entry),
            }
        }
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn record_lookup(key: &CacheKey, hit: bool) {
    let name = if hit { METRIC_CACHE_HIT } else { METRIC_CACHE_MISS };
    counter!(name, "kind" => key.kind()).increment(1);
}
