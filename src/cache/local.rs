//! Process-local page tier.
//!
//! Entries move through `Fresh -> Stale -> Gone` purely by comparing the current
//! time against two deadlines stored with each entry. There is no timer: every
//! read evaluates the phase, and [`LocalTier::purge_expired`] reclaims entries
//! nobody asks for again. Without stale retention an entry goes straight from
//! `Fresh` to `Gone`.

use std::sync::RwLock;
use std::time::{Duration, Instant};

use lru::LruCache;
use metrics::counter;
use time::OffsetDateTime;
use tracing::debug;

use super::config::CacheConfig;
use super::entry::CacheEntry;
use super::keys::CacheKey;
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::local";

pub(crate) const METRIC_LOCAL_HIT: &str = "fastcache_local_hit_total";
pub(crate) const METRIC_LOCAL_STALE: &str = "fastcache_local_stale_total";
pub(crate) const METRIC_LOCAL_MISS: &str = "fastcache_local_miss_total";
pub(crate) const METRIC_LOCAL_EVICT: &str = "fastcache_local_evict_total";

struct Slot {
    entry: CacheEntry,
    fresh_until: Instant,
    stale_until: Option<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Fresh,
    Stale,
    Gone,
}

impl Slot {
    fn phase(&self, now: Instant) -> Phase {
        if now < self.fresh_until {
            Phase::Fresh
        } else if self.stale_until.is_some_and(|deadline| now < deadline) {
            Phase::Stale
        } else {
            Phase::Gone
        }
    }

    fn deadline(&self, phase: Phase) -> Instant {
        match phase {
            Phase::Fresh => self.fresh_until,
            Phase::Stale | Phase::Gone => self.stale_until.unwrap_or(self.fresh_until),
        }
    }
}

/// Listing row describing one locally held page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEntryInfo {
    pub key: CacheKey,
    pub size: usize,
    pub stale: bool,
    /// When the current phase ends: end of the fresh TTL, or of the stale window.
    pub expires_at: OffsetDateTime,
}

/// In-memory page cache with a fresh TTL and an optional stale window.
///
/// Bounded by an LRU so a crawl over many distinct URLs cannot grow it without
/// limit. All state sits behind one lock; readers never see a partial entry.
pub struct LocalTier {
    slots: RwLock<LruCache<CacheKey, Slot>>,
    stale_window: Option<Duration>,
}

impl LocalTier {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            slots: RwLock::new(LruCache::new(config.max_entries_non_zero())),
            stale_window: config.stale_window(),
        }
    }

    pub fn stale_window(&self) -> Option<Duration> {
        self.stale_window
    }

    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.get_at(key, Instant::now())
    }

    /// Look up `key` as of `now`, demoting or dropping it if its deadlines passed.
    pub fn get_at(&self, key: &CacheKey, now: Instant) -> Option<CacheEntry> {
        let mut slots = rw_write(&self.slots, SOURCE, "get");

        let Some(phase) = slots.peek(key).map(|slot| slot.phase(now)) else {
            counter!(METRIC_LOCAL_MISS).increment(1);
            return None;
        };

        match phase {
            Phase::Gone => {
                slots.pop(key);
                debug!(cache = "local", key = %key, "entry past its stale window, removed");
                counter!(METRIC_LOCAL_MISS).increment(1);
                None
            }
            Phase::Fresh => {
                counter!(METRIC_LOCAL_HIT).increment(1);
                slots.get(key).map(|slot| slot.entry.clone())
            }
            Phase::Stale => {
                counter!(METRIC_LOCAL_STALE).increment(1);
                let slot = slots.get_mut(key)?;
                if !slot.entry.stale {
                    debug!(cache = "local", key = %key, "entry demoted to stale");
                    slot.entry.stale = true;
                }
                Some(slot.entry.clone())
            }
        }
    }

    /// Store `entry` as fresh for `ttl`. Returns the key pushed out by capacity.
    pub fn set(&self, key: CacheKey, entry: CacheEntry, ttl: Duration) -> Option<CacheKey> {
        self.set_at(key, entry, ttl, Instant::now())
    }

    pub fn set_at(
        &self,
        key: CacheKey,
        entry: CacheEntry,
        ttl: Duration,
        now: Instant,
    ) -> Option<CacheKey> {
        let fresh_until = now + ttl;
        let slot = Slot {
            entry: entry.for_storage(),
            fresh_until,
            stale_until: self.stale_window.map(|window| fresh_until + window),
        };

        let evicted = rw_write(&self.slots, SOURCE, "set")
            .push(key.clone(), slot)
            .map(|(evicted_key, _)| evicted_key)
            .filter(|evicted_key| *evicted_key != key);

        if let Some(evicted_key) = &evicted {
            counter!(METRIC_LOCAL_EVICT).increment(1);
            debug!(cache = "local", key = %evicted_key, "evicted by capacity");
        }
        evicted
    }

    pub fn remove(&self, key: &CacheKey) -> bool {
        rw_write(&self.slots, SOURCE, "remove").pop(key).is_some()
    }

    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    /// Drop every entry past its last deadline; returns how many were removed.
    pub fn purge_expired_at(&self, now: Instant) -> usize {
        let mut slots = rw_write(&self.slots, SOURCE, "purge_expired");
        let gone: Vec<CacheKey> = slots
            .iter()
            .filter(|(_, slot)| slot.phase(now) == Phase::Gone)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &gone {
            slots.pop(key);
        }
        gone.len()
    }

    pub fn snapshot(&self) -> Vec<LocalEntryInfo> {
        self.snapshot_at(Instant::now(), OffsetDateTime::now_utc())
    }

    /// Enumerate live entries, most recently used first.
    pub fn snapshot_at(&self, now: Instant, wall_now: OffsetDateTime) -> Vec<LocalEntryInfo> {
        rw_read(&self.slots, SOURCE, "snapshot")
            .iter()
            .filter_map(|(key, slot)| {
                let phase = slot.phase(now);
                if phase == Phase::Gone {
                    return None;
                }
                let remaining = slot.deadline(phase).saturating_duration_since(now);
                Some(LocalEntryInfo {
                    key: key.clone(),
                    size: slot.entry.len(),
                    stale: phase == Phase::Stale,
                    expires_at: wall_now + remaining,
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        rw_read(&self.slots, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
