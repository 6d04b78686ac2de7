//! Tiered page resolution.
//!
//! Every cacheable request walks the tiers in the same order: local, remote,
//! origin. A stale local entry is served immediately while a detached task
//! fetches a replacement; at most one such task runs per key.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use metrics::{counter, histogram};
use tracing::{Instrument, debug, info_span, warn};

use super::entry::CacheEntry;
use super::keys::CacheKey;
use super::local::LocalTier;
use super::origin::{Origin, OriginError, OriginRequest};
use super::remote::RemoteTier;

pub(crate) const METRIC_ORIGIN_FETCH: &str = "fastcache_origin_fetch_total";
pub(crate) const METRIC_ORIGIN_ERROR: &str = "fastcache_origin_error_total";
pub(crate) const METRIC_ORIGIN_MS: &str = "fastcache_origin_fetch_ms";
pub(crate) const METRIC_REFRESH_SPAWNED: &str = "fastcache_refresh_spawned_total";
pub(crate) const METRIC_REFRESH_SKIPPED: &str = "fastcache_refresh_skipped_total";
pub(crate) const METRIC_REFRESH_FAILED: &str = "fastcache_refresh_failed_total";

/// How the page was obtained, as reported in `Fast-Cache`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Stale,
    Miss,
    Bypass,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Stale => "STALE",
            CacheStatus::Miss => "MISS",
            CacheStatus::Bypass => "BYPASS",
        }
    }
}

/// Which tier supplied the page, as reported in `Fast-Cache-Source`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Local,
    Remote,
    Origin,
}

impl Source {
    pub fn as_str(self) -> &'static str {
        match self {
            Source::Local => "local",
            Source::Remote => "remote",
            Source::Origin => "origin",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub entry: CacheEntry,
    pub status: CacheStatus,
    pub source: Source,
    /// Time spent consulting the cache tiers.
    pub lookup_elapsed: Option<Duration>,
    /// Time spent waiting on the origin, when it was contacted.
    pub origin_elapsed: Option<Duration>,
    pub refresh_spawned: bool,
}

pub struct CacheOrchestrator {
    local: Option<Arc<LocalTier>>,
    remote: RemoteTier,
    origin: Arc<dyn Origin>,
    in_flight: Arc<DashMap<CacheKey, ()>>,
    fresh_ttl: Duration,
}

impl CacheOrchestrator {
    pub fn new(
        local: Option<Arc<LocalTier>>,
        remote: RemoteTier,
        origin: Arc<dyn Origin>,
        fresh_ttl: Duration,
    ) -> Self {
        Self {
            local,
            remote,
            origin,
            in_flight: Arc::new(DashMap::new()),
            fresh_ttl,
        }
    }

    pub fn local(&self) -> Option<&Arc<LocalTier>> {
        self.local.as_ref()
    }

    pub fn remote(&self) -> &RemoteTier {
        &self.remote
    }

    /// Number of background refreshes currently running.
    pub fn refreshes_in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Resolve a cacheable request through local, remote, then origin.
    pub async fn resolve(
        &self,
        key: &CacheKey,
        request: OriginRequest,
    ) -> Result<Resolution, OriginError> {
        let lookup_start = Instant::now();

        if let Some(local) = &self.local
            && let Some(entry) = local.get(key)
        {
            let lookup_elapsed = Some(lookup_start.elapsed());
            if entry.stale {
                let refresh_spawned = self.spawn_refresh(local, key, request);
                debug!(cache = "local", key = %key, outcome = "stale", refresh_spawned);
                return Ok(Resolution {
                    entry,
                    status: CacheStatus::Stale,
                    source: Source::Local,
                    lookup_elapsed,
                    origin_elapsed: None,
                    refresh_spawned,
                });
            }

            debug!(cache = "local", key = %key, outcome = "hit");
            return Ok(Resolution {
                entry,
                status: CacheStatus::Hit,
                source: Source::Local,
                lookup_elapsed,
                origin_elapsed: None,
                refresh_spawned: false,
            });
        }

        if let Some(entry) = self.remote.get(key).await {
            self.store_locally(key, &entry);
            return Ok(Resolution {
                entry,
                status: CacheStatus::Hit,
                source: Source::Remote,
                lookup_elapsed: Some(lookup_start.elapsed()),
                origin_elapsed: None,
                refresh_spawned: false,
            });
        }
        let lookup_elapsed = Some(lookup_start.elapsed());

        let origin_start = Instant::now();
        let entry = self.fetch_origin(&request).await?;
        let origin_elapsed = Some(origin_start.elapsed());
        self.store_locally(key, &entry);

        Ok(Resolution {
            entry,
            status: CacheStatus::Miss,
            source: Source::Origin,
            lookup_elapsed,
            origin_elapsed,
            refresh_spawned: false,
        })
    }

    /// Forward a non-cacheable request; nothing is read from or written to the tiers.
    pub async fn bypass(&self, request: OriginRequest) -> Result<Resolution, OriginError> {
        let origin_start = Instant::now();
        let entry = self.fetch_origin(&request).await?;
        Ok(Resolution {
            entry,
            status: CacheStatus::Bypass,
            source: Source::Origin,
            lookup_elapsed: None,
            origin_elapsed: Some(origin_start.elapsed()),
            refresh_spawned: false,
        })
    }

    async fn fetch_origin(&self, request: &OriginRequest) -> Result<CacheEntry, OriginError> {
        let start = Instant::now();
        let result = self.origin.fetch(request).await;
        histogram!(METRIC_ORIGIN_MS).record(start.elapsed().as_secs_f64() * 1000.0);
        counter!(METRIC_ORIGIN_FETCH).increment(1);
        if result.is_err() {
            counter!(METRIC_ORIGIN_ERROR).increment(1);
        }
        result
    }

    fn store_locally(&self, key: &CacheKey, entry: &CacheEntry) {
        let Some(local) = &self.local else {
            return;
        };
        if !entry.is_storable() {
            debug!(cache = "local", key = %key, status = entry.status.as_u16(), "not storing non-success response");
            return;
        }
        local.set(key.clone(), entry.clone(), self.fresh_ttl);
    }

    /// Start a background refresh unless one is already running for `key`.
    fn spawn_refresh(&self, local: &Arc<LocalTier>, key: &CacheKey, request: OriginRequest) -> bool {
        match self.in_flight.entry(key.clone()) {
            Entry::Occupied(_) => {
                counter!(METRIC_REFRESH_SKIPPED).increment(1);
                debug!(key = %key, "refresh already in flight");
                return false;
            }
            Entry::Vacant(slot) => {
                slot.insert(());
            }
        }
        counter!(METRIC_REFRESH_SPAWNED).increment(1);

        let guard = InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
            key: key.clone(),
        };
        let local = Arc::clone(local);
        let origin = Arc::clone(&self.origin);
        let ttl = self.fresh_ttl;
        let key = key.clone();
        let span = info_span!("cache_refresh", key = %key);

        tokio::spawn(
            async move {
                let _guard = guard;
                match origin.fetch(&request).await {
                    Ok(entry) if entry.is_storable() => {
                        local.set(key, entry, ttl);
                        debug!("stale entry refreshed");
                    }
                    Ok(entry) => {
                        counter!(METRIC_REFRESH_FAILED).increment(1);
                        warn!(
                            status = entry.status.as_u16(),
                            "refresh returned non-success status, keeping stale entry"
                        );
                    }
                    Err(err) => {
                        counter!(METRIC_REFRESH_FAILED).increment(1);
                        warn!(error = %err, "refresh failed, keeping stale entry");
                    }
                }
            }
            .instrument(span),
        );
        true
    }
}

/// Clears the single-flight marker when the refresh task finishes or unwinds.
struct InFlightGuard {
    in_flight: Arc<DashMap<CacheKey, ()>>,
    key: CacheKey,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.key);
    }
}
