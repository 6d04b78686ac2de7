//! Tiered page cache.
//!
//! Pages are resolved through three tiers, always in this order:
//!
//! - **Local**: process memory with a fresh TTL and a stale window
//! - **Remote**: the shared store written by the upstream application (read-only)
//! - **Origin**: the backend itself
//!
//! ## Configuration
//!
//! Cache behavior is controlled via the `[cache]` and `[remote]` sections:
//!
//! ```toml
//! [cache]
//! local_enabled = true
//! fresh_ttl_seconds = 60
//! stale_enabled = true
//! stale_ttl_seconds = 432000
//! # ... see config.rs for all options
//! ```

mod classify;
mod config;
mod entry;
mod inflate;
mod keys;
mod local;
mod lock;
mod orchestrator;
mod origin;
mod remote;

pub use classify::Classifier;
pub use config::{
    CacheConfig, DEFAULT_EXCLUDED_PREFIXES, DEFAULT_STATIC_EXTENSIONS, DEFAULT_VARY_COOKIE,
};
pub use entry::{CacheEntry, HTML_CONTENT_TYPE, HeaderSet};
pub use inflate::DEFAULT_MAX_INFLATED_BYTES;
pub use keys::{CacheKey, DerivedKey, KeyDeriver, derive_key};
pub use local::{LocalEntryInfo, LocalTier};
pub use orchestrator::{CacheOrchestrator, CacheStatus, Resolution, Source};
pub use origin::{Origin, OriginError, OriginRequest, normalize_response};
pub use remote::{DecodeError, RemoteError, RemoteStore, RemoteTier, decode_remote};

pub(crate) mod metric_names {
    pub(crate) use super::local::{
        METRIC_LOCAL_EVICT, METRIC_LOCAL_HIT, METRIC_LOCAL_MISS, METRIC_LOCAL_STALE,
    };
    pub(crate) use super::orchestrator::{
        METRIC_ORIGIN_ERROR, METRIC_ORIGIN_FETCH, METRIC_ORIGIN_MS, METRIC_REFRESH_FAILED,
        METRIC_REFRESH_SKIPPED, METRIC_REFRESH_SPAWNED,
    };
    pub(crate) use super::remote::{METRIC_REMOTE_ERROR, METRIC_REMOTE_HIT, METRIC_REMOTE_MISS};
}
