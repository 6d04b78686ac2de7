//! Cache configuration.
//!
//! Controls the local tier, key derivation and request classification.

use std::num::NonZeroUsize;
use std::time::Duration;

// Default values for cache configuration
const DEFAULT_FRESH_TTL_SECS: u64 = 60;
const DEFAULT_STALE_TTL_SECS: u64 = 432_000;
const DEFAULT_MAX_ENTRIES: usize = 10_000;
const DEFAULT_PURGE_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_VARY_COOKIE: &str = "X-Magento-Vary";
pub const DEFAULT_EXCLUDED_PREFIXES: [&str; 5] =
    ["/customer", "/media", "/admin", "/checkout", "/cf/"];
pub const DEFAULT_STATIC_EXTENSIONS: [&str; 7] = ["css", "js", "png", "jpg", "jpeg", "gif", "svg"];

/// Cache configuration resolved from [`crate::config::CacheSettings`].
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Keep pages in process memory.
    pub local_enabled: bool,
    /// How long a locally stored page is served as fresh.
    pub fresh_ttl: Duration,
    /// Keep expired pages around and serve them while refreshing.
    pub stale_enabled: bool,
    /// How long an expired page stays servable as stale.
    pub stale_ttl: Duration,
    /// Maximum pages held by the local tier.
    pub max_entries: usize,
    /// Cadence of the sweep that drops pages past their stale window.
    pub purge_interval: Duration,
    /// Treat every request as HTTPS when deriving keys.
    pub force_https: bool,
    /// Host used in cache keys instead of the request `Host`.
    pub key_host: Option<String>,
    /// Cookie carrying the variation token.
    pub vary_cookie: String,
    /// Expose keys and timing in responses.
    pub diagnostics: bool,
    /// Path prefixes that are never cached.
    pub excluded_prefixes: Vec<String>,
    /// File extensions always considered cacheable.
    pub static_extensions: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            local_enabled: true,
            fresh_ttl: Duration::from_secs(DEFAULT_FRESH_TTL_SECS),
            stale_enabled: true,
            stale_ttl: Duration::from_secs(DEFAULT_STALE_TTL_SECS),
            max_entries: DEFAULT_MAX_ENTRIES,
            purge_interval: Duration::from_secs(DEFAULT_PURGE_INTERVAL_SECS),
            force_https: true,
            key_host: None,
            vary_cookie: DEFAULT_VARY_COOKIE.to_string(),
            diagnostics: false,
            excluded_prefixes: DEFAULT_EXCLUDED_PREFIXES
                .iter()
                .map(|prefix| prefix.to_string())
                .collect(),
            static_extensions: DEFAULT_STATIC_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            local_enabled: settings.local_enabled,
            fresh_ttl: settings.fresh_ttl,
            stale_enabled: settings.stale_enabled,
            stale_ttl: settings.stale_ttl,
            max_entries: settings.max_entries.get(),
            purge_interval: settings.purge_interval,
            force_https: settings.force_https,
            key_host: settings.key_host.clone(),
            vary_cookie: settings.vary_cookie.clone(),
            diagnostics: settings.diagnostics,
            excluded_prefixes: settings.excluded_prefixes.clone(),
            static_extensions: settings.static_extensions.clone(),
        }
    }
}

impl CacheConfig {
    /// Stale retention window, or `None` when expired pages are dropped at once.
    pub fn stale_window(&self) -> Option<Duration> {
        (self.stale_enabled && !self.stale_ttl.is_zero()).then_some(self.stale_ttl)
    }

    /// Returns the local capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn max_entries_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_entries).unwrap_or(NonZeroUsize::MIN)
    }
}
