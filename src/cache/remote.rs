//! Read path to the shared page store.
//!
//! The store is populated by the upstream application; this tier never writes.
//! Values may arrive in three shapes:
//!
//! - a raw gzip stream (`1f 8b ...`),
//! - the compressed envelope used by the application's Redis backend, `gz:` plus
//!   the gzip magic followed by a zlib stream,
//! - plain bytes.
//!
//! Once inflated, a JSON page record (`{"content": "...", ...}`) is unwrapped to
//! its `content` field. Anything that fails along the way is a miss.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use flate2::read::{GzDecoder, ZlibDecoder};
use metrics::counter;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use super::entry::CacheEntry;
use super::inflate::{DEFAULT_MAX_INFLATED_BYTES, InflateError, read_capped};
use super::keys::CacheKey;

pub(crate) const METRIC_REMOTE_HIT: &str = "fastcache_remote_hit_total";
pub(crate) const METRIC_REMOTE_MISS: &str = "fastcache_remote_miss_total";
pub(crate) const METRIC_REMOTE_ERROR: &str = "fastcache_remote_error_total";

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const ENVELOPE_PREFIX: &[u8] = b"gz:\x1f\x8b";

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote store unavailable: {message}")]
    Unavailable { message: String },
    #[error("remote store command failed: {message}")]
    Command { message: String },
}

impl RemoteError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn command(message: impl Into<String>) -> Self {
        Self::Command {
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("gzip value could not be inflated")]
    Gzip(#[source] io::Error),
    #[error("compressed envelope could not be inflated")]
    Envelope(#[source] io::Error),
    #[error("stored value inflates past {limit} bytes")]
    TooLarge { limit: usize },
}

/// Raw byte access to the shared store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch the value stored under `key`, `None` when absent.
    async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>, RemoteError>;
}

#[derive(Deserialize)]
struct PageRecord {
    content: String,
}

/// Turn a stored value into page content, inflating at most `max_inflated` bytes.
pub fn decode_remote(raw: &[u8], max_inflated: usize) -> Result<Bytes, DecodeError> {
    let inflated = if let Some(stream) = raw.strip_prefix(ENVELOPE_PREFIX) {
        read_capped(ZlibDecoder::new(stream), max_inflated).map_err(|err| match err {
            InflateError::Io(source) => DecodeError::Envelope(source),
            InflateError::TooLarge { limit } => DecodeError::TooLarge { limit },
        })?
    } else if raw.starts_with(GZIP_MAGIC) {
        read_capped(GzDecoder::new(raw), max_inflated).map_err(|err| match err {
            InflateError::Io(source) => DecodeError::Gzip(source),
            InflateError::TooLarge { limit } => DecodeError::TooLarge { limit },
        })?
    } else {
        raw.to_vec()
    };

    Ok(unwrap_page_record(inflated))
}

fn unwrap_page_record(payload: Vec<u8>) -> Bytes {
    let looks_like_object = payload
        .iter()
        .find(|byte| !byte.is_ascii_whitespace())
        .is_some_and(|byte| *byte == b'{');
    if !looks_like_object {
        return Bytes::from(payload);
    }

    match serde_json::from_slice::<PageRecord>(&payload) {
        Ok(record) => Bytes::from(record.content),
        Err(_) => Bytes::from(payload),
    }
}

/// Read-only view of the shared store, keyed by [`CacheKey`].
#[derive(Clone)]
pub struct RemoteTier {
    store: Option<Arc<dyn RemoteStore>>,
    key_prefix: String,
    max_value_bytes: usize,
}

impl Default for RemoteTier {
    fn default() -> Self {
        Self {
            store: None,
            key_prefix: String::new(),
            max_value_bytes: DEFAULT_MAX_INFLATED_BYTES,
        }
    }
}

impl RemoteTier {
    pub fn new(store: Arc<dyn RemoteStore>, key_prefix: impl Into<String>) -> Self {
        Self {
            store: Some(store),
            key_prefix: key_prefix.into(),
            ..Self::default()
        }
    }

    /// Cap the inflated size of a stored value; larger values are misses.
    pub fn with_max_value_bytes(mut self, limit: usize) -> Self {
        self.max_value_bytes = limit;
        self
    }

    /// A tier that always misses, used when no store is configured or reachable.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    pub fn store_key(&self, key: &CacheKey) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    /// Look up a page. Store errors and undecodable values are reported as misses.
    pub async fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let store = self.store.as_ref()?;
        let store_key = self.store_key(key);

        let raw = match store.fetch(&store_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                counter!(METRIC_REMOTE_MISS).increment(1);
                debug!(cache = "remote", key = %store_key, outcome = "miss");
                return None;
            }
            Err(err) => {
                counter!(METRIC_REMOTE_ERROR).increment(1);
                warn!(
                    cache = "remote",
                    key = %store_key,
                    error = %err,
                    "remote lookup failed, treating as miss"
                );
                return None;
            }
        };

        match decode_remote(&raw, self.max_value_bytes) {
            Ok(content) => {
                counter!(METRIC_REMOTE_HIT).increment(1);
                debug!(cache = "remote", key = %store_key, outcome = "hit", size = content.len());
                Some(CacheEntry::html(content))
            }
            Err(err) => {
                counter!(METRIC_REMOTE_ERROR).increment(1);
                warn!(
                    cache = "remote",
                    key = %store_key,
                    error = %err,
                    "remote value could not be decoded, treating as miss"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;
    use std::sync::Mutex;

    use flate2::Compression;
    use flate2::write::{GzEncoder, ZlibEncoder};

    use super::*;
    use crate::cache::keys::derive_key;

    const PAGE: &str = "<html><body>Women</body></html>";
    const LIMIT: usize = DEFAULT_MAX_INFLATED_BYTES;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn envelope(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        let mut out = ENVELOPE_PREFIX.to_vec();
        out.extend(encoder.finish().unwrap());
        out
    }

    #[derive(Default)]
    struct MapStore {
        values: HashMap<String, Vec<u8>>,
        fail: bool,
        requested: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RemoteStore for MapStore {
        async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>, RemoteError> {
            self.requested.lock().unwrap().push(key.to_string());
            if self.fail {
                return Err(RemoteError::unavailable("connection refused"));
            }
            Ok(self.values.get(key).cloned())
        }
    }

    fn key() -> CacheKey {
        derive_key(true, "https://shop.example.com/women.html", None)
    }

    #[test]
    fn inflates_raw_gzip() {
        assert_eq!(decode_remote(&gzip(PAGE.as_bytes()), LIMIT).unwrap(), PAGE);
    }

    #[test]
    fn inflates_envelope_and_unwraps_page_record() {
        let record = serde_json::json!({ "content": PAGE, "status_code": 200 }).to_string();
        assert_eq!(decode_remote(&envelope(record.as_bytes()), LIMIT).unwrap(), PAGE);
    }

    #[test]
    fn plain_values_pass_through() {
        assert_eq!(decode_remote(PAGE.as_bytes(), LIMIT).unwrap(), PAGE);
        assert_eq!(decode_remote(b"{not json", LIMIT).unwrap(), "{not json");
        assert_eq!(decode_remote(br#"{"other":1}"#, LIMIT).unwrap(), r#"{"other":1}"#);
    }

    #[test]
    fn corrupt_streams_are_errors() {
        let mut truncated = gzip(PAGE.as_bytes());
        truncated.truncate(12);
        assert!(matches!(decode_remote(&truncated, LIMIT), Err(DecodeError::Gzip(_))));

        let mut bad_envelope = ENVELOPE_PREFIX.to_vec();
        bad_envelope.extend_from_slice(b"garbage");
        assert!(matches!(
            decode_remote(&bad_envelope, LIMIT),
            Err(DecodeError::Envelope(_))
        ));
    }

    #[test]
    fn values_inflating_past_the_limit_are_refused() {
        let filler = vec![b' '; 1024 * 1024];
        assert!(matches!(
            decode_remote(&gzip(&filler), 4096),
            Err(DecodeError::TooLarge { limit: 4096 })
        ));
        assert!(matches!(
            decode_remote(&envelope(&filler), 4096),
            Err(DecodeError::TooLarge { limit: 4096 })
        ));
        assert_eq!(decode_remote(&gzip(&filler), filler.len()).unwrap().len(), filler.len());
    }

    #[tokio::test]
    async fn oversized_values_are_misses() {
        let tier = RemoteTier::new(
            Arc::new(MapStore {
                values: HashMap::from([(key().into_string(), gzip(&vec![b'x'; 64 * 1024]))]),
                ..Default::default()
            }),
            "",
        )
        .with_max_value_bytes(1024);

        assert!(tier.get(&key()).await.is_none());
    }

    #[tokio::test]
    async fn hit_yields_fresh_html_entry_under_prefixed_key() {
        let store_key = format!("zc:k:abc_{}", key());
        let store = Arc::new(MapStore {
            values: HashMap::from([(store_key.clone(), gzip(PAGE.as_bytes()))]),
            ..Default::default()
        });
        let tier = RemoteTier::new(store.clone(), "zc:k:abc_");

        let entry = tier.get(&key()).await.expect("remote hit");

        assert_eq!(entry.content, PAGE);
        assert!(!entry.stale);
        assert_eq!(
            entry.headers.get("content-type").unwrap(),
            "text/html; charset=UTF-8"
        );
        assert_eq!(*store.requested.lock().unwrap(), vec![store_key]);
    }

    #[tokio::test]
    async fn absent_failing_and_undecodable_values_are_misses() {
        let absent = RemoteTier::new(Arc::new(MapStore::default()), "");
        assert!(absent.get(&key()).await.is_none());

        let failing = RemoteTier::new(
            Arc::new(MapStore {
                fail: true,
                ..Default::default()
            }),
            "",
        );
        assert!(failing.get(&key()).await.is_none());

        let mut corrupt = gzip(PAGE.as_bytes());
        corrupt.truncate(12);
        let undecodable = RemoteTier::new(
            Arc::new(MapStore {
                values: HashMap::from([(key().into_string(), corrupt)]),
                ..Default::default()
            }),
            "",
        );
        assert!(undecodable.get(&key()).await.is_none());
    }

    #[tokio::test]
    async fn disabled_tier_always_misses() {
        let tier = RemoteTier::disabled();
        assert!(!tier.is_enabled());
        assert!(tier.get(&key()).await.is_none());
    }
}
