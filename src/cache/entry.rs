//! Cached page records.
//!
//! A [`CacheEntry`] always holds decoded content: compression is undone before an
//! entry is built, and the encoding headers never make it into the [`HeaderSet`].

use std::collections::BTreeMap;

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use bytes::Bytes;

/// Content type forced onto every emitted page and attached to remote-tier entries.
pub const HTML_CONTENT_TYPE: &str = "text/html; charset=UTF-8";

/// Headers describing a single hop of the transfer rather than the page itself.
const TRANSPORT_HEADERS: [HeaderName; 9] = [
    header::CONNECTION,
    header::CONTENT_ENCODING,
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
    header::TE,
    header::TRAILER,
    header::UPGRADE,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
];

pub(crate) fn is_transport_header(name: &HeaderName) -> bool {
    TRANSPORT_HEADERS.contains(name) || name.as_str() == "keep-alive"
}

/// Ordered header mapping keyed by lowercase header name.
///
/// Multi-valued headers keep every value in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSet {
    values: BTreeMap<String, Vec<HeaderValue>>,
}

impl HeaderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Header set carried by pages recovered from the remote tier.
    pub fn html() -> Self {
        let mut headers = Self::new();
        headers.insert(
            &header::CONTENT_TYPE,
            HeaderValue::from_static(HTML_CONTENT_TYPE),
        );
        headers
    }

    /// Copy an origin response's headers, dropping transport-specific ones.
    pub fn from_origin(headers: &HeaderMap) -> Self {
        let mut set = Self::new();
        for (name, value) in headers {
            if is_transport_header(name) {
                continue;
            }
            set.append(name, value.clone());
        }
        set
    }

    /// Replace all values stored under `name`.
    pub fn insert(&mut self, name: &HeaderName, value: HeaderValue) {
        self.values.insert(name.as_str().to_owned(), vec![value]);
    }

    pub fn append(&mut self, name: &HeaderName, value: HeaderValue) {
        self.values
            .entry(name.as_str().to_owned())
            .or_default()
            .push(value);
    }

    /// First value stored under `name` (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        self.values
            .get(&name.to_ascii_lowercase())
            .and_then(|values| values.first())
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<HeaderValue>> {
        self.values.remove(&name.to_ascii_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(&name.to_ascii_lowercase())
    }

    /// Iterate `(name, value)` pairs, names in lexical order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.values
            .iter()
            .flat_map(|(name, values)| values.iter().map(move |value| (name.as_str(), value)))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// The unit of cached content.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub status: StatusCode,
    pub content: Bytes,
    pub headers: HeaderSet,
    /// Set only by the local tier once the entry outlives its fresh TTL.
    pub stale: bool,
}

impl CacheEntry {
    pub fn new(status: StatusCode, content: impl Into<Bytes>, headers: HeaderSet) -> Self {
        Self {
            status,
            content: content.into(),
            headers,
            stale: false,
        }
    }

    /// A `200 OK` HTML page with the fixed remote-tier header set.
    pub fn html(content: impl Into<Bytes>) -> Self {
        Self::new(StatusCode::OK, content, HeaderSet::html())
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Only successful pages are kept in the local tier.
    pub fn is_storable(&self) -> bool {
        self.status.is_success()
    }

    /// Copy suitable for sharing between clients: fresh, and without cookies.
    pub fn for_storage(&self) -> Self {
        let mut entry = self.clone();
        entry.headers.remove(header::SET_COOKIE.as_str());
        entry.stale = false;
        entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_origin_strips_transport_headers() {
        let mut origin = HeaderMap::new();
        origin.insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        origin.insert(header::CONTENT_LENGTH, HeaderValue::from_static("42"));
        origin.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        origin.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        origin.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/html"));
        origin.insert("x-magento-tags", HeaderValue::from_static("cms_p_1"));

        let set = HeaderSet::from_origin(&origin);

        assert!(!set.contains("content-encoding"));
        assert!(!set.contains("content-length"));
        assert!(!set.contains("connection"));
        assert!(!set.contains("keep-alive"));
        assert_eq!(set.get("Content-Type").unwrap(), "text/html");
        assert_eq!(set.get("X-Magento-Tags").unwrap(), "cms_p_1");
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn multi_valued_headers_keep_every_value() {
        let mut origin = HeaderMap::new();
        origin.append(header::SET_COOKIE, HeaderValue::from_static("a=1"));
        origin.append(header::SET_COOKIE, HeaderValue::from_static("b=2"));

        let set = HeaderSet::from_origin(&origin);
        let cookies: Vec<_> = set
            .iter()
            .filter(|(name, _)| *name == "set-cookie")
            .map(|(_, value)| value.to_str().unwrap().to_string())
            .collect();

        assert_eq!(cookies, vec!["a=1", "b=2"]);
    }

    #[test]
    fn insert_replaces_previous_values() {
        let mut set = HeaderSet::new();
        set.append(&header::VARY, HeaderValue::from_static("Cookie"));
        set.append(&header::VARY, HeaderValue::from_static("Accept"));
        set.insert(&header::VARY, HeaderValue::from_static("Accept-Encoding"));

        assert_eq!(set.iter().count(), 1);
        assert_eq!(set.get("vary").unwrap(), "Accept-Encoding");
    }

    #[test]
    fn storage_copy_drops_cookies_and_stale_flag() {
        let mut headers = HeaderSet::html();
        headers.append(&header::SET_COOKIE, HeaderValue::from_static("PHPSESSID=x"));
        let mut entry = CacheEntry::new(StatusCode::OK, "<html></html>", headers);
        entry.stale = true;

        let stored = entry.for_storage();

        assert!(!stored.stale);
        assert!(!stored.headers.contains("set-cookie"));
        assert!(entry.headers.contains("set-cookie"));
    }

    #[test]
    fn only_success_statuses_are_storable() {
        let ok = CacheEntry::html("ok");
        let missing = CacheEntry::new(StatusCode::NOT_FOUND, "nope", HeaderSet::html());
        let redirect = CacheEntry::new(StatusCode::FOUND, "", HeaderSet::new());

        assert!(ok.is_storable());
        assert!(!missing.is_storable());
        assert!(!redirect.is_storable());
    }
}
