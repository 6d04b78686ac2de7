//! Writes resolved pages to the client.

use std::time::{Duration, Instant};

use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, HeaderValue, header},
    response::Response,
};
use bytes::Bytes;

use crate::cache::{CacheEntry, CacheStatus, DerivedKey, HTML_CONTENT_TYPE, Resolution};

pub const FAST_CACHE: HeaderName = HeaderName::from_static("fast-cache");
pub const FAST_CACHE_SOURCE: HeaderName = HeaderName::from_static("fast-cache-source");
pub const FAST_CACHE_TIME: HeaderName = HeaderName::from_static("fast-cache-time");
pub const FAST_CACHE_LENGTH: HeaderName = HeaderName::from_static("fast-cache-length");
pub const FAST_CACHE_KEY: HeaderName = HeaderName::from_static("fast-cache-key");
pub const FAST_CACHE_URL: HeaderName = HeaderName::from_static("fast-cache-url");
pub const X_RESPONSE_TIME: HeaderName = HeaderName::from_static("x-response-time");
pub const X_PROXY_TIME: HeaderName = HeaderName::from_static("x-proxy-time");
pub const X_CACHE_LOOKUP_TIME: HeaderName = HeaderName::from_static("x-cache-lookup-time");

const BODY_CLOSE: &[u8] = b"</body>";

#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseEmitter {
    diagnostics: bool,
}

impl ResponseEmitter {
    pub fn new(diagnostics: bool) -> Self {
        Self { diagnostics }
    }

    /// Build the client response for `resolution`.
    ///
    /// `started` marks when the request entered the proxy; `derived` is absent for
    /// requests that bypassed the cache.
    pub fn emit(
        &self,
        resolution: Resolution,
        derived: Option<&DerivedKey>,
        started: Instant,
    ) -> Response {
        let Resolution {
            entry,
            status: cache_status,
            source,
            lookup_elapsed,
            origin_elapsed,
            ..
        } = resolution;
        let CacheEntry {
            status,
            content,
            headers: stored,
            ..
        } = entry;

        let content_length = content.len();
        let elapsed = started.elapsed();
        let content = if self.diagnostics {
            let footer = debug_footer(elapsed, content_length, cache_status, derived);
            insert_before_body_close(&content, &footer)
        } else {
            content
        };

        let mut response = Response::new(Body::from(content));
        *response.status_mut() = status;

        let headers = response.headers_mut();
        for (name, value) in stored.iter() {
            if let Ok(name) = HeaderName::from_bytes(name.as_bytes()) {
                headers.append(name, value.clone());
            }
        }

        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(HTML_CONTENT_TYPE),
        );
        headers.insert(FAST_CACHE, HeaderValue::from_static(cache_status.as_str()));
        headers.insert(FAST_CACHE_SOURCE, HeaderValue::from_static(source.as_str()));
        headers.insert(FAST_CACHE_TIME, millis(elapsed));
        headers.insert(FAST_CACHE_LENGTH, HeaderValue::from(content_length));
        headers.insert(X_RESPONSE_TIME, millis(started.elapsed()));
        if let Some(origin_elapsed) = origin_elapsed {
            headers.insert(X_PROXY_TIME, millis(origin_elapsed));
        }
        if let Some(lookup_elapsed) = lookup_elapsed {
            headers.insert(X_CACHE_LOOKUP_TIME, millis(lookup_elapsed));
        }
        if self.diagnostics
            && let Some(derived) = derived
        {
            insert_diagnostics(headers, derived);
        }

        response
    }
}

fn insert_diagnostics(headers: &mut HeaderMap, derived: &DerivedKey) {
    if let Ok(key) = HeaderValue::from_str(derived.key.as_str()) {
        headers.insert(FAST_CACHE_KEY, key);
    }
    if let Ok(url) = HeaderValue::from_str(&derived.url) {
        headers.insert(FAST_CACHE_URL, url);
    }
}

fn millis(duration: Duration) -> HeaderValue {
    let formatted = format!("{:.2}ms", duration.as_secs_f64() * 1000.0);
    HeaderValue::from_str(&formatted).unwrap_or_else(|_| HeaderValue::from_static("0.00ms"))
}

fn debug_footer(
    elapsed: Duration,
    size: usize,
    status: CacheStatus,
    derived: Option<&DerivedKey>,
) -> String {
    let (key, url) = derived
        .map(|derived| (derived.key.as_str(), derived.url.as_str()))
        .unwrap_or(("", ""));
    format!(
        "\n<!-- Fast-Cache Debug Info:\n     Time: {:.2}ms\n     Size: {size} bytes\n     Cache: {}\n     Key: {key}\n     URL: {url}\n-->",
        elapsed.as_secs_f64() * 1000.0,
        status.as_str(),
    )
}

/// Insert `footer` before the first `</body>`; content without one is unchanged.
fn insert_before_body_close(content: &Bytes, footer: &str) -> Bytes {
    let Some(index) = content
        .windows(BODY_CLOSE.len())
        .position(|window| window == BODY_CLOSE)
    else {
        return content.clone();
    };

    let mut out = Vec::with_capacity(content.len() + footer.len());
    out.extend_from_slice(&content[..index]);
    out.extend_from_slice(footer.as_bytes());
    out.extend_from_slice(&content[index..]);
    Bytes::from(out)
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use super::*;
    use crate::cache::{HeaderSet, Source, derive_key};

    fn resolution(content: &str, status: CacheStatus, source: Source) -> Resolution {
        let mut headers = HeaderSet::new();
        headers.insert(&header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        headers.append(&header::CACHE_CONTROL, HeaderValue::from_static("max-age=60"));
        Resolution {
            entry: CacheEntry::new(StatusCode::OK, content.to_string(), headers),
            status,
            source,
            lookup_elapsed: Some(Duration::from_micros(250)),
            origin_elapsed: None,
            refresh_spawned: false,
        }
    }

    fn derived() -> DerivedKey {
        let url = "https://shop.example.com/women.html".to_string();
        DerivedKey {
            key: derive_key(true, &url, None),
            url,
        }
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn sets_cache_headers_and_forces_html() {
        let response = ResponseEmitter::new(false).emit(
            resolution("<html></html>", CacheStatus::Hit, Source::Local),
            Some(&derived()),
            Instant::now(),
        );
        let headers = response.headers();

        assert_eq!(headers[header::CONTENT_TYPE], HTML_CONTENT_TYPE);
        assert_eq!(headers[header::CACHE_CONTROL], "max-age=60");
        assert_eq!(headers[FAST_CACHE], "HIT");
        assert_eq!(headers[FAST_CACHE_SOURCE], "local");
        assert_eq!(headers[FAST_CACHE_LENGTH], "13");
        assert!(headers[FAST_CACHE_TIME].to_str().unwrap().ends_with("ms"));
        assert!(headers.contains_key(X_RESPONSE_TIME));
        assert_eq!(headers[X_CACHE_LOOKUP_TIME], "0.25ms");
        assert!(!headers.contains_key(X_PROXY_TIME));
        assert!(!headers.contains_key(FAST_CACHE_KEY));
        assert_eq!(body_string(response).await, "<html></html>");
    }

    #[tokio::test]
    async fn preserves_origin_status_and_proxy_timing() {
        let mut resolved = resolution("gone", CacheStatus::Bypass, Source::Origin);
        resolved.entry.status = StatusCode::NOT_FOUND;
        resolved.lookup_elapsed = None;
        resolved.origin_elapsed = Some(Duration::from_millis(12));

        let response = ResponseEmitter::new(false).emit(resolved, None, Instant::now());

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[FAST_CACHE], "BYPASS");
        assert_eq!(response.headers()[X_PROXY_TIME], "12.00ms");
        assert!(!response.headers().contains_key(X_CACHE_LOOKUP_TIME));
    }

    #[tokio::test]
    async fn diagnostics_add_key_headers_and_footer() {
        let derived = derived();
        let response = ResponseEmitter::new(true).emit(
            resolution(
                "<html><body>a</body></html><body>b</body>",
                CacheStatus::Stale,
                Source::Local,
            ),
            Some(&derived),
            Instant::now(),
        );

        assert_eq!(
            response.headers()[FAST_CACHE_KEY],
            derived.key.as_str()
        );
        assert_eq!(response.headers()[FAST_CACHE_URL], derived.url.as_str());
        assert_eq!(response.headers()[FAST_CACHE_LENGTH], "41");

        let body = body_string(response).await;
        let footer_at = body.find("<!-- Fast-Cache Debug Info:").expect("footer present");
        assert!(footer_at < body.find("</body>").unwrap());
        assert_eq!(body.matches("Fast-Cache Debug Info").count(), 1);
        assert!(body.contains("Cache: STALE"));
        assert!(body.contains(&format!("Key: {}", derived.key)));
        assert!(body.contains("Size: 41 bytes"));
    }

    #[tokio::test]
    async fn footer_is_skipped_without_body_close() {
        let response = ResponseEmitter::new(true).emit(
            resolution("body { color: red }", CacheStatus::Hit, Source::Remote),
            Some(&derived()),
            Instant::now(),
        );

        assert_eq!(body_string(response).await, "body { color: red }");
    }
}
