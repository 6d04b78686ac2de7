//! Cache key derivation.
//!
//! Keys are compatible with the page-cache identifiers written by the upstream
//! application: the JSON triple `[https, url, vary]`, every `/` escaped as `\/`,
//! hashed with MD5 and rendered as uppercase hex. Processes sharing one remote
//! store therefore agree on keys without coordinating.

use std::fmt;

use axum::http::HeaderMap;
use axum_extra::extract::cookie::CookieJar;
use serde_json::json;

use super::config::CacheConfig;

const FORWARDED_PROTO_HEADER: &str = "x-forwarded-proto";

/// Canonical 32-character uppercase hex cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Hash a resolved `(https, url, vary)` triple into a [`CacheKey`].
///
/// An absent variation token serializes as `null`, so it never collides with an
/// empty-string token.
pub fn derive_key(https: bool, url: &str, vary: Option<&str>) -> CacheKey {
    let digest = md5::compute(key_material(https, url, vary).as_bytes());
    CacheKey(hex::encode_upper(digest.0))
}

pub(crate) fn key_material(https: bool, url: &str, vary: Option<&str>) -> String {
    json!([https, url, vary]).to_string().replace('/', "\\/")
}

/// A derived key together with the URL it was computed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedKey {
    pub key: CacheKey,
    pub url: String,
}

/// Builds cache keys from request metadata using the configured key policy.
#[derive(Debug, Clone)]
pub struct KeyDeriver {
    force_https: bool,
    host_override: Option<String>,
    vary_cookie: String,
}

impl KeyDeriver {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            force_https: config.force_https,
            host_override: config.key_host.clone(),
            vary_cookie: config.vary_cookie.clone(),
        }
    }

    /// Derive the key for `(scheme, host, path, token)`.
    ///
    /// `secure_scheme` reports whether the request itself arrived over TLS; the
    /// configured force flag also turns the key secure.
    pub fn derive(
        &self,
        secure_scheme: bool,
        host: &str,
        path: &str,
        vary: Option<&str>,
    ) -> DerivedKey {
        let https = secure_scheme || self.force_https;
        let url = self.url(https, host, path);
        DerivedKey {
            key: derive_key(https, &url, vary),
            url,
        }
    }

    /// Derive the key for an inbound request, reading the forwarded protocol and
    /// the variation cookie from its headers.
    pub fn derive_for_request(
        &self,
        secure_scheme: bool,
        headers: &HeaderMap,
        host: &str,
        path: &str,
    ) -> DerivedKey {
        let secure = secure_scheme || forwarded_https(headers);
        let vary = self.variation_token(headers);
        self.derive(secure, host, path, vary.as_deref())
    }

    pub fn variation_token(&self, headers: &HeaderMap) -> Option<String> {
        CookieJar::from_headers(headers)
            .get(&self.vary_cookie)
            .map(|cookie| cookie.value().to_owned())
    }

    fn url(&self, https: bool, host: &str, path: &str) -> String {
        let scheme = if https { "https" } else { "http" };
        let host = self.host_override.as_deref().unwrap_or(host);
        format!("{scheme}://{host}{path}")
    }
}

fn forwarded_https(headers: &HeaderMap) -> bool {
    headers
        .get(FORWARDED_PROTO_HEADER)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim().eq_ignore_ascii_case("https"))
}
