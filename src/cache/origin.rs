//! Origin fetch contract and response normalization.

use std::io;

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header, request};
use bytes::Bytes;
use flate2::read::GzDecoder;
use thiserror::Error;

use super::entry::{CacheEntry, HeaderSet, is_transport_header};
use super::inflate::{InflateError, read_capped};

#[derive(Debug, Error)]
pub enum OriginError {
    #[error("invalid origin url `{0}`")]
    InvalidUrl(String),
    #[error("origin request to {url} failed")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("origin response body could not be read")]
    Body(#[source] reqwest::Error),
    #[error("origin response body could not be gunzipped")]
    Decode(#[source] io::Error),
    #[error("origin responded with unsupported content encoding `{0}`")]
    UnsupportedEncoding(String),
    #[error("origin response inflates past {limit} bytes")]
    TooLarge { limit: usize },
}

impl From<InflateError> for OriginError {
    fn from(error: InflateError) -> Self {
        match error {
            InflateError::Io(source) => Self::Decode(source),
            InflateError::TooLarge { limit } => Self::TooLarge { limit },
        }
    }
}

/// What gets replayed against the origin: the inbound request minus its host.
#[derive(Debug, Clone)]
pub struct OriginRequest {
    pub method: Method,
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl OriginRequest {
    pub fn get(path_and_query: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path_and_query: path_and_query.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn from_parts(parts: &request::Parts, body: Bytes) -> Self {
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_owned())
            .unwrap_or_else(|| "/".to_owned());
        Self {
            method: parts.method.clone(),
            path_and_query,
            headers: parts.headers.clone(),
            body,
        }
    }

    /// Headers to send upstream: no host, no length, no hop-by-hop, gzip only.
    pub fn forwarded_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::with_capacity(self.headers.len() + 1);
        for (name, value) in &self.headers {
            let skip = name == header::HOST
                || name == header::ACCEPT_ENCODING
                || (name != header::CONTENT_ENCODING && is_transport_header(name));
            if !skip {
                headers.append(name.clone(), value.clone());
            }
        }
        headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
        headers
    }
}

/// Source of truth for page content.
#[async_trait]
pub trait Origin: Send + Sync {
    async fn fetch(&self, request: &OriginRequest) -> Result<CacheEntry, OriginError>;
}

/// Build a [`CacheEntry`] from a raw origin response, undoing gzip encoding.
/// Bodies that would inflate past `max_inflated` bytes are rejected.
pub fn normalize_response(
    status: StatusCode,
    headers: &HeaderMap,
    body: Bytes,
    max_inflated: usize,
) -> Result<CacheEntry, OriginError> {
    let encoding = headers
        .get(header::CONTENT_ENCODING)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_ascii_lowercase());

    let content = match encoding.as_deref() {
        None | Some("") | Some("identity") => body,
        Some("gzip") | Some("x-gzip") => {
            Bytes::from(read_capped(GzDecoder::new(body.as_ref()), max_inflated)?)
        }
        Some(other) => return Err(OriginError::UnsupportedEncoding(other.to_owned())),
    };

    Ok(CacheEntry::new(
        status,
        content,
        HeaderSet::from_origin(headers),
    ))
}
