//! Request cacheability rules.

use std::collections::HashSet;
use std::path::Path;

use axum::http::Method;
use percent_encoding::percent_decode_str;
use tracing::trace;

use super::config::CacheConfig;

/// Decides from method and path whether a request may be served from cache.
#[derive(Debug, Clone)]
pub struct Classifier {
    excluded_prefixes: Vec<String>,
    static_extensions: HashSet<String>,
}

impl Classifier {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            excluded_prefixes: config
                .excluded_prefixes
                .iter()
                .map(|prefix| prefix.trim_end_matches('/').to_string())
                .collect(),
            static_extensions: config
                .static_extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn is_cacheable(&self, method: &Method, path: &str) -> bool {
        if method != Method::GET {
            trace!(%method, path, "not cacheable: method");
            return false;
        }

        let normalized = normalize_path(path);
        let trimmed = normalized.trim_end_matches('/');
        if let Some(prefix) = self
            .excluded_prefixes
            .iter()
            .find(|prefix| trimmed.starts_with(prefix.as_str()))
        {
            trace!(path, prefix = %prefix, "not cacheable: excluded prefix");
            return false;
        }

        if self.has_static_extension(&normalized) {
            trace!(path, "cacheable: static asset");
        }

        true
    }

    pub fn is_static_asset(&self, path: &str) -> bool {
        self.has_static_extension(&normalize_path(path))
    }

    fn has_static_extension(&self, normalized: &str) -> bool {
        Path::new(normalized)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.static_extensions.contains(&ext.to_ascii_lowercase()))
    }
}

/// The path the origin will actually serve: percent-decoded, with empty and
/// dot segments resolved. Always starts with `/`.
fn normalize_path(path: &str) -> String {
    let decoded = percent_decode_str(path).decode_utf8_lossy();
    let mut segments: Vec<&str> = Vec::new();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    let mut normalized = String::with_capacity(decoded.len() + 1);
    for segment in &segments {
        normalized.push('/');
        normalized.push_str(segment);
    }
    if segments.is_empty() || decoded.ends_with('/') {
        normalized.push('/');
    }
    normalized
}
