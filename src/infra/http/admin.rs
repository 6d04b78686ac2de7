//! Secret-guarded listing of the local cache tier.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
    http::{HeaderMap, HeaderName, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use time::format_description::well_known::Rfc3339;

use crate::application::error::HttpError;
use crate::cache::{LocalEntryInfo, LocalTier};

pub const X_SECRET_KEY: HeaderName = HeaderName::from_static("x-secret-key");

#[derive(Clone)]
pub struct AdminState {
    pub local: Option<Arc<LocalTier>>,
    pub secret_key: Arc<str>,
}

impl AdminState {
    fn authorized(&self, presented: Option<&str>) -> bool {
        presented.is_some_and(|presented| {
            bool::from(presented.as_bytes().ct_eq(self.secret_key.as_bytes()))
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheListing {
    pub key: String,
    pub size: usize,
    pub expired_at: String,
    pub is_stale: bool,
}

impl From<LocalEntryInfo> for CacheListing {
    fn from(info: LocalEntryInfo) -> Self {
        Self {
            key: info.key.into_string(),
            size: info.size,
            expired_at: info
                .expires_at
                .format(&Rfc3339)
                .unwrap_or_else(|_| info.expires_at.to_string()),
            is_stale: info.stale,
        }
    }
}

/// `GET /cache/list`: every live local entry, authorized by header or `?key=`.
pub async fn list_cache(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Response {
    let presented = headers
        .get(&X_SECRET_KEY)
        .and_then(|value| value.to_str().ok())
        .or(query.key.as_deref());
    if !state.authorized(presented) {
        return HttpError::new(
            "infra::http::admin",
            StatusCode::UNAUTHORIZED,
            "Unauthorized",
            "missing or wrong secret key for cache listing",
        )
        .into_response();
    }

    let listing: Vec<CacheListing> = state
        .local
        .as_deref()
        .map(LocalTier::snapshot)
        .unwrap_or_default()
        .into_iter()
        .map(CacheListing::from)
        .collect();

    Json(listing).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(secret: &str) -> AdminState {
        AdminState {
            local: None,
            secret_key: Arc::from(secret),
        }
    }

    #[test]
    fn secret_must_match_exactly() {
        let state = state("s3cret");
        assert!(state.authorized(Some("s3cret")));
        assert!(!state.authorized(Some("s3cre")));
        assert!(!state.authorized(Some("s3cret ")));
        assert!(!state.authorized(None));
    }

    #[test]
    fn listing_formats_expiry_as_rfc3339() {
        let info = LocalEntryInfo {
            key: crate::cache::derive_key(true, "https://shop.example.com/", None),
            size: 42,
            stale: true,
            expires_at: time::macros::datetime!(2026-03-01 12:30:00 UTC),
        };

        let listing = CacheListing::from(info);

        assert_eq!(listing.size, 42);
        assert!(listing.is_stale);
        assert_eq!(listing.expired_at, "2026-03-01T12:30:00Z");
    }
}
