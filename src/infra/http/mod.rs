//! Inbound HTTP surface: admission, the proxy fallback and the cache listing.

mod admin;
mod admission;
mod emit;
mod middleware;
mod proxy;

pub use admin::{AdminState, CacheListing, X_SECRET_KEY, list_cache};
pub use admission::{AdmissionError, RateGate, admission};
pub use emit::{
    FAST_CACHE, FAST_CACHE_KEY, FAST_CACHE_LENGTH, FAST_CACHE_SOURCE, FAST_CACHE_TIME,
    FAST_CACHE_URL, ResponseEmitter, X_CACHE_LOOKUP_TIME, X_PROXY_TIME, X_RESPONSE_TIME,
};
pub use middleware::{RequestContext, X_REQUEST_ID};
pub use proxy::{ProxyState, proxy};

pub(crate) use admission::METRIC_ADMISSION_REJECTED;
pub(crate) use proxy::METRIC_RESPONSES;

use axum::{Router, extract::FromRef, middleware as axum_middleware, routing::get};

use self::middleware::{log_responses, set_request_context};

#[derive(Clone)]
pub struct RouterState {
    pub proxy: ProxyState,
    pub admin: AdminState,
}

impl FromRef<RouterState> for ProxyState {
    fn from_ref(state: &RouterState) -> Self {
        state.proxy.clone()
    }
}

impl FromRef<RouterState> for AdminState {
    fn from_ref(state: &RouterState) -> Self {
        state.admin.clone()
    }
}

/// Assemble the full router. The admission gate wraps everything, so rejected
/// requests never reach logging, the listing or the proxy.
pub fn build_router(state: RouterState, gate: RateGate) -> Router {
    Router::new()
        .route("/cache/list", get(list_cache))
        .fallback(proxy)
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
        .layer(axum_middleware::from_fn_with_state(gate, admission))
}
