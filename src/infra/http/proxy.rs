//! Catch-all proxy route.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::{Body, to_bytes},
    extract::State,
    http::{Request, StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use metrics::counter;
use tracing::{Instrument, info_span};

use crate::application::error::HttpError;
use crate::cache::{
    CacheOrchestrator, Classifier, DerivedKey, KeyDeriver, OriginError, OriginRequest, Resolution,
};

use super::emit::ResponseEmitter;

pub(crate) const METRIC_RESPONSES: &str = "fastcache_responses_total";

#[derive(Clone)]
pub struct ProxyState {
    pub orchestrator: Arc<CacheOrchestrator>,
    pub classifier: Arc<Classifier>,
    pub keys: Arc<KeyDeriver>,
    pub emitter: ResponseEmitter,
    pub max_body_bytes: usize,
}

pub async fn proxy(State(state): State<ProxyState>, request: Request<Body>) -> Response {
    let started = Instant::now();
    let (parts, body) = request.into_parts();

    let body = match to_bytes(body, state.max_body_bytes).await {
        Ok(body) => body,
        Err(err) => {
            return HttpError::from_error(
                "infra::http::proxy",
                StatusCode::PAYLOAD_TOO_LARGE,
                "Payload Too Large",
                &err,
            )
            .into_response();
        }
    };

    let span = info_span!(
        "proxy",
        method = %parts.method,
        path = %parts.uri.path(),
    );
    handle(state, parts, body, started).instrument(span).await
}

async fn handle(
    state: ProxyState,
    parts: Parts,
    body: Bytes,
    started: Instant,
) -> Response {
    let origin_request = OriginRequest::from_parts(&parts, body);

    if !state
        .classifier
        .is_cacheable(&parts.method, parts.uri.path())
    {
        let result = state.orchestrator.bypass(origin_request).await;
        return respond(&state, result, None, started);
    }

    let derived = derive(&state.keys, &parts);
    let result = state
        .orchestrator
        .resolve(&derived.key, origin_request)
        .await;
    respond(&state, result, Some(&derived), started)
}

fn derive(keys: &KeyDeriver, parts: &Parts) -> DerivedKey {
    let host = parts
        .headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .or_else(|| parts.uri.authority().map(|authority| authority.as_str()))
        .unwrap_or("");
    let secure = parts.uri.scheme_str() == Some("https");
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    keys.derive_for_request(secure, &parts.headers, host, path_and_query)
}

fn respond(
    state: &ProxyState,
    result: Result<Resolution, OriginError>,
    derived: Option<&DerivedKey>,
    started: Instant,
) -> Response {
    match result {
        Ok(resolution) => {
            counter!(METRIC_RESPONSES, "status" => resolution.status.as_str()).increment(1);
            state.emitter.emit(resolution, derived, started)
        }
        Err(err) => {
            counter!(METRIC_RESPONSES, "status" => "ERROR").increment(1);
            HttpError::from(err).into_response()
        }
    }
}
