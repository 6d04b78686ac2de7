//! HTTP origin backed by a pooled reqwest client.

use async_trait::async_trait;
use reqwest::{Client, Url, redirect};
use tracing::debug;

use crate::cache::{CacheEntry, Origin, OriginError, OriginRequest, normalize_response};
use crate::config::BackendSettings;

use super::error::InfraError;

pub struct HttpOrigin {
    client: Client,
    base: Url,
    max_response_bytes: usize,
}

impl HttpOrigin {
    pub fn new(settings: &BackendSettings) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(user_agent())
            .pool_max_idle_per_host(settings.pool_max_idle_per_host)
            .pool_idle_timeout(settings.pool_idle_timeout)
            .timeout(settings.timeout)
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|err| InfraError::http_client(err.to_string()))?;

        Ok(Self {
            client,
            base: settings.base_url.clone(),
            max_response_bytes: settings.max_response_bytes,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Resolve `path_and_query` against the backend without letting it change host.
    fn url(&self, path_and_query: &str) -> Result<Url, OriginError> {
        if !path_and_query.starts_with('/') {
            return Err(OriginError::InvalidUrl(path_and_query.to_owned()));
        }
        let (path, query) = match path_and_query.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (path_and_query, None),
        };

        let mut url = self.base.clone();
        url.set_path(path);
        url.set_query(query);
        Ok(url)
    }
}

fn user_agent() -> &'static str {
    concat!("fastcache/", env!("CARGO_PKG_VERSION"))
}

#[async_trait]
impl Origin for HttpOrigin {
    async fn fetch(&self, request: &OriginRequest) -> Result<CacheEntry, OriginError> {
        let url = self.url(&request.path_and_query)?;

        let mut builder = self
            .client
            .request(request.method.clone(), url.clone())
            .headers(request.forwarded_headers());
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|source| OriginError::Request {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(OriginError::Body)?;
        debug!(
            origin = %url,
            status = status.as_u16(),
            size = body.len(),
            "origin responded"
        );

        normalize_response(status, &headers, body, self.max_response_bytes)
    }
}
