//! Process-wide admission control.
//!
//! A single token bucket sits in front of every route. Requests that cannot get
//! a token within the configured wait are turned away with `503` before any
//! cache or origin work starts.

use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use metrics::counter;
use thiserror::Error;
use tracing::warn;

use crate::application::error::HttpError;
use crate::config::AdmissionSettings;

pub(crate) const METRIC_ADMISSION_REJECTED: &str = "fastcache_admission_rejected_total";

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("request rate limit of {rate}/s (burst {burst}) exhausted")]
    Exhausted { rate: u32, burst: u32 },
    #[error("admission wait cancelled before a token became available")]
    Cancelled,
}

#[derive(Clone)]
pub struct RateGate {
    limiter: Arc<DirectRateLimiter>,
    rate: NonZeroU32,
    burst: NonZeroU32,
    max_wait: Duration,
}

impl RateGate {
    pub fn new(settings: &AdmissionSettings) -> Self {
        Self::with_quota(settings.rate_per_second, settings.burst, settings.max_wait)
    }

    pub fn with_quota(rate: NonZeroU32, burst: NonZeroU32, max_wait: Duration) -> Self {
        let quota = Quota::per_second(rate).allow_burst(burst);
        Self {
            limiter: Arc::new(RateLimiter::direct(quota)),
            rate,
            burst,
            max_wait,
        }
    }

    /// Take a token if one is available right now.
    pub fn try_admit(&self) -> Result<(), AdmissionError> {
        self.limiter
            .check()
            .map_err(|_| AdmissionError::Exhausted {
                rate: self.rate.get(),
                burst: self.burst.get(),
            })
    }

    /// Wait for a token until `cancel` resolves.
    pub async fn admit_until<F>(&self, cancel: F) -> Result<(), AdmissionError>
    where
        F: Future<Output = ()>,
    {
        if self.limiter.check().is_ok() {
            return Ok(());
        }

        tokio::select! {
            biased;
            _ = self.limiter.until_ready() => Ok(()),
            _ = cancel => Err(AdmissionError::Cancelled),
        }
    }

    /// Wait at most the configured time for a token; zero means fail fast.
    pub async fn admit(&self) -> Result<(), AdmissionError> {
        if self.max_wait.is_zero() {
            return self.try_admit();
        }
        self.admit_until(tokio::time::sleep(self.max_wait)).await
    }
}

pub async fn admission(
    State(gate): State<RateGate>,
    request: Request<Body>,
    next: Next,
) -> Response {
    match gate.admit().await {
        Ok(()) => next.run(request).await,
        Err(err) => {
            counter!(METRIC_ADMISSION_REJECTED).increment(1);
            warn!(
                method = %request.method(),
                path = %request.uri().path(),
                error = %err,
                "request rejected by admission control"
            );
            HttpError::from_error(
                "infra::http::admission",
                StatusCode::SERVICE_UNAVAILABLE,
                "Service Unavailable",
                &err,
            )
            .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::future;

    use super::*;

    fn gate(rate: u32, burst: u32, max_wait: Duration) -> RateGate {
        RateGate::with_quota(
            NonZeroU32::new(rate).unwrap(),
            NonZeroU32::new(burst).unwrap(),
            max_wait,
        )
    }

    #[test]
    fn burst_is_admitted_then_rejected() {
        let gate = gate(1, 3, Duration::ZERO);
        for _ in 0..3 {
            assert!(gate.try_admit().is_ok());
        }
        assert!(matches!(
            gate.try_admit(),
            Err(AdmissionError::Exhausted { rate: 1, burst: 3 })
        ));
    }

    #[tokio::test]
    async fn zero_wait_fails_fast() {
        let gate = gate(1, 1, Duration::ZERO);
        assert!(gate.admit().await.is_ok());
        assert!(matches!(
            gate.admit().await,
            Err(AdmissionError::Exhausted { .. })
        ));
    }

    #[tokio::test]
    async fn cancellation_ends_the_wait() {
        let gate = gate(1, 1, Duration::from_secs(60));
        assert!(gate.try_admit().is_ok());

        let result = gate.admit_until(future::ready(())).await;

        assert!(matches!(result, Err(AdmissionError::Cancelled)));
    }

    #[tokio::test]
    async fn waiting_caller_is_admitted_once_bucket_refills() {
        let gate = gate(1_000, 1, Duration::from_millis(500));
        assert!(gate.try_admit().is_ok());

        assert!(gate.admit().await.is_ok());
    }

    #[tokio::test]
    async fn shared_across_clones() {
        let first = gate(1, 1, Duration::ZERO);
        let second = first.clone();

        assert!(first.admit().await.is_ok());
        assert!(second.admit().await.is_err());
    }
}
