//! HTTP client layer
//!
//! A shared resilient client caps concurrency across all providers with a
//! semaphore and retries transient failures with jittered exponential
//! backoff. Each provider wraps it in a `ProviderHttpClient` that adds a
//! per-source rate limiter and the circuit breaker consultation.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{Client, Request, Response, StatusCode};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::breaker::CircuitBreaker;
use crate::error::{IngestError, Result};

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Maximum concurrent requests across all providers.
    pub max_concurrent_requests: usize,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub max_retries: u32,
    pub initial_retry_delay: Duration,
    pub max_retry_delay: Duration,
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 10,
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            max_retries: 3,
            initial_retry_delay: Duration::from_millis(500),
            max_retry_delay: Duration::from_secs(30),
            user_agent: format!("newswire-ingestion/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Resilient HTTP client shared by every provider gateway.
pub struct ResilientHttpClient {
    client: Client,
    semaphore: Arc<Semaphore>,
    config: HttpClientConfig,
}

impl ResilientHttpClient {
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(IngestError::Network)?;

        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_requests));

        Ok(Self {
            client,
            semaphore,
            config,
        })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::new(HttpClientConfig::default())
    }

    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Executes a request, retrying retryable statuses and transient
    /// network errors with jittered exponential backoff.
    pub async fn execute(&self, request: Request) -> Result<Response> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| IngestError::Parse("http semaphore closed".to_string()))?;

        let url = request.url().to_string();
        let method = request.method().clone();
        debug!(method = %method, url = %url, "executing HTTP request");

        let mut attempt = 0u32;
        let mut delay = self.config.initial_retry_delay;
        let max_retries = self.config.max_retries;

        loop {
            attempt += 1;

            let req = request
                .try_clone()
                .ok_or_else(|| IngestError::Parse("request body not cloneable".to_string()))?;

            match self.client.execute(req).await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        debug!(status = %status, attempt, "request succeeded");
                        return Ok(response);
                    } else if Self::is_retryable_status(status) && attempt <= max_retries {
                        warn!(status = %status, attempt, max_retries, "retryable status, will retry");
                        delay = Self::sleep_jittered(delay, self.config.max_retry_delay).await;
                    } else {
                        let body = response.text().await.unwrap_or_default();
                        return Err(IngestError::Api {
                            code: status.to_string(),
                            message: body,
                        });
                    }
                }
                Err(e) => {
                    if (e.is_timeout() || e.is_connect()) && attempt <= max_retries {
                        warn!(error = %e, attempt, "transient error, will retry");
                        delay = Self::sleep_jittered(delay, self.config.max_retry_delay).await;
                    } else {
                        return Err(IngestError::Network(e));
                    }
                }
            }
        }
    }

    /// Sleeps `delay` scaled by a random factor in [0.5, 1.5) and returns
    /// the doubled delay for the next attempt.
    async fn sleep_jittered(delay: Duration, max_delay: Duration) -> Duration {
        let jitter = 0.5 + rand::random::<f64>();
        tokio::time::sleep(Duration::from_secs_f64(delay.as_secs_f64() * jitter)).await;
        std::cmp::min(delay * 2, max_delay)
    }

    fn is_retryable_status(status: StatusCode) -> bool {
        matches!(
            status,
            StatusCode::TOO_MANY_REQUESTS
                | StatusCode::SERVICE_UNAVAILABLE
                | StatusCode::GATEWAY_TIMEOUT
                | StatusCode::BAD_GATEWAY
                | StatusCode::REQUEST_TIMEOUT
        )
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// Per-provider HTTP client: rate limiter + circuit breaker in front of the
/// shared resilient client.
pub struct ProviderHttpClient {
    client: Arc<ResilientHttpClient>,
    rate_limiter: DefaultDirectRateLimiter,
    breaker: Arc<CircuitBreaker>,
    provider_id: String,
}

impl ProviderHttpClient {
    pub fn new(
        client: Arc<ResilientHttpClient>,
        provider_id: &str,
        rate_limit_rpm: u32,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        let quota = Quota::per_minute(
            NonZeroU32::new(rate_limit_rpm).unwrap_or_else(|| NonZeroU32::new(60).expect("nonzero")),
        );
        Self {
            client,
            rate_limiter: RateLimiter::direct(quota),
            breaker,
            provider_id: provider_id.to_string(),
        }
    }

    /// GET with query parameters, guarded by breaker and rate limiter.
    pub async fn get_with_query<T: serde::Serialize + ?Sized>(
        &self,
        url: &str,
        query: &T,
    ) -> Result<Response> {
        let request = self
            .client
            .inner()
            .get(url)
            .query(query)
            .build()
            .map_err(IngestError::Network)?;
        self.execute_guarded(request).await
    }

    /// GET with query parameters and an extra header (API-key-in-header
    /// providers).
    pub async fn get_with_header<T: serde::Serialize + ?Sized>(
        &self,
        url: &str,
        query: &T,
        header_name: &str,
        header_value: &str,
    ) -> Result<Response> {
        let request = self
            .client
            .inner()
            .get(url)
            .query(query)
            .header(header_name, header_value)
            .build()
            .map_err(IngestError::Network)?;
        self.execute_guarded(request).await
    }

    async fn execute_guarded(&self, request: Request) -> Result<Response> {
        if !self.breaker.allow_request() {
            warn!(source = %self.provider_id, "circuit breaker open, request refused");
            return Err(IngestError::CircuitOpen(self.provider_id.clone()));
        }

        self.rate_limiter.until_ready().await;

        match self.client.execute(request).await {
            Ok(response) => {
                self.breaker.record_success();
                Ok(response)
            }
            Err(e) => {
                self.breaker.record_failure();
                Err(e)
            }
        }
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }
}
