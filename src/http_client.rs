//! HTTP Client Module
//!
//! Provides a robust HTTP client with:
//! - Semaphore-based concurrency limiting
//! - Bounded request/connect timeouts
//! - Exponential backoff with jitter for retries
//! - Per-source rate limiting

use governor::{
    clock::DefaultClock, middleware::NoOpMiddleware, state::NotKeyed, Quota, RateLimiter,
};
use reqwest::{Client, Request, Response, StatusCode};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::error::{PollError, Result};

/// Configuration for the HTTP client
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Maximum concurrent requests across all sources
    pub max_concurrent_requests: usize,
    /// Request timeout
    pub request_timeout: Duration,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Maximum retries for failed requests
    pub max_retries: u32,
    /// Initial retry delay
    pub initial_retry_delay: Duration,
    /// Maximum retry delay
    pub max_retry_delay: Duration,
    /// User agent string
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
            user_agent: format!("feedpulse/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Resilient HTTP client with concurrency limiting and retries
pub struct ResilientHttpClient {
    /// Inner reqwest client
    client: Client,
    /// Global concurrency semaphore
    semaphore: Arc<Semaphore>,
    /// Configuration
    config: HttpClientConfig,
}

impl ResilientHttpClient {
    /// Creates a new resilient HTTP client
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(PollError::HttpError)?;

        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_requests));

        Ok(Self {
            client,
            semaphore,
            config,
        })
    }

    /// Creates a client with default configuration
    pub fn with_defaults() -> Result<Self> {
        Self::new(HttpClientConfig::default())
    }

    /// Gets the inner reqwest client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Executes a request with retry logic (exponential backoff + jitter).
    ///
    /// The request is cloned for each attempt so query strings and auth
    /// headers survive retries; only bodyless requests (GET) are issued
    /// through this client.
    pub async fn execute(&self, request: Request) -> Result<Response> {
        // Acquire semaphore permit
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| PollError::Internal("semaphore closed".to_string()))?;

        let url = request.url().to_string();
        let method = request.method().clone();

        debug!(method = %method, url = %url, "Executing HTTP request");

        let mut attempt = 0u32;
        let mut delay = self.config.initial_retry_delay;
        let max_retries = self.config.max_retries;

        loop {
            attempt += 1;

            let req = request
                .try_clone()
                .ok_or_else(|| PollError::Internal("request not cloneable".to_string()))?;

            match self.client.execute(req).await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        debug!(status = %status, attempt = attempt, "Request succeeded");
                        return Ok(response);
                    } else if Self::is_retryable_status(status) && attempt <= max_retries {
                        warn!(
                            status = %status,
                            attempt = attempt,
                            max_retries = max_retries,
                            "Retryable error, will retry"
                        );
                        self.sleep_with_jitter(delay).await;
                        delay = std::cmp::min(delay * 2, self.config.max_retry_delay);
                    } else {
                        let body = response.text().await.unwrap_or_default();
                        return Err(PollError::ApiError {
                            code: status.to_string(),
                            message: body,
                        });
                    }
                }
                Err(e) => {
                    if (e.is_timeout() || e.is_connect()) && attempt <= max_retries {
                        warn!(error = %e, attempt = attempt, "Transient error, will retry");
                        self.sleep_with_jitter(delay).await;
                        delay = std::cmp::min(delay * 2, self.config.max_retry_delay);
                    } else {
                        return Err(PollError::HttpError(e));
                    }
                }
            }
        }
    }

    /// Sleeps for the given delay with a random factor between 0.5 and 1.5
    async fn sleep_with_jitter(&self, delay: Duration) {
        let jitter = 0.5 + rand::random::<f64>();
        let jittered = Duration::from_secs_f64(delay.as_secs_f64() * jitter);
        tokio::time::sleep(jittered).await;
    }

    /// Checks if a status code should trigger a retry
    fn is_retryable_status(status: StatusCode) -> bool {
        matches!(
            status,
            StatusCode::TOO_MANY_REQUESTS |     // 429
            StatusCode::SERVICE_UNAVAILABLE |   // 503
            StatusCode::GATEWAY_TIMEOUT |       // 504
            StatusCode::BAD_GATEWAY |           // 502
            StatusCode::REQUEST_TIMEOUT // 408
        )
    }

    /// Gets the number of available permits
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// Source-specific HTTP client with rate limiting
pub struct SourceHttpClient {
    /// Resilient base client
    client: Arc<ResilientHttpClient>,
    /// Source-specific rate limiter
    rate_limiter: RateLimiter<NotKeyed, governor::state::InMemoryState, DefaultClock, NoOpMiddleware>,
    /// Source identifier
    source_id: String,
}

impl SourceHttpClient {
    /// Creates a new source-specific client
    pub fn new(client: Arc<ResilientHttpClient>, source_id: &str, rate_limit_rpm: u32) -> Self {
        let quota = Quota::per_minute(
            NonZeroU32::new(rate_limit_rpm).unwrap_or(NonZeroU32::new(60).unwrap()),
        );
        let rate_limiter = RateLimiter::direct(quota);

        Self {
            client,
            rate_limiter,
            source_id: source_id.to_string(),
        }
    }

    /// Executes a GET request
    pub async fn get(&self, url: &str) -> Result<Response> {
        self.execute_rate_limited(self.client.inner().get(url).build()?)
            .await
    }

    /// Executes a GET request with query parameters
    pub async fn get_with_query<T: serde::Serialize + ?Sized>(
        &self,
        url: &str,
        query: &T,
    ) -> Result<Response> {
        self.execute_rate_limited(self.client.inner().get(url).query(query).build()?)
            .await
    }

    /// Executes a GET request with query parameters and a bearer token
    pub async fn get_with_bearer<T: serde::Serialize + ?Sized>(
        &self,
        url: &str,
        query: &T,
        token: &str,
    ) -> Result<Response> {
        self.execute_rate_limited(
            self.client
                .inner()
                .get(url)
                .query(query)
                .bearer_auth(token)
                .build()?,
        )
        .await
    }

    async fn execute_rate_limited(&self, request: Request) -> Result<Response> {
        // Wait for rate limit before touching the network
        self.rate_limiter.until_ready().await;

        debug!(source = %self.source_id, url = %request.url(), "Dispatching request");
        self.client.execute(request).await
    }

    /// Gets the source ID
    pub fn source_id(&self) -> &str {
        &self.source_id
    }
}
