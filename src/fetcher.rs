//! Rate-limited access to the football data API.
//!
//! The provider quota is N requests per minute. Requests are spaced `60s / N`
//! apart, and after every N requests the flow is suspended for a full
//! 60-second window before the next request goes out.

use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use governor::clock::{Clock, DefaultClock};
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::FetchError;

/// Length of one provider quota window.
pub const QUOTA_WINDOW: Duration = Duration::from_secs(60);

/// Raw HTTP response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, thiserror::Error)]
#[error("request failed: {0}")]
pub struct TransportError(pub String);

/// HTTP GET with the provider auth header. Swappable for tests.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &str, token: &str) -> Result<HttpResponse, TransportError>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str, token: &str) -> Result<HttpResponse, TransportError> {
        let response = self
            .client
            .get(url)
            .header("X-Auth-Token", token)
            .send()
            .await
            .map_err(|e| TransportError(e.to_string()))?;

        if let Some(remaining) = response.headers().get("x-requests-available-minute") {
            debug!(
                "API requests remaining this minute: {}",
                remaining.to_str().unwrap_or("?")
            );
        }

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError(e.to_string()))?;
        Ok(HttpResponse { status, body })
    }
}

/// Suspends the calling flow. The only place a run waits.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wait {
    /// Window exhausted; sit out the whole quota window.
    Window(Duration),
    /// Too soon after the previous request.
    Spacing(Duration),
}

/// Per-minute request budget: a coarse window counter plus GCRA spacing.
pub struct RequestBudget<C: Clock = DefaultClock> {
    per_minute: NonZeroU32,
    issued_in_window: u32,
    spacing: RateLimiter<NotKeyed, InMemoryState, C, NoOpMiddleware<C::Instant>>,
    clock: C,
}

impl RequestBudget<DefaultClock> {
    pub fn new(per_minute: NonZeroU32) -> Self {
        Self::with_clock(per_minute, DefaultClock::default())
    }
}

impl<C: Clock> RequestBudget<C> {
    pub fn with_clock(per_minute: NonZeroU32, clock: C) -> Self {
        let quota = Quota::per_minute(per_minute).allow_burst(NonZeroU32::MIN);
        let spacing = RateLimiter::direct_with_clock(quota, &clock);
        Self {
            per_minute,
            issued_in_window: 0,
            spacing,
            clock,
        }
    }

    /// `None` when a request may be sent now (and counts it), otherwise
    /// how long to wait before asking again.
    fn acquire(&mut self) -> Option<Wait> {
        if self.issued_in_window >= self.per_minute.get() {
            self.issued_in_window = 0;
            return Some(Wait::Window(QUOTA_WINDOW));
        }
        match self.spacing.check() {
            Ok(()) => {
                self.issued_in_window += 1;
                None
            }
            Err(not_until) => Some(Wait::Spacing(not_until.wait_time_from(self.clock.now()))),
        }
    }
}

pub fn competition_path(code: &str) -> String {
    format!("competition/{code}")
}

pub fn standings_path(code: &str) -> String {
    format!("competition/{code}/standings")
}

pub fn team_path(team_id: i64) -> String {
    format!("teams/{team_id}")
}

pub struct RateLimitedFetcher<T, S = TokioSleeper, C: Clock = DefaultClock> {
    transport: T,
    sleeper: S,
    budget: RequestBudget<C>,
    api_url: String,
    api_token: String,
    requests_issued: u64,
}

impl RateLimitedFetcher<ReqwestTransport> {
    pub fn from_config(config: &Config) -> Result<Self, reqwest::Error> {
        Ok(Self::with_parts(
            ReqwestTransport::new(config.http_timeout)?,
            TokioSleeper,
            RequestBudget::new(config.requests_per_minute),
            &config.api_url,
            &config.api_token,
        ))
    }
}

impl<T, S, C> RateLimitedFetcher<T, S, C>
where
    T: HttpTransport,
    S: Sleeper,
    C: Clock,
{
    pub fn with_parts(
        transport: T,
        sleeper: S,
        budget: RequestBudget<C>,
        api_url: &str,
        api_token: &str,
    ) -> Self {
        Self {
            transport,
            sleeper,
            budget,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_token: api_token.to_string(),
            requests_issued: 0,
        }
    }

    pub fn requests_issued(&self) -> u64 {
        self.requests_issued
    }

    async fn pace(&mut self) {
        while let Some(wait) = self.budget.acquire() {
            match wait {
                Wait::Window(duration) => {
                    info!(
                        after_requests = self.requests_issued,
                        "Rate limit reached. Waiting {:?}", duration
                    );
                    self.sleeper.sleep(duration).await;
                }
                Wait::Spacing(duration) => {
                    debug!("Spacing next request by {:?}", duration);
                    self.sleeper.sleep(duration).await;
                }
            }
        }
    }

    /// One GET of `{api_url}/{resource}`. No retries.
    pub async fn fetch(&mut self, resource: &str) -> Result<Value, FetchError> {
        self.pace().await;

        let url = format!("{}/{}", self.api_url, resource.trim_start_matches('/'));
        self.requests_issued += 1;
        debug!(resource, request = self.requests_issued, "GET {}", url);

        let response = match self.transport.get(&url, &self.api_token).await {
            Ok(response) => response,
            Err(e) => {
                warn!(resource, error = %e, "Fetch failed");
                return Err(FetchError {
                    status: None,
                    resource: resource.to_string(),
                });
            }
        };

        if !(200..300).contains(&response.status) {
            warn!(resource, status = response.status, "Upstream returned non-success status");
            return Err(FetchError {
                status: Some(response.status),
                resource: resource.to_string(),
            });
        }

        serde_json::from_str(&response.body).map_err(|e| {
            warn!(resource, error = %e, "Response body is not valid JSON");
            FetchError {
                status: Some(response.status),
                resource: resource.to_string(),
            }
        })
    }

    /// Fetch each resource in order, pairing every outcome with its path.
    pub async fn fetch_many(
        &mut self,
        resources: &[String],
    ) -> Vec<(String, Result<Value, FetchError>)> {
        let mut outcomes = Vec::with_capacity(resources.len());
        for (i, resource) in resources.iter().enumerate() {
            info!("Fetching {} ({}/{})", resource, i + 1, resources.len());
            let outcome = self.fetch(resource).await;
            outcomes.push((resource.clone(), outcome));
        }
        outcomes
    }
}

/// In-process transport and sleeper for exercising the fetcher without
/// network or wall-clock time.
pub mod mock {
    use super::*;
    use governor::clock::FakeRelativeClock;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves canned responses by URL; unknown URLs get a 404.
    #[derive(Default)]
    pub struct MockTransport {
        responses: HashMap<String, Result<HttpResponse, String>>,
        requests: Mutex<Vec<(String, String)>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_json(mut self, url: &str, body: &Value) -> Self {
            self.responses.insert(
                url.to_string(),
                Ok(HttpResponse {
                    status: 200,
                    body: body.to_string(),
                }),
            );
            self
        }

        pub fn with_response(mut self, url: &str, status: u16, body: &str) -> Self {
            self.responses.insert(
                url.to_string(),
                Ok(HttpResponse {
                    status,
                    body: body.to_string(),
                }),
            );
            self
        }

        pub fn with_transport_error(mut self, url: &str, message: &str) -> Self {
            self.responses
                .insert(url.to_string(), Err(message.to_string()));
            self
        }

        /// `(url, token)` of every request, in order.
        pub fn requests(&self) -> Vec<(String, String)> {
            self.requests
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone()
        }
    }

    #[async_trait]
    impl HttpTransport for MockTransport {
        async fn get(&self, url: &str, token: &str) -> Result<HttpResponse, TransportError> {
            self.requests
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push((url.to_string(), token.to_string()));
            match self.responses.get(url) {
                Some(Ok(response)) => Ok(response.clone()),
                Some(Err(message)) => Err(TransportError(message.clone())),
                None => Ok(HttpResponse {
                    status: 404,
                    body: r#"{"message":"not found"}"#.to_string(),
                }),
            }
        }
    }

    /// Records every requested pause and advances a fake clock instead of sleeping.
    #[derive(Default)]
    pub struct RecordingSleeper {
        clock: FakeRelativeClock,
        sleeps: Mutex<Vec<Duration>>,
    }

    impl RecordingSleeper {
        pub fn new(clock: FakeRelativeClock) -> Self {
            Self {
                clock,
                sleeps: Mutex::new(Vec::new()),
            }
        }

        pub fn sleeps(&self) -> Vec<Duration> {
            self.sleeps
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone()
        }
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.sleeps
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(duration);
            self.clock.advance(duration);
        }
    }

    /// Fetcher wired to a mock transport and a fake clock.
    pub fn fetcher(
        transport: MockTransport,
        per_minute: u32,
    ) -> RateLimitedFetcher<MockTransport, RecordingSleeper, FakeRelativeClock> {
        let clock = FakeRelativeClock::default();
        let per_minute = NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN);
        RateLimitedFetcher::with_parts(
            transport,
            RecordingSleeper::new(clock.clone()),
            RequestBudget::with_clock(per_minute, clock),
            "https://api.example.org/v4",
            "test-token",
        )
    }

    impl<T: HttpTransport, C: Clock> RateLimitedFetcher<T, RecordingSleeper, C> {
        pub fn sleeper(&self) -> &RecordingSleeper {
            &self.sleeper
        }
    }

    impl<S: Sleeper, C: Clock> RateLimitedFetcher<MockTransport, S, C> {
        pub fn transport(&self) -> &MockTransport {
            &self.transport
        }
    }
}
