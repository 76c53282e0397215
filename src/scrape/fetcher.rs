//! Fetch layer: transport seam, outcome classification, bounded retry.
//!
//! The retry/backoff logic is a plain state machine over an attempt counter
//! and a capped exponential delay, independent of the transport, so the
//! bound is testable without a network.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{FailureKind, ScrapeError};
use crate::models::{CrawlTask, FetchResult};

use super::proxy_pool::{ProxyOutcome, ProxyPool};
use super::rate_limit::RateLimiter;

/// Body markers that identify an anti-bot interstitial served with 2xx.
/// Matched case-insensitively.
pub const BLOCK_MARKERS: &[&str] = &[
    "captcha",
    "access denied",
    "unusual traffic",
    "are you a robot",
];

/// Raw transport failure, before classification.
#[derive(Debug, Clone)]
pub enum TransportError {
    Timeout,
    Connect(String),
}

/// Minimal HTTP GET seam. The production implementation wraps reqwest;
/// tests substitute scripted responses.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform one GET through the given proxy (None = direct egress).
    async fn get(&self, url: &str, proxy: Option<&str>)
        -> Result<(u16, String), TransportError>;
}

/// reqwest-backed transport with one cached client per egress identity.
pub struct HttpTransport {
    user_agent: String,
    timeout: Duration,
    clients: RwLock<HashMap<Option<String>, Client>>,
}

impl HttpTransport {
    pub fn new(user_agent: impl Into<String>, timeout: Duration) -> Self {
        Self {
            user_agent: user_agent.into(),
            timeout,
            clients: RwLock::new(HashMap::new()),
        }
    }

    async fn client_for(&self, proxy: Option<&str>) -> Result<Client, TransportError> {
        let key = proxy.map(|p| p.to_string());
        {
            let clients = self.clients.read().await;
            if let Some(client) = clients.get(&key) {
                return Ok(client.clone());
            }
        }

        let mut builder = Client::builder()
            .user_agent(&self.user_agent)
            .timeout(self.timeout)
            .gzip(true)
            .brotli(true);
        if let Some(addr) = proxy {
            let proxy = reqwest::Proxy::all(addr)
                .map_err(|e| TransportError::Connect(e.to_string()))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let mut clients = self.clients.write().await;
        clients.insert(key, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(
        &self,
        url: &str,
        proxy: Option<&str>,
    ) -> Result<(u16, String), TransportError> {
        let client = self.client_for(proxy).await?;
        let response = client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Connect(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Connect(e.to_string())
            }
        })?;
        Ok((status, body))
    }
}

/// Bounded retry schedule: base delay doubled per attempt, capped.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (1-based): base × 2^(attempt-1),
    /// capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << shift);
        delay.min(self.max_delay)
    }
}

/// Pool-wide backoff when no healthy proxy is available.
#[derive(Debug, Clone)]
pub struct PoolBackoff {
    /// Fixed interval between whole-pool retries.
    pub interval: Duration,
    /// Give up and fail the run after this much continuous unavailability.
    pub window: Duration,
}

impl Default for PoolBackoff {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            window: Duration::from_secs(120),
        }
    }
}

/// Outcome classification of one attempt.
enum Classified {
    Success,
    Blocked,
    Permanent(u16),
}

fn classify(status: u16, body: &str) -> Classified {
    if status == 403 || status == 429 {
        return Classified::Blocked;
    }
    if (200..300).contains(&status) {
        let lower = body.to_lowercase();
        if BLOCK_MARKERS.iter().any(|m| lower.contains(m)) {
            return Classified::Blocked;
        }
        return Classified::Success;
    }
    Classified::Permanent(status)
}

/// Shared fetch front-end for the worker pool: admits through the rate
/// limiter, leases a proxy, performs the request, classifies the outcome,
/// and drives the retry state machine.
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    proxy_pool: Arc<ProxyPool>,
    rate_limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    pool_backoff: PoolBackoff,
}

impl Fetcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        proxy_pool: Arc<ProxyPool>,
        rate_limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
        pool_backoff: PoolBackoff,
    ) -> Self {
        Self {
            transport,
            proxy_pool,
            rate_limiter,
            retry,
            pool_backoff,
        }
    }

    /// Fetch one task. `Transient` and `Blocked` outcomes are retried up to
    /// `max_attempts` with exponential backoff, rotating the proxy on each
    /// retry. `Permanent` outcomes abandon the task immediately.
    pub async fn fetch(&self, task: &CrawlTask) -> Result<FetchResult, ScrapeError> {
        let host = RateLimiter::host_of(&task.url);
        let mut last_kind = FailureKind::Transient;
        let mut previous_proxy: Option<String> = None;

        for attempt in 1..=self.retry.max_attempts {
            if attempt > 1 {
                let delay = self.retry.delay_for(attempt);
                debug!(
                    url = %task.url,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after backoff"
                );
                tokio::time::sleep(delay).await;
            }

            if let Some(host) = &host {
                self.rate_limiter.acquire(host).await;
            }

            let lease = self.acquire_proxy(previous_proxy.as_deref()).await?;
            let egress = lease.address.clone();

            match self.transport.get(&task.url, egress.as_deref()).await {
                Ok((status, body)) => match classify(status, &body) {
                    Classified::Success => {
                        self.proxy_pool.release(lease, ProxyOutcome::Success).await;
                        return Ok(FetchResult::new(task.url.clone(), status, body));
                    }
                    Classified::Blocked => {
                        self.proxy_pool.release(lease, ProxyOutcome::Blocked).await;
                        warn!(url = %task.url, status, attempt, "blocked response");
                        last_kind = FailureKind::Blocked;
                        previous_proxy = egress;
                    }
                    Classified::Permanent(status) => {
                        // The proxy did its job; the server rejected the URL.
                        self.proxy_pool.release(lease, ProxyOutcome::Success).await;
                        return Err(ScrapeError::Permanent {
                            url: task.url.clone(),
                            status,
                        });
                    }
                },
                Err(TransportError::Timeout) => {
                    self.proxy_pool.release(lease, ProxyOutcome::Timeout).await;
                    debug!(url = %task.url, attempt, "timeout");
                    last_kind = FailureKind::Transient;
                    previous_proxy = egress;
                }
                Err(TransportError::Connect(reason)) => {
                    self.proxy_pool
                        .release(lease, ProxyOutcome::TransportError)
                        .await;
                    debug!(url = %task.url, attempt, %reason, "transport error");
                    last_kind = FailureKind::Transient;
                    previous_proxy = egress;
                }
            }
        }

        Err(ScrapeError::FetchFailed {
            url: task.url.clone(),
            attempts: self.retry.max_attempts,
            last: last_kind,
        })
    }

    /// Lease a proxy, backing off pool-wide while everything is
    /// quarantined. Fatal once unavailability outlasts the window.
    async fn acquire_proxy(
        &self,
        avoid: Option<&str>,
    ) -> Result<super::proxy_pool::ProxyLease, ScrapeError> {
        let started = Instant::now();
        loop {
            match self.proxy_pool.acquire(avoid).await {
                Ok(lease) => return Ok(lease),
                Err(ScrapeError::Unavailable) => {
                    let waited = started.elapsed();
                    if waited >= self.pool_backoff.window {
                        return Err(ScrapeError::PoolExhausted {
                            waited_secs: waited.as_secs(),
                        });
                    }
                    warn!(
                        interval_ms = self.pool_backoff.interval.as_millis() as u64,
                        "no healthy proxies, backing off"
                    );
                    tokio::time::sleep(self.pool_backoff.interval).await;
                }
                Err(other) => return Err(other),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrape::proxy_pool::ProxyPoolConfig;
    use crate::scrape::rate_limit::RateLimitConfig;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Transport that replays a scripted sequence of responses.
    struct ScriptedTransport {
        script: Vec<Result<(u16, String), TransportError>>,
        calls: AtomicU32,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<(u16, String), TransportError>>) -> Self {
            Self {
                script,
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn get(
            &self,
            _url: &str,
            _proxy: Option<&str>,
        ) -> Result<(u16, String), TransportError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            self.script
                .get(n.min(self.script.len().saturating_sub(1)))
                .cloned()
                .unwrap_or(Err(TransportError::Timeout))
        }
    }

    fn fetcher_with(transport: Arc<dyn Transport>, max_attempts: u32) -> Fetcher {
        Fetcher::new(
            transport,
            Arc::new(ProxyPool::new(vec![], ProxyPoolConfig::default())),
            Arc::new(RateLimiter::new(RateLimitConfig {
                refill_per_sec: 10_000.0,
                burst: 10_000.0,
            })),
            RetryPolicy {
                max_attempts,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(4),
            },
            PoolBackoff {
                interval: Duration::from_millis(5),
                window: Duration::from_millis(50),
            },
        )
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 6,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(350));
        assert_eq!(policy.delay_for(6), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok((
            200,
            "<html><h1>ok</h1></html>".to_string(),
        ))]));
        let fetcher = fetcher_with(transport.clone(), 3);

        let task = CrawlTask::detail("https://example.com/offers/x", 1);
        let result = fetcher.fetch(&task).await.unwrap();
        assert_eq!(result.status, 200);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_transient_retried_exactly_max_attempts() {
        let transport = Arc::new(ScriptedTransport::new(vec![Err(TransportError::Timeout)]));
        let fetcher = fetcher_with(transport.clone(), 3);

        let task = CrawlTask::detail("https://example.com/offers/x", 1);
        let err = fetcher.fetch(&task).await.unwrap_err();
        match err {
            ScrapeError::FetchFailed { attempts, last, .. } => {
                assert_eq!(attempts, 3);
                assert_eq!(last, FailureKind::Transient);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // Attempted exactly max_attempts times, never a fourth.
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_blocked_then_success() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok((429, String::new())),
            Ok((200, "<html>listing</html>".to_string())),
        ]));
        let fetcher = fetcher_with(transport.clone(), 3);

        let task = CrawlTask::discovery("https://example.com/lst", 1);
        let result = fetcher.fetch(&task).await.unwrap();
        assert_eq!(result.status, 200);
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_block_page_body_detected() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok((
            200,
            "<html>Please solve this CAPTCHA to continue</html>".to_string(),
        ))]));
        let fetcher = fetcher_with(transport.clone(), 2);

        let task = CrawlTask::detail("https://example.com/offers/x", 1);
        let err = fetcher.fetch(&task).await.unwrap_err();
        match err {
            ScrapeError::FetchFailed { last, .. } => assert_eq!(last, FailureKind::Blocked),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_permanent_not_retried() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok((404, String::new()))]));
        let fetcher = fetcher_with(transport.clone(), 5);

        let task = CrawlTask::detail("https://example.com/offers/gone", 1);
        let err = fetcher.fetch(&task).await.unwrap_err();
        assert!(matches!(err, ScrapeError::Permanent { status: 404, .. }));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_pool_exhaustion_is_fatal() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok((
            200,
            "<html>ok</html>".to_string(),
        ))]));
        let pool = Arc::new(ProxyPool::new(
            vec!["socks5://p1:1080".into()],
            ProxyPoolConfig {
                quarantine_cooldown: Duration::from_secs(600),
                ..Default::default()
            },
        ));

        // Quarantine the only proxy.
        for _ in 0..2 {
            let lease = pool.acquire(None).await.unwrap();
            pool.release(lease, super::super::proxy_pool::ProxyOutcome::Blocked)
                .await;
        }

        let fetcher = Fetcher::new(
            transport,
            pool,
            Arc::new(RateLimiter::new(RateLimitConfig::default())),
            RetryPolicy::default(),
            PoolBackoff {
                interval: Duration::from_millis(5),
                window: Duration::from_millis(20),
            },
        );

        let task = CrawlTask::detail("https://example.com/offers/x", 1);
        let err = fetcher.fetch(&task).await.unwrap_err();
        assert!(matches!(err, ScrapeError::PoolExhausted { .. }));
    }
}
