//! Fetch-side machinery: proxy pool, rate limiting, retrying fetcher,
//! pagination.

pub mod fetcher;
pub mod pagination;
pub mod proxy_pool;
pub mod rate_limit;

pub use fetcher::{Fetcher, HttpTransport, PoolBackoff, RetryPolicy, Transport, TransportError};
pub use pagination::{DriveSummary, PageState, PaginationDriver};
pub use proxy_pool::{ProxyLease, ProxyOutcome, ProxyPool, ProxyPoolConfig};
pub use rate_limit::{Admission, RateLimitConfig, RateLimiter};
