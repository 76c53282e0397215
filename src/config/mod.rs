//! Run configuration.
//!
//! Settings come from a JSON settings file, optionally overlaid with an
//! input file (start URLs plus overrides) merged recursively, then CLI
//! flags on top. Keys are camelCase to stay compatible with existing
//! config files.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::scrape::{PoolBackoff, ProxyPoolConfig, RateLimitConfig, RetryPolicy};

/// Default record budget.
pub const DEFAULT_MAX_RECORDS: usize = 300;
/// Fallback desktop user agent.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Run settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Search or detail URLs to start from.
    #[serde(alias = "urls")]
    pub start_urls: Vec<String>,
    /// Record budget: maximum listings to emit.
    pub max_records: usize,
    /// Fetch worker pool size.
    pub parallel_requests: usize,
    /// Per-request timeout.
    pub timeout_seconds: f64,
    pub user_agent: Option<String>,
    /// Proxy URLs; empty means direct egress.
    #[serde(alias = "proxyList")]
    pub proxies: Vec<String>,
    pub output_file: Option<String>,
    pub output_format: Option<String>,

    // Retry/backoff
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_backoff_ms: u64,

    // Per-host rate limit
    pub per_host_rps: f64,
    pub rate_burst: f64,

    // Proxy pool
    pub proxy_max_leases: u32,
    pub proxy_quarantine_secs: u64,
    /// Pool-wide backoff interval when no proxy is healthy.
    pub pool_retry_secs: u64,
    /// Fatal after this much continuous pool unavailability.
    pub pool_window_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            start_urls: Vec::new(),
            max_records: DEFAULT_MAX_RECORDS,
            parallel_requests: 8,
            timeout_seconds: 15.0,
            user_agent: None,
            proxies: Vec::new(),
            output_file: None,
            output_format: None,
            max_attempts: 3,
            base_delay_ms: 500,
            max_backoff_ms: 30_000,
            per_host_rps: 2.0,
            rate_burst: 4.0,
            proxy_max_leases: 1,
            proxy_quarantine_secs: 30,
            pool_retry_secs: 2,
            pool_window_secs: 120,
        }
    }
}

impl Settings {
    /// Load settings from a JSON file, overlaying an optional input file.
    pub fn load(
        settings_path: Option<&Path>,
        input_path: Option<&Path>,
    ) -> anyhow::Result<Self> {
        let mut merged = match settings_path {
            Some(path) => load_json(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => Value::Object(Default::default()),
        };

        if let Some(path) = input_path {
            let overrides = load_json(path)
                .with_context(|| format!("failed to load input file {}", path.display()))?;
            merge_values(&mut merged, overrides);
        }

        serde_json::from_value(merged).context("invalid configuration")
    }

    pub fn user_agent(&self) -> &str {
        self.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_seconds.max(0.1))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_backoff_ms),
        }
    }

    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            refill_per_sec: self.per_host_rps.max(0.01),
            burst: self.rate_burst.max(1.0),
        }
    }

    pub fn proxy_pool_config(&self) -> ProxyPoolConfig {
        ProxyPoolConfig {
            max_leases: self.proxy_max_leases.max(1),
            quarantine_cooldown: Duration::from_secs(self.proxy_quarantine_secs),
            ..ProxyPoolConfig::default()
        }
    }

    pub fn pool_backoff(&self) -> PoolBackoff {
        PoolBackoff {
            interval: Duration::from_secs(self.pool_retry_secs.max(1)),
            window: Duration::from_secs(self.pool_window_secs.max(1)),
        }
    }
}

fn load_json(path: &Path) -> anyhow::Result<Value> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Recursive merge: override values win, nested objects merge key-wise,
/// explicit nulls in the override are ignored.
fn merge_values(base: &mut Value, overrides: Value) {
    match (base, overrides) {
        (Value::Object(base_map), Value::Object(override_map)) => {
            for (key, value) in override_map {
                if value.is_null() {
                    continue;
                }
                match base_map.get_mut(&key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        merge_values(existing, value);
                    }
                    _ => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overrides) => {
            if !overrides.is_null() {
                *base = overrides;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.max_records, 300);
        assert_eq!(settings.parallel_requests, 8);
        assert!(settings.proxies.is_empty());
        assert_eq!(settings.user_agent(), DEFAULT_USER_AGENT);
    }

    #[test]
    fn test_load_with_input_overrides() {
        let base = write_temp(
            r#"{"maxRecords": 100, "timeoutSeconds": 10.0, "proxies": ["socks5://p1:1080"]}"#,
        );
        let input = write_temp(
            r#"{"startUrls": ["https://example.com/lst"], "maxRecords": 25, "timeoutSeconds": null}"#,
        );

        let settings = Settings::load(Some(base.path()), Some(input.path())).unwrap();
        assert_eq!(settings.max_records, 25);
        // Null overrides are ignored.
        assert_eq!(settings.timeout_seconds, 10.0);
        assert_eq!(settings.start_urls, vec!["https://example.com/lst"]);
        assert_eq!(settings.proxies.len(), 1);
    }

    #[test]
    fn test_url_and_proxy_aliases() {
        let file = write_temp(r#"{"urls": ["https://a"], "proxyList": ["http://p:8080"]}"#);
        let settings = Settings::load(Some(file.path()), None).unwrap();
        assert_eq!(settings.start_urls, vec!["https://a"]);
        assert_eq!(settings.proxies, vec!["http://p:8080"]);
    }

    #[test]
    fn test_missing_config_is_error() {
        let missing = Path::new("/nonexistent/settings.json");
        assert!(Settings::load(Some(missing), None).is_err());
    }

    #[test]
    fn test_derived_configs() {
        let settings = Settings {
            max_attempts: 0,
            base_delay_ms: 250,
            ..Default::default()
        };
        // Attempt floor of 1.
        assert_eq!(settings.retry_policy().max_attempts, 1);
        assert_eq!(
            settings.retry_policy().base_delay,
            Duration::from_millis(250)
        );
    }
}
