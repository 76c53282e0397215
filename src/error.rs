//! Error types shared across the crate.

use std::fmt;

use thiserror::Error;

/// How a failed fetch attempt is classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Timeouts and transport errors; worth retrying as-is.
    Transient,
    /// Anti-bot interference: 403/429 or a block-page body.
    Blocked,
    /// The server definitively rejected the URL.
    Permanent,
}

impl FailureKind {
    pub fn is_retryable(self) -> bool {
        !matches!(self, FailureKind::Permanent)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureKind::Transient => "transient",
            FailureKind::Blocked => "blocked",
            FailureKind::Permanent => "permanent",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
pub enum ScrapeError {
    /// All retry attempts were spent without a usable response.
    #[error("fetch failed for {url} after {attempts} attempts (last: {last})")]
    FetchFailed {
        url: String,
        attempts: u32,
        last: FailureKind,
    },

    /// Non-retryable server rejection.
    #[error("permanent failure for {url}: status {status}")]
    Permanent { url: String, status: u16 },

    /// A mandatory field anchor was absent from the page.
    #[error("extraction failed for {url}: {reason}")]
    ExtractionFailed { url: String, reason: String },

    /// No proxy is currently leasable; callers may back off and retry.
    #[error("no healthy proxy available")]
    Unavailable,

    /// Proxy pool stayed unavailable past the backoff window.
    #[error("proxy pool exhausted after waiting {waited_secs}s")]
    PoolExhausted { waited_secs: u64 },

    #[error("invalid url {url}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

impl ScrapeError {
    /// Short reason string for the skipped-page report.
    pub fn skip_reason(&self) -> String {
        match self {
            ScrapeError::FetchFailed { attempts, last, .. } => {
                format!("fetch failed after {attempts} attempts ({last})")
            }
            ScrapeError::Permanent { status, .. } => format!("http status {status}"),
            ScrapeError::ExtractionFailed { reason, .. } => {
                format!("extraction failed: {reason}")
            }
            ScrapeError::Unavailable => "no healthy proxy".to_string(),
            ScrapeError::PoolExhausted { waited_secs } => {
                format!("proxy pool exhausted after {waited_secs}s")
            }
            ScrapeError::InvalidUrl { .. } => "invalid url".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kind_retryable() {
        assert!(FailureKind::Transient.is_retryable());
        assert!(FailureKind::Blocked.is_retryable());
        assert!(!FailureKind::Permanent.is_retryable());
    }

    #[test]
    fn test_skip_reason_mentions_attempts() {
        let err = ScrapeError::FetchFailed {
            url: "https://example.com/x".into(),
            attempts: 3,
            last: FailureKind::Blocked,
        };
        assert_eq!(err.skip_reason(), "fetch failed after 3 attempts (blocked)");
    }

    #[test]
    fn test_display_includes_url() {
        let err = ScrapeError::Permanent {
            url: "https://example.com/gone".into(),
            status: 404,
        };
        assert!(err.to_string().contains("https://example.com/gone"));
        assert!(err.to_string().contains("404"));
    }
}
