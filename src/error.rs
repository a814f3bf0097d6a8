//! Typed error kinds shared across the engine's components.

use std::time::Duration;

use thiserror::Error;

/// The failure kinds a crawl request can terminate in.
///
/// Retry policy lives in [`CrawlError::is_retryable`]; callers should not
/// match on variants to decide retryability by hand.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// Transport-level failure: DNS, TCP, TLS, or an HTTP status classified
    /// as an error.
    #[error("navigation failed for {url}: {source}")]
    NavigationError {
        url: String,
        #[source]
        source: anyhow::Error,
    },

    /// Response content-type was not in the accepted set.
    #[error("unexpected content type {content_type:?} for {url}")]
    ContentTypeError { url: String, content_type: String },

    /// Session or IP appears blocked (401/403/429 under a blocking policy).
    #[error("request to {url} was blocked (status {status})")]
    BlockedError { url: String, status: u16 },

    /// Either navigation or the request handler exceeded its deadline.
    #[error("timed out after {0:?}")]
    TimeoutError(Duration),

    /// User code signalled this failure must never be retried.
    #[error("non-retryable error: {0}")]
    NonRetryableError(#[source] anyhow::Error),

    /// Fatal error that should abort the whole run.
    #[error("critical error: {0}")]
    CriticalError(#[source] anyhow::Error),

    /// A labeled request had no matching route and no default handler.
    #[error("no route registered for label {label:?}")]
    MissingRouteError { label: Option<String> },

    /// Cooperative, silent halt raised from within a context pipeline.
    #[error("interrupted")]
    InterruptedError,
}

impl CrawlError {
    /// Whether the engine should reclaim and retry the owning request.
    ///
    /// `ContentTypeError` is never retried: an unacceptable MIME type won't
    /// change on a second attempt. `Critical` and `MissingRoute` are not
    /// retryable because they abort the run rather than fail a single
    /// request; `NonRetryableError` is user-declared terminal;
    /// `Interrupted` never reaches the retry decision at all.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CrawlError::NavigationError { .. }
                | CrawlError::BlockedError { .. }
                | CrawlError::TimeoutError(_)
        )
    }

    /// Whether this failure should abort the entire run rather than just
    /// the owning request.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            CrawlError::CriticalError(_) | CrawlError::MissingRouteError { .. }
        )
    }

    /// Whether this failure should trigger a session rotation (distinct from
    /// an ordinary request retry).
    pub fn requires_session_rotation(&self) -> bool {
        matches!(self, CrawlError::BlockedError { .. })
    }
}

/// Errors raised by [`crate::config`] while validating an [`EngineConfig`](crate::config::EngineConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("persist_cookies_per_session requires use_session_pool to be enabled")]
    CookiePersistenceNeedsSessionPool,

    #[error("min_concurrency ({min}) must be <= max_concurrency ({max})")]
    ConcurrencyBoundsInverted { min: usize, max: usize },

    #[error("invalid proxy url {url:?}: {reason}")]
    InvalidProxyUrl { url: String, reason: String },
}

pub type CrawlResult<T> = Result<T, CrawlError>;
