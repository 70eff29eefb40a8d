use thiserror::Error;

use super::http::HttpError;

/// Errors surfaced to a [`SearchListener`](crate::SearchListener).
///
/// Only domain-level conditions travel this way; fetch and parse failures
/// stay inside the task that hit them.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SearchError {
    #[error("Invalid search token: {0}")]
    InvalidToken(i64),

    #[error("{performer}: DDOS protection active on {domain}")]
    DdosProtection { performer: String, domain: String },

    #[error("{performer}: {message}")]
    Backend { performer: String, message: String },
}

/// A fetch failure annotated with where it happened.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{performer}: timed out after {timeout_ms}ms fetching {url} ({domain})")]
    Timeout {
        performer: String,
        domain: String,
        url: String,
        timeout_ms: u64,
    },

    #[error("{performer}: failed to fetch {url} ({domain}): {source}")]
    Http {
        performer: String,
        domain: String,
        url: String,
        #[source]
        source: HttpError,
    },
}

impl FetchError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Timeout { .. })
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Timeout { .. } => "timeout",
            FetchError::Http { source, .. } => source.kind(),
        }
    }
}
