//! Error types for page and image fetches.

use thiserror::Error;

/// Errors that can occur while fetching a series page, chapter page or image.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error fetching {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout fetching {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// HTTP error response that is not a bot challenge.
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// The Retry-After header value, if present.
        retry_after: Option<String>,
    },

    /// The response is an anti-automation challenge rather than real content.
    #[error("blocked by bot challenge fetching {url} (HTTP {status}, marker '{marker}')")]
    Blocked {
        /// The URL that was challenged.
        url: String,
        /// HTTP status of the challenge response.
        status: u16,
        /// Which marker identified the challenge.
        marker: String,
    },

    /// The server answered successfully with zero bytes.
    #[error("empty response body from {url}")]
    EmptyBody {
        /// The URL that returned nothing.
        url: String,
    },

    /// An image was expected but something else came back.
    #[error("unexpected content type '{content_type}' from {url}")]
    UnexpectedContent {
        /// The URL fetched.
        url: String,
        /// The Content-Type that came back.
        content_type: String,
    },

    /// The provided URL is malformed or invalid.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// The HTTP client could not be configured (bad proxy URL, TLS backend).
    #[error("HTTP client setup failed: {reason}")]
    Client {
        /// What went wrong.
        reason: String,
    },
}

impl FetchError {
    /// Creates a network error from a reqwest error, folding timeouts into [`Self::Timeout`].
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        let url = url.into();
        if source.is_timeout() {
            Self::Timeout { url }
        } else {
            Self::Network { url, source }
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after: None,
        }
    }

    /// Creates a bot-challenge error.
    pub fn blocked(url: impl Into<String>, status: u16, marker: impl Into<String>) -> Self {
        Self::Blocked {
            url: url.into(),
            status,
            marker: marker.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates a client setup error.
    pub fn client(reason: impl Into<String>) -> Self {
        Self::Client {
            reason: reason.into(),
        }
    }

    /// Returns true for bot-challenge responses.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }

    /// Retry-After header value carried by an HTTP status error.
    #[must_use]
    pub fn retry_after(&self) -> Option<&str> {
        match self {
            Self::HttpStatus { retry_after, .. } => retry_after.as_deref(),
            _ => None,
        }
    }
}
