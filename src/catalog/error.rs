//! Error types for chapter enumeration and range filtering.

use thiserror::Error;

use crate::transport::FetchError;

/// Errors raised while listing chapters or extracting page lists.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The series page yields no chapter listing.
    #[error("series not found: no chapter listing at {url}")]
    SeriesNotFound {
        /// Series URL that was examined.
        url: String,
    },

    /// The chapter range is malformed or inverted.
    #[error("invalid chapter range '{spec}': {reason}")]
    InvalidRange {
        /// The raw range text.
        spec: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A site's selector override is not valid CSS.
    #[error("invalid selector '{selector}': {reason}")]
    InvalidSelector {
        /// The selector text.
        selector: String,
        /// Parser message.
        reason: String,
    },

    /// The page could not be fetched.
    #[error("failed to fetch {url}: {source}")]
    Fetch {
        /// Page URL.
        url: String,
        /// The underlying fetch error.
        #[source]
        source: FetchError,
    },
}

impl CatalogError {
    /// Creates an invalid-range error.
    pub fn invalid_range(spec: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRange {
            spec: spec.into(),
            reason: reason.into(),
        }
    }

    /// Creates a fetch error.
    pub fn fetch(url: impl Into<String>, source: FetchError) -> Self {
        Self::Fetch {
            url: url.into(),
            source,
        }
    }
}
