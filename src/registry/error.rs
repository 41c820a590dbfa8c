//! Error types for the site registry.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading the site-definition feed or resolving input.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The feed could not be retrieved and no usable cache exists.
    #[error("site registry unavailable: feed {feed_url} failed ({reason}) and no usable cache exists")]
    Unavailable {
        /// Feed URL that was attempted.
        feed_url: String,
        /// Why the remote fetch failed.
        reason: String,
    },

    /// No site pattern matches the input URL (or no site claims the slug).
    #[error("unknown site for input '{input}'{}", format_suggestions(.suggestions))]
    UnknownSite {
        /// The raw user input.
        input: String,
        /// Close matches worth offering to the user.
        suggestions: Vec<String>,
    },

    /// More than one site claims the same bare slug.
    #[error("slug '{slug}' is claimed by several sites ({}); qualify it as <site>:{slug}", .sites.join(", "))]
    AmbiguousSlug {
        /// The ambiguous slug.
        slug: String,
        /// Site ids claiming it, sorted.
        sites: Vec<String>,
    },

    /// The feed or cache content violates the site-definition schema.
    #[error("invalid site feed: {reason}")]
    InvalidFeed {
        /// What was wrong with the feed.
        reason: String,
    },

    /// Reading or writing the on-disk cache failed.
    #[error("site cache error at {path}: {source}")]
    Cache {
        /// Cache file path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

fn format_suggestions(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        String::new()
    } else {
        format!(" (did you mean: {}?)", suggestions.join(", "))
    }
}

impl RegistryError {
    /// Creates an unavailable-registry error.
    pub fn unavailable(feed_url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            feed_url: feed_url.into(),
            reason: reason.into(),
        }
    }

    /// Creates an unknown-site error without suggestions.
    pub fn unknown_site(input: impl Into<String>) -> Self {
        Self::UnknownSite {
            input: input.into(),
            suggestions: Vec::new(),
        }
    }

    /// Creates an invalid-feed error.
    pub fn invalid_feed(reason: impl Into<String>) -> Self {
        Self::InvalidFeed {
            reason: reason.into(),
        }
    }

    /// Creates a cache IO error.
    pub fn cache(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Cache {
            path: path.into(),
            source,
        }
    }
}
