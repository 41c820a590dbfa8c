//! Best-effort series metadata enrichment.
//!
//! The [`MetadataEnricher`] asks a [`MetadataProvider`] for candidates matching
//! a series name and keeps the most similar one. Enrichment never fails: when
//! the provider is unreachable, slow or has no good match, the result is an
//! empty [`SeriesMetadata`] and the reason is only logged.

mod anilist;

pub use anilist::{ANILIST_ENDPOINT, AniListProvider};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Upper bound on one enrichment, provider round-trip included.
pub const DEFAULT_ENRICH_TIMEOUT: Duration = Duration::from_secs(15);

/// Minimum title similarity for a candidate to be accepted.
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.6;

/// Publication status, with the numeric codes Mihon/Tachiyomi local sources use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionStatus {
    /// Not known.
    #[default]
    Unknown,
    /// Still publishing.
    Ongoing,
    /// Finished.
    Completed,
    /// Stopped for good.
    Cancelled,
    /// Paused.
    Hiatus,
}

impl CompletionStatus {
    /// Mihon `details.json` status code.
    #[must_use]
    pub fn mihon_code(self) -> &'static str {
        match self {
            Self::Unknown => "0",
            Self::Ongoing => "1",
            Self::Completed => "2",
            Self::Cancelled => "5",
            Self::Hiatus => "6",
        }
    }

    /// True for [`CompletionStatus::Unknown`].
    #[must_use]
    pub fn is_unknown(self) -> bool {
        self == Self::Unknown
    }

    /// Human-readable label.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Ongoing => "Ongoing",
            Self::Completed => "Completed",
            Self::Cancelled => "Cancelled",
            Self::Hiatus => "Hiatus",
        }
    }
}

/// Descriptive data about a series. Every field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SeriesMetadata {
    /// Canonical title from the provider.
    pub title: Option<String>,
    /// Story author.
    pub author: Option<String>,
    /// Artist.
    pub artist: Option<String>,
    /// Plain-text synopsis.
    pub summary: Option<String>,
    /// Genre names.
    pub genres: Vec<String>,
    /// Publication status.
    pub status: CompletionStatus,
    /// Year publication started.
    pub year: Option<i32>,
}

impl SeriesMetadata {
    /// True when nothing was found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// One search hit from a provider.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataCandidate {
    /// All known titles (romaji, English, native...), matched against the query.
    pub titles: Vec<String>,
    /// Story author.
    pub author: Option<String>,
    /// Artist.
    pub artist: Option<String>,
    /// Synopsis, already stripped of markup.
    pub summary: Option<String>,
    /// Genres.
    pub genres: Vec<String>,
    /// Status.
    pub status: CompletionStatus,
    /// Start year.
    pub year: Option<i32>,
}

impl MetadataCandidate {
    /// Converts the candidate into metadata, titled by its first title.
    #[must_use]
    pub fn into_metadata(self) -> SeriesMetadata {
        SeriesMetadata {
            title: self.titles.into_iter().next(),
            author: self.author,
            artist: self.artist,
            summary: self.summary,
            genres: self.genres,
            status: self.status,
            year: self.year,
        }
    }

    /// Best similarity between any of the candidate's titles and `query`.
    #[must_use]
    pub fn similarity(&self, query: &str) -> f64 {
        let query = query.trim().to_lowercase();
        self.titles
            .iter()
            .map(|title| strsim::normalized_levenshtein(&query, &title.trim().to_lowercase()))
            .fold(0.0, f64::max)
    }
}

/// Errors a provider can report. The enricher logs them and moves on.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// The request could not be sent or the connection failed.
    #[error("{provider} request failed: {source}")]
    Request {
        /// Provider name.
        provider: &'static str,
        /// Underlying error.
        #[source]
        source: reqwest::Error,
    },

    /// The provider answered with a non-success status.
    #[error("{provider} returned HTTP {status}")]
    Status {
        /// Provider name.
        provider: &'static str,
        /// HTTP status code.
        status: u16,
    },

    /// The response body did not have the expected shape.
    #[error("{provider} response could not be decoded: {reason}")]
    Decode {
        /// Provider name.
        provider: &'static str,
        /// What went wrong.
        reason: String,
    },
}

/// A searchable metadata source.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &'static str;

    /// Searches for series matching `title`.
    async fn search(&self, title: &str) -> Result<Vec<MetadataCandidate>, MetadataError>;
}

/// Looks up series metadata, degrading to empty metadata on any failure.
pub struct MetadataEnricher {
    provider: Arc<dyn MetadataProvider>,
    timeout: Duration,
    threshold: f64,
    cache: DashMap<String, SeriesMetadata>,
}

impl std::fmt::Debug for MetadataEnricher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataEnricher")
            .field("provider", &self.provider.name())
            .field("timeout", &self.timeout)
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

impl MetadataEnricher {
    /// Creates an enricher with the default timeout and match threshold.
    #[must_use]
    pub fn new(provider: Arc<dyn MetadataProvider>) -> Self {
        Self {
            provider,
            timeout: DEFAULT_ENRICH_TIMEOUT,
            threshold: DEFAULT_MATCH_THRESHOLD,
            cache: DashMap::new(),
        }
    }

    /// Overrides the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Overrides the similarity threshold.
    #[must_use]
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Returns metadata for `series_name`, or empty metadata.
    #[instrument(skip(self), fields(provider = self.provider.name()))]
    pub async fn enrich(&self, series_name: &str) -> SeriesMetadata {
        let key = series_name.trim().to_lowercase();
        if key.is_empty() {
            return SeriesMetadata::default();
        }
        if let Some(cached) = self.cache.get(&key) {
            return cached.clone();
        }

        let lookup = tokio::time::timeout(self.timeout, self.provider.search(series_name));
        let candidates = match lookup.await {
            Ok(Ok(candidates)) => candidates,
            Ok(Err(error)) => {
                warn!(error = %error, "metadata lookup failed; continuing without metadata");
                return SeriesMetadata::default();
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.timeout.as_millis(),
                    "metadata lookup timed out; continuing without metadata"
                );
                return SeriesMetadata::default();
            }
        };

        let Some(best) = best_match(series_name, candidates, self.threshold) else {
            debug!("no sufficiently similar metadata match");
            return SeriesMetadata::default();
        };

        let metadata = best.into_metadata();
        info!(title = metadata.title.as_deref().unwrap_or_default(), "metadata found");
        self.cache.insert(key, metadata.clone());
        metadata
    }
}

/// Picks the candidate most similar to `query`, if it clears `threshold`.
///
/// Ties keep the earlier candidate (providers return their best guess first).
#[must_use]
pub fn best_match(
    query: &str,
    candidates: Vec<MetadataCandidate>,
    threshold: f64,
) -> Option<MetadataCandidate> {
    let mut best: Option<(f64, MetadataCandidate)> = None;
    for candidate in candidates {
        let score = candidate.similarity(query);
        if best.as_ref().is_none_or(|(top, _)| score > *top) {
            best = Some((score, candidate));
        }
    }
    best.filter(|(score, _)| *score >= threshold)
        .map(|(_, candidate)| candidate)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn candidate(titles: &[&str]) -> MetadataCandidate {
        MetadataCandidate {
            titles: titles.iter().map(ToString::to_string).collect(),
            author: Some("Tite Kubo".to_string()),
            ..MetadataCandidate::default()
        }
    }

    struct Fixed {
        result: Result<Vec<MetadataCandidate>, u16>,
        delay: Duration,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MetadataProvider for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn search(&self, _title: &str) -> Result<Vec<MetadataCandidate>, MetadataError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.result.clone().map_err(|status| MetadataError::Status {
                provider: "fixed",
                status,
            })
        }
    }

    fn fixed(result: Result<Vec<MetadataCandidate>, u16>, delay: Duration) -> Arc<Fixed> {
        Arc::new(Fixed {
            result,
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    #[test]
    fn test_mihon_codes() {
        assert_eq!(CompletionStatus::Unknown.mihon_code(), "0");
        assert_eq!(CompletionStatus::Ongoing.mihon_code(), "1");
        assert_eq!(CompletionStatus::Completed.mihon_code(), "2");
        assert_eq!(CompletionStatus::Cancelled.mihon_code(), "5");
        assert_eq!(CompletionStatus::Hiatus.mihon_code(), "6");
    }

    #[test]
    fn test_best_match_prefers_most_similar_title() {
        let picked = best_match(
            "Bleach",
            vec![
                candidate(&["Bleach: Can't Fear Your Own World"]),
                candidate(&["BLEACH", "ブリーチ"]),
            ],
            0.6,
        )
        .unwrap();
        assert_eq!(picked.titles[0], "BLEACH");
    }

    #[test]
    fn test_best_match_rejects_weak_matches() {
        assert!(best_match("Bleach", vec![candidate(&["One Piece"])], 0.6).is_none());
        assert!(best_match("Bleach", Vec::new(), 0.6).is_none());
    }

    #[tokio::test]
    async fn test_enrich_returns_match_and_caches() {
        let provider = fixed(Ok(vec![candidate(&["Bleach"])]), Duration::ZERO);
        let enricher = MetadataEnricher::new(provider.clone());
        let first = enricher.enrich("bleach").await;
        let second = enricher.enrich("Bleach ").await;
        assert_eq!(first.title.as_deref(), Some("Bleach"));
        assert_eq!(first, second);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_enrich_provider_error_is_empty() {
        let enricher = MetadataEnricher::new(fixed(Err(500), Duration::ZERO));
        assert!(enricher.enrich("Bleach").await.is_empty());
    }

    #[tokio::test]
    async fn test_enrich_timeout_is_empty() {
        let enricher = MetadataEnricher::new(fixed(
            Ok(vec![candidate(&["Bleach"])]),
            Duration::from_secs(5),
        ))
        .with_timeout(Duration::from_millis(50));
        assert!(enricher.enrich("Bleach").await.is_empty());
    }

    #[tokio::test]
    async fn test_enrich_empty_name_skips_provider() {
        let provider = fixed(Ok(vec![candidate(&["Bleach"])]), Duration::ZERO);
        let enricher = MetadataEnricher::new(provider.clone());
        assert!(enricher.enrich("   ").await.is_empty());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }
}
