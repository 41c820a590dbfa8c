//! Download engine: page lists, bounded concurrent page fetches, retries.
//!
//! The engine owns one [`SiteSession`] per run. Every network operation (page
//! lists and images alike) goes through [`fetch_with_retry`], which classifies
//! failures, honours Retry-After and reports bot challenges to the session so it
//! can escalate to the browser transport.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use yomi_core::download::{DownloadEngine, DownloadOptions};
//! use yomi_core::registry::SiteDefinition;
//! use yomi_core::transport::TransportOptions;
//!
//! # async fn example(chapters: Vec<yomi_core::ChapterDescriptor>) -> Result<(), Box<dyn std::error::Error>> {
//! let site = Arc::new(SiteDefinition::new("mangakakalot", "mangakakalot.com"));
//! let engine = DownloadEngine::new(site, DownloadOptions::default(), TransportOptions::default())?;
//! for chapter in engine.download(&chapters).await {
//!     println!("{}: {}", chapter.chapter.title, chapter.outcome.label());
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use super::gate::ConcurrencyGate;
use super::page::{
    CANCELLED_REASON, ChapterDownload, ChapterOutcome, PageResult, PageTask, evaluate_outcome,
};
use super::session::SiteSession;
use crate::catalog::{CatalogError, ChapterDescriptor, ChapterEnumerator, PageSource, SeriesListing};
use crate::registry::{SeriesTarget, SiteDefinition, TransportKind};
use crate::transport::{
    FailureType, FetchError, RetryDecision, RetryPolicy, TransportOptions, classify_error,
    parse_retry_after,
};

/// Minimum worker budget.
pub const MIN_WORKERS: usize = 1;

/// Maximum worker budget.
pub const MAX_WORKERS: usize = 64;

/// Worker budget if not specified.
pub const DEFAULT_WORKERS: usize = 8;

/// Chapters with a larger share of failed pages are not written.
pub const DEFAULT_MAX_FAILURE_RATIO: f64 = 0.5;

/// `Blocked` results per site before escalating to the browser transport.
pub const DEFAULT_ESCALATION_THRESHOLD: usize = 3;

/// Time in-flight fetches get to finish after an interrupt.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

const INTERRUPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Error type for download engine setup.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid worker budget provided.
    #[error("invalid concurrency value {value}: must be between {MIN_WORKERS} and {MAX_WORKERS}")]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// The site's transport could not be built.
    #[error("transport setup failed: {0}")]
    Transport(#[from] FetchError),

    /// The site's selector overrides are invalid.
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Tunables for a download run.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Requested number of concurrent page fetches.
    pub workers: usize,
    /// Per-request retry policy.
    pub retry_policy: RetryPolicy,
    /// Failed-page share above which a chapter is marked failed.
    pub max_failure_ratio: f64,
    /// `Blocked` results before escalating the transport.
    pub escalation_threshold: usize,
    /// How long in-flight fetches may run after an interrupt.
    pub grace_period: Duration,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            retry_policy: RetryPolicy::default(),
            max_failure_ratio: DEFAULT_MAX_FAILURE_RATIO,
            escalation_threshold: DEFAULT_ESCALATION_THRESHOLD,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

/// Statistics from a download run.
///
/// Atomic counters updated from concurrent page tasks.
#[derive(Debug, Default)]
pub struct DownloadStats {
    pages_fetched: AtomicUsize,
    pages_failed: AtomicUsize,
    retries: AtomicUsize,
    blocked: AtomicUsize,
    escalations: AtomicUsize,
}

impl DownloadStats {
    /// Creates a new stats tracker with zero counts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pages fetched successfully.
    #[must_use]
    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched.load(Ordering::SeqCst)
    }

    /// Pages that failed after retries (including cancelled ones).
    #[must_use]
    pub fn pages_failed(&self) -> usize {
        self.pages_failed.load(Ordering::SeqCst)
    }

    /// Retry attempts made.
    #[must_use]
    pub fn retries(&self) -> usize {
        self.retries.load(Ordering::SeqCst)
    }

    /// Bot-challenge responses seen.
    #[must_use]
    pub fn blocked(&self) -> usize {
        self.blocked.load(Ordering::SeqCst)
    }

    /// Transport escalations performed.
    #[must_use]
    pub fn escalations(&self) -> usize {
        self.escalations.load(Ordering::SeqCst)
    }

    fn increment_pages_fetched(&self) {
        self.pages_fetched.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_pages_failed(&self) {
        self.pages_failed.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_retries(&self) {
        self.retries.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_blocked(&self) {
        self.blocked.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_escalations(&self) {
        self.escalations.fetch_add(1, Ordering::SeqCst);
    }
}

/// Fetches chapters of one site with bounded concurrency.
///
/// The concurrency ceiling is `min(workers, transport.max_safe_concurrency())`
/// and only ever drops (on escalation). Page failures degrade a chapter to
/// partial instead of aborting it.
#[derive(Debug)]
pub struct DownloadEngine {
    session: Arc<SiteSession>,
    enumerator: ChapterEnumerator,
    options: DownloadOptions,
    stats: Arc<DownloadStats>,
    interrupted: Arc<AtomicBool>,
}

impl DownloadEngine {
    /// Creates an engine for `site`.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidConcurrency`] if `options.workers` is outside 1..=64
    /// - [`EngineError::Transport`] if the HTTP client cannot be built
    /// - [`EngineError::Catalog`] if the site's selector overrides do not parse
    pub fn new(
        site: Arc<SiteDefinition>,
        options: DownloadOptions,
        transport_options: TransportOptions,
    ) -> Result<Self, EngineError> {
        if !(MIN_WORKERS..=MAX_WORKERS).contains(&options.workers) {
            return Err(EngineError::InvalidConcurrency {
                value: options.workers,
            });
        }

        let enumerator = ChapterEnumerator::new(&site)?;
        let session = SiteSession::new(
            site,
            options.workers,
            options.escalation_threshold,
            transport_options,
        )?;

        Ok(Self {
            session: Arc::new(session),
            enumerator,
            options,
            stats: Arc::new(DownloadStats::new()),
            interrupted: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Shares an interrupt flag (normally set by the Ctrl-C handler).
    #[must_use]
    pub fn with_interrupt_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupted = flag;
        self
    }

    /// True once the interrupt flag is set.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Run statistics so far.
    #[must_use]
    pub fn stats(&self) -> &DownloadStats {
        &self.stats
    }

    /// The shared concurrency gate.
    #[must_use]
    pub fn gate(&self) -> &Arc<ConcurrencyGate> {
        self.session.gate()
    }

    /// Transport currently in use.
    #[must_use]
    pub fn transport_kind(&self) -> TransportKind {
        self.session.transport().kind()
    }

    /// Options this engine was built with.
    #[must_use]
    pub fn options(&self) -> &DownloadOptions {
        &self.options
    }

    /// Fetches the series page through the retrying fetch path and lists chapters.
    ///
    /// # Errors
    ///
    /// See [`ChapterEnumerator::fetch_series`].
    pub async fn fetch_series(&self, target: &SeriesTarget) -> Result<SeriesListing, CatalogError> {
        self.enumerator.fetch_series(self, target).await
    }

    /// Downloads chapters one after another, preserving their order.
    pub async fn download(&self, chapters: &[ChapterDescriptor]) -> Vec<ChapterDownload> {
        let mut downloads = Vec::with_capacity(chapters.len());
        for chapter in chapters {
            downloads.push(self.download_chapter(chapter).await);
        }
        downloads
    }

    /// Expands one chapter into page tasks and fetches them.
    ///
    /// Never fails: problems are reported through [`ChapterDownload::outcome`].
    #[instrument(
        skip(self, chapter),
        fields(site = %self.session.site().id, chapter = %chapter.chapter_id)
    )]
    pub async fn download_chapter(&self, chapter: &ChapterDescriptor) -> ChapterDownload {
        if self.is_interrupted() {
            return ChapterDownload::skipped(chapter.clone(), "interrupted before start");
        }

        let urls = match self.enumerator.page_urls(self, chapter).await {
            Ok(urls) => urls,
            Err(error) => {
                warn!(error = %error, "page list unavailable");
                return ChapterDownload::failed(chapter.clone(), error.to_string());
            }
        };

        let tasks = PageTask::for_chapter(&chapter.chapter_id, urls);
        debug!(pages = tasks.len(), ceiling = self.gate().ceiling(), "fetching pages");
        let pages = self.fetch_pages(tasks, &chapter.url).await;
        let outcome = evaluate_outcome(&pages, self.options.max_failure_ratio);

        match &outcome {
            ChapterOutcome::Complete => info!(pages = pages.len(), "chapter complete"),
            ChapterOutcome::Partial { missing } => {
                warn!(pages = pages.len(), missing = ?missing, "chapter incomplete");
            }
            ChapterOutcome::Failed { reason } | ChapterOutcome::Skipped { reason } => {
                warn!(%reason, "chapter failed");
            }
        }

        ChapterDownload {
            chapter: chapter.clone(),
            pages,
            outcome,
        }
    }

    /// Fetches page tasks through the gate; results come back sorted by page index.
    async fn fetch_pages(&self, tasks: Vec<PageTask>, referer: &str) -> Vec<PageResult> {
        let gate = Arc::clone(self.session.gate());
        let mut join_set = JoinSet::new();

        for task in tasks.iter().cloned() {
            let permit = tokio::select! {
                biased;
                () = wait_for_interrupt(&self.interrupted) => None,
                permit = gate.acquire() => Some(permit),
            };
            let Some(permit) = permit.filter(|_| !self.is_interrupted()) else {
                info!(page = task.page_index, "interrupted; not starting remaining pages");
                break;
            };

            let session = Arc::clone(&self.session);
            let stats = Arc::clone(&self.stats);
            let interrupted = Arc::clone(&self.interrupted);
            let policy = self.options.retry_policy.clone();
            let referer = referer.to_string();

            join_set.spawn(async move {
                let _permit = permit;
                let (result, attempts) = fetch_with_retry(
                    &session,
                    &policy,
                    &stats,
                    &interrupted,
                    &task.source_url,
                    Want::Image {
                        referer: Some(&referer),
                    },
                )
                .await;
                match result {
                    Ok(bytes) => {
                        stats.increment_pages_fetched();
                        PageResult::success(task, bytes, attempts)
                    }
                    Err(error) => {
                        warn!(
                            page = task.page_index,
                            url = %task.source_url,
                            error = %error,
                            attempts,
                            "page failed"
                        );
                        stats.increment_pages_failed();
                        PageResult::failure(task, error.to_string(), attempts)
                    }
                }
            });
        }

        let mut results = Vec::with_capacity(tasks.len());
        let grace = async {
            wait_for_interrupt(&self.interrupted).await;
            tokio::time::sleep(self.options.grace_period).await;
        };
        tokio::pin!(grace);

        loop {
            tokio::select! {
                joined = join_set.join_next() => match joined {
                    None => break,
                    Some(Ok(result)) => results.push(result),
                    Some(Err(error)) => warn!(error = %error, "page task panicked"),
                },
                () = &mut grace => {
                    warn!(
                        in_flight = join_set.len(),
                        "grace period elapsed; abandoning in-flight pages"
                    );
                    join_set.abort_all();
                    break;
                }
            }
        }

        let finished: HashSet<usize> = results.iter().map(|r| r.task.page_index).collect();
        for task in tasks {
            if !finished.contains(&task.page_index) {
                self.stats.increment_pages_failed();
                results.push(PageResult::failure(task, CANCELLED_REASON, 0));
            }
        }

        results.sort_by_key(|r| r.task.page_index);
        results
    }
}

/// Page lists go through the same gate and retry path as images.
#[async_trait]
impl PageSource for DownloadEngine {
    async fn fetch_html(&self, url: &str) -> Result<String, FetchError> {
        let _permit = self.session.gate().acquire().await;
        let (result, _) = fetch_with_retry(
            &self.session,
            &self.options.retry_policy,
            &self.stats,
            &self.interrupted,
            url,
            Want::Document,
        )
        .await;
        result.map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[derive(Debug, Clone, Copy)]
enum Want<'a> {
    Document,
    Image { referer: Option<&'a str> },
}

/// Resolves once the interrupt flag is set.
async fn wait_for_interrupt(flag: &AtomicBool) {
    while !flag.load(Ordering::SeqCst) {
        tokio::time::sleep(INTERRUPT_POLL_INTERVAL).await;
    }
}

/// Fetches `url` with retries, returning the final result and attempt count.
///
/// Each attempt uses the transport in effect at that moment, so retries after
/// an escalation already go through the browser transport.
#[instrument(skip_all, fields(url = %url))]
async fn fetch_with_retry(
    session: &SiteSession,
    policy: &RetryPolicy,
    stats: &DownloadStats,
    interrupted: &AtomicBool,
    url: &str,
    want: Want<'_>,
) -> (Result<Vec<u8>, FetchError>, u32) {
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let transport = session.transport();
        let result = match want {
            Want::Document => transport.fetch_text(url).await.map(String::into_bytes),
            Want::Image { referer } => transport.fetch_image(url, referer).await,
        };
        let error = match result {
            Ok(bytes) => return (Ok(bytes), attempt),
            Err(error) => error,
        };

        let failure_type = classify_error(&error);
        if failure_type == FailureType::Blocked {
            session.record_blocked(stats);
        }

        let retry_after = if failure_type == FailureType::RateLimited {
            error.retry_after().and_then(parse_retry_after)
        } else {
            None
        };
        if let Some(delay) = retry_after {
            transport.note_rate_limit(url, delay).await;
        }

        match policy.should_retry(failure_type, attempt) {
            RetryDecision::Retry {
                delay: backoff_delay,
                attempt: next_attempt,
            } => {
                if interrupted.load(Ordering::SeqCst) {
                    debug!(attempt, "interrupted; not retrying");
                    return (Err(error), attempt);
                }
                let delay = retry_after.map_or(backoff_delay, |server| server.max(backoff_delay));
                info!(
                    attempt = next_attempt,
                    max_attempts = policy.max_attempts(),
                    delay_ms = delay.as_millis(),
                    using_retry_after = retry_after.is_some(),
                    error = %error,
                    "retrying fetch"
                );
                stats.increment_retries();
                tokio::time::sleep(delay).await;
            }
            RetryDecision::DoNotRetry { reason } => {
                debug!(%reason, attempt, "not retrying fetch");
                return (Err(error), attempt);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn site() -> Arc<SiteDefinition> {
        Arc::new(SiteDefinition::new("a", "a.test"))
    }

    fn engine_with_workers(workers: usize) -> Result<DownloadEngine, EngineError> {
        DownloadEngine::new(
            site(),
            DownloadOptions {
                workers,
                ..DownloadOptions::default()
            },
            TransportOptions::default(),
        )
    }

    #[test]
    fn test_engine_new_valid_workers() {
        let engine = engine_with_workers(4).unwrap();
        assert_eq!(engine.gate().ceiling(), 4);
        assert_eq!(engine.transport_kind(), TransportKind::Lightweight);
    }

    #[test]
    fn test_engine_new_invalid_workers() {
        for value in [0, 65] {
            assert!(matches!(
                engine_with_workers(value),
                Err(EngineError::InvalidConcurrency { value: v }) if v == value
            ));
        }
    }

    #[test]
    fn test_engine_error_display() {
        let error = EngineError::InvalidConcurrency { value: 0 };
        assert_eq!(
            error.to_string(),
            "invalid concurrency value 0: must be between 1 and 64"
        );
    }

    #[test]
    fn test_download_stats_increment() {
        let stats = DownloadStats::new();
        stats.increment_pages_fetched();
        stats.increment_pages_fetched();
        stats.increment_pages_failed();
        stats.increment_retries();
        stats.increment_blocked();
        assert_eq!(stats.pages_fetched(), 2);
        assert_eq!(stats.pages_failed(), 1);
        assert_eq!(stats.retries(), 1);
        assert_eq!(stats.blocked(), 1);
        assert_eq!(stats.escalations(), 0);
    }

    #[tokio::test]
    async fn test_interrupted_engine_skips_chapter() {
        let flag = Arc::new(AtomicBool::new(true));
        let engine = engine_with_workers(2).unwrap().with_interrupt_flag(flag);
        let chapter = ChapterDescriptor::new(1.0, "Chapter 1", "https://a.test/chapter-1");
        let download = engine.download_chapter(&chapter).await;
        assert_eq!(download.outcome.label(), "skipped");
        assert!(download.pages.is_empty());
    }

    #[tokio::test]
    async fn test_wait_for_interrupt_returns_when_set() {
        let flag = Arc::new(AtomicBool::new(false));
        let setter = Arc::clone(&flag);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            setter.store(true, Ordering::SeqCst);
        });
        tokio::time::timeout(Duration::from_secs(2), wait_for_interrupt(&flag))
            .await
            .unwrap();
    }
}
