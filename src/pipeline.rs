//! End-to-end run: registry refresh, resolution, enumeration with metadata in
//! parallel, range filtering, per-chapter download and assembly, and the run
//! summary.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::assemble::{AssembleError, Assembler, OutputFormat, OutputJob};
use crate::catalog::{CatalogError, ChapterDescriptor, ChapterRange};
use crate::download::{
    ChapterDownload, ChapterOutcome, DownloadEngine, DownloadOptions, DownloadStats, EngineError,
};
use crate::metadata::{
    AniListProvider, DEFAULT_ENRICH_TIMEOUT, MetadataEnricher, MetadataProvider, SeriesMetadata,
};
use crate::registry::{
    DEFAULT_FEED_TIMEOUT, DEFAULT_FEED_URL, FeedLoader, RegistryError, SeriesTarget,
    SiteRegistry, TransportKind,
};
use crate::transport::TransportOptions;

/// Default output directory.
pub const DEFAULT_OUTPUT_DIR: &str = "downloads";

/// Cache directory used when no user cache directory can be determined.
pub const FALLBACK_CACHE_DIR: &str = ".yomi-cache";

/// Errors that abort a run before anything is downloaded.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Feed and cache both unusable, or the input did not resolve.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Series page missing, bad range, or bad selectors.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Invalid worker count or the HTTP client could not be built.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Settings for one run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Root of the written series directories.
    pub output_dir: PathBuf,
    /// Site-definition feed URL or local path.
    pub feed_url: String,
    /// Where the feed cache lives.
    pub cache_dir: PathBuf,
    /// Timeout for the feed request.
    pub feed_timeout: Duration,
    /// Page fetching settings.
    pub download: DownloadOptions,
    /// Client settings shared by both transports.
    pub transport: TransportOptions,
    /// Whether to query the metadata provider.
    pub metadata: bool,
    /// Upper bound on metadata enrichment.
    pub metadata_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            feed_url: DEFAULT_FEED_URL.to_string(),
            cache_dir: PathBuf::from(FALLBACK_CACHE_DIR),
            feed_timeout: DEFAULT_FEED_TIMEOUT,
            download: DownloadOptions::default(),
            transport: TransportOptions::default(),
            metadata: true,
            metadata_timeout: DEFAULT_ENRICH_TIMEOUT,
        }
    }
}

/// What the user asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    /// Series URL or slug (`bleach`, `site:bleach`).
    pub input: String,
    /// Optional chapter range (`5`, `1-10`).
    pub range: Option<String>,
    /// Container format.
    pub format: OutputFormat,
}

impl DownloadRequest {
    /// Request for every chapter in folder format.
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            range: None,
            format: OutputFormat::default(),
        }
    }

    /// Restricts the request to a chapter range.
    #[must_use]
    pub fn with_range(mut self, range: impl Into<String>) -> Self {
        self.range = Some(range.into());
        self
    }

    /// Sets the container format.
    #[must_use]
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }
}

/// Final state of one chapter in the run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChapterStatus {
    /// Every page written.
    Complete,
    /// Written with some pages missing.
    Partial,
    /// Not written.
    Failed,
    /// Not attempted.
    Skipped,
}

impl ChapterStatus {
    /// Lowercase label for the summary table.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Partial => "partial",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    /// True when the chapter ended up on disk.
    #[must_use]
    pub fn is_written(self) -> bool {
        matches!(self, Self::Complete | Self::Partial)
    }
}

/// One row of the run summary.
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterReport {
    /// Chapter number.
    pub sequence: f64,
    /// Chapter title as listed.
    pub title: String,
    /// What happened.
    pub status: ChapterStatus,
    /// Pages on disk.
    pub pages_written: usize,
    /// Pages the chapter has.
    pub pages_total: usize,
    /// Written directory or container.
    pub path: Option<PathBuf>,
    /// Why the chapter is partial, failed or skipped.
    pub reason: Option<String>,
}

impl ChapterReport {
    fn unwritten(
        chapter: &ChapterDescriptor,
        status: ChapterStatus,
        pages_total: usize,
        reason: String,
    ) -> Self {
        Self {
            sequence: chapter.sequence_number,
            title: chapter.title.clone(),
            status,
            pages_written: 0,
            pages_total,
            path: None,
            reason: Some(reason),
        }
    }
}

/// Counter snapshot taken at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Pages fetched.
    pub pages_fetched: usize,
    /// Pages given up on.
    pub pages_failed: usize,
    /// Retries issued.
    pub retries: usize,
    /// Blocked responses seen.
    pub blocked: usize,
    /// Transport escalations.
    pub escalations: usize,
}

impl From<&DownloadStats> for RunStats {
    fn from(stats: &DownloadStats) -> Self {
        Self {
            pages_fetched: stats.pages_fetched(),
            pages_failed: stats.pages_failed(),
            retries: stats.retries(),
            blocked: stats.blocked(),
            escalations: stats.escalations(),
        }
    }
}

/// Outcome of a whole run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Series name used on disk.
    pub series: String,
    /// Series page URL.
    pub series_url: String,
    /// Site the series resolved to.
    pub site_id: String,
    /// Transport in use when the run ended.
    pub transport: TransportKind,
    /// Chapters listed on the series page.
    pub chapters_available: usize,
    /// One report per selected chapter, in chapter order.
    pub chapters: Vec<ChapterReport>,
    /// Series metadata that was applied.
    pub metadata: Arc<SeriesMetadata>,
    /// True if the run was interrupted.
    pub interrupted: bool,
    /// Final counters.
    pub stats: RunStats,
}

impl RunSummary {
    /// Number of chapters with the given status.
    #[must_use]
    pub fn count(&self, status: ChapterStatus) -> usize {
        self.chapters.iter().filter(|c| c.status == status).count()
    }

    /// Chapters written, complete or partial.
    #[must_use]
    pub fn written(&self) -> usize {
        self.chapters.iter().filter(|c| c.status.is_written()).count()
    }

    /// Success when something was written or the range selected nothing.
    #[must_use]
    pub fn exit_status(&self) -> bool {
        self.chapters.is_empty() || self.written() > 0
    }
}

/// Progress hooks; every method defaults to doing nothing.
pub trait RunObserver: Send + Sync {
    /// The input resolved to a series.
    fn series_resolved(&self, _target: &SeriesTarget) {}

    /// Chapters left after range filtering.
    fn chapters_selected(&self, _count: usize) {}

    /// A chapter download is starting.
    fn chapter_started(&self, _chapter: &ChapterDescriptor) {}

    /// A chapter is done, written or not.
    fn chapter_finished(&self, _report: &ChapterReport) {}
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {}

/// Wires registry, engine, enricher and assembler for one run.
pub struct Pipeline {
    config: PipelineConfig,
    provider: Option<Arc<dyn MetadataProvider>>,
    observer: Arc<dyn RunObserver>,
    interrupted: Arc<AtomicBool>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("provider", &self.provider.as_ref().map(|p| p.name()))
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Creates a pipeline; metadata comes from AniList unless replaced.
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            provider: None,
            observer: Arc::new(NoopObserver),
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Uses `provider` for metadata lookups.
    #[must_use]
    pub fn with_metadata_provider(mut self, provider: Arc<dyn MetadataProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Reports progress to `observer`.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Shares an interrupt flag (normally set by the Ctrl-C handler).
    #[must_use]
    pub fn with_interrupt_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupted = flag;
        self
    }

    /// Settings for this pipeline.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Refreshes the site registry from the feed, falling back to the cache.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Unavailable`] when neither source is usable.
    pub async fn load_registry(&self) -> Result<SiteRegistry, RegistryError> {
        FeedLoader::new(
            self.config.feed_url.clone(),
            self.config.cache_dir.clone(),
            self.config.feed_timeout,
        )?
        .refresh()
        .await
    }

    /// Refreshes the registry and runs `request` against it.
    ///
    /// # Errors
    ///
    /// See [`Pipeline::run_with_registry`].
    pub async fn run(&self, request: &DownloadRequest) -> Result<RunSummary, PipelineError> {
        let registry = self.load_registry().await?;
        self.run_with_registry(&registry, request).await
    }

    /// Runs `request` against an already loaded registry.
    ///
    /// Chapter-level problems end up in the summary; only resolution,
    /// enumeration and setup failures are returned as errors.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::Catalog`] for a malformed range or a missing series
    /// - [`PipelineError::Registry`] when the input does not resolve
    /// - [`PipelineError::Engine`] for an invalid worker count
    #[instrument(skip(self, registry, request), fields(input = %request.input))]
    pub async fn run_with_registry(
        &self,
        registry: &SiteRegistry,
        request: &DownloadRequest,
    ) -> Result<RunSummary, PipelineError> {
        let range = request.range.as_deref().map(ChapterRange::parse).transpose()?;

        let target = registry.resolve(&request.input)?;
        let site = registry
            .get(&target.site_id)
            .ok_or_else(|| RegistryError::unknown_site(&request.input))?;
        info!(site = %target.site_id, url = %target.url, "resolved series");
        self.observer.series_resolved(&target);

        let engine = DownloadEngine::new(
            site,
            self.config.download.clone(),
            self.config.transport.clone(),
        )?
        .with_interrupt_flag(Arc::clone(&self.interrupted));

        // A feed-curated name can be queried while chapters are enumerated; otherwise
        // the query waits for the title scraped from the series page.
        let early_metadata = if target.name_is_curated {
            self.spawn_enrichment(&target.display_name)
        } else {
            None
        };
        let listing = match engine.fetch_series(&target).await {
            Ok(listing) => listing,
            Err(error) => {
                if let Some(task) = early_metadata {
                    task.abort();
                }
                return Err(error.into());
            }
        };
        let series = series_name(&target, listing.title.as_deref());
        let metadata_task = if target.name_is_curated {
            early_metadata
        } else {
            self.spawn_enrichment(&series)
        };

        let chapters_available = listing.chapters.len();
        let selected = match &range {
            Some(range) => range.filter(&listing.chapters),
            None => listing.chapters,
        };
        info!(
            available = chapters_available,
            selected = selected.len(),
            "chapters selected"
        );
        self.observer.chapters_selected(selected.len());

        let metadata = Arc::new(self.await_metadata(metadata_task).await);
        let assembler = Assembler::new(&self.config.output_dir);

        let mut reports = Vec::with_capacity(selected.len());
        for chapter in &selected {
            let report = if self.is_interrupted() {
                ChapterReport::unwritten(
                    chapter,
                    ChapterStatus::Skipped,
                    0,
                    "interrupted".to_string(),
                )
            } else {
                self.observer.chapter_started(chapter);
                let download = engine.download_chapter(chapter).await;
                self.assemble(&assembler, &target, &series, &metadata, download, request.format)
                    .await
            };
            self.observer.chapter_finished(&report);
            reports.push(report);
        }

        Ok(RunSummary {
            series,
            series_url: target.url.clone(),
            site_id: target.site_id.clone(),
            transport: engine.transport_kind(),
            chapters_available,
            chapters: reports,
            metadata,
            interrupted: self.is_interrupted(),
            stats: RunStats::from(engine.stats()),
        })
    }

    fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    fn spawn_enrichment(&self, name: &str) -> Option<tokio::task::JoinHandle<SeriesMetadata>> {
        if !self.config.metadata {
            return None;
        }
        let provider: Arc<dyn MetadataProvider> = match &self.provider {
            Some(provider) => Arc::clone(provider),
            None => match AniListProvider::new() {
                Ok(provider) => Arc::new(provider),
                Err(error) => {
                    warn!(error = %error, "metadata provider unavailable");
                    return None;
                }
            },
        };
        let enricher = MetadataEnricher::new(provider).with_timeout(self.config.metadata_timeout);
        let name = name.to_string();
        Some(tokio::spawn(async move { enricher.enrich(&name).await }))
    }

    async fn await_metadata(
        &self,
        task: Option<tokio::task::JoinHandle<SeriesMetadata>>,
    ) -> SeriesMetadata {
        let Some(task) = task else {
            return SeriesMetadata::default();
        };
        if self.is_interrupted() {
            task.abort();
            return SeriesMetadata::default();
        }
        match task.await {
            Ok(metadata) => metadata,
            Err(error) => {
                debug!(error = %error, "metadata task ended without a result");
                SeriesMetadata::default()
            }
        }
    }

    async fn assemble(
        &self,
        assembler: &Assembler,
        target: &SeriesTarget,
        series: &str,
        metadata: &Arc<SeriesMetadata>,
        download: ChapterDownload,
        format: OutputFormat,
    ) -> ChapterReport {
        let chapter = download.chapter.clone();
        let pages_total = download.pages.len();

        match &download.outcome {
            ChapterOutcome::Failed { reason } => {
                return ChapterReport::unwritten(
                    &chapter,
                    ChapterStatus::Failed,
                    pages_total,
                    reason.clone(),
                );
            }
            ChapterOutcome::Skipped { reason } => {
                return ChapterReport::unwritten(
                    &chapter,
                    ChapterStatus::Skipped,
                    pages_total,
                    reason.clone(),
                );
            }
            ChapterOutcome::Complete | ChapterOutcome::Partial { .. } => {}
        }

        let missing = download.missing_pages();
        let job = OutputJob {
            series_title: series.to_string(),
            series_url: target.url.clone(),
            chapter: download,
            metadata: Arc::clone(metadata),
            format,
        };

        match assembler.write_async(job).await {
            Ok(written) => {
                let (status, reason) = if written.incomplete {
                    let reason = if missing.is_empty() {
                        format!("{} of {pages_total} pages written", written.pages_written)
                    } else {
                        format!("missing pages: {}", join_indexes(&missing))
                    };
                    (ChapterStatus::Partial, Some(reason))
                } else {
                    (ChapterStatus::Complete, None)
                };
                ChapterReport {
                    sequence: chapter.sequence_number,
                    title: chapter.title,
                    status,
                    pages_written: written.pages_written,
                    pages_total,
                    path: Some(written.path),
                    reason,
                }
            }
            Err(error) => {
                warn!(chapter = %chapter.chapter_id, error = %error, "chapter not written");
                discard_partial(&error);
                ChapterReport::unwritten(
                    &chapter,
                    ChapterStatus::Failed,
                    pages_total,
                    error.to_string(),
                )
            }
        }
    }
}

/// Removes the `.part` file a failed container write left behind.
/// The feed's name when curated, else the scraped page title, else the input-derived name.
fn series_name(target: &SeriesTarget, page_title: Option<&str>) -> String {
    if target.name_is_curated {
        return target.display_name.clone();
    }
    page_title
        .map(str::trim)
        .filter(|title| !title.is_empty())
        .map_or_else(|| target.display_name.clone(), str::to_string)
}

fn discard_partial(error: &AssembleError) {
    if let Some(partial) = error.partial()
        && let Err(e) = fs::remove_file(partial)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %partial.display(), error = %e, "could not remove partial output");
    }
}

fn join_indexes(indexes: &[usize]) -> String {
    indexes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::registry::{SiteDefinition, SiteFeed};

    fn report(status: ChapterStatus) -> ChapterReport {
        ChapterReport {
            sequence: 1.0,
            title: "Chapter 1".to_string(),
            status,
            pages_written: 0,
            pages_total: 0,
            path: None,
            reason: None,
        }
    }

    fn summary(statuses: &[ChapterStatus]) -> RunSummary {
        RunSummary {
            series: "Bleach".to_string(),
            series_url: "https://a.test/manga/bleach".to_string(),
            site_id: "a".to_string(),
            transport: TransportKind::Lightweight,
            chapters_available: 10,
            chapters: statuses.iter().copied().map(report).collect(),
            metadata: Arc::new(SeriesMetadata::default()),
            interrupted: false,
            stats: RunStats::default(),
        }
    }

    #[test]
    fn test_exit_status() {
        assert!(summary(&[]).exit_status());
        assert!(summary(&[ChapterStatus::Failed, ChapterStatus::Partial]).exit_status());
        assert!(!summary(&[ChapterStatus::Failed, ChapterStatus::Skipped]).exit_status());
    }

    #[test]
    fn test_summary_counts() {
        let s = summary(&[
            ChapterStatus::Complete,
            ChapterStatus::Complete,
            ChapterStatus::Partial,
            ChapterStatus::Failed,
        ]);
        assert_eq!(s.count(ChapterStatus::Complete), 2);
        assert_eq!(s.written(), 3);
    }

    #[test]
    fn test_request_builder() {
        let request = DownloadRequest::new("bleach")
            .with_range("1-2")
            .with_format(OutputFormat::Cbz);
        assert_eq!(request.range.as_deref(), Some("1-2"));
        assert_eq!(request.format, OutputFormat::Cbz);
    }

    fn target(display_name: &str, name_is_curated: bool) -> SeriesTarget {
        SeriesTarget {
            site_id: "a".to_string(),
            series_path: "/manga/x".to_string(),
            display_name: display_name.to_string(),
            name_is_curated,
            url: "https://a.test/manga/x".to_string(),
        }
    }

    #[test]
    fn test_series_name_prefers_curated_then_page_title() {
        assert_eq!(series_name(&target("Bleach", true), Some("BLEACH Online")), "Bleach");
        assert_eq!(
            series_name(&target("Kimetsu No Yaiba Ab12", false), Some(" Demon Slayer ")),
            "Demon Slayer"
        );
        assert_eq!(series_name(&target("One Piece", false), Some("  ")), "One Piece");
        assert_eq!(series_name(&target("One Piece", false), None), "One Piece");
    }

    #[tokio::test]
    async fn test_bad_range_fails_before_resolution() {
        let registry = SiteRegistry::from_feed(SiteFeed {
            version: 1,
            sites: vec![SiteDefinition::new("a", "a.test")],
        })
        .unwrap();
        let pipeline = Pipeline::new(PipelineConfig {
            metadata: false,
            ..PipelineConfig::default()
        });
        let error = pipeline
            .run_with_registry(&registry, &DownloadRequest::new("nowhere").with_range("9-1"))
            .await
            .unwrap_err();
        assert!(matches!(error, PipelineError::Catalog(CatalogError::InvalidRange { .. })));
    }

    #[tokio::test]
    async fn test_unknown_input_is_registry_error() {
        let registry = SiteRegistry::from_feed(SiteFeed {
            version: 1,
            sites: vec![SiteDefinition::new("a", "a.test")],
        })
        .unwrap();
        let pipeline = Pipeline::new(PipelineConfig {
            metadata: false,
            ..PipelineConfig::default()
        });
        let error = pipeline
            .run_with_registry(&registry, &DownloadRequest::new("https://elsewhere.test/x"))
            .await
            .unwrap_err();
        assert!(matches!(error, PipelineError::Registry(RegistryError::UnknownSite { .. })));
    }
}
