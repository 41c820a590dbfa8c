//! Chapter enumeration, page-list extraction and range filtering.
//!
//! The [`ChapterEnumerator`] reads a series page through any [`PageSource`]
//! (a bare [`Transport`] or the retrying download engine) and turns it into an
//! ordered list of [`ChapterDescriptor`]s. Per-site CSS selector overrides come
//! from the site definition; otherwise generic defaults apply.

mod error;
mod parse;
mod range;

pub use error::CatalogError;
pub use range::{ChapterRange, filter_range};

use async_trait::async_trait;
use scraper::{Html, Selector};
use tracing::{debug, info, instrument};
use url::Url;

use crate::registry::{SeriesTarget, SiteDefinition};
use crate::transport::{FetchError, Transport};

const DEFAULT_TITLE_SELECTOR: &str = "h1";
const DEFAULT_CHAPTER_SELECTOR: &str = "a[href*='chapter']";
const DEFAULT_PAGE_SELECTOR: &str = "img";

/// Anything that can return the HTML of a page.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetches `url` and returns its body as text.
    async fn fetch_html(&self, url: &str) -> Result<String, FetchError>;
}

#[async_trait]
impl PageSource for Transport {
    async fn fetch_html(&self, url: &str) -> Result<String, FetchError> {
        self.fetch_text(url).await
    }
}

/// One chapter of a series.
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterDescriptor {
    /// Stable identifier within the series.
    pub chapter_id: String,
    /// Ordering key; not assumed contiguous.
    pub sequence_number: f64,
    /// Link text as shown on the series page.
    pub title: String,
    /// Text after the chapter number, if any.
    pub subtitle: Option<String>,
    /// Absolute chapter page URL.
    pub url: String,
}

impl ChapterDescriptor {
    /// Creates a descriptor; the id is derived from the number.
    #[must_use]
    pub fn new(sequence_number: f64, title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            chapter_id: format!("chapter-{}", format_number(sequence_number)),
            sequence_number,
            title: title.into(),
            subtitle: None,
            url: url.into(),
        }
    }

    /// The number as people write it: `12`, `12.5`.
    #[must_use]
    pub fn number_label(&self) -> String {
        format_number(self.sequence_number)
    }
}

#[allow(clippy::cast_possible_truncation)]
fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// Parsed series page.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesListing {
    /// Title found on the page, if any.
    pub title: Option<String>,
    /// Chapters, ascending.
    pub chapters: Vec<ChapterDescriptor>,
}

/// Lists chapters and page images for one site.
#[derive(Debug, Clone)]
pub struct ChapterEnumerator {
    title: Selector,
    chapters: Selector,
    pages: Selector,
}

impl ChapterEnumerator {
    /// Compiles the site's selectors (or the defaults).
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::InvalidSelector`] for an unparsable override.
    pub fn new(site: &SiteDefinition) -> Result<Self, CatalogError> {
        let selectors = &site.selectors;
        Ok(Self {
            title: compile(selectors.title.as_deref().unwrap_or(DEFAULT_TITLE_SELECTOR))?,
            chapters: compile(
                selectors
                    .chapters
                    .as_deref()
                    .unwrap_or(DEFAULT_CHAPTER_SELECTOR),
            )?,
            pages: compile(selectors.pages.as_deref().unwrap_or(DEFAULT_PAGE_SELECTOR))?,
        })
    }

    /// Fetches the series page and lists its chapters.
    ///
    /// # Errors
    ///
    /// - [`CatalogError::SeriesNotFound`] if the page is missing (404/410) or has no chapter links
    /// - [`CatalogError::Fetch`] for other fetch failures
    #[instrument(skip(self, source), fields(site = %target.site_id, url = %target.url))]
    pub async fn fetch_series(
        &self,
        source: &dyn PageSource,
        target: &SeriesTarget,
    ) -> Result<SeriesListing, CatalogError> {
        let html = source.fetch_html(&target.url).await.map_err(|error| match error {
            FetchError::HttpStatus {
                status: 404 | 410, ..
            } => CatalogError::SeriesNotFound {
                url: target.url.clone(),
            },
            other => CatalogError::fetch(&target.url, other),
        })?;

        let listing = self.parse_series(&html, &target.url)?;
        if listing.chapters.is_empty() {
            return Err(CatalogError::SeriesNotFound {
                url: target.url.clone(),
            });
        }
        info!(
            chapters = listing.chapters.len(),
            title = listing.title.as_deref().unwrap_or_default(),
            "chapter listing loaded"
        );
        Ok(listing)
    }

    /// Lists the chapters of a series, ascending by sequence number.
    ///
    /// # Errors
    ///
    /// Same as [`ChapterEnumerator::fetch_series`].
    pub async fn list_chapters(
        &self,
        source: &dyn PageSource,
        target: &SeriesTarget,
    ) -> Result<Vec<ChapterDescriptor>, CatalogError> {
        Ok(self.fetch_series(source, target).await?.chapters)
    }

    /// Fetches a chapter page and extracts its image URLs in reading order.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Fetch`] if the chapter page cannot be fetched.
    #[instrument(skip(self, source, chapter), fields(chapter = %chapter.chapter_id))]
    pub async fn page_urls(
        &self,
        source: &dyn PageSource,
        chapter: &ChapterDescriptor,
    ) -> Result<Vec<String>, CatalogError> {
        let html = source
            .fetch_html(&chapter.url)
            .await
            .map_err(|e| CatalogError::fetch(&chapter.url, e))?;
        let pages = self.parse_pages(&html, &chapter.url)?;
        debug!(pages = pages.len(), "page list extracted");
        Ok(pages)
    }

    /// Parses series HTML fetched from `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Fetch`] if `base_url` is not a valid URL.
    pub fn parse_series(&self, html: &str, base_url: &str) -> Result<SeriesListing, CatalogError> {
        let base = parse_base(base_url)?;
        let document = Html::parse_document(html);
        Ok(SeriesListing {
            title: parse::series_title(&document, &self.title),
            chapters: parse::chapter_links(&document, &self.chapters, &base),
        })
    }

    /// Parses chapter HTML fetched from `base_url` into image URLs.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Fetch`] if `base_url` is not a valid URL.
    pub fn parse_pages(&self, html: &str, base_url: &str) -> Result<Vec<String>, CatalogError> {
        let base = parse_base(base_url)?;
        let document = Html::parse_document(html);
        Ok(parse::page_images(&document, &self.pages, &base))
    }
}

fn compile(selector: &str) -> Result<Selector, CatalogError> {
    Selector::parse(selector).map_err(|e| CatalogError::InvalidSelector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

fn parse_base(base_url: &str) -> Result<Url, CatalogError> {
    Url::parse(base_url)
        .map_err(|_| CatalogError::fetch(base_url, FetchError::invalid_url(base_url)))
}
