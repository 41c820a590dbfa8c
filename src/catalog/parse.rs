//! HTML extraction for series and chapter pages.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, trace};
use url::Url;

use super::ChapterDescriptor;

/// "Chapter 12", "Ch. 12.5", "No. 3", "Episode 7".
#[allow(clippy::expect_used)]
static CHAPTER_TEXT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:chapter|ch\.?|no\.?|episode)\s*(\d+(?:\.\d+)?)")
        .expect("chapter text regex is valid")
});

/// `/chapter-12/`, `/ch_12`, `/c12` at a path-segment boundary.
#[allow(clippy::expect_used)]
static CHAPTER_URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/(?:chapter|ch|c)[-/_]?(\d+(?:\.\d+)?)(?:[/?#]|$)")
        .expect("chapter url regex is valid")
});

#[allow(clippy::expect_used)]
static NUMBER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?").expect("number regex is valid"));

/// Attributes holding the real image URL, lazy-loading ones first.
const IMAGE_ATTRIBUTES: &[&str] = &["data-src", "data-lazy-src", "data-original", "src"];

/// File-name fragments of site chrome rather than chapter pages.
const ASSET_MARKERS: &[&str] = &[
    "logo", "avatar", "icon", "banner", "spacer", "blank", "loading", "pixel",
];

/// Number and optional subtitle of a chapter link.
pub(crate) fn chapter_number(text: &str, url: &str) -> Option<(f64, Option<String>)> {
    if let Some(caps) = CHAPTER_TEXT_PATTERN.captures(text)
        && let Some(number) = caps.get(1).and_then(|m| m.as_str().parse::<f64>().ok())
    {
        let end = caps.get(0).map_or(text.len(), |m| m.end());
        return Some((number, subtitle(&text[end..])));
    }

    let decoded =
        urlencoding::decode(url).map_or_else(|_| url.to_lowercase(), |u| u.to_lowercase());
    if let Some(number) = CHAPTER_URL_PATTERN
        .captures(&decoded)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
    {
        return Some((number, None));
    }

    NUMBER_PATTERN
        .find(text)
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .map(|number| (number, None))
}

fn subtitle(rest: &str) -> Option<String> {
    let cleaned = rest
        .trim_start_matches(|c: char| {
            c.is_whitespace() || matches!(c, ':' | '-' | '.' | '|' | '–' | '—')
        })
        .trim();
    (!cleaned.is_empty()).then(|| cleaned.to_string())
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn element_text(element: &ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<String>())
}

fn resolve(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with("data:") || href.starts_with("javascript:") {
        return None;
    }
    let url = base.join(href).ok()?;
    matches!(url.scheme(), "http" | "https").then_some(url)
}

/// Series title: the title selector, then `og:title`, then `<title>`.
pub(crate) fn series_title(document: &Html, title_selector: &Selector) -> Option<String> {
    let from_selector = document
        .select(title_selector)
        .map(|e| element_text(&e))
        .find(|t| !t.is_empty());
    if from_selector.is_some() {
        return from_selector;
    }

    let og = Selector::parse("meta[property='og:title']").ok()?;
    let from_og = document
        .select(&og)
        .filter_map(|e| e.value().attr("content"))
        .map(collapse_whitespace)
        .find(|t| !t.is_empty());
    if from_og.is_some() {
        return from_og;
    }

    let title = Selector::parse("title").ok()?;
    document
        .select(&title)
        .map(|e| element_text(&e))
        .find(|t| !t.is_empty())
}

/// Chapter links, deduplicated by sequence number (first wins), sorted ascending.
pub(crate) fn chapter_links(
    document: &Html,
    link_selector: &Selector,
    base: &Url,
) -> Vec<ChapterDescriptor> {
    let mut seen = HashSet::new();
    let mut chapters = Vec::new();

    for element in document.select(link_selector) {
        let Some(url) = element.value().attr("href").and_then(|h| resolve(base, h)) else {
            continue;
        };
        let mut text = element_text(&element);
        if text.is_empty() {
            text = element
                .value()
                .attr("title")
                .map(collapse_whitespace)
                .unwrap_or_default();
        }

        let Some((number, subtitle)) = chapter_number(&text, url.as_str()) else {
            debug!(url = %url, text = %text, "chapter link without a number; skipped");
            continue;
        };
        if !seen.insert(number.to_bits()) {
            trace!(url = %url, number, "duplicate chapter link");
            continue;
        }

        let mut chapter = ChapterDescriptor::new(number, text, url.to_string());
        chapter.subtitle = subtitle;
        chapters.push(chapter);
    }

    chapters.sort_by(|a, b| a.sequence_number.total_cmp(&b.sequence_number));
    chapters
}

/// Page image URLs in document order, without chrome assets or duplicates.
pub(crate) fn page_images(document: &Html, image_selector: &Selector, base: &Url) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut pages = Vec::new();

    for element in document.select(image_selector) {
        let Some(src) = IMAGE_ATTRIBUTES
            .iter()
            .filter_map(|attr| element.value().attr(attr))
            .map(str::trim)
            .find(|v| !v.is_empty())
        else {
            continue;
        };
        let Some(url) = resolve(base, src) else {
            continue;
        };
        if is_site_asset(&url) {
            trace!(url = %url, "skipping non-page image");
            continue;
        }
        let url = url.to_string();
        if seen.insert(url.clone()) {
            pages.push(url);
        }
    }

    pages
}

fn is_site_asset(url: &Url) -> bool {
    let file = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or_default()
        .to_lowercase();
    file.ends_with(".svg") || ASSET_MARKERS.iter().any(|marker| file.contains(marker))
}
