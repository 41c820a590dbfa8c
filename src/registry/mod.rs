//! Site registry: the run-scoped mapping from site ids to live domains.
//!
//! The registry is loaded once per process from a remote feed (with an on-disk
//! cache fallback, see [`FeedLoader`]) and is immutable afterwards, so it can be
//! shared freely across concurrent fetchers.
//!
//! # Resolution
//!
//! [`SiteRegistry::resolve`] accepts:
//! - a full URL, matched by host against every site's patterns (longest wins)
//! - a bare slug such as `bleach`, claimed by at most one site
//! - a qualified slug such as `readbleach:bleach`
//!
//! When a URL uses a stale mirror domain the target is rewritten to the site's
//! canonical domain; the caller never sees the stale host.
//!
//! # Example
//!
//! ```
//! use yomi_core::registry::{SiteDefinition, SiteFeed, SiteRegistry};
//!
//! let feed = SiteFeed {
//!     version: 1,
//!     sites: vec![SiteDefinition::new("readbleach", "w5.readbleach.com")
//!         .with_pattern("readbleach.com")
//!         .with_series("bleach", "/manga/bleach")],
//! };
//! let registry = SiteRegistry::from_feed(feed).unwrap();
//! let target = registry.resolve("bleach").unwrap();
//! assert_eq!(target.url, "https://w5.readbleach.com/manga/bleach");
//! ```

mod error;
mod feed;

pub use error::RegistryError;
pub use feed::{DEFAULT_FEED_TIMEOUT, DEFAULT_FEED_URL, FeedLoader, SiteFeed};

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use url::Url;

const DEFAULT_SCHEME: &str = "https";

/// Minimum similarity for a fuzzy slug match to be selected without asking.
const FUZZY_AUTO_SELECT: f64 = 0.8;

/// Minimum similarity for a slug to be offered as a suggestion.
const FUZZY_SUGGEST: f64 = 0.4;

const MAX_SUGGESTIONS: usize = 5;

/// Fetch strategy a site requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TransportKind {
    /// Plain pooled HTTP client, safe at high concurrency.
    #[default]
    #[serde(rename = "lightweight", alias = "static")]
    Lightweight,
    /// Session-based client imitating a full browser handshake.
    #[serde(rename = "browser", alias = "browser-sim", alias = "dynamic")]
    BrowserSim,
}

impl TransportKind {
    /// Stable label used in logs and listings.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lightweight => "lightweight",
            Self::BrowserSim => "browser",
        }
    }
}

/// Optional CSS selector overrides for a site's page layout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selectors {
    /// Series title element.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Chapter links on the series page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapters: Option<String>,
    /// Page images on a chapter page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<String>,
}

/// A declarative description of one remote site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteDefinition {
    /// Unique site identifier.
    pub id: String,
    /// Human-readable name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Canonical (currently live) domain, optionally with a port.
    pub domain: String,
    /// URL scheme for the canonical domain.
    #[serde(default = "default_scheme")]
    pub scheme: String,
    /// Transport the site's defenses require.
    #[serde(default)]
    pub transport: TransportKind,
    /// Host patterns (suffix match) recognised as belonging to this site.
    #[serde(default)]
    pub patterns: Vec<String>,
    /// Series slugs hosted by the site, mapped to their path.
    #[serde(default)]
    pub series: BTreeMap<String, String>,
    /// Layout overrides.
    #[serde(default)]
    pub selectors: Selectors,
}

fn default_scheme() -> String {
    DEFAULT_SCHEME.to_string()
}

impl SiteDefinition {
    /// Creates a lightweight-transport site with no patterns or series.
    #[must_use]
    pub fn new(id: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            domain: domain.into(),
            scheme: default_scheme(),
            transport: TransportKind::Lightweight,
            patterns: Vec::new(),
            series: BTreeMap::new(),
            selectors: Selectors::default(),
        }
    }

    /// Sets the human-readable name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the URL scheme (`http` or `https`).
    #[must_use]
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    /// Sets the required transport.
    #[must_use]
    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    /// Adds a host pattern.
    #[must_use]
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.patterns.push(pattern.into());
        self
    }

    /// Adds a hosted series.
    #[must_use]
    pub fn with_series(mut self, slug: impl Into<String>, path: impl Into<String>) -> Self {
        self.series.insert(slug.into(), path.into());
        self
    }

    /// Sets the selector overrides.
    #[must_use]
    pub fn with_selectors(mut self, selectors: Selectors) -> Self {
        self.selectors = selectors;
        self
    }

    /// Returns the name if set, otherwise the id.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Returns `scheme://domain`.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.scheme, self.domain)
    }

    /// Joins a path (and optional query) onto the canonical base URL.
    #[must_use]
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{path}", self.base_url())
        } else {
            format!("{}/{path}", self.base_url())
        }
    }

    /// Host part of the canonical domain (port stripped).
    #[must_use]
    pub fn host(&self) -> &str {
        self.domain
            .rsplit_once(':')
            .filter(|(_, port)| port.chars().all(|c| c.is_ascii_digit()))
            .map_or(self.domain.as_str(), |(host, _)| host)
    }

    /// Length of the longest pattern matching `host`, if any.
    fn match_length(&self, host: &str) -> Option<usize> {
        self.patterns
            .iter()
            .filter(|pattern| {
                host == pattern.as_str()
                    || host
                        .strip_suffix(pattern.as_str())
                        .is_some_and(|prefix| prefix.ends_with('.'))
            })
            .map(String::len)
            .max()
    }

    /// Validates and canonicalises a definition loaded from the feed.
    fn normalize(&mut self) -> Result<(), RegistryError> {
        self.id = self.id.trim().to_lowercase();
        if self.id.is_empty() {
            return Err(RegistryError::invalid_feed("site with empty id"));
        }
        if self.id.contains(':') {
            return Err(RegistryError::invalid_feed(format!(
                "site id '{}' must not contain ':'",
                self.id
            )));
        }

        let domain = self.domain.trim().to_lowercase();
        let domain = domain
            .strip_prefix("https://")
            .or_else(|| domain.strip_prefix("http://"))
            .unwrap_or(&domain)
            .trim_end_matches('/')
            .to_string();
        if domain.is_empty() {
            return Err(RegistryError::invalid_feed(format!(
                "site '{}' has an empty domain",
                self.id
            )));
        }
        self.domain = domain;

        self.scheme = self.scheme.trim().to_lowercase();
        if self.scheme != "http" && self.scheme != "https" {
            return Err(RegistryError::invalid_feed(format!(
                "site '{}' has unsupported scheme '{}'",
                self.id, self.scheme
            )));
        }

        let mut patterns: Vec<String> = self
            .patterns
            .iter()
            .map(|pattern| strip_host_prefixes(&pattern.trim().to_lowercase()).to_string())
            .filter(|pattern| !pattern.is_empty())
            .collect();
        if patterns.is_empty() {
            patterns.push(strip_host_prefixes(self.host()).to_string());
        }
        patterns.sort();
        patterns.dedup();
        self.patterns = patterns;

        self.series = std::mem::take(&mut self.series)
            .into_iter()
            .map(|(slug, path)| {
                let path = path.trim().to_string();
                let path = if path.starts_with('/') {
                    path
                } else {
                    format!("/{path}")
                };
                (slug.trim().to_lowercase(), path)
            })
            .collect();

        Ok(())
    }
}

fn strip_host_prefixes(host: &str) -> &str {
    let host = host.strip_prefix("*.").unwrap_or(host);
    host.strip_prefix("www.").unwrap_or(host)
}

/// A resolved series on a concrete site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesTarget {
    /// Site that hosts the series.
    pub site_id: String,
    /// Path (plus query) of the series page on the canonical domain.
    pub series_path: String,
    /// Name to show and to query metadata with.
    pub display_name: String,
    /// True when `display_name` comes from the feed rather than from the input
    /// text; otherwise the title scraped from the series page takes precedence.
    pub name_is_curated: bool,
    /// Absolute series URL on the canonical domain.
    pub url: String,
}

/// One row of the `available` listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Slug to pass to `download -u`.
    pub key: String,
    /// Display name.
    pub name: String,
    /// Hosting site.
    pub site_id: String,
    /// Canonical domain.
    pub domain: String,
}

/// Immutable, run-scoped set of site definitions.
#[derive(Debug, Clone, Default)]
pub struct SiteRegistry {
    version: u64,
    sites: BTreeMap<String, Arc<SiteDefinition>>,
}

impl SiteRegistry {
    /// Builds a registry from a feed, validating every definition.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidFeed`] for schema violations or duplicate ids.
    pub fn from_feed(feed: SiteFeed) -> Result<Self, RegistryError> {
        let mut sites = BTreeMap::new();
        for mut site in feed.sites {
            site.normalize()?;
            if sites.contains_key(&site.id) {
                return Err(RegistryError::invalid_feed(format!(
                    "duplicate site id '{}'",
                    site.id
                )));
            }
            sites.insert(site.id.clone(), Arc::new(site));
        }
        debug!(version = feed.version, sites = sites.len(), "site registry built");
        Ok(Self {
            version: feed.version,
            sites,
        })
    }

    /// Feed version the registry was built from.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Number of sites.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sites.len()
    }

    /// Returns true if no sites are loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    /// Looks up a site by id.
    #[must_use]
    pub fn get(&self, site_id: &str) -> Option<Arc<SiteDefinition>> {
        self.sites.get(site_id).cloned()
    }

    /// Iterates over all sites in id order.
    pub fn sites(&self) -> impl Iterator<Item = &Arc<SiteDefinition>> {
        self.sites.values()
    }

    /// Resolves a URL, bare slug, or `site:slug` into a series target.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::UnknownSite`] when no pattern matches the URL host, or no
    ///   site claims the slug (and no close match exists)
    /// - [`RegistryError::AmbiguousSlug`] when several sites claim a bare slug
    #[instrument(skip(self))]
    pub fn resolve(&self, input: &str) -> Result<SeriesTarget, RegistryError> {
        let trimmed = input.trim();
        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            self.resolve_url(trimmed)
        } else {
            self.resolve_slug(trimmed)
        }
    }

    fn resolve_url(&self, raw: &str) -> Result<SeriesTarget, RegistryError> {
        let url = Url::parse(raw).map_err(|_| RegistryError::unknown_site(raw))?;
        let host = url
            .host_str()
            .map(str::to_ascii_lowercase)
            .ok_or_else(|| RegistryError::unknown_site(raw))?;
        let host = host.strip_prefix("www.").unwrap_or(&host);

        let mut matches: Vec<(usize, &Arc<SiteDefinition>)> = self
            .sites
            .values()
            .filter_map(|site| site.match_length(host).map(|len| (len, site)))
            .collect();
        // Longest pattern first; ties fall back to id order.
        matches.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));

        let Some(&(best_len, site)) = matches.first() else {
            return Err(RegistryError::unknown_site(raw));
        };
        if let Some(&(_, runner_up)) = matches.get(1).filter(|(len, _)| *len == best_len) {
            warn!(
                host,
                chosen = %site.id,
                other = %runner_up.id,
                "several sites match host with equal specificity; using first by id"
            );
        }

        let authority = match url.port() {
            Some(port) => format!("{}:{port}", url.host_str().unwrap_or_default()),
            None => url.host_str().unwrap_or_default().to_string(),
        };
        if !authority.eq_ignore_ascii_case(&site.domain) {
            info!(
                site = %site.id,
                from = %authority,
                to = %site.domain,
                "mirror substitution: rewriting stale domain to canonical domain"
            );
        }

        let mut series_path = url.path().to_string();
        if let Some(query) = url.query() {
            series_path.push('?');
            series_path.push_str(query);
        }

        let claimed = site
            .series
            .iter()
            .find(|(_, path)| path.trim_end_matches('/') == url.path().trim_end_matches('/'));
        let (display_name, name_is_curated) = match claimed {
            Some((slug, _)) => (series_display_name(site, slug), has_curated_name(site)),
            None => {
                let name = url
                    .path_segments()
                    .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
                    .map_or_else(|| site.display_name().to_string(), humanize_slug);
                (name, false)
            }
        };

        Ok(SeriesTarget {
            site_id: site.id.clone(),
            url: site.url_for(&series_path),
            series_path,
            display_name,
            name_is_curated,
        })
    }

    fn resolve_slug(&self, raw: &str) -> Result<SeriesTarget, RegistryError> {
        let decoded = urlencoding::decode(raw).map_or_else(|_| raw.to_string(), Cow::into_owned);
        let slug = decoded.trim().to_lowercase();
        if slug.is_empty() {
            return Err(RegistryError::unknown_site(raw));
        }

        if let Some((site_id, series_slug)) = slug.split_once(':') {
            let site = self
                .sites
                .get(site_id.trim())
                .ok_or_else(|| RegistryError::unknown_site(raw))?;
            let series_slug = series_slug.trim();
            return claim_of(site, series_slug)
                .map(|path| target_for(site, series_slug, &path))
                .ok_or_else(|| RegistryError::UnknownSite {
                    input: raw.to_string(),
                    suggestions: suggest(site.series.keys().map(String::as_str), series_slug),
                });
        }

        let claims = self.claims(&slug);
        match claims.as_slice() {
            [(site, path)] => Ok(target_for(site, &slug, path)),
            [] => self.resolve_fuzzy(raw, &slug),
            _ => {
                let mut sites: Vec<String> = claims.iter().map(|(s, _)| s.id.clone()).collect();
                sites.sort();
                Err(RegistryError::AmbiguousSlug { slug, sites })
            }
        }
    }

    fn claims(&self, slug: &str) -> Vec<(Arc<SiteDefinition>, String)> {
        self.sites
            .values()
            .filter_map(|site| claim_of(site, slug).map(|path| (Arc::clone(site), path)))
            .collect()
    }

    fn resolve_fuzzy(&self, raw: &str, slug: &str) -> Result<SeriesTarget, RegistryError> {
        let mut scored: Vec<(f64, String)> = Vec::new();
        for site in self.sites.values() {
            for key in site.series.keys() {
                scored.push((strsim::normalized_levenshtein(slug, key), key.clone()));
            }
            scored.push((strsim::normalized_levenshtein(slug, &site.id), site.id.clone()));
            if let Some(name) = &site.name {
                let name_score = strsim::normalized_levenshtein(slug, &name.to_lowercase());
                scored.push((name_score, site.id.clone()));
            }
        }
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        let mut seen = std::collections::HashSet::new();
        scored.retain(|(_, key)| seen.insert(key.clone()));

        if let Some((score, key)) = scored.first()
            && *score >= FUZZY_AUTO_SELECT
            && scored.get(1).is_none_or(|(second, _)| second < score)
        {
            info!(input = raw, matched = %key, score, "auto-selected closest slug");
            let claims = self.claims(key);
            if let [(site, path)] = claims.as_slice() {
                return Ok(target_for(site, key, path));
            }
            if claims.len() > 1 {
                let mut sites: Vec<String> = claims.iter().map(|(s, _)| s.id.clone()).collect();
                sites.sort();
                return Err(RegistryError::AmbiguousSlug {
                    slug: key.clone(),
                    sites,
                });
            }
        }

        Err(RegistryError::UnknownSite {
            input: raw.to_string(),
            suggestions: scored
                .into_iter()
                .filter(|(score, _)| *score >= FUZZY_SUGGEST)
                .take(MAX_SUGGESTIONS)
                .map(|(_, key)| key)
                .collect(),
        })
    }

    /// Every slug the registry can download, sorted by slug.
    #[must_use]
    pub fn entries(&self) -> Vec<CatalogEntry> {
        let mut entries: Vec<CatalogEntry> = self
            .sites
            .values()
            .flat_map(|site| {
                let keys: Vec<&str> = if site.series.is_empty() {
                    vec![site.id.as_str()]
                } else {
                    site.series.keys().map(String::as_str).collect()
                };
                keys.into_iter().map(move |key| CatalogEntry {
                    key: key.to_string(),
                    name: series_display_name(site, key),
                    site_id: site.id.clone(),
                    domain: site.domain.clone(),
                })
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key).then_with(|| a.site_id.cmp(&b.site_id)));
        entries
    }

    /// Scores entries against a free-text query: exact key 100, key contains 50,
    /// name contains 40. Non-matching entries are dropped.
    #[must_use]
    pub fn search(&self, query: &str) -> Vec<CatalogEntry> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return Vec::new();
        }
        let mut scored: Vec<(u8, CatalogEntry)> = self
            .entries()
            .into_iter()
            .filter_map(|entry| {
                let score = if entry.key == query {
                    100
                } else if entry.key.contains(&query) {
                    50
                } else if entry.name.to_lowercase().contains(&query) {
                    40
                } else {
                    return None;
                };
                Some((score, entry))
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.key.cmp(&b.1.key)));
        scored.into_iter().map(|(_, entry)| entry).collect()
    }
}

fn claim_of(site: &SiteDefinition, slug: &str) -> Option<String> {
    site.series
        .get(slug)
        .cloned()
        .or_else(|| (site.id == slug).then(|| "/".to_string()))
}

fn target_for(site: &SiteDefinition, slug: &str, path: &str) -> SeriesTarget {
    SeriesTarget {
        site_id: site.id.clone(),
        series_path: path.to_string(),
        display_name: series_display_name(site, slug),
        name_is_curated: has_curated_name(site),
        url: site.url_for(path),
    }
}

/// A site's `name` names its series only when it hosts at most one.
fn has_curated_name(site: &SiteDefinition) -> bool {
    site.name.is_some() && site.series.len() <= 1
}

fn series_display_name(site: &SiteDefinition, slug: &str) -> String {
    match &site.name {
        Some(name) if has_curated_name(site) => name.clone(),
        _ => humanize_slug(slug),
    }
}

fn suggest<'a>(keys: impl Iterator<Item = &'a str>, slug: &str) -> Vec<String> {
    let mut scored: Vec<(f64, &str)> = keys
        .map(|key| (strsim::normalized_levenshtein(slug, key), key))
        .filter(|(score, _)| *score >= FUZZY_SUGGEST)
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored
        .into_iter()
        .take(MAX_SUGGESTIONS)
        .map(|(_, key)| key.to_string())
        .collect()
}

/// Turns `one-piece` into `One Piece`.
#[must_use]
pub fn humanize_slug(slug: &str) -> String {
    slug.split(['-', '_', ' '])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().collect::<String>() + chars.as_str()
            })
        })
        .collect::<Vec<_>>()
        .join(" ")
}
