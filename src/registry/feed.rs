//! Remote site-definition feed with an on-disk cache fallback.
//!
//! The feed is fetched once per process. A successful, valid fetch rewrites the
//! cache; an unreachable or invalid feed falls back to the cache with a warning.
//! Without a usable cache the run must abort with [`RegistryError::Unavailable`].
//!
//! Two document shapes are accepted: the versioned `{"version", "sites": [...]}`
//! form, and the keyed form published at [`DEFAULT_FEED_URL`], which maps each
//! series key to a `{name, url, type, base_domain, url_pattern}` descriptor.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use url::Url;

use super::{RegistryError, SiteDefinition, SiteRegistry, TransportKind};
use crate::user_agent;

/// Default location of the community-maintained site list.
pub const DEFAULT_FEED_URL: &str =
    "https://raw.githubusercontent.com/OmurEKiraz/yomi-core/main/yomi/sites.json";

/// Default timeout for the feed request.
pub const DEFAULT_FEED_TIMEOUT: Duration = Duration::from_secs(10);

const CACHE_FILE: &str = "sites.json";
const LOCK_FILE: &str = "sites.json.lock";
const TEMP_FILE: &str = "sites.json.tmp";

/// Wire format of the site-definition feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "FeedDocument")]
pub struct SiteFeed {
    /// Monotonic feed version.
    #[serde(default)]
    pub version: u64,
    /// Site descriptors.
    pub sites: Vec<SiteDefinition>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FeedDocument {
    Versioned {
        #[serde(default)]
        version: u64,
        sites: Vec<SiteDefinition>,
    },
    Keyed(BTreeMap<String, KeyedSite>),
}

/// One entry of the keyed feed form.
#[derive(Deserialize)]
struct KeyedSite {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default, rename = "type")]
    transport: TransportKind,
    #[serde(default)]
    base_domain: Option<String>,
    /// Series URL template; `{mirror}` stands for the live base URL.
    #[serde(default)]
    url_pattern: Option<String>,
}

impl TryFrom<FeedDocument> for SiteFeed {
    type Error = String;

    fn try_from(document: FeedDocument) -> Result<Self, Self::Error> {
        match document {
            FeedDocument::Versioned { version, sites } => Ok(Self { version, sites }),
            FeedDocument::Keyed(entries) => {
                let sites = entries
                    .into_iter()
                    .map(|(key, entry)| keyed_site(key, entry))
                    .collect::<Result<_, _>>()?;
                Ok(Self { version: 0, sites })
            }
        }
    }
}

/// Turns a keyed entry into a site that claims its own key as a series.
fn keyed_site(key: String, entry: KeyedSite) -> Result<SiteDefinition, String> {
    let series_url = match (&entry.url, &entry.base_domain) {
        (Some(url), _) => url.clone(),
        (None, Some(base)) => {
            let base = base.trim().trim_end_matches('/');
            let base = if base.contains("://") {
                base.to_string()
            } else {
                format!("https://{base}")
            };
            entry
                .url_pattern
                .as_deref()
                .map_or_else(|| base.clone(), |pattern| pattern.replace("{mirror}", &base))
        }
        (None, None) => return Err(format!("site '{key}' has neither url nor base_domain")),
    };
    let url = Url::parse(&series_url).map_err(|e| format!("site '{key}' has bad url: {e}"))?;
    let host = url
        .host_str()
        .ok_or_else(|| format!("site '{key}' url has no host"))?;
    let domain = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    let mut path = url.path().to_string();
    if let Some(query) = url.query() {
        path.push('?');
        path.push_str(query);
    }

    let mut site = SiteDefinition::new(key.clone(), domain)
        .with_scheme(url.scheme())
        .with_transport(entry.transport)
        .with_pattern(mirror_root(host))
        .with_series(key, path);
    if let Some(name) = entry.name.filter(|n| !n.trim().is_empty()) {
        site = site.with_name(name);
    }
    Ok(site)
}

/// Strips a numbered mirror label (`w5.`, `www.`) so sibling mirrors still match.
fn mirror_root(host: &str) -> &str {
    match host.split_once('.') {
        Some((label, rest))
            if rest.contains('.')
                && label.starts_with('w')
                && (label == "www" || label[1..].chars().all(|c| c.is_ascii_digit())) =>
        {
            rest
        }
        _ => host,
    }
}

/// On-disk cache envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedFeed {
    version: u64,
    fetched_at: u64,
    sites: Vec<SiteDefinition>,
}

/// Loads the site registry from the feed, falling back to the cache.
#[derive(Debug, Clone)]
pub struct FeedLoader {
    feed_url: String,
    cache_dir: PathBuf,
    client: reqwest::Client,
}

impl FeedLoader {
    /// Creates a loader for `feed_url` that caches under `cache_dir`.
    ///
    /// `feed_url` may also be a local file path (or `file://` URL), which is read
    /// directly and still goes through the same validation and caching.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Unavailable`] if the HTTP client cannot be built.
    pub fn new(
        feed_url: impl Into<String>,
        cache_dir: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Result<Self, RegistryError> {
        let feed_url = feed_url.into();
        let client = reqwest::Client::builder()
            .user_agent(user_agent::default_user_agent())
            .timeout(timeout)
            .gzip(true)
            .build()
            .map_err(|e| RegistryError::unavailable(&feed_url, e.to_string()))?;
        Ok(Self {
            feed_url,
            cache_dir: cache_dir.into(),
            client,
        })
    }

    /// Feed URL this loader reads.
    #[must_use]
    pub fn feed_url(&self) -> &str {
        &self.feed_url
    }

    /// Path of the cache file.
    #[must_use]
    pub fn cache_path(&self) -> PathBuf {
        self.cache_dir.join(CACHE_FILE)
    }

    /// Fetches the feed and builds the registry, falling back to the cache.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Unavailable`] when the feed fails and no valid cache exists.
    #[instrument(skip(self), fields(feed_url = %self.feed_url))]
    pub async fn refresh(&self) -> Result<SiteRegistry, RegistryError> {
        let reason = match self.fetch_feed().await {
            Ok(feed) => match SiteRegistry::from_feed(feed.clone()) {
                Ok(registry) => {
                    info!(
                        version = registry.version(),
                        sites = registry.len(),
                        "loaded site definitions"
                    );
                    if let Err(error) = self.store(feed).await {
                        warn!(error = %error, "could not update site cache");
                    }
                    return Ok(registry);
                }
                Err(error) => error.to_string(),
            },
            Err(reason) => reason,
        };

        match self.load_cache().await {
            Ok(Some((registry, fetched_at))) => {
                let age_secs = unix_now().saturating_sub(fetched_at);
                warn!(
                    reason = %reason,
                    version = registry.version(),
                    age_secs,
                    "site feed unavailable; using cached site definitions"
                );
                Ok(registry)
            }
            Ok(None) => Err(RegistryError::unavailable(&self.feed_url, reason)),
            Err(error) => {
                warn!(error = %error, "site cache unreadable");
                Err(RegistryError::unavailable(&self.feed_url, reason))
            }
        }
    }

    async fn fetch_feed(&self) -> Result<SiteFeed, String> {
        let body = if let Some(path) = local_feed_path(&self.feed_url) {
            debug!(path = %path.display(), "reading local site feed");
            tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| format!("{}: {e}", path.display()))?
        } else {
            let response = self
                .client
                .get(&self.feed_url)
                .send()
                .await
                .map_err(|e| e.to_string())?;
            let status = response.status();
            if !status.is_success() {
                return Err(format!("HTTP {}", status.as_u16()));
            }
            response.text().await.map_err(|e| e.to_string())?
        };
        serde_json::from_str(&body).map_err(|e| format!("malformed feed: {e}"))
    }

    async fn store(&self, feed: SiteFeed) -> Result<(), RegistryError> {
        let dir = self.cache_dir.clone();
        let cached = CachedFeed {
            version: feed.version,
            fetched_at: unix_now(),
            sites: feed.sites,
        };
        tokio::task::spawn_blocking(move || write_cache(&dir, &cached))
            .await
            .map_err(|e| RegistryError::cache(&self.cache_dir, std::io::Error::other(e)))?
    }

    /// Reads the cache, returning the registry and its fetch timestamp.
    ///
    /// A missing cache is `Ok(None)`; a corrupt one is logged and also `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Cache`] when the cache exists but cannot be read.
    pub async fn load_cache(&self) -> Result<Option<(SiteRegistry, u64)>, RegistryError> {
        let dir = self.cache_dir.clone();
        let cached = tokio::task::spawn_blocking(move || read_cache(&dir))
            .await
            .map_err(|e| RegistryError::cache(&self.cache_dir, std::io::Error::other(e)))??;

        let Some(cached) = cached else {
            return Ok(None);
        };
        let fetched_at = cached.fetched_at;
        let feed = SiteFeed {
            version: cached.version,
            sites: cached.sites,
        };
        match SiteRegistry::from_feed(feed) {
            Ok(registry) => Ok(Some((registry, fetched_at))),
            Err(error) => {
                warn!(error = %error, "ignoring invalid site cache");
                Ok(None)
            }
        }
    }
}

fn local_feed_path(feed_url: &str) -> Option<PathBuf> {
    if let Some(path) = feed_url.strip_prefix("file://") {
        return Some(PathBuf::from(path));
    }
    let lower = feed_url.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        None
    } else {
        Some(PathBuf::from(feed_url))
    }
}

fn lock(dir: &Path, exclusive: bool) -> Result<File, RegistryError> {
    let path = dir.join(LOCK_FILE);
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path)
        .map_err(|e| RegistryError::cache(&path, e))?;
    let locked = if exclusive {
        file.lock_exclusive()
    } else {
        file.lock_shared()
    };
    locked.map_err(|e| RegistryError::cache(&path, e))?;
    Ok(file)
}

fn write_cache(dir: &Path, cached: &CachedFeed) -> Result<(), RegistryError> {
    fs::create_dir_all(dir).map_err(|e| RegistryError::cache(dir, e))?;
    let guard = lock(dir, true)?;

    let temp = dir.join(TEMP_FILE);
    let target = dir.join(CACHE_FILE);
    let json = serde_json::to_vec_pretty(cached)
        .map_err(|e| RegistryError::cache(&target, std::io::Error::other(e)))?;

    let mut file = File::create(&temp).map_err(|e| RegistryError::cache(&temp, e))?;
    file.write_all(&json)
        .and_then(|()| file.sync_all())
        .map_err(|e| RegistryError::cache(&temp, e))?;
    drop(file);
    fs::rename(&temp, &target).map_err(|e| RegistryError::cache(&target, e))?;

    debug!(path = %target.display(), version = cached.version, "site cache written");
    drop(guard);
    Ok(())
}

fn read_cache(dir: &Path) -> Result<Option<CachedFeed>, RegistryError> {
    let target = dir.join(CACHE_FILE);
    if !target.exists() {
        return Ok(None);
    }
    let _guard = lock(dir, false)?;
    let bytes = fs::read(&target).map_err(|e| RegistryError::cache(&target, e))?;
    match serde_json::from_slice(&bytes) {
        Ok(cached) => Ok(Some(cached)),
        Err(error) => {
            warn!(path = %target.display(), error = %error, "site cache is corrupt");
            Ok(None)
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}
