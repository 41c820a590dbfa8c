//! Fetch strategies tuned to a site's anti-automation defenses.
//!
//! A [`Transport`] is one of a closed set of variants:
//!
//! - **Lightweight**: a pooled plain HTTP client, safe at high concurrency.
//! - **Browser-simulating**: a cookie-keeping session that sends a full browser
//!   header set, warms each host up with a `GET /` before real traffic and paces
//!   same-host requests. It tolerates only very low concurrency.
//!
//! Selection is a pure function of the site's declared [`TransportKind`];
//! escalation from one to the other is the download engine's decision.
//!
//! Challenge pages are surfaced as [`FetchError::Blocked`] so callers can tell
//! "the site is defending itself" apart from ordinary HTTP failures.

mod challenge;
mod client;
mod error;
pub mod rate_limiter;
mod retry;

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::{StreamExt, stream};
use tokio::sync::OnceCell;
use tracing::{debug, instrument};
use url::Url;

use crate::registry::{SiteDefinition, TransportKind};
use client::{ClientSettings, Expect, HttpFetcher};

pub use error::FetchError;
pub use rate_limiter::{RateLimiter, parse_retry_after};
pub use retry::{DEFAULT_MAX_ATTEMPTS, FailureType, RetryDecision, RetryPolicy, classify_error};

/// Default concurrency ceiling of the lightweight transport.
pub const DEFAULT_LIGHTWEIGHT_CONCURRENCY: usize = 16;

/// Default concurrency ceiling of the browser-simulating transport.
pub const DEFAULT_BROWSER_CONCURRENCY: usize = 2;

/// Default spacing between same-host requests on the browser-simulating transport.
pub const DEFAULT_BROWSER_PACING: Duration = Duration::from_millis(750);

/// Default HTTP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default HTTP request timeout.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

const LIGHTWEIGHT_CONCURRENCY_BOUNDS: (usize, usize) = (8, 32);
const BROWSER_CONCURRENCY_BOUNDS: (usize, usize) = (1, 4);

/// Settings applied when building either transport.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Proxy URL for all traffic.
    pub proxy: Option<String>,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Whole-request timeout.
    pub read_timeout: Duration,
    /// Requested lightweight ceiling (clamped to 8..=32).
    pub lightweight_concurrency: usize,
    /// Requested browser ceiling (clamped to 1..=4).
    pub browser_concurrency: usize,
    /// Same-host request spacing for the browser transport.
    pub browser_pacing: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            proxy: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            lightweight_concurrency: DEFAULT_LIGHTWEIGHT_CONCURRENCY,
            browser_concurrency: DEFAULT_BROWSER_CONCURRENCY,
            browser_pacing: DEFAULT_BROWSER_PACING,
        }
    }
}

/// A configured fetch strategy.
#[derive(Debug)]
pub enum Transport {
    /// Plain pooled client.
    Lightweight(LightweightTransport),
    /// Browser-imitating session.
    BrowserSim(BrowserTransport),
}

/// Pooled plain HTTP transport.
#[derive(Debug)]
pub struct LightweightTransport {
    http: HttpFetcher,
    max_concurrency: usize,
}

/// Cookie-keeping, paced, browser-imitating transport.
#[derive(Debug)]
pub struct BrowserTransport {
    http: HttpFetcher,
    max_concurrency: usize,
    pacer: RateLimiter,
    warmed: DashMap<String, Arc<OnceCell<()>>>,
}

impl BrowserTransport {
    /// Performs the one-time `GET /` handshake for the URL's origin.
    async fn warm_up(&self, url: &str) {
        let Ok(parsed) = Url::parse(url) else {
            return;
        };
        let origin = parsed.origin().ascii_serialization();
        let cell = self.warmed.entry(origin.clone()).or_default().clone();
        cell.get_or_init(|| async {
            let root = format!("{origin}/");
            self.pacer.acquire(&root).await;
            match self.http.get(&root, None, Expect::Document).await {
                Ok(_) => debug!(origin = %origin, "browser session warmed up"),
                Err(error) => debug!(origin = %origin, error = %error, "warm-up request failed"),
            }
        })
        .await;
    }
}

impl Transport {
    /// Returns the transport a site's defense profile calls for.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Client`] if the HTTP client cannot be configured.
    pub fn select(site: &SiteDefinition, options: &TransportOptions) -> Result<Self, FetchError> {
        Self::build(site.transport, options)
    }

    /// Builds a transport of the given kind.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Client`] for an invalid proxy or client setup failure.
    pub fn build(kind: TransportKind, options: &TransportOptions) -> Result<Self, FetchError> {
        let settings = ClientSettings {
            proxy: options.proxy.as_deref(),
            connect_timeout: options.connect_timeout,
            read_timeout: options.read_timeout,
        };
        let http = HttpFetcher::build(kind, &settings)?;
        let transport = match kind {
            TransportKind::Lightweight => {
                let (low, high) = LIGHTWEIGHT_CONCURRENCY_BOUNDS;
                Self::Lightweight(LightweightTransport {
                    http,
                    max_concurrency: options.lightweight_concurrency.clamp(low, high),
                })
            }
            TransportKind::BrowserSim => {
                let (low, high) = BROWSER_CONCURRENCY_BOUNDS;
                Self::BrowserSim(BrowserTransport {
                    http,
                    max_concurrency: options.browser_concurrency.clamp(low, high),
                    pacer: RateLimiter::new(options.browser_pacing),
                    warmed: DashMap::new(),
                })
            }
        };
        debug!(
            kind = kind.as_str(),
            max_concurrency = transport.max_safe_concurrency(),
            "transport built"
        );
        Ok(transport)
    }

    /// Which variant this is.
    #[must_use]
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Lightweight(_) => TransportKind::Lightweight,
            Self::BrowserSim(_) => TransportKind::BrowserSim,
        }
    }

    /// Highest number of simultaneous requests this transport tolerates.
    #[must_use]
    pub fn max_safe_concurrency(&self) -> usize {
        match self {
            Self::Lightweight(t) => t.max_concurrency,
            Self::BrowserSim(t) => t.max_concurrency,
        }
    }

    async fn get(
        &self,
        url: &str,
        referer: Option<&str>,
        expect: Expect,
    ) -> Result<Vec<u8>, FetchError> {
        match self {
            Self::Lightweight(t) => t.http.get(url, referer, expect).await,
            Self::BrowserSim(t) => {
                t.warm_up(url).await;
                t.pacer.acquire(url).await;
                t.http.get(url, referer, expect).await
            }
        }
    }

    /// Fetches raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Blocked`] for challenge responses, otherwise the
    /// network or HTTP failure.
    #[instrument(skip(self), fields(kind = self.kind().as_str()))]
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.get(url, None, Expect::Any).await
    }

    /// Fetches an HTML document as text.
    ///
    /// # Errors
    ///
    /// Same as [`Transport::fetch`].
    #[instrument(skip(self), fields(kind = self.kind().as_str()))]
    pub async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        let bytes = self.get(url, None, Expect::Document).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Fetches an image, working through hotlink referer strategies.
    ///
    /// Strategies, in order: the given referer (normally the chapter URL), no
    /// referer, then the image host's root. Only a plain 401/403 advances to the
    /// next strategy; anything else is returned as is.
    ///
    /// # Errors
    ///
    /// Returns the last strategy's error, or [`FetchError::UnexpectedContent`] /
    /// [`FetchError::EmptyBody`] when the body is not an image.
    #[instrument(skip(self), fields(kind = self.kind().as_str()))]
    pub async fn fetch_image(
        &self,
        url: &str,
        referer: Option<&str>,
    ) -> Result<Vec<u8>, FetchError> {
        let mut last_error = None;
        for strategy in referer_strategies(url, referer) {
            match self.get(url, strategy.as_deref(), Expect::Image).await {
                Err(error @ FetchError::HttpStatus { status: 401 | 403, .. }) => {
                    debug!(url, referer = ?strategy, "hotlink refused; trying next referer");
                    last_error = Some(error);
                }
                result => return result,
            }
        }
        Err(last_error.unwrap_or_else(|| FetchError::invalid_url(url)))
    }

    /// Fetches many URLs with at most `min(concurrency, max_safe_concurrency)` in flight.
    ///
    /// Results come back in input order, each paired with its input URL.
    pub async fn fetch_many(
        &self,
        urls: &[String],
        concurrency: usize,
    ) -> Vec<(String, Result<Vec<u8>, FetchError>)> {
        let limit = concurrency.clamp(1, self.max_safe_concurrency());
        stream::iter(
            urls.iter()
                .map(|url| async move { (url.clone(), self.fetch(url).await) }),
        )
        .buffered(limit)
        .collect()
        .await
    }

    /// Tells the transport about a server-mandated pause for the URL's host.
    pub async fn note_rate_limit(&self, url: &str, delay: Duration) {
        if let Self::BrowserSim(t) = self {
            t.pacer.record_rate_limit(url, delay).await;
        }
    }
}

fn referer_strategies(url: &str, referer: Option<&str>) -> Vec<Option<String>> {
    let mut strategies: Vec<Option<String>> = Vec::with_capacity(3);
    if let Some(referer) = referer.filter(|r| !r.is_empty()) {
        strategies.push(Some(referer.to_string()));
    }
    strategies.push(None);
    if let Ok(parsed) = Url::parse(url) {
        let root = format!("{}/", parsed.origin().ascii_serialization());
        if !strategies.contains(&Some(root.clone())) {
            strategies.push(Some(root));
        }
    }
    strategies
}
