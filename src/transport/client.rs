//! reqwest client construction and response mapping for both transports.

use std::time::Duration;

use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, CONTENT_TYPE, HeaderMap, HeaderValue, REFERER,
    RETRY_AFTER,
};
use reqwest::{Client, Proxy};
use tracing::{debug, trace};

use super::{FetchError, challenge};
use crate::registry::TransportKind;
use crate::user_agent::BROWSER_USER_AGENT;

const IMAGE_ACCEPT: &str = "image/avif,image/webp,image/apng,image/*,*/*;q=0.8";
const DOCUMENT_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";

/// What the caller expects back; images get extra content checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Expect {
    Document,
    Image,
    Any,
}

/// Settings shared by both client flavours.
#[derive(Debug, Clone)]
pub(crate) struct ClientSettings<'a> {
    pub proxy: Option<&'a str>,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

/// A configured reqwest client for one transport flavour.
#[derive(Debug, Clone)]
pub(crate) struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Builds the client for `kind`.
    pub(crate) fn build(
        kind: TransportKind,
        settings: &ClientSettings<'_>,
    ) -> Result<Self, FetchError> {
        let mut builder = Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.read_timeout)
            .gzip(true)
            .user_agent(BROWSER_USER_AGENT);

        builder = match kind {
            TransportKind::Lightweight => builder,
            TransportKind::BrowserSim => builder
                .cookie_store(true)
                .default_headers(browser_headers()),
        };

        if let Some(proxy) = settings.proxy {
            let proxy = Proxy::all(proxy)
                .map_err(|e| FetchError::client(format!("invalid proxy '{proxy}': {e}")))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| FetchError::client(e.to_string()))?;
        Ok(Self { client })
    }

    /// Performs a GET and maps the response into bytes or a [`FetchError`].
    pub(crate) async fn get(
        &self,
        url: &str,
        referer: Option<&str>,
        expect: Expect,
    ) -> Result<Vec<u8>, FetchError> {
        let parsed = url::Url::parse(url).map_err(|_| FetchError::invalid_url(url))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::invalid_url(url));
        }

        let mut request = self.client.get(parsed);
        request = match expect {
            Expect::Image => request.header(ACCEPT, IMAGE_ACCEPT),
            Expect::Document => request.header(ACCEPT, DOCUMENT_ACCEPT),
            Expect::Any => request,
        };
        if let Some(referer) = referer {
            request = request.header(REFERER, referer);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FetchError::network(url, e))?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::network(url, e))?;
        trace!(url, status, bytes = body.len(), "response received");

        if !(200..300).contains(&status) {
            if challenge::is_challenge_status(status)
                && let Some(marker) = challenge::find_marker(&headers, &body)
            {
                debug!(url, status, marker, "challenge response");
                return Err(FetchError::blocked(url, status, marker));
            }
            let retry_after = headers
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            return Err(FetchError::HttpStatus {
                url: url.to_string(),
                status,
                retry_after,
            });
        }

        if body.is_empty() {
            return Err(FetchError::EmptyBody {
                url: url.to_string(),
            });
        }

        if expect == Expect::Image {
            let content_type = headers
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_ascii_lowercase();
            if content_type.starts_with("text/html") {
                if let Some(marker) = challenge::find_marker(&headers, &body) {
                    debug!(url, marker, "challenge page served in place of an image");
                    return Err(FetchError::blocked(url, status, marker));
                }
                return Err(FetchError::UnexpectedContent {
                    url: url.to_string(),
                    content_type,
                });
            }
        }

        Ok(body.to_vec())
    }
}

fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(DOCUMENT_ACCEPT));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert("dnt", HeaderValue::from_static("1"));
    headers.insert("upgrade-insecure-requests", HeaderValue::from_static("1"));
    headers.insert("sec-fetch-dest", HeaderValue::from_static("document"));
    headers.insert("sec-fetch-mode", HeaderValue::from_static("navigate"));
    headers.insert("sec-fetch-site", HeaderValue::from_static("none"));
    headers.insert("sec-fetch-user", HeaderValue::from_static("?1"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=0"));
    headers
}
