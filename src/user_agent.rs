//! Shared User-Agent strings for feed, page and metadata HTTP clients.
//!
//! Feed and metadata traffic identifies the tool; page traffic has to look like a
//! regular browser or most reader sites refuse it outright.

/// Project URL for User-Agent identification.
const PROJECT_UA_URL: &str = "https://github.com/OmurEKiraz/yomi-core";

/// Desktop Chrome User-Agent sent by both page transports.
pub(crate) const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// User-Agent for the site feed and the metadata provider.
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("yomi/{version} (+{PROJECT_UA_URL})")
}
