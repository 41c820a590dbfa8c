//! AniList GraphQL metadata provider.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{CompletionStatus, MetadataCandidate, MetadataError, MetadataProvider};
use crate::user_agent::default_user_agent;

/// Public AniList GraphQL endpoint.
pub const ANILIST_ENDPOINT: &str = "https://graphql.anilist.co";

const PROVIDER: &str = "anilist";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const SEARCH_QUERY: &str = r"
query ($search: String) {
  Page(perPage: 10) {
    media(search: $search, type: MANGA) {
      title { romaji english native }
      staff { edges { role node { name { full } } } }
      startDate { year }
      genres
      description
      status
    }
  }
}";

#[allow(clippy::expect_used)]
static BREAK_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>").expect("break tag regex is valid"));

#[allow(clippy::expect_used)]
static ANY_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("tag regex is valid"));

// ==================== AniList Response Types ====================

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<PageData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PageData {
    page: Option<Page>,
}

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    media: Vec<Media>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Media {
    title: Option<MediaTitle>,
    staff: Option<StaffConnection>,
    start_date: Option<FuzzyDate>,
    #[serde(default)]
    genres: Vec<String>,
    description: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MediaTitle {
    romaji: Option<String>,
    english: Option<String>,
    native: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StaffConnection {
    #[serde(default)]
    edges: Vec<StaffEdge>,
}

#[derive(Debug, Deserialize)]
struct StaffEdge {
    role: Option<String>,
    node: Option<StaffNode>,
}

#[derive(Debug, Deserialize)]
struct StaffNode {
    name: Option<StaffName>,
}

#[derive(Debug, Deserialize)]
struct StaffName {
    full: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FuzzyDate {
    year: Option<i32>,
}

// ==================== AniListProvider ====================

/// Searches AniList for manga by title.
#[derive(Debug, Clone)]
pub struct AniListProvider {
    client: Client,
    endpoint: String,
}

impl AniListProvider {
    /// Creates a provider for the public AniList endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::Request`] if the HTTP client cannot be built.
    pub fn new() -> Result<Self, MetadataError> {
        Self::with_endpoint(ANILIST_ENDPOINT)
    }

    /// Creates a provider for a custom endpoint (for testing with wiremock).
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::Request`] if the HTTP client cannot be built.
    pub fn with_endpoint(endpoint: impl Into<String>) -> Result<Self, MetadataError> {
        let client = Client::builder()
            .user_agent(default_user_agent())
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|source| MetadataError::Request {
                provider: PROVIDER,
                source,
            })?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl MetadataProvider for AniListProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    #[tracing::instrument(skip(self), fields(provider = PROVIDER))]
    async fn search(&self, title: &str) -> Result<Vec<MetadataCandidate>, MetadataError> {
        let body = json!({ "query": SEARCH_QUERY, "variables": { "search": title } });
        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|source| MetadataError::Request {
                provider: PROVIDER,
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(MetadataError::Status {
                provider: PROVIDER,
                status: status.as_u16(),
            });
        }

        let parsed: GraphQlResponse =
            response.json().await.map_err(|e| MetadataError::Decode {
                provider: PROVIDER,
                reason: e.to_string(),
            })?;

        if let Some(error) = parsed.errors.first() {
            return Err(MetadataError::Decode {
                provider: PROVIDER,
                reason: error.message.clone(),
            });
        }

        let media = parsed
            .data
            .and_then(|d| d.page)
            .map(|p| p.media)
            .unwrap_or_default();
        debug!(results = media.len(), "anilist search complete");
        Ok(media.into_iter().map(candidate_from).collect())
    }
}

fn candidate_from(media: Media) -> MetadataCandidate {
    let titles = media
        .title
        .map(|t| {
            [t.english, t.romaji, t.native]
                .into_iter()
                .flatten()
                .filter(|s| !s.trim().is_empty())
                .collect()
        })
        .unwrap_or_default();

    let (author, artist) = staff_credits(media.staff.map(|s| s.edges).unwrap_or_default());

    MetadataCandidate {
        titles,
        author,
        artist,
        summary: media.description.as_deref().and_then(clean_description),
        genres: media.genres,
        status: media
            .status
            .as_deref()
            .map_or(CompletionStatus::Unknown, status_from_anilist),
        year: media.start_date.and_then(|d| d.year),
    }
}

/// Author and artist from staff roles; each falls back to the other.
fn staff_credits(edges: Vec<StaffEdge>) -> (Option<String>, Option<String>) {
    let mut author = None;
    let mut artist = None;
    for edge in edges {
        let Some(name) = edge.node.and_then(|n| n.name).and_then(|n| n.full) else {
            continue;
        };
        let role = edge.role.unwrap_or_default().to_lowercase();
        if author.is_none() && (role.contains("story") || role.contains("writer")) {
            author = Some(name.clone());
        }
        if artist.is_none() && (role.contains("art") || role.contains("illustrat")) {
            artist = Some(name);
        }
    }
    match (author, artist) {
        (Some(author), None) => (Some(author.clone()), Some(author)),
        (None, Some(artist)) => (Some(artist.clone()), Some(artist)),
        pair => pair,
    }
}

fn status_from_anilist(status: &str) -> CompletionStatus {
    match status {
        "RELEASING" => CompletionStatus::Ongoing,
        "FINISHED" => CompletionStatus::Completed,
        "CANCELLED" => CompletionStatus::Cancelled,
        "HIATUS" => CompletionStatus::Hiatus,
        _ => CompletionStatus::Unknown,
    }
}

/// Converts AniList's HTML description to plain text.
fn clean_description(raw: &str) -> Option<String> {
    let text = BREAK_TAG.replace_all(raw, "\n");
    let text = ANY_TAG.replace_all(&text, "");
    let text = text
        .replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#039;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">");
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
