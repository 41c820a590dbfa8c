//! Integration tests for AniList metadata enrichment against a mock GraphQL endpoint.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, ResponseTemplate};
use yomi_core::metadata::MetadataError;
use yomi_core::{AniListProvider, CompletionStatus, MetadataEnricher, MetadataProvider};

mod support;
use support::anilist_body;
use support::socket_guard::start_mock_server_or_skip;

macro_rules! require_mock_server {
    () => {{
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        mock_server
    }};
}

#[tokio::test]
async fn test_anilist_search_maps_media_fields() {
    let server = require_mock_server!();
    Mock::given(method("POST"))
        .and(path("/"))
        .and(body_partial_json(json!({ "variables": { "search": "Bleach" } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(anilist_body(
            "Bleach",
            "Tite Kubo",
            "Tite Kubo",
            "FINISHED",
        )))
        .expect(1)
        .mount(&server)
        .await;

    let provider = AniListProvider::with_endpoint(format!("{}/", server.uri())).unwrap();
    let candidates = provider.search("Bleach").await.unwrap();

    assert_eq!(candidates.len(), 1);
    let candidate = &candidates[0];
    assert_eq!(candidate.titles[0], "Bleach");
    assert_eq!(candidate.author.as_deref(), Some("Tite Kubo"));
    assert_eq!(candidate.status, CompletionStatus::Completed);
    assert_eq!(candidate.year, Some(2001));
    assert_eq!(candidate.genres, vec!["Action", "Supernatural"]);
    let summary = candidate.summary.as_deref().unwrap();
    assert!(!summary.contains("<br>"));
    assert!(summary.contains("Soul Reaper.\nHe protects"));
}

#[tokio::test]
async fn test_anilist_graphql_errors_are_decode_errors() {
    let server = require_mock_server!();
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": null,
            "errors": [{ "message": "Too Many Requests." }]
        })))
        .mount(&server)
        .await;

    let provider = AniListProvider::with_endpoint(server.uri()).unwrap();
    match provider.search("Bleach").await {
        Err(MetadataError::Decode { reason, .. }) => assert!(reason.contains("Too Many")),
        other => panic!("expected decode error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_anilist_http_error_is_status_error() {
    let server = require_mock_server!();
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let provider = AniListProvider::with_endpoint(server.uri()).unwrap();
    let result = provider.search("Bleach").await;
    assert!(matches!(result, Err(MetadataError::Status { status: 429, .. })));
}

#[tokio::test]
async fn test_enricher_returns_best_match() {
    let server = require_mock_server!();
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(anilist_body(
            "One Piece",
            "Eiichiro Oda",
            "Eiichiro Oda",
            "RELEASING",
        )))
        .expect(1)
        .mount(&server)
        .await;

    let provider = Arc::new(AniListProvider::with_endpoint(server.uri()).unwrap());
    let enricher = MetadataEnricher::new(provider);
    let metadata = enricher.enrich("One Piece").await;

    assert_eq!(metadata.title.as_deref(), Some("One Piece"));
    assert_eq!(metadata.author.as_deref(), Some("Eiichiro Oda"));
    assert_eq!(metadata.status, CompletionStatus::Ongoing);

    // Second lookup is served from the enricher's cache (mock expects one call).
    let again = enricher.enrich("one piece").await;
    assert_eq!(again, metadata);
}

#[tokio::test]
async fn test_enricher_rejects_dissimilar_titles() {
    let server = require_mock_server!();
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(anilist_body(
            "Completely Different Story",
            "Someone",
            "Someone",
            "FINISHED",
        )))
        .mount(&server)
        .await;

    let provider = Arc::new(AniListProvider::with_endpoint(server.uri()).unwrap());
    let metadata = MetadataEnricher::new(provider).enrich("Bleach").await;
    assert!(metadata.is_empty());
}

#[tokio::test]
async fn test_enricher_degrades_to_empty_on_timeout() {
    let server = require_mock_server!();
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(anilist_body("Bleach", "Tite Kubo", "Tite Kubo", "FINISHED"))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let provider = Arc::new(AniListProvider::with_endpoint(server.uri()).unwrap());
    let metadata = MetadataEnricher::new(provider)
        .with_timeout(Duration::from_millis(100))
        .enrich("Bleach")
        .await;
    assert!(metadata.is_empty());
}

#[tokio::test]
async fn test_enricher_degrades_to_empty_on_server_error() {
    let server = require_mock_server!();
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let provider = Arc::new(AniListProvider::with_endpoint(server.uri()).unwrap());
    let metadata = MetadataEnricher::new(provider).enrich("Bleach").await;
    assert!(metadata.is_empty());
}
