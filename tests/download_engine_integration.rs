//! Integration tests for the download engine against a mock manga site.
//!
//! Covers the failure-ratio rule, retry on transient failures, and escalation
//! from the lightweight transport to the browser-simulating one.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use wiremock::matchers::{header_exists, method, path, path_regex};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};
use yomi_core::download::CANCELLED_REASON;
use yomi_core::{
    ChapterDescriptor, ChapterOutcome, DownloadEngine, DownloadOptions, RetryPolicy,
    SeriesTarget, TransportKind,
};

mod support;
use support::socket_guard::start_mock_server_or_skip;
use support::{
    fast_download_options, fast_transport_options, image_path, mount_series, png_page, site_for,
};

macro_rules! require_mock_server {
    () => {{
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        mock_server
    }};
}

fn engine(server: &MockServer, options: DownloadOptions) -> DownloadEngine {
    DownloadEngine::new(
        Arc::new(site_for(server, "mock")),
        options,
        fast_transport_options(),
    )
    .unwrap()
}

fn chapter(server: &MockServer, n: u32) -> ChapterDescriptor {
    ChapterDescriptor::new(
        f64::from(n),
        format!("Chapter {n}"),
        format!("{}/manga/bleach/chapter-{n}", server.uri()),
    )
}

async fn mount_missing(server: &MockServer, chapter: u32, pages: &[usize]) {
    for &page in pages {
        Mock::given(method("GET"))
            .and(path(image_path("bleach", chapter, page)))
            .respond_with(ResponseTemplate::new(404))
            .with_priority(1)
            .mount(server)
            .await;
    }
}

/// Makes the given pages hang long past the grace period.
async fn mount_stalled(server: &MockServer, chapter: u32, pages: &[usize]) {
    for &page in pages {
        Mock::given(method("GET"))
            .and(path(image_path("bleach", chapter, page)))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(png_page(1))
                    .set_delay(Duration::from_secs(10)),
            )
            .with_priority(1)
            .mount(server)
            .await;
    }
}

/// Sets `flag` after `delay`.
fn interrupt_after(flag: &Arc<AtomicBool>, delay: Duration) {
    let flag = Arc::clone(flag);
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        flag.store(true, Ordering::SeqCst);
    });
}

/// Fails with 503 for the first `failures` requests, then serves an image.
struct FlakyImage {
    calls: Arc<AtomicUsize>,
    failures: usize,
}

impl Respond for FlakyImage {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            ResponseTemplate::new(503)
        } else {
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/png")
                .set_body_bytes(png_page(7))
        }
    }
}

// ==================== Enumeration ====================

#[tokio::test]
async fn test_fetch_series_lists_chapters_in_order() {
    let server = require_mock_server!();
    mount_series(&server, "bleach", "Bleach", &[3, 1, 2], 1).await;

    let engine = engine(&server, fast_download_options(4));
    let target = SeriesTarget {
        site_id: "mock".to_string(),
        series_path: "/manga/bleach".to_string(),
        display_name: "Bleach".to_string(),
        name_is_curated: true,
        url: format!("{}/manga/bleach", server.uri()),
    };
    let listing = engine.fetch_series(&target).await.unwrap();

    assert_eq!(listing.title.as_deref(), Some("Bleach"));
    let numbers: Vec<f64> = listing.chapters.iter().map(|c| c.sequence_number).collect();
    assert_eq!(numbers, vec![1.0, 2.0, 3.0]);
    assert!(listing.chapters[0].url.ends_with("/manga/bleach/chapter-1"));
}

// ==================== Outcomes ====================

#[tokio::test]
async fn test_all_pages_fetched_is_complete_in_page_order() {
    let server = require_mock_server!();
    mount_series(&server, "bleach", "Bleach", &[1], 6).await;

    let engine = engine(&server, fast_download_options(4));
    let download = engine.download_chapter(&chapter(&server, 1)).await;

    assert_eq!(download.outcome, ChapterOutcome::Complete);
    let indexes: Vec<usize> = download.pages.iter().map(|p| p.task.page_index).collect();
    assert_eq!(indexes, vec![1, 2, 3, 4, 5, 6]);
    assert!(download.pages.iter().all(|p| p.is_success()));
    assert_eq!(engine.stats().pages_fetched(), 6);
    assert_eq!(engine.stats().pages_failed(), 0);
}

#[tokio::test]
async fn test_one_missing_page_of_ten_is_partial() {
    let server = require_mock_server!();
    mount_missing(&server, 1, &[4]).await;
    mount_series(&server, "bleach", "Bleach", &[1], 10).await;

    let engine = engine(&server, fast_download_options(4));
    let download = engine.download_chapter(&chapter(&server, 1)).await;

    assert_eq!(download.outcome, ChapterOutcome::Partial { missing: vec![4] });
    assert_eq!(download.fetched_pages().count(), 9);
    // 404 is permanent: one attempt only
    let failed = &download.pages[3];
    assert_eq!(failed.attempts, 1);
    assert!(failed.failure_reason().unwrap().contains("404"));
    assert_eq!(engine.stats().retries(), 0);
}

#[tokio::test]
async fn test_six_missing_pages_of_ten_fails_chapter() {
    let server = require_mock_server!();
    mount_missing(&server, 1, &[1, 2, 3, 4, 5, 6]).await;
    mount_series(&server, "bleach", "Bleach", &[1], 10).await;

    let engine = engine(&server, fast_download_options(4));
    let download = engine.download_chapter(&chapter(&server, 1)).await;

    match &download.outcome {
        ChapterOutcome::Failed { reason } => assert!(reason.starts_with("6 of 10 pages failed")),
        other => panic!("expected failed chapter, got {other:?}"),
    }
    assert_eq!(engine.stats().pages_failed(), 6);
}

#[tokio::test]
async fn test_exactly_half_missing_is_still_partial() {
    let server = require_mock_server!();
    mount_missing(&server, 1, &[2, 4]).await;
    mount_series(&server, "bleach", "Bleach", &[1], 4).await;

    let engine = engine(&server, fast_download_options(2));
    let download = engine.download_chapter(&chapter(&server, 1)).await;

    assert_eq!(
        download.outcome,
        ChapterOutcome::Partial {
            missing: vec![2, 4]
        }
    );
}

#[tokio::test]
async fn test_missing_chapter_page_fails_chapter() {
    let server = require_mock_server!();
    mount_series(&server, "bleach", "Bleach", &[1], 2).await;

    let engine = engine(&server, fast_download_options(2));
    let download = engine.download_chapter(&chapter(&server, 9)).await;

    assert!(matches!(download.outcome, ChapterOutcome::Failed { .. }));
    assert!(download.pages.is_empty());
}

// ==================== Retry ====================

#[tokio::test]
async fn test_transient_failure_is_retried_then_succeeds() {
    let server = require_mock_server!();
    let calls = Arc::new(AtomicUsize::new(0));
    Mock::given(method("GET"))
        .and(path(image_path("bleach", 1, 1)))
        .respond_with(FlakyImage {
            calls: Arc::clone(&calls),
            failures: 2,
        })
        .with_priority(1)
        .mount(&server)
        .await;
    mount_series(&server, "bleach", "Bleach", &[1], 1).await;

    let engine = engine(&server, fast_download_options(1));
    let download = engine.download_chapter(&chapter(&server, 1)).await;

    assert_eq!(download.outcome, ChapterOutcome::Complete);
    assert_eq!(download.pages[0].attempts, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(engine.stats().retries(), 2);
}

#[tokio::test]
async fn test_retries_stop_at_max_attempts() {
    let server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path_regex(r"^/images/bleach/1/.*$"))
        .respond_with(ResponseTemplate::new(500))
        .with_priority(1)
        .mount(&server)
        .await;
    mount_series(&server, "bleach", "Bleach", &[1], 1).await;

    let options = DownloadOptions {
        retry_policy: support::fast_retry_policy(2),
        ..fast_download_options(1)
    };
    let engine = engine(&server, options);
    let download = engine.download_chapter(&chapter(&server, 1)).await;

    assert!(matches!(download.outcome, ChapterOutcome::Failed { .. }));
    assert_eq!(download.pages[0].attempts, 2);
}

// ==================== Concurrency and escalation ====================

#[tokio::test]
async fn test_lightweight_gate_bounds_in_flight_pages() {
    let server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path_regex(r"^/images/bleach/1/.*$"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/png")
                .set_body_bytes(png_page(1))
                .set_delay(Duration::from_millis(40)),
        )
        .with_priority(1)
        .mount(&server)
        .await;
    mount_series(&server, "bleach", "Bleach", &[1], 12).await;

    let engine = engine(&server, fast_download_options(3));
    assert_eq!(engine.gate().ceiling(), 3);
    let download = engine.download_chapter(&chapter(&server, 1)).await;

    assert_eq!(download.outcome, ChapterOutcome::Complete);
    assert!(engine.gate().peak() <= 3);
    assert_eq!(engine.gate().active(), 0);
}

#[tokio::test]
async fn test_challenges_escalate_to_browser_transport_and_lower_ceiling() {
    let server = require_mock_server!();
    // Browser-simulating requests carry fetch-metadata headers and get the image.
    Mock::given(method("GET"))
        .and(path_regex(r"^/images/bleach/1/.*$"))
        .and(header_exists("sec-fetch-mode"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/png")
                .set_body_bytes(png_page(3)),
        )
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/images/bleach/1/.*$"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("cf-mitigated", "challenge")
                .set_body_string("<html><title>Just a moment...</title></html>"),
        )
        .with_priority(2)
        .mount(&server)
        .await;
    mount_series(&server, "bleach", "Bleach", &[1], 10).await;

    let options = DownloadOptions {
        workers: 8,
        retry_policy: RetryPolicy::new(
            4,
            Duration::from_millis(10),
            Duration::from_millis(50),
            2.0,
        )
        .without_jitter(),
        ..fast_download_options(8)
    };
    let engine = engine(&server, options);
    assert_eq!(engine.transport_kind(), TransportKind::Lightweight);
    assert_eq!(engine.gate().ceiling(), 8);

    let download = engine.download_chapter(&chapter(&server, 1)).await;

    assert_eq!(download.outcome, ChapterOutcome::Complete);
    assert_eq!(engine.transport_kind(), TransportKind::BrowserSim);
    assert_eq!(engine.stats().escalations(), 1);
    assert!(engine.stats().blocked() >= 3);
    assert_eq!(engine.gate().ceiling(), 2);
    assert!(engine.gate().peak() <= 2);
}

#[tokio::test]
async fn test_browser_site_starts_at_browser_ceiling() {
    let server = require_mock_server!();
    mount_series(&server, "bleach", "Bleach", &[1], 3).await;

    let site = site_for(&server, "mock").with_transport(TransportKind::BrowserSim);
    let engine = DownloadEngine::new(
        Arc::new(site),
        fast_download_options(16),
        fast_transport_options(),
    )
    .unwrap();
    assert_eq!(engine.gate().ceiling(), 2);

    let download = engine.download_chapter(&chapter(&server, 1)).await;
    assert_eq!(download.outcome, ChapterOutcome::Complete);
    assert_eq!(engine.stats().escalations(), 0);
}

// ==================== Interruption ====================

#[tokio::test]
async fn test_interrupt_mid_chapter_cancels_in_flight_pages_after_grace() {
    let server = require_mock_server!();
    mount_stalled(&server, 1, &[9, 10]).await;
    mount_series(&server, "bleach", "Bleach", &[1], 10).await;

    let flag = Arc::new(AtomicBool::new(false));
    let engine = engine(&server, fast_download_options(4)).with_interrupt_flag(Arc::clone(&flag));
    interrupt_after(&flag, Duration::from_millis(400));

    let started = Instant::now();
    let download = engine.download_chapter(&chapter(&server, 1)).await;

    // interrupt (400ms) plus the 500ms grace period, well before the stalled responses
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(download.pages.len(), 10);
    assert_eq!(download.fetched_pages().count(), 8);
    for page in &download.pages[8..] {
        assert_eq!(page.failure_reason(), Some(CANCELLED_REASON));
        assert_eq!(page.attempts, 0);
    }
    assert_eq!(download.outcome, ChapterOutcome::Partial { missing: vec![9, 10] });
}

#[tokio::test]
async fn test_interrupt_mid_chapter_with_most_pages_unstarted_fails_chapter() {
    let server = require_mock_server!();
    mount_stalled(&server, 1, &[3, 4, 5, 6, 7, 8, 9, 10]).await;
    mount_series(&server, "bleach", "Bleach", &[1], 10).await;

    let flag = Arc::new(AtomicBool::new(false));
    let engine = engine(&server, fast_download_options(2)).with_interrupt_flag(Arc::clone(&flag));
    interrupt_after(&flag, Duration::from_millis(400));

    let started = Instant::now();
    let download = engine.download_chapter(&chapter(&server, 1)).await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(download.pages.len(), 10);
    assert!(download.pages[..2].iter().all(|p| p.is_success()));
    // pages 3 and 4 were aborted in flight, 5..=10 never started
    assert!(
        download.pages[2..]
            .iter()
            .all(|p| p.failure_reason() == Some(CANCELLED_REASON))
    );
    match &download.outcome {
        ChapterOutcome::Failed { reason } => assert!(reason.starts_with("8 of 10 pages failed")),
        other => panic!("expected failed chapter, got {other:?}"),
    }
}
