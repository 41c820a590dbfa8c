#![allow(dead_code)]

pub mod socket_guard;

use std::io::Cursor;
use std::time::Duration;

use image::{DynamicImage, ImageFormat, RgbImage};
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use yomi_core::registry::SiteFeed;
use yomi_core::{DownloadOptions, RetryPolicy, SiteDefinition, TransportOptions};

/// A small solid-colour RGB image encoded as `format`.
pub fn image_bytes(seed: u8, format: ImageFormat) -> Vec<u8> {
    let image = RgbImage::from_pixel(8, 12, image::Rgb([seed, 255 - seed, seed / 2]));
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image)
        .write_to(&mut out, format)
        .unwrap();
    out.into_inner()
}

pub fn png_page(seed: u8) -> Vec<u8> {
    image_bytes(seed, ImageFormat::Png)
}

pub fn jpeg_page(seed: u8) -> Vec<u8> {
    image_bytes(seed, ImageFormat::Jpeg)
}

/// Series page with an `h1` title and one link per chapter.
pub fn series_html(title: &str, series_path: &str, chapters: &[u32]) -> String {
    let links: String = chapters
        .iter()
        .map(|n| format!(r#"<li><a href="{series_path}/chapter-{n}">Chapter {n}</a></li>"#))
        .collect();
    format!(
        r#"<html><head><title>{title} - Read Online</title></head>
<body><img src="/static/logo.png"><h1>{title}</h1><ul class="chapters">{links}</ul></body></html>"#
    )
}

/// Chapter page with one `img` per page path, in order.
pub fn chapter_html(image_paths: &[String]) -> String {
    let images: String = image_paths
        .iter()
        .map(|p| format!(r#"<img class="page" src="{p}">"#))
        .collect();
    format!(
        r#"<html><body><img src="/static/site-logo.png"><div class="reader">{images}</div></body></html>"#
    )
}

pub fn image_path(series: &str, chapter: u32, page: usize) -> String {
    format!("/images/{series}/{chapter}/{page:03}.png")
}

/// Site pointing at the mock server (plain http, `host:port` domain).
pub fn site_for(server: &MockServer, id: &str) -> SiteDefinition {
    SiteDefinition::new(id, server.address().to_string()).with_scheme("http")
}

pub fn feed_json(version: u64, sites: Vec<SiteDefinition>) -> String {
    serde_json::to_string(&SiteFeed { version, sites }).unwrap()
}

/// Mounts a series page plus `pages` PNG pages for each chapter.
pub async fn mount_series(
    server: &MockServer,
    slug: &str,
    title: &str,
    chapters: &[u32],
    pages: usize,
) {
    let series_path = format!("/manga/{slug}");
    Mock::given(method("GET"))
        .and(path(series_path.clone()))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html; charset=utf-8")
                .set_body_string(series_html(title, &series_path, chapters)),
        )
        .mount(server)
        .await;

    for &chapter in chapters {
        let images: Vec<String> = (1..=pages).map(|p| image_path(slug, chapter, p)).collect();
        Mock::given(method("GET"))
            .and(path(format!("{series_path}/chapter-{chapter}")))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html; charset=utf-8")
                    .set_body_string(chapter_html(&images)),
            )
            .mount(server)
            .await;
        for (index, image) in images.iter().enumerate() {
            let seed = u8::try_from((chapter as usize * 16 + index) % 256).unwrap();
            Mock::given(method("GET"))
                .and(path(image.clone()))
                .respond_with(
                    ResponseTemplate::new(200)
                        .insert_header("content-type", "image/png")
                        .set_body_bytes(png_page(seed)),
                )
                .mount(server)
                .await;
        }
    }
}

/// Retries that finish in milliseconds.
pub fn fast_retry_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(
        max_attempts,
        Duration::from_millis(10),
        Duration::from_millis(50),
        2.0,
    )
    .without_jitter()
}

pub fn fast_download_options(workers: usize) -> DownloadOptions {
    DownloadOptions {
        workers,
        retry_policy: fast_retry_policy(3),
        grace_period: Duration::from_millis(500),
        ..DownloadOptions::default()
    }
}

pub fn fast_transport_options() -> TransportOptions {
    TransportOptions {
        connect_timeout: Duration::from_secs(5),
        read_timeout: Duration::from_secs(10),
        browser_pacing: Duration::from_millis(5),
        ..TransportOptions::default()
    }
}

/// AniList GraphQL response with one media entry.
pub fn anilist_body(english: &str, author: &str, artist: &str, status: &str) -> Value {
    json!({
        "data": {
            "Page": {
                "media": [{
                    "title": { "romaji": english, "english": english, "native": null },
                    "staff": { "edges": [
                        { "role": "Story", "node": { "name": { "full": author } } },
                        { "role": "Art", "node": { "name": { "full": artist } } }
                    ]},
                    "startDate": { "year": 2001 },
                    "genres": ["Action", "Supernatural"],
                    "description": "A teenager gains the powers of a Soul Reaper.<br>He protects the living.",
                    "status": status
                }]
            }
        }
    })
}
