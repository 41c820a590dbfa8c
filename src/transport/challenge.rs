//! Bot-challenge detection on HTTP responses.

use reqwest::header::HeaderMap;

/// Body markers of interstitial challenge pages (matched case-insensitively).
const BODY_MARKERS: &[&str] = &[
    "just a moment",
    "cf-chl",
    "challenge-platform",
    "cf-browser-verification",
    "cf-challenge-running",
    "attention required",
    "ddos protection by",
];

/// Only the head of the body is scanned; challenge pages are small.
const SCAN_LIMIT: usize = 64 * 1024;

/// Statuses challenge pages are served with.
#[must_use]
pub fn is_challenge_status(status: u16) -> bool {
    matches!(status, 403 | 429 | 503)
}

/// Returns the first challenge marker found in the headers or body.
#[must_use]
pub fn find_marker(headers: &HeaderMap, body: &[u8]) -> Option<&'static str> {
    if headers
        .get("cf-mitigated")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("challenge"))
    {
        return Some("cf-mitigated");
    }

    let head = &body[..body.len().min(SCAN_LIMIT)];
    let text = String::from_utf8_lossy(head).to_lowercase();
    BODY_MARKERS
        .iter()
        .copied()
        .find(|marker| text.contains(marker))
}

#[cfg(test)]
mod tests {
    use reqwest::header::HeaderValue;

    use super::*;

    #[test]
    fn test_cf_mitigated_header_is_a_marker() {
        let mut headers = HeaderMap::new();
        headers.insert("cf-mitigated", HeaderValue::from_static("challenge"));
        assert_eq!(find_marker(&headers, b""), Some("cf-mitigated"));
    }

    #[test]
    fn test_body_markers_case_insensitive() {
        let body = b"<html><title>Just a moment...</title></html>";
        assert_eq!(find_marker(&HeaderMap::new(), body), Some("just a moment"));
        let body = b"<div id=\"cf-challenge-running\"></div>";
        assert_eq!(
            find_marker(&HeaderMap::new(), body),
            Some("cf-challenge-running")
        );
    }

    #[test]
    fn test_plain_error_page_has_no_marker() {
        let body = b"<html><body>404 not found</body></html>";
        assert_eq!(find_marker(&HeaderMap::new(), body), None);
    }

    #[test]
    fn test_challenge_statuses() {
        assert!(is_challenge_status(403));
        assert!(is_challenge_status(503));
        assert!(!is_challenge_status(404));
        assert!(!is_challenge_status(200));
    }
}
