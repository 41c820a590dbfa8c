//! Per-host request pacing for the browser-simulating transport.
//!
//! Requests to the same host are spaced at least `interval` apart; different
//! hosts never wait on each other. A server-mandated pause (Retry-After) pushes
//! the host's next slot further out for every caller.
//!
//! ```
//! use std::time::Duration;
//! use yomi_core::transport::rate_limiter::RateLimiter;
//!
//! # async fn example() {
//! let limiter = RateLimiter::new(Duration::from_millis(750));
//! limiter.acquire("https://example.com/chapter-1").await; // immediate
//! limiter.acquire("https://example.com/chapter-2").await; // waits ~750ms
//! limiter.acquire("https://other.test/").await;           // immediate
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Warning threshold for cumulative delay per host.
const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

/// Maximum honoured Retry-After value.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Per-host request pacer, shared behind the transport.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    // Arc lets callers drop the DashMap shard guard before awaiting the mutex.
    hosts: DashMap<String, Arc<HostState>>,
}

#[derive(Debug, Default)]
struct HostState {
    /// Earliest instant the next request may start; `None` before the first request.
    next_slot: Mutex<Option<Instant>>,
    cumulative_delay_ms: AtomicU64,
}

impl HostState {
    #[allow(clippy::cast_possible_truncation)]
    fn add_cumulative_delay(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        let total = self
            .cumulative_delay_ms
            .fetch_add(delay_ms, Ordering::SeqCst)
            + delay_ms;
        Duration::from_millis(total)
    }
}

impl RateLimiter {
    /// Creates a pacer spacing same-host requests by `interval`.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            hosts: DashMap::new(),
        }
    }

    /// Minimum spacing between requests to one host.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn state(&self, host: &str) -> Arc<HostState> {
        self.hosts
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(HostState::default()))
            .clone()
    }

    /// Waits until `url`'s host may be requested again, then reserves the next slot.
    #[instrument(skip(self), fields(host))]
    pub async fn acquire(&self, url: &str) {
        if self.interval.is_zero() {
            return;
        }
        let host = extract_host(url);
        tracing::Span::current().record("host", host.as_str());

        let state = self.state(&host);
        let mut next_slot = state.next_slot.lock().await;

        if let Some(slot) = *next_slot {
            let now = Instant::now();
            if slot > now {
                let delay = slot - now;
                let cumulative = state.add_cumulative_delay(delay);
                debug!(host = %host, delay_ms = delay.as_millis(), "pacing request");
                if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
                    warn!(
                        host = %host,
                        cumulative_delay_secs = cumulative.as_secs(),
                        "heavy pacing on host"
                    );
                }
                tokio::time::sleep_until(slot).await;
            }
        }

        *next_slot = Some(Instant::now() + self.interval);
    }

    /// Defers the host's next slot by a server-mandated delay.
    #[instrument(skip(self), fields(host))]
    pub async fn record_rate_limit(&self, url: &str, delay: Duration) {
        let host = extract_host(url);
        tracing::Span::current().record("host", host.as_str());

        let delay = delay.min(MAX_RETRY_AFTER);
        let state = self.state(&host);
        let mut next_slot = state.next_slot.lock().await;
        let deferred = Instant::now() + delay;
        if next_slot.is_none_or(|slot| slot < deferred) {
            *next_slot = Some(deferred);
        }
        debug!(host = %host, delay_ms = delay.as_millis(), "recorded server rate limit");
    }
}

/// Lowercased host of `url`, or `unknown` for unparsable input.
#[must_use]
pub fn extract_host(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Parses a Retry-After value (integer seconds or HTTP-date), capped at one hour.
///
/// ```
/// use std::time::Duration;
/// use yomi_core::transport::rate_limiter::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("invalid"), None);
/// ```
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        let seconds = u64::try_from(seconds).ok()?;
        return Some(Duration::from_secs(seconds).min(MAX_RETRY_AFTER));
    }

    let datetime = httpdate::parse_http_date(header_value).ok()?;
    Some(
        datetime
            .duration_since(std::time::SystemTime::now())
            .unwrap_or(Duration::ZERO)
            .min(MAX_RETRY_AFTER),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_request_is_immediate() {
        let limiter = RateLimiter::new(Duration::from_secs(5));
        let start = std::time::Instant::now();
        limiter.acquire("https://a.test/1").await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_same_host_is_spaced() {
        let limiter = RateLimiter::new(Duration::from_millis(150));
        let start = std::time::Instant::now();
        limiter.acquire("https://a.test/1").await;
        limiter.acquire("https://a.test/2").await;
        assert!(start.elapsed() >= Duration::from_millis(140));
    }

    #[tokio::test]
    async fn test_different_hosts_do_not_wait() {
        let limiter = RateLimiter::new(Duration::from_secs(5));
        let start = std::time::Instant::now();
        limiter.acquire("https://a.test/1").await;
        limiter.acquire("https://b.test/1").await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_record_rate_limit_defers_next_slot() {
        let limiter = RateLimiter::new(Duration::from_millis(10));
        limiter
            .record_rate_limit("https://a.test/x", Duration::from_millis(200))
            .await;
        let start = std::time::Instant::now();
        limiter.acquire("https://a.test/y").await;
        assert!(start.elapsed() >= Duration::from_millis(180));
    }

    #[tokio::test]
    async fn test_zero_interval_never_waits() {
        let limiter = RateLimiter::new(Duration::ZERO);
        let start = std::time::Instant::now();
        for _ in 0..10 {
            limiter.acquire("https://a.test/").await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_extract_host() {
        assert_eq!(extract_host("https://CDN.Example.com/x.jpg"), "cdn.example.com");
        assert_eq!(extract_host("not a url"), "unknown");
    }

    #[test]
    fn test_parse_retry_after_values() {
        assert_eq!(parse_retry_after(" 5 "), Some(Duration::from_secs(5)));
        assert_eq!(parse_retry_after("-1"), None);
        assert_eq!(parse_retry_after("99999"), Some(MAX_RETRY_AFTER));
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"),
            Some(Duration::ZERO)
        );
        assert_eq!(parse_retry_after("soon"), None);
    }
}
