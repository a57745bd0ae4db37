//! HTTP timing helpers shared by the downloader and the classifier.
//!
//! Pixiv's pacing model (§4.3) is a single global two-tier sequencer owned
//! by the task queue's claim logic, not a per-domain concurrent limiter —
//! the daemon talks to one upstream host at a time on a strictly serial
//! pipeline (§5), so the teacher's `DashMap`-backed per-domain `RateLimiter`
//! has no remaining use here. What survives are its two free functions,
//! which are host-agnostic utilities independent of that concurrency model.

use std::time::Duration;

use tracing::{debug, warn};

/// Maximum Retry-After value (1 hour), to prevent a misbehaving upstream
/// from parking the pipeline indefinitely.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Lowercased host component of a URL, or `"unknown"` if it cannot be
/// parsed. Used for log context, not for routing.
pub fn extract_domain(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Parses a `Retry-After` header value into a [`Duration`], per RFC 7231.
/// Supports integer seconds and HTTP-date forms. Returns `None` if the
/// value cannot be parsed; caps excessive values at one hour.
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }
        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);
        if duration > MAX_RETRY_AFTER {
            warn!(
                seconds,
                max_seconds = MAX_RETRY_AFTER.as_secs(),
                "Retry-After exceeds maximum, capping at 1 hour"
            );
            return Some(MAX_RETRY_AFTER);
        }
        return Some(duration);
    }

    if let Ok(datetime) = httpdate::parse_http_date(header_value) {
        let now = std::time::SystemTime::now();
        if let Ok(duration) = datetime.duration_since(now) {
            if duration > MAX_RETRY_AFTER {
                warn!(
                    delay_secs = duration.as_secs(),
                    max_secs = MAX_RETRY_AFTER.as_secs(),
                    "Retry-After date exceeds maximum, capping at 1 hour"
                );
                return Some(MAX_RETRY_AFTER);
            }
            Some(duration)
        } else {
            debug!(header_value, "Retry-After date is in the past, returning zero");
            Some(Duration::ZERO)
        }
    } else {
        debug!(header_value, "unparseable Retry-After value");
        None
    }
}
