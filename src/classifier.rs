//! Rate-Limit Classifier (C7): maps a failed request onto a retry policy.
//!
//! Pure and I/O-free, per §4.6. This is the single place a typed error gets
//! downgraded into the [`ErrorCategory`] the rest of the core reasons about;
//! nothing downstream matches on HTTP status codes or error strings again.

use std::time::Duration;

use crate::model::ErrorCategory;

const RATE_LIMIT_SUBSTRINGS: &[&str] = &[
    "rate limit",
    "too many requests",
    "temporarily unavailable",
];

/// What the downloader saw when a request failed. Constructed by the HTTP
/// layer, consumed only here.
#[derive(Debug, Clone)]
pub enum ObservedFailure<'a> {
    HttpStatus { status: u16, body_snippet: &'a str },
    Network,
}

/// Classifies an observed failure into a retry category. No network or
/// filesystem access happens here.
pub fn classify(failure: &ObservedFailure<'_>) -> ErrorCategory {
    match failure {
        ObservedFailure::HttpStatus { status, body_snippet } => classify_http_status(*status, body_snippet),
        ObservedFailure::Network => ErrorCategory::Network,
    }
}

fn classify_http_status(status: u16, body_snippet: &str) -> ErrorCategory {
    match status {
        404 => ErrorCategory::Invalid,
        401 => ErrorCategory::Auth,
        429 => ErrorCategory::RateLimit,
        403 => {
            if contains_rate_limit_language(body_snippet) {
                ErrorCategory::RateLimit
            } else {
                ErrorCategory::Invalid
            }
        }
        500..=504 => ErrorCategory::RateLimit,
        _ => ErrorCategory::Unknown,
    }
}

fn contains_rate_limit_language(body_snippet: &str) -> bool {
    let lower = body_snippet.to_lowercase();
    RATE_LIMIT_SUBSTRINGS.iter().any(|needle| lower.contains(needle))
}

/// One row of the backoff schedule table in §4.3.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub multiplier: u32,
    pub cap: Duration,
    pub max_retries: u32,
    /// `true` when the category should never be retried locally at all
    /// (`invalid` skips straight to failed-rounds counting; `auth` bubbles
    /// up to the Auth Session instead of being retried here).
    pub skip_local_retry: bool,
}

pub fn backoff_policy(category: ErrorCategory) -> BackoffPolicy {
    match category {
        ErrorCategory::Invalid => BackoffPolicy {
            base: Duration::ZERO,
            multiplier: 1,
            cap: Duration::ZERO,
            max_retries: 0,
            skip_local_retry: true,
        },
        ErrorCategory::RateLimit => BackoffPolicy {
            base: Duration::from_secs(300),
            multiplier: 2,
            cap: Duration::from_secs(3600),
            max_retries: 8,
            skip_local_retry: false,
        },
        ErrorCategory::Network => BackoffPolicy {
            base: Duration::from_secs(30),
            multiplier: 2,
            cap: Duration::from_secs(1800),
            max_retries: 10,
            skip_local_retry: false,
        },
        ErrorCategory::Auth => BackoffPolicy {
            base: Duration::ZERO,
            multiplier: 1,
            cap: Duration::ZERO,
            max_retries: 0,
            skip_local_retry: true,
        },
        ErrorCategory::Unknown => BackoffPolicy {
            base: Duration::from_secs(60),
            multiplier: 2,
            cap: Duration::from_secs(1200),
            max_retries: 6,
            skip_local_retry: false,
        },
    }
}

/// `backoff(retry_count, category)` from the universal property in §8: the
/// delay before the `retry_count`-th retry (0-indexed), capped.
pub fn backoff_delay(retry_count: u32, category: ErrorCategory) -> Duration {
    let policy = backoff_policy(category);
    if policy.skip_local_retry {
        return Duration::ZERO;
    }
    let exponent = retry_count.min(32);
    let multiplied = policy.base.as_secs().saturating_mul(
        (policy.multiplier as u64).saturating_pow(exponent),
    );
    Duration::from_secs(multiplied.min(policy.cap.as_secs()))
}

/// Whether a queue item that has just failed for the `retry_count`-th time
/// in category `category` should become `permanent_failed`.
pub fn exceeds_retry_budget(retry_count: u32, category: ErrorCategory) -> bool {
    let policy = backoff_policy(category);
    if policy.skip_local_retry {
        return true;
    }
    retry_count > policy.max_retries
}

/// `invalid` works become `permanent_failed` after 3 consecutive
/// `failed_rounds`, independent of `retry_count` (§4.6).
pub const INVALID_FAILED_ROUNDS_LIMIT: u32 = 3;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_404_as_invalid() {
        let f = ObservedFailure::HttpStatus { status: 404, body_snippet: "" };
        assert_eq!(classify(&f), ErrorCategory::Invalid);
    }

    #[test]
    fn classifies_401_as_auth() {
        let f = ObservedFailure::HttpStatus { status: 401, body_snippet: "" };
        assert_eq!(classify(&f), ErrorCategory::Auth);
    }

    #[test]
    fn classifies_403_with_rate_limit_language_as_rate_limit() {
        let f = ObservedFailure::HttpStatus {
            status: 403,
            body_snippet: "Too Many Requests, please slow down",
        };
        assert_eq!(classify(&f), ErrorCategory::RateLimit);
    }

    #[test]
    fn classifies_plain_403_as_invalid() {
        let f = ObservedFailure::HttpStatus { status: 403, body_snippet: "forbidden" };
        assert_eq!(classify(&f), ErrorCategory::Invalid);
    }

    #[test]
    fn classifies_5xx_as_rate_limit() {
        for status in [500, 502, 503, 504] {
            let f = ObservedFailure::HttpStatus { status, body_snippet: "" };
            assert_eq!(classify(&f), ErrorCategory::RateLimit);
        }
    }

    #[test]
    fn classifies_network_failure_directly() {
        assert_eq!(classify(&ObservedFailure::Network), ErrorCategory::Network);
    }

    #[test]
    fn backoff_delay_doubles_and_caps() {
        assert_eq!(
            backoff_delay(0, ErrorCategory::RateLimit),
            Duration::from_secs(300)
        );
        assert_eq!(
            backoff_delay(1, ErrorCategory::RateLimit),
            Duration::from_secs(600)
        );
        assert_eq!(
            backoff_delay(10, ErrorCategory::RateLimit),
            Duration::from_secs(3600)
        );
    }

    #[test]
    fn invalid_and_auth_never_retry_locally() {
        assert_eq!(backoff_delay(0, ErrorCategory::Invalid), Duration::ZERO);
        assert_eq!(backoff_delay(0, ErrorCategory::Auth), Duration::ZERO);
        assert!(exceeds_retry_budget(0, ErrorCategory::Invalid));
        assert!(exceeds_retry_budget(0, ErrorCategory::Auth));
    }

    #[test]
    fn retry_budget_respects_max_retries_per_category() {
        assert!(!exceeds_retry_budget(8, ErrorCategory::RateLimit));
        assert!(exceeds_retry_budget(9, ErrorCategory::RateLimit));
        assert!(!exceeds_retry_budget(10, ErrorCategory::Network));
        assert!(exceeds_retry_budget(11, ErrorCategory::Network));
    }
}
