//! Structured errors for the artifact fetch/write pipeline (C6).

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("network error downloading {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("timeout downloading {url}")]
    Timeout { url: String },

    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        url: String,
        status: u16,
        retry_after: Option<String>,
        body_snippet: String,
    },

    #[error("IO error writing to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },

    #[error(
        "artifact size mismatch for {path}: expected {expected_bytes} bytes, got {actual_bytes}"
    )]
    Integrity {
        path: PathBuf,
        expected_bytes: u64,
        actual_bytes: u64,
    },
}

impl DownloadError {
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    pub fn http_status(
        url: impl Into<String>,
        status: u16,
        retry_after: Option<String>,
        body_snippet: impl Into<String>,
    ) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
            body_snippet: body_snippet.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    pub fn integrity(path: impl Into<PathBuf>, expected_bytes: u64, actual_bytes: u64) -> Self {
        Self::Integrity {
            path: path.into(),
            expected_bytes,
            actual_bytes,
        }
    }

    /// The HTTP status this error carries, if any — used to populate
    /// `LastError::http_status` without re-deriving it from the classifier.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            DownloadError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Translates this error into the observed-failure shape the classifier
    /// (C7) consumes. Deliberately the only place this enum is downgraded
    /// into a bare status/body pair.
    pub fn as_observed_failure(&self) -> crate::classifier::ObservedFailure<'_> {
        match self {
            DownloadError::HttpStatus {
                status, body_snippet, ..
            } => crate::classifier::ObservedFailure::HttpStatus {
                status: *status,
                body_snippet,
            },
            _ => crate::classifier::ObservedFailure::Network,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_error_carries_body_snippet_for_classification() {
        let err = DownloadError::http_status(
            "https://example.invalid/x",
            403,
            None,
            "Too Many Requests",
        );
        match err.as_observed_failure() {
            crate::classifier::ObservedFailure::HttpStatus { status, body_snippet } => {
                assert_eq!(status, 403);
                assert_eq!(body_snippet, "Too Many Requests");
            }
            crate::classifier::ObservedFailure::Network => panic!("expected HttpStatus"),
        }
    }

    #[test]
    fn network_error_classifies_as_network() {
        // Constructing a real reqwest::Error requires a failed request; this
        // test instead checks the non-HttpStatus branches all map to Network.
        let err = DownloadError::invalid_url("not a url");
        assert!(matches!(
            err.as_observed_failure(),
            crate::classifier::ObservedFailure::Network
        ));
    }
}
