//! Error type for one Scanner pass (C5).

use thiserror::Error;

use crate::auth::AuthError;
use crate::metadata::MetadataError;
use crate::upstream::UpstreamError;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("auth error during scan: {0}")]
    Auth(#[from] AuthError),
    #[error("upstream error during scan: {0}")]
    Upstream(#[from] UpstreamError),
    #[error("metadata store error during scan: {0}")]
    Metadata(#[from] MetadataError),
}

impl ScanError {
    /// Bridges a round-fatal scan failure into the classifier's category,
    /// mirroring [`crate::download::DownloadError::as_observed_failure`].
    ///
    /// `ScanError::Auth` already carries its own verdict — it is only ever
    /// constructed from [`AuthError::ReauthFailed`]-style round-fatal
    /// failures (§4.1) — so it maps straight to [`ErrorCategory::Auth`]
    /// rather than going through the HTTP-status classifier, which has no
    /// status code to classify here.
    pub fn category(&self) -> crate::model::ErrorCategory {
        match self {
            ScanError::Auth(_) => crate::model::ErrorCategory::Auth,
            ScanError::Upstream(UpstreamError::Status { status, body }) => {
                crate::classifier::classify(&crate::classifier::ObservedFailure::HttpStatus {
                    status: *status,
                    body_snippet: body,
                })
            }
            ScanError::Upstream(UpstreamError::Request(_)) => {
                crate::classifier::classify(&crate::classifier::ObservedFailure::Network)
            }
            ScanError::Upstream(UpstreamError::Decode(_)) | ScanError::Metadata(_) => {
                crate::model::ErrorCategory::Unknown
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthError;
    use crate::model::ErrorCategory;

    #[test]
    fn auth_failure_classifies_as_auth_not_unknown() {
        let err = ScanError::Auth(AuthError::ReauthFailed);
        assert_eq!(err.category(), ErrorCategory::Auth);
    }

    #[test]
    fn upstream_429_classifies_as_rate_limit() {
        let err = ScanError::Upstream(UpstreamError::Status { status: 429, body: String::new() });
        assert_eq!(err.category(), ErrorCategory::RateLimit);
    }
}
