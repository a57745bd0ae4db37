//! Downloader (C6): artifact resolution, HTTP fetch, and metadata writing
//! for a single claimed queue item.

mod artifacts;
mod client;
mod constants;
mod engine;
mod error;
pub mod rate_limiter;

pub use artifacts::{Artifact, resolve_artifacts};
pub use client::HttpClient;
pub use constants::IMAGE_REFERER;
pub use engine::{DownloadOutcome, Downloader};
pub use error::DownloadError;
pub use rate_limiter::{extract_domain, parse_retry_after};
