//! Shared data model types used across every component (§3 of the design doc).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One Pixiv work. Embedded wholesale inside `QueueItem` so a download never
/// needs to re-list the upstream to learn an artifact URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Illust {
    pub illust_id: i64,
    pub title: String,
    pub caption: String,
    pub user: Author,
    pub create_date: DateTime<Utc>,
    pub page_count: u32,
    pub width: u32,
    pub height: u32,
    pub bookmark_count: u64,
    pub view_count: u64,
    pub sanity_level: u32,
    pub x_restrict: u32,
    #[serde(rename = "type")]
    pub illust_type: IllustType,
    pub tags: Vec<String>,
    pub image_urls: BTreeMap<String, String>,
    #[serde(default)]
    pub tools: Vec<String>,
    pub download_time: Option<DateTime<Utc>>,
    pub original_url: String,
    pub is_bookmarked: bool,
    pub is_following_author: bool,
    pub bookmark_order: Option<u64>,
    #[serde(default)]
    pub is_access_limited: bool,
    /// Original-resolution download URL per page, in page order. Distinct
    /// from `image_urls` (preview sizes) and `original_url` (the work's web
    /// page, §6.1) — this is what the downloader actually fetches bytes
    /// from. Populated by the Scanner from the upstream listing response.
    #[serde(default)]
    pub page_urls: Vec<String>,
    /// Zip archive URL for ugoira works; `None` for illust/manga.
    #[serde(default)]
    pub ugoira_zip_url: Option<String>,
}

impl Illust {
    /// Number of artifact files this work will produce once downloaded.
    pub fn expected_artifact_count(&self) -> u32 {
        match self.illust_type {
            IllustType::Ugoira => 1,
            IllustType::Illust | IllustType::Manga => self.page_count.max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IllustType {
    Illust,
    Manga,
    Ugoira,
}

/// The authoritative on-disk shape of `metadata/<illust_id>.json` (§6.1).
/// Deliberately narrower than [`Illust`]: `page_urls` and `ugoira_zip_url`
/// are download-time plumbing the Scanner populates so the Downloader never
/// has to re-list the upstream, not part of the published metadata field
/// set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataDocument {
    pub illust_id: i64,
    pub title: String,
    pub caption: String,
    pub user: Author,
    pub create_date: DateTime<Utc>,
    pub page_count: u32,
    pub width: u32,
    pub height: u32,
    pub bookmark_count: u64,
    pub view_count: u64,
    pub sanity_level: u32,
    pub x_restrict: u32,
    #[serde(rename = "type")]
    pub illust_type: IllustType,
    pub tags: Vec<String>,
    pub image_urls: BTreeMap<String, String>,
    pub tools: Vec<String>,
    pub download_time: Option<DateTime<Utc>>,
    pub original_url: String,
    pub is_bookmarked: bool,
    pub is_following_author: bool,
    pub bookmark_order: Option<u64>,
    pub is_access_limited: bool,
}

impl From<&Illust> for MetadataDocument {
    fn from(illust: &Illust) -> Self {
        Self {
            illust_id: illust.illust_id,
            title: illust.title.clone(),
            caption: illust.caption.clone(),
            user: illust.user.clone(),
            create_date: illust.create_date,
            page_count: illust.page_count,
            width: illust.width,
            height: illust.height,
            bookmark_count: illust.bookmark_count,
            view_count: illust.view_count,
            sanity_level: illust.sanity_level,
            x_restrict: illust.x_restrict,
            illust_type: illust.illust_type,
            tags: illust.tags.clone(),
            image_urls: illust.image_urls.clone(),
            tools: illust.tools.clone(),
            download_time: illust.download_time,
            original_url: illust.original_url.clone(),
            is_bookmarked: illust.is_bookmarked,
            is_following_author: illust.is_following_author,
            bookmark_order: illust.bookmark_order,
            is_access_limited: illust.is_access_limited,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub user_id: i64,
    pub name: String,
    pub account: String,
    pub profile_image_url: String,
}

/// Per-artifact outcome recorded once a download finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub path: String,
    pub byte_size: u64,
    pub content_hash: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Running,
    Done,
    Failed,
    PermanentFailed,
}

impl QueueStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Running => "running",
            QueueStatus::Done => "done",
            QueueStatus::Failed => "failed",
            QueueStatus::PermanentFailed => "permanent_failed",
        }
    }
}

/// The category a failure was classified into, plus the raw status and
/// message that produced it. Kept as a value, never inferred from a string
/// at the call site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastError {
    pub category: ErrorCategory,
    pub http_status: Option<u16>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Invalid,
    RateLimit,
    Auth,
    Network,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Invalid => "invalid",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::Auth => "auth",
            ErrorCategory::Network => "network",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub illust_id: i64,
    pub status: QueueStatus,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub failed_rounds: u32,
    #[serde(default)]
    pub last_error: Option<LastError>,
    #[serde(default)]
    pub next_retry_at: Option<DateTime<Utc>>,
    pub enqueued_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_bookmarked: bool,
    pub is_following_author: bool,
    pub illust: Illust,
}

impl QueueItem {
    pub fn is_bookmark_provenance(&self) -> bool {
        self.is_bookmarked
    }
}

/// Bookmark-listing watermark (§3, §4.4).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookmarksCursor {
    pub latest_seen_illust_id: Option<i64>,
    pub latest_seen_create_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub full_scan: bool,
    #[serde(default)]
    pub incremental_stopped: bool,
}

/// Per-author watermark used while scanning the following listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowingAuthorCursor {
    pub latest_seen_illust_id: i64,
    pub latest_seen_create_date: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Both cursor variants live together on disk (`scan_cursor.json`) since a
/// single round may touch both sources depending on `mode`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanCursorState {
    pub bookmarks: BookmarksCursor,
    #[serde(default)]
    pub following: BTreeMap<i64, FollowingAuthorCursor>,
}

/// A single append-only audit line's structured fields (§4.8). Emitted
/// through `tracing` on the `pixiv_backup::audit` target rather than stored
/// as a standalone document; this type exists so callers build the fields
/// consistently instead of hand-formatting strings at each call site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event: String,
    pub source: String,
    pub action: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ua: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_illust(id: i64) -> Illust {
        Illust {
            illust_id: id,
            title: "sample".into(),
            caption: String::new(),
            user: Author {
                user_id: 1,
                name: "artist".into(),
                account: "artist_account".into(),
                profile_image_url: "https://example.invalid/a.png".into(),
            },
            create_date: Utc::now(),
            page_count: 3,
            width: 800,
            height: 600,
            bookmark_count: 0,
            view_count: 0,
            sanity_level: 2,
            x_restrict: 0,
            illust_type: IllustType::Illust,
            tags: vec!["tag".into()],
            image_urls: BTreeMap::new(),
            tools: Vec::new(),
            download_time: None,
            original_url: "https://example.invalid/orig.png".into(),
            is_bookmarked: true,
            is_following_author: false,
            bookmark_order: Some(5),
            is_access_limited: false,
            page_urls: vec![
                "https://i.pximg.net/img-original/a/1_p0.png".into(),
                "https://i.pximg.net/img-original/a/1_p1.png".into(),
                "https://i.pximg.net/img-original/a/1_p2.png".into(),
            ],
            ugoira_zip_url: None,
        }
    }

    #[test]
    fn expected_artifact_count_uses_page_count_for_illust() {
        assert_eq!(sample_illust(1).expected_artifact_count(), 3);
    }

    #[test]
    fn expected_artifact_count_is_one_for_ugoira_regardless_of_page_count() {
        let mut illust = sample_illust(2);
        illust.illust_type = IllustType::Ugoira;
        illust.page_count = 30;
        assert_eq!(illust.expected_artifact_count(), 1);
    }

    #[test]
    fn queue_status_round_trips_through_json() {
        for status in [
            QueueStatus::Pending,
            QueueStatus::Running,
            QueueStatus::Done,
            QueueStatus::Failed,
            QueueStatus::PermanentFailed,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            let back: QueueStatus = serde_json::from_str(&json).unwrap();
            assert_eq!(back, status);
        }
    }

    #[test]
    fn error_category_as_str_matches_serde_rename() {
        assert_eq!(ErrorCategory::RateLimit.as_str(), "rate_limit");
        assert_eq!(
            serde_json::to_string(&ErrorCategory::RateLimit).unwrap(),
            "\"rate_limit\""
        );
    }
}
