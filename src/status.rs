//! Status Publisher (C8): atomically publishes a runtime snapshot document
//! after every scheduler phase change and periodically during active work
//! (§4.7).
//!
//! Follows the same write-to-temp-then-rename discipline as the rest of
//! the durable documents (`atomic_write`), but unlike the queue and cursor
//! this one is never read back by the process that writes it — readers are
//! external observers, so [`StatusPublisher`] only ever serializes forward.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::model::ErrorCategory;
use crate::queue::QueueSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DaemonState {
    Idle,
    Syncing,
    Cooldown,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CooldownReason {
    RateLimit,
    Limit,
    Error,
}

/// A single recent error entry (§7: "the recent-errors list keeps the last
/// 10 items with placeholder/limited works filtered out").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentError {
    pub time: DateTime<Utc>,
    pub illust_id: Option<i64>,
    pub action: String,
    pub url: Option<String>,
    pub category: ErrorCategory,
    pub message: String,
}

const RECENT_ERRORS_CAP: usize = 10;

/// Non-persistent runtime snapshot (§3, §4.7, §6.1). Every field but
/// `state` and `updated_at` is optional in the serialized form so a reader
/// can tell "not published this cycle" (absent) from "zero" (§4.7:
/// "readers must treat absence as unknown not zero").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeStatus {
    pub state: DaemonState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hit_max_downloads: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limited: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<RecentError>,
    #[serde(default)]
    pub recent_errors: Vec<RecentError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_summary: Option<QueueSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_reason: Option<CooldownReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_seconds: Option<u64>,
    pub updated_at: DateTime<Utc>,
}

impl RuntimeStatus {
    #[must_use]
    pub fn idle() -> Self {
        Self {
            state: DaemonState::Idle,
            phase: None,
            message: None,
            processed_total: None,
            success: None,
            skipped: None,
            failed: None,
            hit_max_downloads: None,
            rate_limited: None,
            last_error: None,
            recent_errors: Vec::new(),
            queue_summary: None,
            cooldown_reason: None,
            next_run_at: None,
            cooldown_seconds: None,
            updated_at: Utc::now(),
        }
    }

    /// Appends `error` to the recent-errors ring (newest first), capped at
    /// [`RECENT_ERRORS_CAP`], and sets it as `last_error` too.
    pub fn record_error(&mut self, error: RecentError) {
        self.last_error = Some(error.clone());
        self.recent_errors.insert(0, error);
        self.recent_errors.truncate(RECENT_ERRORS_CAP);
    }
}

/// Writes `status.json` atomically (invariant 6). `updated_at` is set to
/// `Utc::now()` on every publish so publications are strictly monotonic
/// (§5 ordering guarantees) regardless of what the caller set it to.
#[derive(Debug, Clone)]
pub struct StatusPublisher {
    path: std::path::PathBuf,
}

impl StatusPublisher {
    #[must_use]
    pub fn new(path: std::path::PathBuf) -> Self {
        Self { path }
    }

    #[instrument(skip(self, status))]
    pub fn publish(&self, mut status: RuntimeStatus) -> Result<(), crate::atomic_write::AtomicWriteError> {
        status.updated_at = Utc::now();
        crate::atomic_write::write_json(&self.path, &status)
    }
}
