//! Task Queue (C4): a durable, process-wide, single-writer queue persisted
//! as a single JSON document (`task_queue.json`), per §4.3 and the "durable
//! queue in a single JSON file" design note (§9).
//!
//! Grounded on the teacher's `queue/mod.rs::dequeue` — "atomically pick the
//! highest-priority oldest item and mark it running in the same step" — but
//! the SQL `UPDATE ... RETURNING` is replaced with an in-memory scan plus a
//! whole-document rewrite through [`crate::atomic_write`], since there is no
//! longer a database transaction to lean on. Callers are expected to batch
//! several mutations and call [`TaskQueue::flush`] once per scheduler step
//! (§9 design note), rather than flushing after every single mutation.

mod error;

pub use error::QueueError;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::classifier::{self, INVALID_FAILED_ROUNDS_LIMIT};
use crate::model::{ErrorCategory, LastError, QueueItem, QueueStatus};

pub type Result<T> = std::result::Result<T, QueueError>;

/// Outcome fed into [`TaskQueue::complete`] by the scheduler once the
/// Downloader has finished with a claimed item.
#[derive(Debug, Clone)]
pub enum CompletionOutcome {
    Success,
    Failure {
        category: ErrorCategory,
        last_error: LastError,
    },
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueDocument {
    #[serde(default)]
    items: Vec<QueueItem>,
}

/// Aggregate counts used by the Status Publisher (C8) and the scheduler's
/// admission control (§4.4).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct QueueSummary {
    pub pending: u64,
    pub running: u64,
    pub done: u64,
    pub failed: u64,
    pub permanent_failed: u64,
}

/// In-memory queue document plus the path it is persisted to. The scheduler
/// owns the only live instance (§5: "the queue file... [has] a single
/// writer: the scheduler's own thread of control").
#[derive(Debug)]
pub struct TaskQueue {
    path: PathBuf,
    items: Vec<QueueItem>,
    dirty: bool,
}

impl TaskQueue {
    /// Loads `task_queue.json`, or starts empty if it does not exist yet.
    /// Any item found `running` is reset to `pending` — a restart after a
    /// crash must never leave an item stuck in `running` (§8 scenario 6,
    /// the teacher's `reset_in_progress` at startup).
    #[instrument(skip(path), fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Self> {
        let doc: QueueDocument = crate::atomic_write::read_json(path)?.unwrap_or_default();
        let mut items = doc.items;
        let mut dirty = false;
        for item in &mut items {
            if item.status == QueueStatus::Running {
                item.status = QueueStatus::Pending;
                dirty = true;
            }
        }
        Ok(Self {
            path: path.to_path_buf(),
            items,
            dirty,
        })
    }

    /// Writes the in-memory document to disk if anything changed since the
    /// last flush (invariant 6: write-to-temp + rename).
    pub fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        crate::atomic_write::write_json(&self.path, &QueueDocument {
            items: self.items.clone(),
        })?;
        self.dirty = false;
        Ok(())
    }

    /// Inserts `candidate` if its `illust_id` is absent. If present and not
    /// `running`, merges provenance flags and the embedded illust snapshot,
    /// and resets a `failed`/`done` item back to `pending` (§4.3
    /// `enqueue`). A `running` item is never touched.
    pub fn enqueue(&mut self, candidate: QueueItem) {
        if let Some(existing) = self.items.iter_mut().find(|it| it.illust_id == candidate.illust_id) {
            if existing.status == QueueStatus::Running {
                return;
            }
            existing.is_bookmarked |= candidate.is_bookmarked;
            existing.is_following_author |= candidate.is_following_author;
            existing.illust = candidate.illust;
            existing.updated_at = candidate.updated_at;
            if matches!(existing.status, QueueStatus::Failed | QueueStatus::Done) {
                existing.status = QueueStatus::Pending;
            }
        } else {
            self.items.push(candidate);
        }
        self.dirty = true;
    }

    /// Returns whether `illust_id` already has a non-terminal (i.e. not
    /// `permanent_failed`) queue entry — used by the Scanner to decide
    /// whether a work is still eligible for (re-)enqueue.
    #[must_use]
    pub fn has_non_terminal_item(&self, illust_id: i64) -> bool {
        self.items
            .iter()
            .any(|it| it.illust_id == illust_id && it.status != QueueStatus::PermanentFailed)
    }

    /// Used by the Scanner to honor invariant 4 — a `permanent_failed`
    /// work is never automatically re-enqueued.
    #[must_use]
    pub fn is_permanent_failed(&self, illust_id: i64) -> bool {
        self.items
            .iter()
            .any(|it| it.illust_id == illust_id && it.status == QueueStatus::PermanentFailed)
    }

    /// Claims the oldest eligible item: pending, or failed with
    /// `next_retry_at <= now`. Ties broken by bookmark-provenance first,
    /// then FIFO by `enqueued_at` (§4.3, §5 ordering guarantees).
    pub fn claim_next(&mut self, now: DateTime<Utc>) -> Option<QueueItem> {
        let idx = self
            .items
            .iter()
            .enumerate()
            .filter(|(_, it)| is_claimable(it, now))
            .min_by(|(_, a), (_, b)| claim_priority(a).cmp(&claim_priority(b)))
            .map(|(idx, _)| idx)?;

        let item = &mut self.items[idx];
        item.status = QueueStatus::Running;
        item.updated_at = now;
        self.dirty = true;
        Some(item.clone())
    }

    /// Applies the outcome of a download attempt (§4.3 `complete`).
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ItemNotFound`] if no item with `illust_id`
    /// exists — callers only ever call this with an id they just claimed,
    /// so this should be unreachable in practice.
    pub fn complete(
        &mut self,
        illust_id: i64,
        outcome: CompletionOutcome,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let item = self
            .items
            .iter_mut()
            .find(|it| it.illust_id == illust_id)
            .ok_or(QueueError::ItemNotFound(illust_id))?;

        match outcome {
            CompletionOutcome::Success => {
                item.status = QueueStatus::Done;
                item.last_error = None;
                item.failed_rounds = 0;
                item.updated_at = now;
            }
            CompletionOutcome::Failure { category, last_error } => {
                item.last_error = Some(last_error);
                item.updated_at = now;
                if category == ErrorCategory::Invalid {
                    item.failed_rounds += 1;
                    if item.failed_rounds >= INVALID_FAILED_ROUNDS_LIMIT {
                        item.status = QueueStatus::PermanentFailed;
                        item.next_retry_at = None;
                    } else {
                        item.status = QueueStatus::Failed;
                        item.next_retry_at = Some(now);
                    }
                } else {
                    item.retry_count += 1;
                    if classifier::exceeds_retry_budget(item.retry_count, category) {
                        item.status = QueueStatus::PermanentFailed;
                        item.next_retry_at = None;
                    } else {
                        item.status = QueueStatus::Failed;
                        let delay = classifier::backoff_delay(item.retry_count - 1, category);
                        item.next_retry_at = Some(now + delay);
                    }
                }
            }
        }
        self.dirty = true;
        Ok(())
    }

    /// Removes `done` items whose `updated_at` is older than `max_age_days`
    /// (§3 lifecycle: "`done` items may be purged after N days").
    pub fn purge_done_older_than(&mut self, now: DateTime<Utc>, max_age_days: i64) -> u64 {
        let cutoff = now - chrono::Duration::days(max_age_days);
        let before = self.items.len();
        self.items
            .retain(|it| !(it.status == QueueStatus::Done && it.updated_at < cutoff));
        let removed = (before - self.items.len()) as u64;
        if removed > 0 {
            self.dirty = true;
        }
        removed
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.items.iter().filter(|it| it.status == QueueStatus::Pending).count()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn summary(&self) -> QueueSummary {
        let mut summary = QueueSummary::default();
        for item in &self.items {
            match item.status {
                QueueStatus::Pending => summary.pending += 1,
                QueueStatus::Running => summary.running += 1,
                QueueStatus::Done => summary.done += 1,
                QueueStatus::Failed => summary.failed += 1,
                QueueStatus::PermanentFailed => summary.permanent_failed += 1,
            }
        }
        summary
    }
}

fn is_claimable(item: &QueueItem, now: DateTime<Utc>) -> bool {
    match item.status {
        QueueStatus::Pending => true,
        QueueStatus::Failed => item.next_retry_at.is_some_and(|at| at <= now),
        QueueStatus::Running | QueueStatus::Done | QueueStatus::PermanentFailed => false,
    }
}

/// `0` sorts before `1` so bookmark-provenance items win ties, then earlier
/// `enqueued_at` wins (§4.3, §5).
fn claim_priority(item: &QueueItem) -> (u8, DateTime<Utc>) {
    let provenance_rank = u8::from(!item.is_bookmark_provenance());
    (provenance_rank, item.enqueued_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Author, Illust, IllustType};
    use std::collections::BTreeMap;

    fn item(id: i64, bookmarked: bool, enqueued_at: DateTime<Utc>) -> QueueItem {
        QueueItem {
            illust_id: id,
            status: QueueStatus::Pending,
            retry_count: 0,
            failed_rounds: 0,
            last_error: None,
            next_retry_at: None,
            enqueued_at,
            updated_at: enqueued_at,
            is_bookmarked: bookmarked,
            is_following_author: !bookmarked,
            illust: Illust {
                illust_id: id,
                title: "t".into(),
                caption: String::new(),
                user: Author {
                    user_id: 1,
                    name: "a".into(),
                    account: "a".into(),
                    profile_image_url: "https://example.invalid/a.png".into(),
                },
                create_date: enqueued_at,
                page_count: 1,
                width: 1,
                height: 1,
                bookmark_count: 0,
                view_count: 0,
                sanity_level: 2,
                x_restrict: 0,
                illust_type: IllustType::Illust,
                tags: vec![],
                image_urls: BTreeMap::new(),
                tools: vec![],
                download_time: None,
                original_url: "https://www.pixiv.net/artworks/1".into(),
                is_bookmarked: bookmarked,
                is_following_author: !bookmarked,
                bookmark_order: None,
                is_access_limited: false,
                page_urls: vec![],
                ugoira_zip_url: None,
            },
        }
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("task_queue.json");
        let now = Utc::now();
        let mut queue = TaskQueue::load(&path).unwrap();
        queue.enqueue(item(1, true, now));
        queue.flush().unwrap();

        let reloaded = TaskQueue::load(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
    }

    #[test]
    fn restart_resets_running_items_to_pending() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("task_queue.json");
        let now = Utc::now();
        let mut queue = TaskQueue::load(&path).unwrap();
        queue.enqueue(item(1, true, now));
        let claimed = queue.claim_next(now).unwrap();
        assert_eq!(claimed.status, QueueStatus::Running);
        queue.flush().unwrap();

        let reloaded = TaskQueue::load(&path).unwrap();
        assert_eq!(reloaded.summary().pending, 1);
        assert_eq!(reloaded.summary().running, 0);
    }

    #[test]
    fn claim_next_prefers_bookmark_provenance_on_tie() {
        let now = Utc::now();
        let mut queue = TaskQueue::load(&std::env::temp_dir().join("unused.json")).unwrap();
        queue.enqueue(item(1, false, now));
        queue.enqueue(item(2, true, now));
        let claimed = queue.claim_next(now).unwrap();
        assert_eq!(claimed.illust_id, 2);
    }

    #[test]
    fn claim_next_is_fifo_within_the_same_provenance() {
        let now = Utc::now();
        let mut queue = TaskQueue::load(&std::env::temp_dir().join("unused2.json")).unwrap();
        queue.enqueue(item(1, true, now));
        queue.enqueue(item(2, true, now + chrono::Duration::seconds(1)));
        let claimed = queue.claim_next(now).unwrap();
        assert_eq!(claimed.illust_id, 1);
    }

    #[test]
    fn enqueue_never_overwrites_a_running_item() {
        let now = Utc::now();
        let mut queue = TaskQueue::load(&std::env::temp_dir().join("unused3.json")).unwrap();
        queue.enqueue(item(1, true, now));
        let _ = queue.claim_next(now);
        queue.enqueue(item(1, true, now + chrono::Duration::seconds(5)));
        assert_eq!(queue.summary().running, 1);
    }

    #[test]
    fn rate_limit_failure_schedules_backoff_and_keeps_item_failed() {
        let now = Utc::now();
        let mut queue = TaskQueue::load(&std::env::temp_dir().join("unused4.json")).unwrap();
        queue.enqueue(item(1, true, now));
        let claimed = queue.claim_next(now).unwrap();
        queue
            .complete(
                claimed.illust_id,
                CompletionOutcome::Failure {
                    category: ErrorCategory::RateLimit,
                    last_error: LastError {
                        category: ErrorCategory::RateLimit,
                        http_status: Some(429),
                        message: "rate limited".into(),
                    },
                },
                now,
            )
            .unwrap();
        let failed = queue.items.iter().find(|it| it.illust_id == 1).unwrap();
        assert_eq!(failed.status, QueueStatus::Failed);
        assert_eq!(failed.retry_count, 1);
        assert!(failed.next_retry_at.unwrap() >= now + chrono::Duration::seconds(300));
    }

    #[test]
    fn invalid_failure_becomes_permanent_after_three_consecutive_failed_rounds() {
        let now = Utc::now();
        let mut queue = TaskQueue::load(&std::env::temp_dir().join("unused5.json")).unwrap();
        queue.enqueue(item(1, true, now));
        for _ in 0..3 {
            let claimed = queue.claim_next(now).unwrap();
            queue
                .complete(
                    claimed.illust_id,
                    CompletionOutcome::Failure {
                        category: ErrorCategory::Invalid,
                        last_error: LastError {
                            category: ErrorCategory::Invalid,
                            http_status: Some(404),
                            message: "not found".into(),
                        },
                    },
                    now,
                )
                .unwrap();
        }
        assert_eq!(queue.summary().permanent_failed, 1);
    }

    #[test]
    fn exceeding_max_retries_becomes_permanent_failed() {
        let now = Utc::now();
        let mut queue = TaskQueue::load(&std::env::temp_dir().join("unused6.json")).unwrap();
        queue.enqueue(item(1, true, now));
        for _ in 0..=classifier::backoff_policy(ErrorCategory::Network).max_retries {
            let claimed = queue.claim_next(now + chrono::Duration::hours(1000)).unwrap();
            queue
                .complete(
                    claimed.illust_id,
                    CompletionOutcome::Failure {
                        category: ErrorCategory::Network,
                        last_error: LastError {
                            category: ErrorCategory::Network,
                            http_status: None,
                            message: "connection refused".into(),
                        },
                    },
                    now,
                )
                .unwrap();
        }
        assert_eq!(queue.summary().permanent_failed, 1);
    }

    #[test]
    fn purge_done_older_than_removes_stale_completed_items() {
        let now = Utc::now();
        let mut queue = TaskQueue::load(&std::env::temp_dir().join("unused7.json")).unwrap();
        queue.enqueue(item(1, true, now - chrono::Duration::days(10)));
        queue
            .complete(1, CompletionOutcome::Success, now - chrono::Duration::days(10))
            .unwrap();
        let removed = queue.purge_done_older_than(now, 7);
        assert_eq!(removed, 1);
        assert!(queue.is_empty());
    }
}
