//! Scanner (C5): walks the two listing sources and turns newly discovered
//! or retry-eligible works into Task Queue entries (§4.4).
//!
//! Grounded on the teacher's `parser` boundary for "one typed conversion
//! before anything downstream touches the data" and on `queue/mod.rs`'s
//! `enqueue`/claim-priority shape for how discovered work is handed to the
//! queue. Everything else here — cursor bookkeeping, admission control,
//! placeholder handling — is new, since the teacher never scanned a
//! paginated listing with a per-source watermark.

mod error;

pub use error::ScanError;

use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::auth::AuthSession;
use crate::config::{ConfigSnapshot, ScanMode};
use crate::metadata::MetadataStore;
use crate::model::{BookmarksCursor, FollowingAuthorCursor, QueueItem, QueueStatus, ScanCursorState};
use crate::queue::TaskQueue;
use crate::upstream::{RawIllust, UpstreamApi};

/// Recommended value from §4.4: how many consecutive previously-observed
/// works the bookmarks scan tolerates before concluding the rest of the
/// list holds nothing new.
pub const CONSECUTIVE_KNOWN_STOP: u32 = 50;

/// Aggregate result of one Scanner pass across whichever sources `mode`
/// selects, consumed by the Scheduler to decide the round's next phase and
/// cooldown reason.
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    pub enqueued: u64,
    pub placeholders_observed: u64,
    pub hit_max_downloads: bool,
    pub incremental_stopped: bool,
}

impl ScanOutcome {
    fn merge(&mut self, other: PartialOutcome) {
        self.enqueued += other.enqueued;
        self.placeholders_observed += other.placeholders_observed;
        self.incremental_stopped |= other.incremental_stopped;
    }
}

#[derive(Debug, Clone, Default)]
struct PartialOutcome {
    enqueued: u64,
    placeholders_observed: u64,
    incremental_stopped: bool,
}

/// Round-wide enqueue budget (§4.4 admission control): shared across both
/// listing sources since `max_downloads` bounds the whole round, not a
/// single source.
///
/// `baseline_pending` is the queue's pending count taken once, before this
/// round enqueues anything. Comparing against `enqueued_this_round` alone
/// (rather than re-querying the live queue, which already reflects this
/// round's own enqueues as they happen) avoids double-counting an item
/// both as "already pending" and as "enqueued this round".
struct AdmissionBudget {
    unlimited: bool,
    max_downloads: u64,
    baseline_pending: u64,
    enqueued_this_round: u64,
    exhausted: bool,
}

impl AdmissionBudget {
    fn new(config: &ConfigSnapshot, queue: &TaskQueue) -> Self {
        Self {
            unlimited: config.max_downloads_is_unlimited(),
            max_downloads: u64::from(config.max_downloads),
            baseline_pending: queue.pending_count() as u64,
            enqueued_this_round: 0,
            exhausted: false,
        }
    }

    /// Returns whether one more item may be enqueued. A caller that decides
    /// to skip an eligible item anyway (because the budget is exhausted)
    /// still continues observing further items per §4.4 — admission control
    /// gates enqueue, not observation, so `bookmark_order` stays authoritative
    /// across a full scan.
    fn try_reserve(&mut self) -> bool {
        if self.unlimited {
            return true;
        }
        if self.baseline_pending + self.enqueued_this_round >= self.max_downloads {
            self.exhausted = true;
            return false;
        }
        self.enqueued_this_round += 1;
        true
    }
}

/// Runs one scan pass over whichever sources `config.mode` selects, mutating
/// `queue` and `cursor` in place. Callers are expected to `queue.flush()`
/// and persist `cursor` afterward (§9: batch mutations into one flush).
#[instrument(skip_all)]
pub async fn run_scan(
    config: &ConfigSnapshot,
    auth: &AuthSession,
    api: &dyn UpstreamApi,
    metadata: &MetadataStore,
    queue: &mut TaskQueue,
    cursor: &mut ScanCursorState,
) -> Result<ScanOutcome, ScanError> {
    let mut budget = AdmissionBudget::new(config, queue);
    let mut outcome = ScanOutcome::default();

    if matches!(config.mode, ScanMode::Bookmarks | ScanMode::Both) {
        let partial = scan_bookmarks(config, auth, api, metadata, queue, &mut cursor.bookmarks, &mut budget).await?;
        outcome.merge(partial);
    }
    if matches!(config.mode, ScanMode::Following | ScanMode::Both) {
        let partial = scan_following(config, auth, api, metadata, queue, &mut cursor.following, &mut budget).await?;
        outcome.merge(partial);
    }

    outcome.hit_max_downloads = budget.exhausted;
    Ok(outcome)
}

#[instrument(skip_all)]
async fn scan_bookmarks(
    config: &ConfigSnapshot,
    auth: &AuthSession,
    api: &dyn UpstreamApi,
    metadata: &MetadataStore,
    queue: &mut TaskQueue,
    cursor: &mut BookmarksCursor,
    budget: &mut AdmissionBudget,
) -> Result<PartialOutcome, ScanError> {
    let full_scan = cursor.full_scan || cursor.latest_seen_illust_id.is_none();
    let mut collected: Vec<RawIllust> = Vec::new();
    let mut placeholders_observed = 0u64;
    let mut consecutive_known = 0u32;
    let mut next_url: Option<String> = None;
    let mut incremental_stopped = false;

    'paging: loop {
        let token = auth.ensure_fresh().await?;
        let page = api
            .list_bookmarks(&token, &config.user_id, config.restrict, next_url.as_deref())
            .await?;

        for raw in page.items {
            if raw.is_placeholder() {
                observe_placeholder(metadata, raw).await?;
                placeholders_observed += 1;
                continue;
            }

            let already_known = metadata.exists(raw.id).await?;
            consecutive_known = if already_known { consecutive_known + 1 } else { 0 };
            collected.push(raw);

            if !full_scan && consecutive_known >= CONSECUTIVE_KNOWN_STOP {
                incremental_stopped = true;
                break 'paging;
            }
        }

        match page.next_url {
            Some(url) if !url.is_empty() => next_url = Some(url),
            _ => break,
        }
    }

    let newest_seen = collected.first().map(|r| (r.id, r.create_date));
    let total = collected.len();
    let mut enqueued = 0u64;

    for (ordinal, raw) in collected.into_iter().enumerate() {
        let bookmark_order = Some((total - 1 - ordinal) as u64);
        let illust = raw.into_illust(true, false, bookmark_order);
        metadata.observe_illust(&illust).await?;
        let illust_id = illust.illust_id;

        if metadata.is_downloaded(illust_id).await? || queue.is_permanent_failed(illust_id) {
            continue;
        }
        if !budget.try_reserve() {
            continue;
        }

        let now = Utc::now();
        queue.enqueue(QueueItem {
            illust_id,
            status: QueueStatus::Pending,
            retry_count: 0,
            failed_rounds: 0,
            last_error: None,
            next_retry_at: None,
            enqueued_at: now,
            updated_at: now,
            is_bookmarked: true,
            is_following_author: illust.is_following_author,
            illust,
        });
        enqueued += 1;
    }

    if let Some((id, date)) = newest_seen {
        cursor.latest_seen_illust_id = Some(id);
        cursor.latest_seen_create_date = Some(date);
    }
    cursor.full_scan = false;
    cursor.incremental_stopped = incremental_stopped;

    info!(enqueued, placeholders_observed, incremental_stopped, "bookmarks scan finished");
    Ok(PartialOutcome {
        enqueued,
        placeholders_observed,
        incremental_stopped,
    })
}

#[instrument(skip_all)]
async fn scan_following(
    config: &ConfigSnapshot,
    auth: &AuthSession,
    api: &dyn UpstreamApi,
    metadata: &MetadataStore,
    queue: &mut TaskQueue,
    cursors: &mut std::collections::BTreeMap<i64, FollowingAuthorCursor>,
    budget: &mut AdmissionBudget,
) -> Result<PartialOutcome, ScanError> {
    let mut outcome = PartialOutcome::default();
    let mut authors = Vec::new();
    let mut next_url: Option<String> = None;
    loop {
        let token = auth.ensure_fresh().await?;
        let page = api
            .list_following(&token, &config.user_id, config.restrict, next_url.as_deref())
            .await?;
        authors.extend(page.items.into_iter().map(|preview| preview.user.id));
        match page.next_url {
            Some(url) if !url.is_empty() => next_url = Some(url),
            _ => break,
        }
    }

    for author_id in authors {
        let existing_cursor = cursors.get(&author_id).cloned();
        let partial = scan_one_author(config, auth, api, metadata, queue, author_id, existing_cursor.as_ref(), budget).await?;
        outcome.enqueued += partial.enqueued;
        outcome.placeholders_observed += partial.placeholders_observed;

        match partial.next_cursor {
            AuthorCursorOutcome::Advance(next) => {
                cursors.insert(author_id, next);
            }
            AuthorCursorOutcome::Discard => {
                cursors.remove(&author_id);
            }
            AuthorCursorOutcome::Unchanged => {}
        }
    }

    Ok(outcome)
}

enum AuthorCursorOutcome {
    Advance(FollowingAuthorCursor),
    Discard,
    Unchanged,
}

struct AuthorScanResult {
    enqueued: u64,
    placeholders_observed: u64,
    next_cursor: AuthorCursorOutcome,
}

#[instrument(skip_all, fields(author_id))]
async fn scan_one_author(
    config: &ConfigSnapshot,
    auth: &AuthSession,
    api: &dyn UpstreamApi,
    metadata: &MetadataStore,
    queue: &mut TaskQueue,
    author_id: i64,
    cursor: Option<&FollowingAuthorCursor>,
    budget: &mut AdmissionBudget,
) -> Result<AuthorScanResult, ScanError> {
    let mut enqueued = 0u64;
    let mut placeholders_observed = 0u64;
    let mut next_url: Option<String> = None;
    let mut anomaly_detected = false;
    let mut newest_seen: Option<(i64, chrono::DateTime<Utc>)> = None;
    let mut any_seen = false;

    'paging: loop {
        let token = auth.ensure_fresh().await?;
        let page = api.list_user_illusts(&token, author_id, next_url.as_deref()).await?;

        let mut prev: Option<(i64, chrono::DateTime<Utc>)> = None;
        for raw in page.items {
            if raw.is_placeholder() {
                observe_placeholder(metadata, raw).await?;
                placeholders_observed += 1;
                continue;
            }

            let key = (raw.id, raw.create_date);
            if let Some(prev_key) = prev
                && (key.1, key.0) > (prev_key.1, prev_key.0)
            {
                warn!(author_id, "ordering anomaly in following listing, discarding cursor");
                anomaly_detected = true;
            }
            prev = Some(key);

            if !any_seen {
                newest_seen = Some(key);
                any_seen = true;
            }

            let below_cursor = cursor.is_some_and(|c| raw.id <= c.latest_seen_illust_id && raw.create_date <= c.latest_seen_create_date);
            if below_cursor {
                break 'paging;
            }

            let illust = raw.into_illust(false, true, None);
            metadata.observe_illust(&illust).await?;
            let illust_id = illust.illust_id;

            if metadata.is_downloaded(illust_id).await? || queue.is_permanent_failed(illust_id) {
                continue;
            }
            if !budget.try_reserve() {
                continue;
            }

            let now = Utc::now();
            queue.enqueue(QueueItem {
                illust_id,
                status: QueueStatus::Pending,
                retry_count: 0,
                failed_rounds: 0,
                last_error: None,
                next_retry_at: None,
                enqueued_at: now,
                updated_at: now,
                is_bookmarked: illust.is_bookmarked,
                is_following_author: true,
                illust,
            });
            enqueued += 1;
        }

        match page.next_url {
            Some(url) if !url.is_empty() => next_url = Some(url),
            _ => break,
        }
    }

    let next_cursor = if anomaly_detected {
        AuthorCursorOutcome::Discard
    } else if let Some((id, date)) = newest_seen {
        AuthorCursorOutcome::Advance(FollowingAuthorCursor {
            latest_seen_illust_id: id,
            latest_seen_create_date: date,
            updated_at: Utc::now(),
        })
    } else {
        AuthorCursorOutcome::Unchanged
    };

    Ok(AuthorScanResult {
        enqueued,
        placeholders_observed,
        next_cursor,
    })
}

async fn observe_placeholder(metadata: &MetadataStore, raw: RawIllust) -> Result<(), ScanError> {
    let illust = raw.into_illust(false, false, None);
    let illust_id = illust.illust_id;
    metadata.observe_illust(&illust).await?;
    metadata.mark_limited(illust_id).await?;
    Ok(())
}
