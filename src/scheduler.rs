//! Scheduler (C9): the daemon's round loop — scan, drain the queue one item
//! at a time, publish status, then wait (§4.9).
//!
//! The teacher never ran as a long-lived process, so there is nothing in it
//! to generalize here; this is grounded instead on the pack's idiomatic
//! shape for a cancellable polling loop — `tokio::select!` racing a `sleep`
//! against a shutdown notification, the same structure a Pixiv-adjacent
//! notifier in the example pack uses for its own "wake up, do a round, wait"
//! cycle. Stop requests go through [`StopSignal`] rather than a bare
//! `Notify`, since wiring a `ctrlc` handler to it belongs to whatever embeds
//! this loop (the binary's signal handler, a test harness), not to the
//! scheduler itself.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration as StdDuration;

use chrono::Utc;
use rand::Rng;
use tokio::sync::Notify;
use tokio::time::sleep;
use tracing::{info, instrument, warn};

use crate::auth::AuthSession;
use crate::classifier;
use crate::config::ConfigSnapshot;
use crate::download::{DownloadError, Downloader};
use crate::metadata::MetadataStore;
use crate::model::{ErrorCategory, LastError, ScanCursorState};
use crate::queue::{CompletionOutcome, TaskQueue};
use crate::scanner::{self, ScanOutcome};
use crate::status::{CooldownReason, DaemonState, RecentError, RuntimeStatus, StatusPublisher};
use crate::upstream::UpstreamApi;

/// Hard cap on a single round's wall-clock time (§4.9): a round that somehow
/// never drains the queue is abandoned rather than run forever.
const ROUND_HARD_CAP: StdDuration = StdDuration::from_secs(6 * 60 * 60);

/// How often the wait phase re-checks the force-trigger sentinel and the
/// cooperative-cancellation signal, regardless of how long the configured
/// wait interval is (§4.9: "every sleep interruptible within one second").
const POLL_INTERVAL: StdDuration = StdDuration::from_secs(1);

/// Cooperative stop request (§4.9). A bare [`tokio::sync::Notify`] only
/// wakes waiters that are already awaiting it when `notify_waiters` is
/// called, which would lose a stop request raised while the scheduler is
/// mid-download rather than mid-sleep; the flag makes the request durable
/// so every check — whether already asleep or about to sleep — observes it.
#[derive(Debug, Default)]
pub struct StopSignal {
    requested: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Sleeps for `dur` unless a stop is already pending or arrives while
    /// waiting. Returns `true` if the sleep was cut short by a stop.
    async fn sleep_or_stop(&self, dur: StdDuration) -> bool {
        if self.is_stopped() {
            return true;
        }
        tokio::select! {
            () = sleep(dur) => false,
            () = self.notify.notified() => true,
        }
    }
}

/// Everything one scheduler round needs, borrowed for the round's duration.
/// A single `Scheduler` owns the queue and cursor documents — the only
/// writer either document has (§5).
pub struct Scheduler {
    config: ConfigSnapshot,
    auth: AuthSession,
    api: Box<dyn UpstreamApi>,
    metadata: MetadataStore,
    downloader: Downloader,
    status: StatusPublisher,
    queue: TaskQueue,
    cursor: ScanCursorState,
    stop: Arc<StopSignal>,
    recent_errors: Vec<RecentError>,
}

/// Why a round ended without running out the clock (§4.9's three cooldown
/// branches, plus the "ran to completion" case).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoundOutcome {
    Drained,
    RateLimited,
    AuthFailed,
    HitMaxDownloads,
}

impl Scheduler {
    #[must_use]
    pub fn new(
        config: ConfigSnapshot,
        auth: AuthSession,
        api: Box<dyn UpstreamApi>,
        metadata: MetadataStore,
        downloader: Downloader,
        queue: TaskQueue,
        cursor: ScanCursorState,
        stop: Arc<StopSignal>,
    ) -> Self {
        let status = StatusPublisher::new(config.status_path());
        Self {
            config,
            auth,
            api,
            metadata,
            downloader,
            status,
            queue,
            cursor,
            stop,
            recent_errors: Vec::new(),
        }
    }

    /// Runs rounds until `stop` is notified. Never returns `Err` for a
    /// within-round failure — those are folded into the next round's
    /// cooldown — only for a failure to persist state, which would leave
    /// the on-disk documents in an unknown state and should abort the
    /// process (§7).
    #[instrument(skip(self))]
    pub async fn run(&mut self) -> anyhow::Result<()> {
        loop {
            self.consume_force_run_flag()?;
            let outcome = self.run_round().await?;
            let wait = self.wait_interval(outcome);
            info!(?outcome, wait_secs = wait.as_secs(), "round finished");
            if self.wait_or_stop(wait).await {
                self.status.publish(RuntimeStatus {
                    state: DaemonState::Stopped,
                    ..RuntimeStatus::idle()
                })?;
                return Ok(());
            }
        }
    }

    /// One scan → drain → publish cycle, bounded by [`ROUND_HARD_CAP`].
    #[instrument(skip(self))]
    async fn run_round(&mut self) -> anyhow::Result<RoundOutcome> {
        let deadline = tokio::time::Instant::now() + ROUND_HARD_CAP;

        self.publish_phase("scanning", None);
        let scan = match self.run_scan_phase().await {
            Ok(scan) => scan,
            Err(category) => return Ok(self.enter_cooldown_after_scan_failure(category)),
        };
        self.queue.flush()?;
        crate::atomic_write::write_json(&self.config.cursor_path(), &self.cursor)?;

        self.publish_phase("draining", Some(&scan));
        let outcome = self.drain_queue(deadline, &scan).await?;
        self.queue.flush()?;

        self.publish_phase("publishing", Some(&scan));
        self.publish_round_result(outcome, &scan)?;

        Ok(outcome)
    }

    async fn run_scan_phase(&mut self) -> Result<ScanOutcome, ErrorCategory> {
        match scanner::run_scan(
            &self.config,
            &self.auth,
            self.api.as_ref(),
            &self.metadata,
            &mut self.queue,
            &mut self.cursor,
        )
        .await
        {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                warn!(error = %err, "scan failed");
                Err(err.category())
            }
        }
    }

    fn enter_cooldown_after_scan_failure(&self, category: ErrorCategory) -> RoundOutcome {
        match category {
            ErrorCategory::RateLimit => RoundOutcome::RateLimited,
            ErrorCategory::Auth => RoundOutcome::AuthFailed,
            _ => RoundOutcome::Drained,
        }
    }

    /// Claims and downloads items one at a time, applying the two-tier
    /// pacing from §4.3: the first `high_speed_queue_size` claims in a round
    /// proceed back to back, then every claim after that waits
    /// `low_speed_interval_seconds` plus jitter before the next one starts.
    /// Stops early on a rate-limit or auth failure, on exhausting the round
    /// deadline, or on a stop request — in every case the in-flight download
    /// is allowed to finish before returning (§4.9 graceful stop).
    #[instrument(skip(self, scan))]
    async fn drain_queue(
        &mut self,
        deadline: tokio::time::Instant,
        scan: &ScanOutcome,
    ) -> anyhow::Result<RoundOutcome> {
        let mut claimed_this_round: u32 = 0;

        loop {
            if tokio::time::Instant::now() >= deadline {
                warn!("round hard cap reached, ending round with items still pending");
                return Ok(RoundOutcome::Drained);
            }
            if self.stop.is_stopped() {
                return Ok(RoundOutcome::Drained);
            }

            let Some(item) = self.queue.claim_next(Utc::now()) else {
                return Ok(RoundOutcome::Drained);
            };

            let illust_id = item.illust_id;
            let result = self.downloader.download_item(&self.config, &item).await;
            let now = Utc::now();
            match result {
                Ok(outcome) => {
                    self.metadata.mark_downloaded(illust_id, &outcome.records).await?;
                    self.queue.complete(illust_id, CompletionOutcome::Success, now)?;
                }
                Err(err) => {
                    let category = classifier::classify(&err.as_observed_failure());
                    let last_error = LastError {
                        category,
                        http_status: err.http_status(),
                        message: err.to_string(),
                    };
                    warn!(illust_id, error = %err, ?category, "download failed");
                    self.record_failure(&err, illust_id, category);
                    self.queue.complete(
                        illust_id,
                        CompletionOutcome::Failure { category, last_error },
                        now,
                    )?;
                    if matches!(category, ErrorCategory::RateLimit) {
                        return Ok(RoundOutcome::RateLimited);
                    }
                    if matches!(category, ErrorCategory::Auth) {
                        return Ok(RoundOutcome::AuthFailed);
                    }
                }
            }

            claimed_this_round += 1;
            if scan.hit_max_downloads && self.queue.pending_count() == 0 {
                return Ok(RoundOutcome::HitMaxDownloads);
            }
            if self.queue.pending_count() == 0 {
                return Ok(RoundOutcome::Drained);
            }
            self.pace(claimed_this_round).await;
        }
    }

    /// Sleeps the remainder of the two-tier pacing interval, interruptible
    /// by a stop request (§4.9).
    async fn pace(&self, claimed_this_round: u32) {
        if claimed_this_round <= self.config.high_speed_queue_size {
            return;
        }
        let jitter_ms = if self.config.interval_jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.config.interval_jitter_ms)
        };
        let wait = StdDuration::from_secs(self.config.low_speed_interval_seconds)
            + StdDuration::from_millis(jitter_ms);
        self.stop.sleep_or_stop(wait).await;
    }

    /// Appends to the in-memory recent-errors ring published with the next
    /// status snapshot (§4.7's "recent errors" list, capped at 10 entries).
    fn record_failure(&mut self, err: &DownloadError, illust_id: i64, category: ErrorCategory) {
        self.recent_errors.insert(
            0,
            RecentError {
                time: Utc::now(),
                illust_id: Some(illust_id),
                action: "download".into(),
                url: None,
                category,
                message: err.to_string(),
            },
        );
        self.recent_errors.truncate(10);
    }

    fn publish_round_result(&mut self, outcome: RoundOutcome, scan: &ScanOutcome) -> anyhow::Result<()> {
        let summary = self.queue.summary();
        let status = RuntimeStatus {
            state: if outcome == RoundOutcome::Drained {
                DaemonState::Idle
            } else {
                DaemonState::Cooldown
            },
            phase: Some("publishing".into()),
            message: None,
            processed_total: Some(summary.done + summary.failed + summary.permanent_failed),
            success: Some(summary.done),
            skipped: Some(scan.placeholders_observed),
            failed: Some(summary.failed + summary.permanent_failed),
            hit_max_downloads: Some(scan.hit_max_downloads),
            rate_limited: Some(outcome == RoundOutcome::RateLimited),
            last_error: self.recent_errors.first().cloned(),
            recent_errors: self.recent_errors.clone(),
            queue_summary: Some(summary),
            cooldown_reason: cooldown_reason(outcome),
            next_run_at: None,
            cooldown_seconds: None,
            updated_at: Utc::now(),
        };
        self.status.publish(status)?;
        Ok(())
    }

    fn publish_phase(&self, phase: &str, scan: Option<&ScanOutcome>) {
        let summary = self.queue.summary();
        let status = RuntimeStatus {
            state: DaemonState::Syncing,
            phase: Some(phase.into()),
            queue_summary: Some(summary),
            hit_max_downloads: scan.map(|s| s.hit_max_downloads),
            ..RuntimeStatus::idle()
        };
        if let Err(err) = self.status.publish(status) {
            warn!(error = %err, "failed to publish phase status");
        }
    }

    /// Picks the next wait interval per §4.9: a rate-limit or auth cooldown
    /// outranks a max-downloads cooldown, which outranks the ordinary sync
    /// interval.
    fn wait_interval(&self, outcome: RoundOutcome) -> StdDuration {
        let minutes = match outcome {
            RoundOutcome::RateLimited | RoundOutcome::AuthFailed => self.config.cooldown_after_error_minutes,
            RoundOutcome::HitMaxDownloads => self.config.cooldown_after_limit_minutes,
            RoundOutcome::Drained => self.config.sync_interval_minutes,
        };
        StdDuration::from_secs(minutes * 60)
    }

    /// Waits up to `wait`, polling the force-trigger sentinel and the stop
    /// signal every [`POLL_INTERVAL`]. Returns `true` if a stop was
    /// requested, in which case the caller must not start another round.
    async fn wait_or_stop(&mut self, wait: StdDuration) -> bool {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if self.stop.is_stopped() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            if self.force_run_requested() {
                self.consume_force_run_flag().ok();
                return false;
            }
            let step = POLL_INTERVAL.min(deadline.saturating_duration_since(tokio::time::Instant::now()));
            if self.stop.sleep_or_stop(step).await {
                return true;
            }
        }
    }

    fn force_run_requested(&self) -> bool {
        self.config.force_run_flag_path().exists()
    }

    /// Deletes the force-trigger sentinel before the caller re-evaluates
    /// whether to run, so a sentinel dropped mid-round is never acted on
    /// twice and a stale one left over from a previous crash is never acted
    /// on at startup without a fresh re-evaluation (§4.9, §6.3 `trigger`).
    fn consume_force_run_flag(&self) -> anyhow::Result<()> {
        let path = self.config.force_run_flag_path();
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }
}

fn cooldown_reason(outcome: RoundOutcome) -> Option<CooldownReason> {
    match outcome {
        RoundOutcome::RateLimited => Some(CooldownReason::RateLimit),
        RoundOutcome::AuthFailed => Some(CooldownReason::Error),
        RoundOutcome::HitMaxDownloads => Some(CooldownReason::Limit),
        RoundOutcome::Drained => None,
    }
}
