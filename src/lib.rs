//! Pixiv backup daemon — core library.
//!
//! Implements the backup engine described in `spec.md` §2: the
//! authenticated-session manager, the incremental scanner, the durable task
//! queue, the rate-limit-aware download pipeline, and the daemon scheduler
//! that sequences rounds. The binary crate (`src/main.rs`) is a thin CLI
//! shell around these components; nothing here touches `std::env::args` or
//! prints to stdout directly.
//!
//! # Modules
//! - [`config`] — Config Snapshot (C1)
//! - [`auth`] — Auth Session (C2)
//! - [`db`], [`metadata`] — Metadata Store (C3)
//! - [`queue`] — Task Queue (C4)
//! - [`scanner`] — Scanner (C5)
//! - [`download`] — Downloader (C6)
//! - [`classifier`] — Rate-Limit Classifier (C7)
//! - [`status`] — Status Publisher (C8)
//! - [`scheduler`] — Scheduler / daemon (C9)
//! - [`model`] — shared data model (§3)
//! - [`upstream`] — upstream API client (§6.4)
//! - [`atomic_write`] — durable write-to-temp-then-rename primitive (§9)

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod atomic_write;
pub mod auth;
pub mod classifier;
pub mod config;
pub mod db;
pub mod download;
pub mod metadata;
pub mod model;
pub mod queue;
pub mod scanner;
pub mod scheduler;
pub mod status;
pub mod upstream;

pub use auth::{AuthError, AuthSession};
pub use classifier::{backoff_delay, backoff_policy, classify, ObservedFailure};
pub use config::{ConfigError, ConfigSnapshot, Restrict, ScanMode};
pub use db::{DbError, Database};
pub use download::{DownloadError, DownloadOutcome, Downloader, HttpClient};
pub use metadata::{MetadataError, MetadataStore};
pub use model::{
    Author, BookmarksCursor, DownloadRecord, ErrorCategory, FollowingAuthorCursor, Illust,
    IllustType, LastError, QueueItem, QueueStatus, ScanCursorState,
};
pub use queue::{CompletionOutcome, QueueError, QueueSummary, TaskQueue};
pub use scanner::{run_scan, ScanError, ScanOutcome};
pub use scheduler::{Scheduler, StopSignal};
pub use status::{CooldownReason, DaemonState, RecentError, RuntimeStatus, StatusPublisher};
pub use upstream::{PixivApi, RawIllust, UpstreamApi, UpstreamError};
