//! Metadata Store (C3): durable record of works and per-file download
//! outcomes, backed by the embedded relational store `db.rs` wraps (§4.2).
//!
//! This wraps a [`Database`] the same way `queue::Queue` wrapped it in the
//! teacher: a thin struct holding a pool handle, methods that bind and run
//! SQL, and a typed error. The upsert in [`MetadataStore::observe_illust`]
//! is the one place invariant 1 ("upsert never regresses `downloaded=true`
//! to false") is enforced.

use chrono::Utc;
use sqlx::Row;
use thiserror::Error;
use tracing::instrument;

use crate::db::Database;
use crate::model::{DownloadRecord, Illust, IllustType};

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("failed to encode field as JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MetadataError>;

/// Query surface the rest of the core needs from the Metadata Store (§4.2).
#[derive(Debug, Clone)]
pub struct MetadataStore {
    db: Database,
}

impl MetadataStore {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Upserts a work observed by the Scanner. Preserves `downloaded=true`
    /// under re-observation (invariant 1) and never touches
    /// `is_access_limited` here — that flag is only ever set by
    /// [`Self::mark_limited`].
    #[instrument(skip(self, illust), fields(illust_id = illust.illust_id))]
    pub async fn observe_illust(&self, illust: &Illust) -> Result<()> {
        sqlx::query(
            r"INSERT INTO users (user_id, name, account, profile_image_url)
              VALUES (?, ?, ?, ?)
              ON CONFLICT(user_id) DO UPDATE SET
                name = excluded.name,
                account = excluded.account,
                profile_image_url = excluded.profile_image_url",
        )
        .bind(illust.user.user_id)
        .bind(&illust.user.name)
        .bind(&illust.user.account)
        .bind(&illust.user.profile_image_url)
        .execute(self.db.pool())
        .await?;

        let tags = serde_json::to_string(&illust.tags)?;
        let image_urls = serde_json::to_string(&illust.image_urls)?;
        let tools = serde_json::to_string(&illust.tools)?;
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r"INSERT INTO illusts (
                illust_id, user_id, title, caption, create_date, page_count,
                width, height, bookmark_count, view_count, sanity_level,
                x_restrict, illust_type, tags, image_urls, tools,
                original_url, is_bookmarked, is_following_author, downloaded,
                bookmark_order, updated_at
              )
              VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
              ON CONFLICT(illust_id) DO UPDATE SET
                title = excluded.title,
                caption = excluded.caption,
                page_count = excluded.page_count,
                width = excluded.width,
                height = excluded.height,
                bookmark_count = excluded.bookmark_count,
                view_count = excluded.view_count,
                sanity_level = excluded.sanity_level,
                x_restrict = excluded.x_restrict,
                tags = excluded.tags,
                image_urls = excluded.image_urls,
                tools = excluded.tools,
                is_bookmarked = illusts.is_bookmarked OR excluded.is_bookmarked,
                is_following_author = illusts.is_following_author OR excluded.is_following_author,
                bookmark_order = COALESCE(excluded.bookmark_order, illusts.bookmark_order),
                updated_at = excluded.updated_at",
        )
        .bind(illust.illust_id)
        .bind(illust.user.user_id)
        .bind(&illust.title)
        .bind(&illust.caption)
        .bind(illust.create_date.to_rfc3339())
        .bind(i64::from(illust.page_count))
        .bind(i64::from(illust.width))
        .bind(i64::from(illust.height))
        .bind(i64::try_from(illust.bookmark_count).unwrap_or(i64::MAX))
        .bind(i64::try_from(illust.view_count).unwrap_or(i64::MAX))
        .bind(i64::from(illust.sanity_level))
        .bind(i64::from(illust.x_restrict))
        .bind(illust_type_str(illust.illust_type))
        .bind(tags)
        .bind(image_urls)
        .bind(tools)
        .bind(&illust.original_url)
        .bind(illust.is_bookmarked)
        .bind(illust.is_following_author)
        .bind(illust.bookmark_order.map(|v| i64::try_from(v).unwrap_or(i64::MAX)))
        .bind(now)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    /// Invariant 2: a file on disk implies `downloaded=true` and a
    /// `DownloadRecord`. Called only after every artifact for a work has
    /// been fetched successfully.
    #[instrument(skip(self, records), fields(illust_id))]
    pub async fn mark_downloaded(&self, illust_id: i64, records: &[DownloadRecord]) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let total_bytes: i64 = records
            .iter()
            .map(|r| i64::try_from(r.byte_size).unwrap_or(i64::MAX))
            .sum();

        sqlx::query(
            r"UPDATE illusts SET downloaded = 1, download_time = ?, file_size = ?
              WHERE illust_id = ?",
        )
        .bind(&now)
        .bind(total_bytes)
        .bind(illust_id)
        .execute(self.db.pool())
        .await?;

        for record in records {
            sqlx::query(
                r"INSERT INTO download_history (illust_id, path, byte_size, content_hash, timestamp, success)
                  VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(illust_id)
            .bind(&record.path)
            .bind(i64::try_from(record.byte_size).unwrap_or(i64::MAX))
            .bind(&record.content_hash)
            .bind(record.timestamp.to_rfc3339())
            .bind(record.success)
            .execute(self.db.pool())
            .await?;
        }

        Ok(())
    }

    /// Marks a work as an upstream placeholder (§4.4 "Placeholder
    /// detection"). The illust row must already exist via
    /// [`Self::observe_illust`]; this never enqueues a download.
    #[instrument(skip(self))]
    pub async fn mark_limited(&self, illust_id: i64) -> Result<()> {
        sqlx::query(r"UPDATE illusts SET is_access_limited = 1 WHERE illust_id = ?")
            .bind(illust_id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// Whether `illust_id` has ever been observed by the Scanner, downloaded
    /// or not. Used for the bookmarks scan's "consecutive already-known"
    /// early-stop counter (§4.4) — unlike [`Self::is_downloaded`], this stays
    /// true for a work that is merely queued or permanently failed.
    #[instrument(skip(self))]
    pub async fn exists(&self, illust_id: i64) -> Result<bool> {
        let row = sqlx::query(r"SELECT 1 AS present FROM illusts WHERE illust_id = ?")
            .bind(illust_id)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(row.is_some())
    }

    #[instrument(skip(self))]
    pub async fn is_downloaded(&self, illust_id: i64) -> Result<bool> {
        let row = sqlx::query(r"SELECT downloaded FROM illusts WHERE illust_id = ?")
            .bind(illust_id)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(row.is_some_and(|row| row.get::<i64, _>("downloaded") != 0))
    }

    #[instrument(skip(self))]
    pub async fn is_access_limited(&self, illust_id: i64) -> Result<bool> {
        let row = sqlx::query(r"SELECT is_access_limited FROM illusts WHERE illust_id = ?")
            .bind(illust_id)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(row.is_some_and(|row| row.get::<i64, _>("is_access_limited") != 0))
    }

    #[instrument(skip(self))]
    pub async fn count_total(&self) -> Result<i64> {
        let row = sqlx::query(r"SELECT COUNT(*) AS count FROM illusts")
            .fetch_one(self.db.pool())
            .await?;
        Ok(row.get("count"))
    }
}

fn illust_type_str(t: IllustType) -> &'static str {
    match t {
        IllustType::Illust => "illust",
        IllustType::Manga => "manga",
        IllustType::Ugoira => "ugoira",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Author;
    use std::collections::BTreeMap;

    fn sample(id: i64) -> Illust {
        Illust {
            illust_id: id,
            title: "t".into(),
            caption: String::new(),
            user: Author {
                user_id: 1,
                name: "a".into(),
                account: "a".into(),
                profile_image_url: "https://example.invalid/a.png".into(),
            },
            create_date: Utc::now(),
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
            is_bookmarked: true,
            is_following_author: false,
            bookmark_order: Some(3),
            is_access_limited: false,
            page_urls: vec![],
            ugoira_zip_url: None,
        }
    }

    #[tokio::test]
    async fn observe_then_mark_downloaded_sets_flag() {
        let db = Database::new_in_memory().await.unwrap();
        let store = MetadataStore::new(db);
        store.observe_illust(&sample(1)).await.unwrap();
        assert!(!store.is_downloaded(1).await.unwrap());

        let record = DownloadRecord {
            path: "img/1/1.png".into(),
            byte_size: 100,
            content_hash: None,
            timestamp: Utc::now(),
            success: true,
        };
        store.mark_downloaded(1, std::slice::from_ref(&record)).await.unwrap();
        assert!(store.is_downloaded(1).await.unwrap());
    }

    #[tokio::test]
    async fn reobserving_a_downloaded_work_never_regresses_the_flag() {
        let db = Database::new_in_memory().await.unwrap();
        let store = MetadataStore::new(db);
        store.observe_illust(&sample(2)).await.unwrap();
        store
            .mark_downloaded(
                2,
                &[DownloadRecord {
                    path: "img/2/2.png".into(),
                    byte_size: 10,
                    content_hash: None,
                    timestamp: Utc::now(),
                    success: true,
                }],
            )
            .await
            .unwrap();
        assert!(store.is_downloaded(2).await.unwrap());

        // Scanner re-observes the same work in a later incremental round.
        store.observe_illust(&sample(2)).await.unwrap();
        assert!(store.is_downloaded(2).await.unwrap());
    }

    #[tokio::test]
    async fn mark_limited_sets_access_limited_without_touching_downloaded() {
        let db = Database::new_in_memory().await.unwrap();
        let store = MetadataStore::new(db);
        store.observe_illust(&sample(3)).await.unwrap();
        store.mark_limited(3).await.unwrap();
        assert!(store.is_access_limited(3).await.unwrap());
        assert!(!store.is_downloaded(3).await.unwrap());
    }

    #[tokio::test]
    async fn exists_is_true_even_for_an_undownloaded_work() {
        let db = Database::new_in_memory().await.unwrap();
        let store = MetadataStore::new(db);
        assert!(!store.exists(4).await.unwrap());
        store.observe_illust(&sample(4)).await.unwrap();
        assert!(store.exists(4).await.unwrap());
        assert!(!store.is_downloaded(4).await.unwrap());
    }

    #[tokio::test]
    async fn count_total_reflects_distinct_illusts() {
        let db = Database::new_in_memory().await.unwrap();
        let store = MetadataStore::new(db);
        store.observe_illust(&sample(10)).await.unwrap();
        store.observe_illust(&sample(11)).await.unwrap();
        store.observe_illust(&sample(10)).await.unwrap();
        assert_eq!(store.count_total().await.unwrap(), 2);
    }
}
