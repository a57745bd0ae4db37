//! Downloader (C6): fetches every artifact for one claimed queue item and
//! persists the per-work metadata document.
//!
//! Strictly serial — at most one in-flight download at any time (§5) — so
//! unlike the teacher's semaphore-backed concurrent `DownloadEngine`, this
//! processes exactly one [`QueueItem`] per call and returns control to the
//! scheduler, which owns pacing between items (§4.3's two-tier delay).

use std::path::PathBuf;

use chrono::Utc;
use tracing::instrument;

use super::artifacts::resolve_artifacts;
use super::client::HttpClient;
use super::error::DownloadError;
use crate::config::ConfigSnapshot;
use crate::model::{DownloadRecord, Illust, MetadataDocument, QueueItem};

pub struct Downloader {
    client: HttpClient,
}

#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    pub records: Vec<DownloadRecord>,
}

impl Downloader {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }

    /// Downloads every artifact for `item.illust`, writes them under
    /// `img/<illust_id>/`, then writes the metadata document. On any
    /// artifact failure the whole item fails — partial artifacts from this
    /// attempt are left as `.part` files only ever under a temp name, never
    /// under a final name (§4.5).
    #[instrument(skip(self, config, item), fields(illust_id = item.illust_id))]
    pub async fn download_item(
        &self,
        config: &ConfigSnapshot,
        item: &QueueItem,
    ) -> Result<DownloadOutcome, DownloadError> {
        let illust = &item.illust;
        let artifacts = resolve_artifacts(illust)?;
        let work_dir = config.img_dir().join(illust.illust_id.to_string());

        let mut records = Vec::with_capacity(artifacts.len());
        for artifact in &artifacts {
            let final_path = work_dir.join(&artifact.file_name);
            let temp_path = work_dir.join(format!("{}.part", artifact.file_name));
            let bytes = self
                .client
                .fetch_artifact(&artifact.url, &temp_path, &final_path)
                .await?;
            records.push(DownloadRecord {
                path: final_path.display().to_string(),
                byte_size: bytes,
                content_hash: None,
                timestamp: Utc::now(),
                success: true,
            });
        }

        self.write_metadata_document(config, illust).await?;
        Ok(DownloadOutcome { records })
    }

    async fn write_metadata_document(
        &self,
        config: &ConfigSnapshot,
        illust: &Illust,
    ) -> Result<(), DownloadError> {
        let mut document = MetadataDocument::from(illust);
        document.download_time = Some(Utc::now());
        let path: PathBuf = config
            .metadata_dir()
            .join(format!("{}.json", document.illust_id));
        crate::atomic_write::write_json(&path, &document)
            .map_err(|e| DownloadError::io(path, std::io::Error::other(e.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Author, IllustType};
    use std::collections::BTreeMap;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_in(dir: &std::path::Path) -> ConfigSnapshot {
        let body = format!(
            "user_id = \"1\"\nrefresh_token = \"t\"\noutput_dir = \"{}\"\n",
            dir.display()
        );
        let path = dir.join("config.toml");
        std::fs::write(&path, body).unwrap();
        ConfigSnapshot::load(&path).unwrap()
    }

    fn item_with_pages(id: i64, urls: Vec<String>) -> QueueItem {
        let now = Utc::now();
        QueueItem {
            illust_id: id,
            status: crate::model::QueueStatus::Running,
            retry_count: 0,
            failed_rounds: 0,
            last_error: None,
            next_retry_at: None,
            enqueued_at: now,
            updated_at: now,
            is_bookmarked: true,
            is_following_author: false,
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
                create_date: now,
                page_count: urls.len() as u32,
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
                bookmark_order: Some(1),
                is_access_limited: false,
                page_urls: urls,
                ugoira_zip_url: None,
            },
        }
    }

    #[tokio::test]
    async fn downloads_single_artifact_and_writes_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/1_p0.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"data".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let item = item_with_pages(1, vec![format!("{}/1_p0.png", server.uri())]);
        let downloader = Downloader::new(HttpClient::new(30));

        let outcome = downloader.download_item(&config, &item).await.unwrap();
        assert_eq!(outcome.records.len(), 1);
        assert!(config.img_dir().join("1").join("1.png").exists());
        assert!(config.metadata_dir().join("1.json").exists());
    }

    #[tokio::test]
    async fn second_artifact_failure_fails_the_whole_item() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/2_p0.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"data".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/2_p1.png"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let item = item_with_pages(
            2,
            vec![
                format!("{}/2_p0.png", server.uri()),
                format!("{}/2_p1.png", server.uri()),
            ],
        );
        let downloader = Downloader::new(HttpClient::new(30));

        let err = downloader.download_item(&config, &item).await.unwrap_err();
        assert!(matches!(err, DownloadError::HttpStatus { status: 500, .. }));
        assert!(!config.metadata_dir().join("2.json").exists());
    }
}
