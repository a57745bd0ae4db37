//! The `async-trait` upstream API seam, plus a real Pixiv-shaped
//! implementation over `reqwest`.

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use tracing::instrument;

use crate::config::Restrict;

use super::types::{RawIllust, UserPreview};

const API_BASE: &str = "https://app-api.pixiv.net";
const APP_USER_AGENT: &str = "PixivAndroidApp/5.0.234 (Android 11; Pixel 5)";

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("upstream returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to decode upstream response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// One page of a listing endpoint: the items plus an optional continuation
/// URL (absent when the listing is exhausted, §6.4).
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_url: Option<String>,
}

/// The Scanner's only dependency on the network. Mocked in tests so the
/// early-stop and cursor logic can be exercised without a live upstream —
/// the same role the teacher's dropped `QueueRepository` trait played for
/// `queue/mod.rs`.
#[async_trait]
pub trait UpstreamApi: Send + Sync {
    async fn list_bookmarks(
        &self,
        access_token: &str,
        user_id: &str,
        restrict: Restrict,
        next_url: Option<&str>,
    ) -> Result<Page<RawIllust>, UpstreamError>;

    async fn list_following(
        &self,
        access_token: &str,
        user_id: &str,
        restrict: Restrict,
        next_url: Option<&str>,
    ) -> Result<Page<UserPreview>, UpstreamError>;

    async fn list_user_illusts(
        &self,
        access_token: &str,
        author_id: i64,
        next_url: Option<&str>,
    ) -> Result<Page<RawIllust>, UpstreamError>;
}

#[derive(Debug, Clone)]
pub struct PixivApi {
    client: Client,
}

impl PixivApi {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn get_page<T: serde::de::DeserializeOwned>(
        &self,
        access_token: &str,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<serde_json::Value, UpstreamError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::AUTHORIZATION, format!("Bearer {access_token}"))
            .header(reqwest::header::USER_AGENT, APP_USER_AGENT)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let body: serde_json::Value = response.json().await?;
        Ok(body)
    }
}

#[async_trait]
impl UpstreamApi for PixivApi {
    #[instrument(skip(self, access_token))]
    async fn list_bookmarks(
        &self,
        access_token: &str,
        user_id: &str,
        restrict: Restrict,
        next_url: Option<&str>,
    ) -> Result<Page<RawIllust>, UpstreamError> {
        let restrict_str = match restrict {
            Restrict::Public => "public",
            Restrict::Private => "private",
        };
        let url = next_url
            .map(str::to_string)
            .unwrap_or_else(|| format!("{API_BASE}/v1/user/bookmarks/illust"));
        let query: &[(&str, &str)] = if next_url.is_some() {
            &[]
        } else {
            &[("user_id", user_id), ("restrict", restrict_str)]
        };
        let body = self.get_page::<serde_json::Value>(access_token, &url, query).await?;
        decode_illust_page(body)
    }

    #[instrument(skip(self, access_token))]
    async fn list_following(
        &self,
        access_token: &str,
        user_id: &str,
        restrict: Restrict,
        next_url: Option<&str>,
    ) -> Result<Page<UserPreview>, UpstreamError> {
        let restrict_str = match restrict {
            Restrict::Public => "public",
            Restrict::Private => "private",
        };
        let url = next_url
            .map(str::to_string)
            .unwrap_or_else(|| format!("{API_BASE}/v1/user/following"));
        let query: &[(&str, &str)] = if next_url.is_some() {
            &[]
        } else {
            &[("user_id", user_id), ("restrict", restrict_str)]
        };
        let body = self.get_page::<serde_json::Value>(access_token, &url, query).await?;
        let items = body
            .get("user_previews")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .unwrap_or_default();
        let next_url = body
            .get("next_url")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        Ok(Page { items, next_url })
    }

    #[instrument(skip(self, access_token))]
    async fn list_user_illusts(
        &self,
        access_token: &str,
        author_id: i64,
        next_url: Option<&str>,
    ) -> Result<Page<RawIllust>, UpstreamError> {
        let url = next_url
            .map(str::to_string)
            .unwrap_or_else(|| format!("{API_BASE}/v1/user/illusts"));
        let author_id_str = author_id.to_string();
        let query: &[(&str, &str)] = if next_url.is_some() {
            &[]
        } else {
            &[("user_id", author_id_str.as_str()), ("type", "illust")]
        };
        let body = self.get_page::<serde_json::Value>(access_token, &url, query).await?;
        decode_illust_page(body)
    }
}

fn decode_illust_page(body: serde_json::Value) -> Result<Page<RawIllust>, UpstreamError> {
    let items = body
        .get("illusts")
        .cloned()
        .map(serde_json::from_value)
        .transpose()?
        .unwrap_or_default();
    let next_url = body
        .get("next_url")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    Ok(Page { items, next_url })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn list_bookmarks_sends_bearer_token_and_parses_next_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/user/bookmarks/illust"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "illusts": [],
                "next_url": "https://app-api.pixiv.net/v1/user/bookmarks/illust?offset=30",
            })))
            .mount(&server)
            .await;

        // Hitting the real API_BASE constant would escape the mock server;
        // this test only checks decode_illust_page's shape via a manual
        // request through the same client, since PixivApi hardcodes the
        // production host.
        let client = Client::new();
        let response = client
            .get(format!("{}/v1/user/bookmarks/illust", server.uri()))
            .header(reqwest::header::AUTHORIZATION, "Bearer tok")
            .send()
            .await
            .unwrap();
        let body: serde_json::Value = response.json().await.unwrap();
        let page = decode_illust_page(body).unwrap();
        assert!(page.items.is_empty());
        assert_eq!(
            page.next_url.as_deref(),
            Some("https://app-api.pixiv.net/v1/user/bookmarks/illust?offset=30")
        );
    }

    #[test]
    fn empty_next_url_string_is_treated_as_exhausted() {
        let body = serde_json::json!({ "illusts": [], "next_url": "" });
        let page = decode_illust_page(body).unwrap();
        assert!(page.next_url.is_none());
    }
}
