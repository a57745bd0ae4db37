//! HTTP client wrapper for fetching Pixiv artifacts.
//!
//! Deliberately much smaller than a generic download client: Pixiv image
//! hosts never redirect to an HTML login page, never need Range/resume
//! support (artifacts are small enough that a failed fetch just restarts),
//! and filenames are fully determined by `illust_id` rather than sniffed
//! from `Content-Disposition`. What is kept from that shape is the
//! panic-safe client builder (a real system-proxy lookup can panic on some
//! platforms) and the stream-to-temp-then-rename write pattern.

use std::panic::{AssertUnwindSafe, catch_unwind, set_hook, take_hook};
use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::{Client, ClientBuilder, Proxy};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, instrument, warn};

use super::constants::{DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_USER_AGENT, IMAGE_REFERER};
use super::error::DownloadError;

#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(timeout_secs: u64) -> Self {
        Self::new_with_proxy_fallback(timeout_secs, true)
    }

    fn new_with_proxy_fallback(timeout_secs: u64, allow_fallback: bool) -> Self {
        let client = match try_build_client(timeout_secs, false) {
            Ok(client) => client,
            Err(_) if allow_fallback => try_build_client(timeout_secs, true)
                .unwrap_or_else(|_| base_client_builder(timeout_secs).build().unwrap_or_default()),
            Err(_) => base_client_builder(timeout_secs).build().unwrap_or_default(),
        };
        Self { client }
    }

    /// Streams a single artifact to `temp_path`, then renames it to
    /// `final_path` on full success. On any failure the temp file is
    /// removed so a partial artifact is never left under its final name
    /// (§4.5).
    #[instrument(skip(self), fields(url = %url))]
    pub async fn fetch_artifact(
        &self,
        url: &str,
        temp_path: &Path,
        final_path: &Path,
    ) -> Result<u64, DownloadError> {
        let result = self.stream_to_temp(url, temp_path).await;
        match result {
            Ok(bytes) => {
                if let Some(parent) = final_path.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|source| DownloadError::io(parent, source))?;
                }
                tokio::fs::rename(temp_path, final_path)
                    .await
                    .map_err(|source| DownloadError::io(final_path, source))?;
                Ok(bytes)
            }
            Err(err) => {
                let _ = tokio::fs::remove_file(temp_path).await;
                Err(err)
            }
        }
    }

    async fn stream_to_temp(&self, url: &str, temp_path: &Path) -> Result<u64, DownloadError> {
        if let Some(parent) = temp_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| DownloadError::io(parent, source))?;
        }

        let response = self
            .client
            .get(url)
            .header(reqwest::header::REFERER, IMAGE_REFERER)
            .send()
            .await
            .map_err(|source| classify_send_error(url, source))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(DownloadError::http_status(
                url,
                status.as_u16(),
                retry_after,
                snippet,
            ));
        }

        let file = File::create(temp_path)
            .await
            .map_err(|source| DownloadError::io(temp_path, source))?;
        let mut writer = BufWriter::new(file);
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|source| DownloadError::network(url, source))?;
            writer
                .write_all(&chunk)
                .await
                .map_err(|source| DownloadError::io(temp_path, source))?;
            written += chunk.len() as u64;
        }
        writer
            .flush()
            .await
            .map_err(|source| DownloadError::io(temp_path, source))?;
        debug!(bytes = written, "artifact streamed to temp file");
        Ok(written)
    }
}

fn classify_send_error(url: &str, source: reqwest::Error) -> DownloadError {
    if source.is_timeout() {
        DownloadError::Timeout { url: url.to_string() }
    } else {
        DownloadError::network(url, source)
    }
}

enum BuildClientFailure {
    Panic,
    Build(reqwest::Error),
}

static CLIENT_BUILD_PANIC_HOOK_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

fn try_build_client(
    timeout_secs: u64,
    disable_system_proxy_lookup: bool,
) -> Result<Client, BuildClientFailure> {
    catch_unwind_silent(AssertUnwindSafe(move || {
        let mut builder = base_client_builder(timeout_secs);
        if disable_system_proxy_lookup {
            builder = apply_env_proxy_fallback(builder.no_proxy());
        }
        builder.build().map_err(BuildClientFailure::Build)
    }))
    .map_err(|_| BuildClientFailure::Panic)?
}

fn catch_unwind_silent<F, T>(operation: F) -> Result<T, Box<dyn std::any::Any + Send + 'static>>
where
    F: FnOnce() -> T + std::panic::UnwindSafe,
{
    let _panic_hook_guard = CLIENT_BUILD_PANIC_HOOK_LOCK
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let previous_hook = take_hook();
    set_hook(Box::new(|_| {}));
    let outcome = catch_unwind(operation);
    set_hook(previous_hook);
    outcome
}

fn base_client_builder(timeout_secs: u64) -> ClientBuilder {
    Client::builder()
        .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
        .timeout(Duration::from_secs(timeout_secs))
        .gzip(true)
        .user_agent(DEFAULT_USER_AGENT)
}

fn apply_env_proxy_fallback(mut builder: ClientBuilder) -> ClientBuilder {
    if let Some(proxy) = env_proxy_for_scheme("https")
        && let Ok(resolved) = Proxy::https(&proxy)
    {
        builder = builder.proxy(resolved);
    }
    if let Some(proxy) = env_proxy_for_scheme("http")
        && let Ok(resolved) = Proxy::http(&proxy)
    {
        builder = builder.proxy(resolved);
    }
    builder
}

fn env_proxy_for_scheme(scheme: &str) -> Option<String> {
    match scheme {
        "https" => find_first_proxy_var(&["HTTPS_PROXY", "https_proxy", "ALL_PROXY", "all_proxy"]),
        "http" => find_first_proxy_var(&["HTTP_PROXY", "http_proxy", "ALL_PROXY", "all_proxy"]),
        _ => None,
    }
}

fn find_first_proxy_var(names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| {
        std::env::var(name)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn fetch_artifact_writes_final_file_and_sends_referer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/img.png"))
            .and(header("referer", IMAGE_REFERER))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let temp_path = dir.path().join("img.png.part");
        let final_path = dir.path().join("img.png");

        let client = HttpClient::new(30);
        let url = format!("{}/img.png", server.uri());
        let bytes = client
            .fetch_artifact(&url, &temp_path, &final_path)
            .await
            .unwrap();

        assert_eq!(bytes, 5);
        assert!(final_path.exists());
        assert!(!temp_path.exists());
    }

    #[tokio::test]
    async fn fetch_artifact_cleans_up_temp_file_on_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let temp_path = dir.path().join("missing.png.part");
        let final_path = dir.path().join("missing.png");

        let client = HttpClient::new(30);
        let url = format!("{}/missing.png", server.uri());
        let err = client
            .fetch_artifact(&url, &temp_path, &final_path)
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::HttpStatus { status: 404, .. }));
        assert!(!temp_path.exists());
        assert!(!final_path.exists());
    }
}
