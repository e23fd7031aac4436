use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::redirect::Policy;
use reqwest::{Client, Response, StatusCode};
use thiserror::Error;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{HarvestConfig, RetryConfig};

pub const ACCEPT_IMAGES: &str =
    "image/avif,image/webp,image/apng,image/svg+xml,image/*,*/*;q=0.8";

/// Custom errors for download operations.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("http status {0}")]
    Status(u16),
    #[error("empty response body")]
    EmptyBody,
    #[error("destination already exists")]
    AlreadyExists,
    #[error("cancelled")]
    Cancelled,
}

/// Builds the one HTTP client a run shares across all of its requests.
///
/// The idle pool holds twice the concurrency ceiling per host so that
/// connections survive between the many small image fetches.
pub fn build_client(config: &HarvestConfig) -> Result<Client, reqwest::Error> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_IMAGES));

    Client::builder()
        .user_agent(config.user_agent.as_str())
        .default_headers(headers)
        .pool_max_idle_per_host(config.effective_concurrency() * 2)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .timeout(config.request_timeout())
        .connect_timeout(config.connect_timeout())
        .redirect(Policy::limited(config.max_redirects))
        .build()
}

/// Fetches single assets to disk. Cheap to clone; clones share the pool.
#[derive(Debug, Clone)]
pub struct AssetDownloader {
    client: Client,
    retry: RetryConfig,
}

impl AssetDownloader {
    pub fn new(client: Client, retry: RetryConfig) -> Self {
        Self { client, retry }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Streams `url` into `destination` and returns the number of bytes written.
    ///
    /// `destination` is created exclusively. Whatever was written is removed
    /// again on any failure, so a later run never mistakes it for a finished file.
    pub async fn fetch(
        &self,
        url: &str,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64, DownloadError> {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            response = self.send_with_retry(url) => response?,
        };

        let status = response.status();
        if status != StatusCode::OK {
            return Err(DownloadError::Status(status.as_u16()));
        }

        let file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(destination)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(DownloadError::AlreadyExists)
            }
            Err(e) => return Err(e.into()),
        };

        match stream_to_file(response, file, cancel).await {
            Ok(0) => {
                discard(destination).await;
                Err(DownloadError::EmptyBody)
            }
            Ok(written) => Ok(written),
            Err(e) => {
                discard(destination).await;
                Err(e)
            }
        }
    }

    /// Sends the GET, retrying transient transport failures with backoff.
    /// HTTP error statuses are returned as responses and never retried here.
    async fn send_with_retry(&self, url: &str) -> Result<Response, DownloadError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.client.get(url).send().await {
                Ok(response) => return Ok(response),
                Err(e) if attempt < max_attempts && is_transient(&e) => {
                    let delay = self.retry.backoff(attempt);
                    debug!(url, attempt, error = %e, ?delay, "transient error, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

async fn stream_to_file(
    response: Response,
    mut file: tokio::fs::File,
    cancel: &CancellationToken,
) -> Result<u64, DownloadError> {
    let mut stream = response.bytes_stream();
    let mut written = 0u64;
    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            chunk = stream.next() => chunk,
        };
        match chunk {
            Some(bytes) => {
                let bytes = bytes?;
                file.write_all(&bytes).await?;
                written += bytes.len() as u64;
            }
            None => break,
        }
    }
    file.flush().await?;
    Ok(written)
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != ErrorKind::NotFound {
            tracing::warn!("could not remove partial file {}: {}", path.display(), e);
        }
    }
}

/// Timeouts, refused connections and connections dropped before a response.
fn is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_request()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_builds_from_defaults() {
        let cfg = HarvestConfig::default();
        assert!(build_client(&cfg).is_ok());
    }

    #[test]
    fn status_error_reads_like_a_reason() {
        assert_eq!(DownloadError::Status(404).to_string(), "http status 404");
        assert_eq!(DownloadError::Cancelled.to_string(), "cancelled");
    }

    #[tokio::test]
    async fn malformed_url_fails_without_touching_disk() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("x.jpg");
        let downloader =
            AssetDownloader::new(build_client(&HarvestConfig::default()).unwrap(), RetryConfig::default());
        let result = downloader
            .fetch("not a url", &dest, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(DownloadError::Network(_))));
        assert!(!dest.exists());
    }
}
