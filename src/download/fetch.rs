// Offline Learning Core - Low-bandwidth Content Delivery
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Source media fetch
//!
//! Streams a remote file to disk chunk by chunk. Every read races the job's
//! cancellation token, so a cancel stops the transfer within one read.

use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Byte progress callback: `(bytes_downloaded, total_bytes)`
pub type FetchProgress = Arc<dyn Fn(u64, Option<u64>) + Send + Sync>;

/// Parse and check a source locator; only http(s) URLs can be fetched
pub fn parse_source_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim())?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        scheme => Err(PipelineError::InvalidSourceUrl(format!(
            "unsupported source locator {} (scheme {})",
            raw, scheme
        ))),
    }
}

#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Download `url` into `dest`, returning the number of bytes written
    ///
    /// Returns `PipelineError::Cancelled` once `cancel` fires.
    async fn fetch(
        &self,
        url: &Url,
        dest: &Path,
        progress: FetchProgress,
        cancel: CancellationToken,
    ) -> Result<u64>;
}

/// reqwest streaming fetcher
pub struct HttpFetcher {
    client: reqwest::Client,
    idle_timeout: Duration,
}

impl HttpFetcher {
    /// `idle_timeout` bounds the wait for response headers and for each chunk
    pub fn new(idle_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .user_agent(concat!("offline-core/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client, idle_timeout })
    }
}

#[async_trait]
impl SourceFetcher for HttpFetcher {
    async fn fetch(
        &self,
        url: &Url,
        dest: &Path,
        progress: FetchProgress,
        cancel: CancellationToken,
    ) -> Result<u64> {
        let request = self.client.get(url.clone()).send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            sent = tokio::time::timeout(self.idle_timeout, request) => match sent {
                Ok(result) => result.map_err(PipelineError::from_reqwest)?,
                Err(_) => {
                    return Err(PipelineError::transient(
                        format!("Timed out waiting for {}", url),
                        None,
                    ))
                }
            },
        };

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::from_status(status.as_u16(), url.as_str()));
        }

        let total = response.content_length();

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                PipelineError::FileIoError(format!("create_dir: {} - {}", parent.display(), e))
            })?;
        }
        let mut file = fs::File::create(dest).await.map_err(|e| {
            PipelineError::FileIoError(format!("create: {} - {}", dest.display(), e))
        })?;

        let mut stream = response.bytes_stream();
        let mut downloaded: u64 = 0;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                next = tokio::time::timeout(self.idle_timeout, stream.next()) => next,
            };

            let chunk = match next {
                Ok(Some(chunk)) => chunk.map_err(PipelineError::from_reqwest)?,
                Ok(None) => break,
                Err(_) => {
                    return Err(PipelineError::transient(
                        format!("Transfer from {} stalled", url),
                        None,
                    ))
                }
            };

            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            progress(downloaded, total);
        }

        file.flush().await?;

        if let Some(expected) = total {
            if downloaded < expected {
                return Err(PipelineError::transient(
                    format!("Connection closed after {} of {} bytes", downloaded, expected),
                    None,
                ));
            }
        }

        Ok(downloaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_source_url() {
        assert!(parse_source_url("https://cdn.example.org/v/1.mp4").is_ok());
        assert!(parse_source_url(" http://10.0.0.2:8080/a.mp4 ").is_ok());

        assert!(matches!(
            parse_source_url("ftp://example.org/a.mp4"),
            Err(PipelineError::InvalidSourceUrl(_))
        ));
        assert!(matches!(
            parse_source_url("file:///srv/a.mp4"),
            Err(PipelineError::InvalidSourceUrl(_))
        ));
        assert!(parse_source_url("not a url").is_err());
    }

    #[tokio::test]
    async fn test_cancelled_before_request() {
        let fetcher = HttpFetcher::new(Duration::from_secs(5)).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let url = Url::parse("http://127.0.0.1:9/never.mp4").unwrap();
        let err = fetcher
            .fetch(&url, &dir.path().join("never.src"), Arc::new(|_, _| {}), cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancellation());
    }
}
