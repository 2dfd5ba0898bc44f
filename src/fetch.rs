//! Fetching one URL into one file
//!
//! The [`Fetcher`] trait is the seam between the orchestrator and the network.
//! [`HttpFetcher`] is the reqwest implementation; tests substitute their own.
//!
//! A fetch is a single attempt: retries are the scheduler's business. Bodies
//! are streamed to `<dest>.part` and renamed into place only once complete, so
//! a failed, timed out or cancelled attempt never leaves a truncated chunk at
//! `dest`.

use crate::error::{Error, FetchError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Per-request settings
#[derive(Clone, Debug, Default)]
pub struct FetchOptions {
    /// Whole-attempt timeout; `Duration::ZERO` disables it
    pub timeout: Duration,
    /// Request headers, already merged (global first, per-task overrides)
    pub headers: HashMap<String, String>,
}

/// Downloads a URL to a file
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch `url` into `dest` in one attempt
    async fn fetch(&self, url: &str, dest: &Path, options: &FetchOptions) -> Result<()>;

    /// Fetch `url` as text (used for remote URL lists)
    async fn fetch_text(&self, url: &str, options: &FetchOptions) -> Result<String>;
}

/// reqwest-backed [`Fetcher`]
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Build a fetcher with its own connection pool
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self { client })
    }

    /// Use an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn request(&self, url: &str, options: &FetchOptions) -> reqwest::RequestBuilder {
        let mut request = self.client.get(url);
        for (name, value) in &options.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        request
    }

    async fn send(&self, url: &str, options: &FetchOptions) -> Result<reqwest::Response> {
        let response = self
            .request(url, options)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, url, options.timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::BadStatus {
                url: url.to_string(),
                status: status.as_u16(),
            }
            .into());
        }
        Ok(response)
    }

    async fn download(&self, url: &str, part: &Path, options: &FetchOptions) -> Result<()> {
        let mut response = self.send(url, options).await?;
        let expected = response.content_length();

        let mut file = tokio::fs::File::create(part).await?;
        let mut received: u64 = 0;
        while let Some(bytes) = response
            .chunk()
            .await
            .map_err(|e| map_reqwest_error(e, url, options.timeout))?
        {
            file.write_all(&bytes).await?;
            received += bytes.len() as u64;
        }
        file.flush().await?;
        drop(file);

        check_length(url, expected, received)?;
        tracing::trace!(url, bytes = received, "Body received");
        Ok(())
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, dest: &Path, options: &FetchOptions) -> Result<()> {
        let part = part_path(dest);
        let outcome = with_timeout(url, options.timeout, self.download(url, &part, options)).await;

        match outcome {
            Ok(()) => {
                tokio::fs::rename(&part, dest).await?;
                Ok(())
            }
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(&part).await
                    && rm.kind() != std::io::ErrorKind::NotFound
                {
                    tracing::debug!(path = %part.display(), error = %rm, "Failed to remove partial file");
                }
                Err(e)
            }
        }
    }

    async fn fetch_text(&self, url: &str, options: &FetchOptions) -> Result<String> {
        with_timeout(url, options.timeout, async {
            let response = self.send(url, options).await?;
            Ok::<_, Error>(response.text().await?)
        })
        .await
    }
}

async fn with_timeout<T, F>(url: &str, timeout: Duration, attempt: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    if timeout.is_zero() {
        return attempt.await;
    }
    match tokio::time::timeout(timeout, attempt).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout {
            url: url.to_string(),
            timeout,
        }
        .into()),
    }
}

/// Sibling `.part` path the body is streamed into
pub fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

/// Compare the advertised length with what actually arrived
fn check_length(url: &str, expected: Option<u64>, actual: u64) -> Result<()> {
    match expected {
        Some(expected) if expected != actual => Err(FetchError::ContentLengthMismatch {
            url: url.to_string(),
            expected,
            actual,
        }
        .into()),
        _ => Ok(()),
    }
}

fn map_reqwest_error(e: reqwest::Error, url: &str, timeout: Duration) -> Error {
    if e.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
            timeout,
        }
        .into()
    } else {
        Error::Network(e)
    }
}
