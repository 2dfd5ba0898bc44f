//! URL list collectors.
//!
//! Every collector turns its source into an ordered list of [`UrlTask`]s and
//! hands it to [`Downloader::add_tasks`].

use crate::error::{Error, Result};
use crate::expression;
use crate::fetch::FetchOptions;
use crate::types::UrlTask;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use url::Url;

use super::Downloader;

#[derive(Deserialize)]
struct JsonTask {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    headers: Option<HashMap<String, String>>,
}

impl Downloader {
    /// Add the given URLs
    pub fn add_urls<I, S>(&self, urls: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_tasks(urls.into_iter().map(UrlTask::new).collect())
    }

    /// Add the URLs listed in `text`, one per line
    ///
    /// Relative lines are resolved against `base` when given, and ignored
    /// otherwise.
    pub fn load_urls_from_text(&self, text: &str, base: Option<&Url>) -> Result<usize> {
        self.add_tasks(parse_url_list(text, base))
    }

    /// Add the URLs listed in a local file or a remote `http(s)://` list
    pub async fn load_urls_from_file(&self, path: &str) -> Result<usize> {
        if path.starts_with("http://") || path.starts_with("https://") {
            tracing::debug!(url = path, "Loading remote URL list");
            let options = FetchOptions {
                timeout: self.config.timeout,
                headers: (*self.headers).clone(),
            };
            let text = self
                .fetcher
                .fetch_text(path, &options)
                .await
                .map_err(|e| Error::LoadRemoteList {
                    url: path.to_string(),
                    reason: e.to_string(),
                })?;
            tracing::info!(url = path, "Remote URL list loaded");

            let base = Url::parse(path).ok();
            self.load_urls_from_text(&text, base.as_ref())
        } else {
            let text = tokio::fs::read_to_string(path).await?;
            self.load_urls_from_text(&text, None)
        }
    }

    /// Add tasks from a JSON array of `{ "url": ..., "headers": {...} }`
    pub async fn load_urls_from_json(&self, path: impl AsRef<Path>) -> Result<usize> {
        let text = tokio::fs::read_to_string(path.as_ref()).await?;
        self.add_tasks(parse_json_tasks(&text)?)
    }

    /// Add the URLs an integer-range expression expands to
    pub fn load_urls_from_expression(&self, expression: &str) -> Result<usize> {
        let urls = expression::expand(expression)?;
        self.add_tasks(urls.into_iter().map(UrlTask::new).collect())
    }
}

/// Parse a plain-text URL list
///
/// Lines are trimmed; blank lines and `#` comments are skipped. Absolute
/// `http(s)://` lines are taken as-is, other lines are resolved against
/// `base` if there is one.
pub fn parse_url_list(text: &str, base: Option<&Url>) -> Vec<UrlTask> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            if line.starts_with("http://") || line.starts_with("https://") {
                return Some(UrlTask::new(line));
            }
            match base.map(|base| base.join(line)) {
                Some(Ok(url)) => Some(UrlTask::new(url.to_string())),
                Some(Err(e)) => {
                    tracing::debug!(line, error = %e, "Skipping unresolvable line");
                    None
                }
                None => {
                    tracing::debug!(line, "Skipping relative line in local list");
                    None
                }
            }
        })
        .collect()
}

/// Parse a JSON task list
///
/// The document must be a non-empty array and every entry needs a `url`.
pub fn parse_json_tasks(text: &str) -> Result<Vec<UrlTask>> {
    let entries: Vec<JsonTask> = serde_json::from_str(text)?;
    if entries.is_empty() {
        return Err(Error::InvalidInput("JSON task list is empty".to_string()));
    }

    entries
        .into_iter()
        .enumerate()
        .map(|(i, entry)| match entry.url {
            Some(url) if !url.is_empty() => Ok(UrlTask {
                url,
                headers: entry.headers,
            }),
            _ => Err(Error::InvalidInput(format!("task {i} in JSON file has no url"))),
        })
        .collect()
}
