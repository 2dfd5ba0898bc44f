//! Configuration types for shua

use crate::concentrator::output_file;
use crate::error::{ConcatError, Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

/// Browser-like user agent sent unless a header overrides it
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/71.0.3578.80 Safari/537.36";

// Static pattern, verified by tests
#[allow(clippy::unwrap_used)]
static HEADER_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^([^ :]+):(.+)$").unwrap());

/// How the concentrator handles a permanently missing chunk
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcatMode {
    /// Close the current output and start a new numbered segment at each gap (default)
    #[default]
    Segmented,
    /// Write everything into one file, leaving gaps out
    Contiguous,
}

/// Main configuration for a download run
///
/// Every field has a serde default, so `{}` is a valid configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Maximum concurrent fetches (default: 8)
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Failures tolerated per task before it is dropped (default: 5)
    ///
    /// A task is dropped once its recorded failure count exceeds this value,
    /// so it gets `retries + 1` attempts in total.
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Per-fetch timeout, serialized in milliseconds (default: 30000)
    #[serde(default = "default_timeout", with = "duration_ms_serde")]
    pub timeout: Duration,

    /// Raw `Name: value` header lines
    ///
    /// An entry may hold several headers separated by newlines or a literal `\n`.
    #[serde(default)]
    pub headers: Vec<String>,

    /// Directory chunk files are written to (default: "./shua_download_<unix millis>")
    #[serde(default = "default_output")]
    pub output: PathBuf,

    /// Name chunks by zero-padded index instead of the URL's file name
    #[serde(default)]
    pub ascending: bool,

    /// Merge chunks into ordered output file(s) while downloading
    #[serde(default)]
    pub concat: bool,

    /// Merge destination (default: "<output>/_shua_concat_<millis>.<ext of first URL>")
    #[serde(default)]
    pub concat_output: Option<PathBuf>,

    /// Gap handling for the merge
    #[serde(default)]
    pub concat_mode: ConcatMode,

    /// Delete chunk files once their bytes are merged (default: true)
    #[serde(default = "default_true")]
    pub delete_chunks_after_concat: bool,

    /// Default `User-Agent` header
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            retries: default_retries(),
            timeout: default_timeout(),
            headers: Vec::new(),
            output: default_output(),
            ascending: false,
            concat: false,
            concat_output: None,
            concat_mode: ConcatMode::default(),
            delete_chunks_after_concat: true,
            user_agent: default_user_agent(),
        }
    }
}

impl Config {
    /// Global request headers: `User-Agent` plus every valid configured line
    ///
    /// Invalid lines are logged and skipped. A configured `User-Agent` line
    /// replaces [`Config::user_agent`].
    pub fn parsed_headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert("User-Agent".to_string(), self.user_agent.clone());

        let lines = self
            .headers
            .iter()
            .flat_map(|entry| entry.split("\\n"))
            .flat_map(|part| part.split('\n'))
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| !line.trim().is_empty());

        for line in lines {
            match HEADER_LINE.captures(line) {
                Some(caps) => {
                    headers.insert(caps[1].to_string(), caps[2].trim().to_string());
                }
                None => {
                    tracing::warn!(line, "HTTP header invalid, ignored");
                }
            }
        }
        headers
    }

    /// Check the configuration before a run
    pub fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(Error::Config {
                message: "threads must be at least 1".to_string(),
                key: Some("threads".to_string()),
            });
        }

        if self.concat {
            if let Some(path) = &self.concat_output {
                // Segmented runs write `<stem>_0.<ext>` first, never the path itself
                let first = output_file(path, self.concat_mode, 0);
                if let Some(existing) = [path, &first].into_iter().find(|p| p.exists()) {
                    return Err(ConcatError::OutputExists(existing.clone()).into());
                }
            }
        } else if self.output.extension().is_some() {
            tracing::warn!(
                output = %self.output.display(),
                "Output looks like a file name; it is used as a directory"
            );
        }
        Ok(())
    }

    /// Merge destination, falling back to a timestamped file in the output directory
    pub fn resolve_concat_output(&self, first_url: &str) -> PathBuf {
        if let Some(path) = &self.concat_output {
            return path.clone();
        }
        let name = match crate::downloader::url_extension(first_url) {
            Some(ext) => format!("_shua_concat_{}.{ext}", unix_millis()),
            None => format!("_shua_concat_{}", unix_millis()),
        };
        self.output.join(name)
    }

    /// Directory chunk files go to
    pub fn output_dir(&self) -> &Path {
        &self.output
    }
}

fn default_threads() -> usize {
    8
}

fn default_retries() -> u32 {
    5
}

fn default_timeout() -> Duration {
    Duration::from_millis(30_000)
}

fn default_output() -> PathBuf {
    PathBuf::from(format!("./shua_download_{}", unix_millis()))
}

fn default_true() -> bool {
    true
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn unix_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// Duration serialization helper (milliseconds)
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis().try_into().unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
