//! Core types for shua

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Unique identifier for a scheduled task, assigned at enqueue time
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl TaskId {
    /// Create a new TaskId
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the inner u64 value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for TaskId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One URL produced by an input collector
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlTask {
    /// URL to fetch
    pub url: String,
    /// Extra request headers for this URL only (override the global ones)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
}

impl UrlTask {
    /// Task with no per-URL headers
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: None,
        }
    }
}

impl From<String> for UrlTask {
    fn from(url: String) -> Self {
        Self::new(url)
    }
}

impl From<&str> for UrlTask {
    fn from(url: &str) -> Self {
        Self::new(url)
    }
}

/// Scheduler payload for one chunk download
///
/// `index` is the original insertion order and never changes; it is the
/// ordering key the concentrator merges by, unrelated to scheduling priority.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadTask {
    /// URL to fetch
    pub url: String,
    /// 0-based sequence index
    pub index: usize,
    /// Chunk file name inside the output directory
    pub filename: String,
    /// Extra request headers for this URL only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
}

/// Events emitted by the downloader
///
/// Subscribers receive these through [`crate::Downloader::subscribe`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Tasks were added to the run
    Queued {
        /// Number of tasks added in this batch
        count: usize,
        /// Total tasks known so far
        total: usize,
    },

    /// A chunk finished downloading
    TaskFinished {
        /// Sequence index
        index: usize,
        /// URL that was fetched
        url: String,
        /// Chunks finished so far
        finished: usize,
        /// Total tasks
        total: usize,
    },

    /// An attempt failed
    TaskFailed {
        /// Sequence index
        index: usize,
        /// URL that was fetched
        url: String,
        /// Error message
        error: String,
        /// Whether the task was given up on
        dropped: bool,
    },

    /// A task was abandoned after exhausting its retries
    TaskDropped {
        /// Sequence index
        index: usize,
        /// URL that was fetched
        url: String,
    },

    /// Concatenation stopped after an I/O failure; chunks stay on disk
    ConcatFailed {
        /// Error message
        error: String,
    },

    /// The run is over
    Finished(Summary),
}

/// Final outcome of a download run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    /// Total tasks in the run
    pub total: usize,
    /// Tasks that completed
    pub finished: usize,
    /// Tasks dropped after exhausting retries
    pub dropped: usize,
    /// Directory holding the chunk files
    pub output_dir: PathBuf,
    /// Merged output files (empty unless concatenating)
    pub concat_outputs: Vec<PathBuf>,
    /// Whether the run was interrupted before the queue drained
    pub interrupted: bool,
}
