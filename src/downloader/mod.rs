//! Download orchestrator split into focused submodules.
//!
//! The `Downloader` struct and its methods are organized by concern:
//! - [`input`] - URL list collectors (arrays, text files, remote lists, JSON, expressions)
//! - [`naming`] - Chunk file naming
//! - [`run`] - Scheduler/concentrator wiring and the event loop
//! - [`progress`] - Progress and ETA reporting
//! - [`lifecycle`] - Shutdown coordination

mod input;
mod lifecycle;
mod naming;
mod progress;
mod run;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use input::{parse_json_tasks, parse_url_list};
pub use naming::{chunk_filename, url_extension};
pub use progress::format_eta;

use crate::config::Config;
use crate::error::Result;
use crate::fetch::{FetchOptions, Fetcher, HttpFetcher};
use crate::retry::retry_limit_policy;
use crate::scheduler::{NewTask, SchedulerStats, TaskHandler, TaskScheduler};
use crate::status::TaskStatusRecord;
use crate::types::{DownloadTask, Event, UrlTask};
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Main downloader instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct Downloader {
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Global request headers, parsed once
    pub(crate) headers: Arc<HashMap<String, String>>,
    /// Network collaborator (trait object so tests can substitute it)
    pub(crate) fetcher: Arc<dyn Fetcher>,
    /// Bounded-concurrency executor for chunk downloads
    pub(crate) scheduler: TaskScheduler<DownloadTask>,
    /// Per-index status, written here and read by the concentrator
    pub(crate) status: TaskStatusRecord,
    /// Every task ever added, in index order
    pub(crate) tasks: Arc<Mutex<Vec<DownloadTask>>>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: tokio::sync::broadcast::Sender<Event>,
    /// Cancelled to stop the run early
    pub(crate) shutdown: CancellationToken,
    /// Shared handler every chunk task runs
    handler: TaskHandler<DownloadTask>,
}

impl Downloader {
    /// Create a downloader that fetches over HTTP
    pub fn new(config: Config) -> Result<Self> {
        let fetcher = HttpFetcher::new()?;
        Self::with_fetcher(config, Arc::new(fetcher))
    }

    /// Create a downloader with a custom fetcher
    pub fn with_fetcher(config: Config, fetcher: Arc<dyn Fetcher>) -> Result<Self> {
        config.validate()?;

        let headers = Arc::new(config.parsed_headers());
        let shutdown = CancellationToken::new();
        let scheduler = TaskScheduler::with_cancellation(config.threads, shutdown.clone());
        scheduler.configure(config.threads, retry_limit_policy(config.retries));

        let handler = chunk_handler(&config, Arc::clone(&fetcher), Arc::clone(&headers));
        let (event_tx, _rx) = tokio::sync::broadcast::channel(1000);

        Ok(Self {
            config: Arc::new(config),
            headers,
            fetcher,
            scheduler,
            status: TaskStatusRecord::new(),
            tasks: Arc::new(Mutex::new(Vec::new())),
            event_tx,
            shutdown,
            handler,
        })
    }

    /// Subscribe to downloader events
    ///
    /// Slow subscribers may miss events (broadcast lag); the run itself never
    /// depends on them.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Append tasks to the run
    ///
    /// Each task gets the next sequence index, a chunk file name, and a
    /// priority of `-index` so earlier tasks are dequeued first. Returns the
    /// number of tasks added.
    pub fn add_tasks(&self, tasks: Vec<UrlTask>) -> Result<usize> {
        if tasks.is_empty() {
            tracing::info!("No tasks to add");
            return Ok(0);
        }

        let count = tasks.len();
        let mut all = self.lock_tasks();
        let indices = self.status.push_pending(count);
        let indices_taken = indices.clone();

        let added: Vec<DownloadTask> = tasks
            .into_iter()
            .zip(indices)
            .map(|(task, index)| DownloadTask {
                filename: chunk_filename(&task.url, index, self.config.ascending),
                url: task.url,
                index,
                headers: task.headers,
            })
            .collect();

        let accepted = self.scheduler.add_tasks(added.iter().map(|task| {
            NewTask::with_handler(task.clone(), -(task.index as i64), Arc::clone(&self.handler))
        }));
        if let Err(e) = accepted {
            // Still holding the task lock, so these are the newest slots
            self.status.release(indices_taken);
            tracing::warn!(count, error = %e, "Tasks rejected by scheduler");
            return Err(e);
        }
        all.extend(added);

        let total = all.len();
        drop(all);

        tracing::info!(count, total, "Tasks added");
        self.emit_event(Event::Queued { count, total });
        Ok(count)
    }

    /// Every task added so far, in index order
    pub fn tasks(&self) -> Vec<DownloadTask> {
        self.lock_tasks().clone()
    }

    /// Number of tasks added so far
    pub fn total(&self) -> usize {
        self.lock_tasks().len()
    }

    /// Scheduler counters (queued, in flight, finished, dropped)
    pub fn stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    /// Shared per-index status record
    pub fn status(&self) -> &TaskStatusRecord {
        &self.status
    }

    /// Emit an event to all subscribers
    pub(crate) fn emit_event(&self, event: Event) {
        // send() returns Err if there are no receivers, which is fine - we just drop the event
        self.event_tx.send(event).ok();
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<DownloadTask>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Build the handler that downloads one chunk into the output directory
fn chunk_handler(
    config: &Config,
    fetcher: Arc<dyn Fetcher>,
    headers: Arc<HashMap<String, String>>,
) -> TaskHandler<DownloadTask> {
    let output_dir = config.output.clone();
    let timeout = config.timeout;

    Arc::new(move |task: DownloadTask| {
        let fetcher = Arc::clone(&fetcher);
        let headers = Arc::clone(&headers);
        let dest = output_dir.join(&task.filename);

        async move {
            let mut merged = (*headers).clone();
            if let Some(extra) = task.headers {
                merged.extend(extra);
            }
            let options = FetchOptions {
                timeout,
                headers: merged,
            };
            tracing::debug!(index = task.index, url = %task.url, "Fetching chunk");
            fetcher.fetch(&task.url, &dest, &options).await
        }
        .boxed()
    })
}
