//! # shua
//!
//! Bulk concurrent downloader for URL lists, with optional in-order merging
//! of the downloaded chunks (HLS segments, split archives and the like).
//!
//! ## Design Philosophy
//!
//! shua is designed to be:
//! - **Bounded** - A fixed number of fetches run at once, failed ones are retried
//! - **Order-preserving** - Chunks are merged by their position in the list, whatever order they finish in
//! - **Library-first** - The CLI is a thin layer over [`Downloader`]
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use shua::{Config, Downloader};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config {
//!         threads: 16,
//!         concat: true,
//!         ..Default::default()
//!     };
//!
//!     let downloader = Downloader::new(config)?;
//!     downloader.load_urls_from_expression("https://cdn.example.com/seg-{{%d(0,99)}}.ts")?;
//!
//!     // Subscribe to events
//!     let mut events = downloader.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let summary = downloader.run().await?;
//!     println!("{} of {} finished", summary.finished, summary.total);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// In-order merging of chunk files
pub mod concentrator;
/// Configuration types
pub mod config;
/// Download orchestrator (decomposed into focused submodules)
pub mod downloader;
/// Error types
pub mod error;
/// Integer-range URL expressions
pub mod expression;
/// Single-URL fetching
pub mod fetch;
/// Max-priority queue with FIFO ties
pub mod priority_queue;
/// Failure decisions and retry policies
pub mod retry;
/// Bounded-concurrency task scheduler
pub mod scheduler;
/// Per-task completion status
pub mod status;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use concentrator::{ConcentrationTask, ConcentratorOptions, FileConcentrator};
pub use config::{ConcatMode, Config};
pub use downloader::Downloader;
pub use error::{ConcatError, Error, FetchError, Result};
pub use fetch::{FetchOptions, Fetcher, HttpFetcher};
pub use priority_queue::PriorityQueue;
pub use retry::{FailurePolicy, TaskFailDecision};
pub use scheduler::{NewTask, SchedulerEvent, SchedulerTask, TaskScheduler};
pub use status::{TaskStatus, TaskStatusRecord};
pub use types::{DownloadTask, Event, Summary, TaskId, UrlTask};

/// Helper function to run the downloader with graceful signal handling.
///
/// Runs [`Downloader::run`] while waiting for a termination signal; a signal
/// calls the downloader's `shutdown()`, and the returned summary then has
/// `interrupted` set.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use shua::{Config, Downloader, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let downloader = Downloader::new(Config::default())?;
///     downloader.add_urls(["https://example.com/a.bin", "https://example.com/b.bin"])?;
///
///     // Run with automatic signal handling
///     let summary = run_with_shutdown(&downloader).await?;
///     println!("interrupted: {}", summary.interrupted);
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(downloader: &Downloader) -> Result<Summary> {
    let watcher = downloader.clone();
    let signals = tokio::spawn(async move {
        wait_for_signal().await;
        watcher.shutdown();
    });

    let result = downloader.run().await;
    signals.abort();
    result
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM signal");
        }
        (Err(_), Err(e)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C signal"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C signal"),
    }
}
