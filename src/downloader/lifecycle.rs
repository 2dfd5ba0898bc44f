//! Shutdown coordination.

use tokio_util::sync::CancellationToken;

use super::Downloader;

impl Downloader {
    /// Stop the run early
    ///
    /// The scheduler stops dequeuing, aborts in-flight fetches, and emits its
    /// terminal `Cancelled` event. [`Downloader::run`] then flushes the
    /// contiguous prefix the concentrator already has and returns a summary
    /// with `interrupted` set. Chunks downloaded so far stay on disk.
    pub fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        tracing::info!("Initiating graceful shutdown");
        self.shutdown.cancel();
    }

    /// Token that triggers [`Downloader::shutdown`] when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Whether shutdown was requested
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
