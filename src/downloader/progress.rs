//! Progress and ETA reporting.

use std::time::{Duration, Instant};

/// Tracks elapsed time for ETA estimates
#[derive(Debug, Clone, Copy)]
pub(crate) struct Progress {
    started: Instant,
}

impl Progress {
    pub(crate) fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    /// Log one finished chunk
    pub(crate) fn report(&self, finished: usize, total: usize) {
        let percent = if total == 0 {
            100.0
        } else {
            finished as f64 / total as f64 * 100.0
        };
        tracing::info!(
            finished,
            total,
            percent = %format!("{percent:.2}"),
            eta = %format_eta(estimate_remaining(self.started.elapsed(), finished, total)),
            "{finished} / {total} finished"
        );
    }
}

/// Remaining time extrapolated from the average time per finished chunk
fn estimate_remaining(used: Duration, finished: usize, total: usize) -> Duration {
    if finished == 0 {
        return Duration::ZERO;
    }
    let projected = used.as_secs_f64() / finished as f64 * total as f64;
    Duration::from_secs_f64((projected - used.as_secs_f64()).max(0.0))
}

/// Format a duration as `Ns`, `Mm Ns` or `Hh Mm Ns`, rounded to whole seconds
pub fn format_eta(remaining: Duration) -> String {
    let secs = remaining.as_secs_f64().round() as u64;
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
