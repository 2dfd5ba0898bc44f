//! Run orchestration: scheduler events drive status updates, the merge, and progress.

use crate::concentrator::{ConcentrationTask, ConcentratorOptions, FileConcentrator};
use crate::error::{Error, Result};
use crate::retry::{IsRetryable, TaskFailDecision};
use crate::scheduler::{SchedulerEvent, SchedulerTask};
use crate::types::{DownloadTask, Event, Summary};
use std::path::PathBuf;
use std::sync::Arc;

use super::Downloader;
use super::progress::Progress;

impl Downloader {
    /// Download every queued task and return once the scheduler is done
    ///
    /// Returns immediately with an empty summary when no tasks were added.
    /// Dropped tasks do not make the run fail; they are counted in the
    /// returned [`Summary`]. Only setup problems (creating the output
    /// directory or the merge output) are errors.
    pub async fn run(&self) -> Result<Summary> {
        let output_dir = self.config.output.clone();
        let first_url = match self.lock_tasks().first() {
            Some(task) => task.url.clone(),
            None => {
                tracing::info!("No tasks to download");
                return Ok(Summary {
                    output_dir,
                    ..Default::default()
                });
            }
        };

        tokio::fs::create_dir_all(&output_dir).await?;

        // `None` when not concatenating, or once a merge failure disabled it
        let mut concat = if self.config.concat {
            Some(self.create_concentrator(&first_url).await?)
        } else {
            None
        };

        let mut events = self.scheduler.subscribe();
        let progress = Progress::start();
        self.scheduler.start();

        let mut interrupted = false;
        while let Some(event) = events.recv().await {
            match event {
                SchedulerEvent::TaskFinish {
                    task,
                    finish_count,
                    total_count,
                    ..
                } => {
                    self.on_task_finish(&mut concat, task, finish_count, total_count, &progress)
                        .await;
                }
                SchedulerEvent::TaskError {
                    task,
                    error,
                    decision,
                } => self.on_task_error(&task, &error, decision),
                SchedulerEvent::TaskDrop { task, .. } => {
                    self.on_task_drop(&mut concat, &task).await;
                }
                SchedulerEvent::Finish => break,
                SchedulerEvent::Cancelled { queued, in_flight } => {
                    tracing::warn!(queued, in_flight, "Download interrupted");
                    interrupted = true;
                    break;
                }
            }
        }

        let concat_outputs = self.finish_concat(&mut concat).await;
        let stats = self.scheduler.stats();
        let summary = Summary {
            total: stats.total,
            finished: stats.finished,
            dropped: stats.dropped,
            output_dir,
            concat_outputs,
            interrupted,
        };

        self.log_summary(&summary);
        self.emit_event(Event::Finished(summary.clone()));
        Ok(summary)
    }

    async fn create_concentrator(&self, first_url: &str) -> Result<FileConcentrator> {
        let output_path = self.config.resolve_concat_output(first_url);
        let options = ConcentratorOptions {
            output_path,
            mode: self.config.concat_mode,
            delete_after_written: self.config.delete_chunks_after_concat,
        };
        FileConcentrator::create(options, self.status.clone()).await
    }

    async fn on_task_finish(
        &self,
        concat: &mut Option<FileConcentrator>,
        task: SchedulerTask<DownloadTask>,
        finished: usize,
        total: usize,
        progress: &Progress,
    ) {
        let DownloadTask {
            url,
            index,
            filename,
            ..
        } = task.payload;

        self.status.mark_done(index);
        if let Some(concentrator) = concat.clone() {
            let chunk = ConcentrationTask::new(self.config.output.join(&filename), index);
            if let Err(e) = concentrator.add_tasks([chunk]).await {
                self.disable_concat(concat, e);
            }
        }

        progress.report(finished, total);
        self.emit_event(Event::TaskFinished {
            index,
            url,
            finished,
            total,
        });
    }

    fn on_task_error(
        &self,
        task: &SchedulerTask<DownloadTask>,
        error: &Arc<Error>,
        decision: TaskFailDecision,
    ) {
        let dropped = decision == TaskFailDecision::Drop;
        let outcome = if dropped {
            "max retries exceeded, drop"
        } else {
            "retry later"
        };
        tracing::warn!(
            index = task.payload.index,
            url = %task.payload.url,
            attempt = task.retry_count,
            reason = error.error_code(),
            retryable = error.is_retryable(),
            error = %error,
            "Download failed, {outcome}"
        );

        self.emit_event(Event::TaskFailed {
            index: task.payload.index,
            url: task.payload.url.clone(),
            error: error.to_string(),
            dropped,
        });
    }

    async fn on_task_drop(
        &self,
        concat: &mut Option<FileConcentrator>,
        task: &SchedulerTask<DownloadTask>,
    ) {
        let index = task.payload.index;
        self.status.mark_dropped(index);

        // The gap may unblock chunks already waiting behind it
        if let Some(concentrator) = concat.clone()
            && let Err(e) = concentrator.check_writable().await
        {
            self.disable_concat(concat, e);
        }

        self.emit_event(Event::TaskDropped {
            index,
            url: task.payload.url.clone(),
        });
    }

    async fn finish_concat(&self, concat: &mut Option<FileConcentrator>) -> Vec<PathBuf> {
        let Some(concentrator) = concat.clone() else {
            return Vec::new();
        };
        tracing::info!("Please wait, merging remaining chunks");
        match concentrator.wait_all_files_written().await {
            Ok(paths) => paths,
            Err(e) => {
                self.disable_concat(concat, e);
                Vec::new()
            }
        }
    }

    /// Log a merge failure once and stop concatenating for the rest of the run
    fn disable_concat(&self, concat: &mut Option<FileConcentrator>, error: Error) {
        if concat.take().is_none() {
            return;
        }
        tracing::error!(
            error = %error,
            "Concatenation failed and is disabled for this run; chunk files are kept in the output directory"
        );
        self.emit_event(Event::ConcatFailed {
            error: error.to_string(),
        });
    }

    fn log_summary(&self, summary: &Summary) {
        match summary.concat_outputs.as_slice() {
            [] => tracing::info!(
                output = %summary.output_dir.display(),
                "All finished. Please check out your files"
            ),
            [single] => tracing::info!(
                output = %single.display(),
                "All finished. Please check out your file"
            ),
            many => tracing::info!(
                outputs = ?many,
                "All finished. Please check out your files"
            ),
        }
        if summary.dropped > 0 {
            tracing::warn!(
                dropped = summary.dropped,
                "{} files were dropped due to unrecoverable errors",
                summary.dropped
            );
        }
    }
}
