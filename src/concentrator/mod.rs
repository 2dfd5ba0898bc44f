//! Ordered merge of chunk files into the final output.
//!
//! Chunks finish downloading in any order, but their bytes must land in the
//! output strictly by sequence index. [`FileConcentrator`] keeps a sparse map
//! of arrived chunks and a merge frontier (the smallest index not yet
//! written). Each merge pass walks forward from the frontier:
//!
//! - chunk present: copy its bytes to the active output, then optionally
//!   delete the chunk file
//! - chunk absent and its status is [`TaskStatus::Dropped`]: a confirmed gap.
//!   [`ConcatMode::Contiguous`] skips it; [`ConcatMode::Segmented`] closes the
//!   current output and continues in a new numbered segment
//! - chunk absent and not dropped: stop and wait for a later pass
//!
//! Only one pass runs at a time. A trigger that arrives while a pass is
//! running is recorded and picked up by the running pass before it returns,
//! so no trigger is lost and callers never block on each other.
//!
//! Bytes are streamed with [`tokio::io::copy`], which suspends whenever the
//! destination is not ready, so at most one copy buffer is held in memory
//! regardless of how slow the output is.
//!
//! After the first I/O failure the concentrator halts: the failing pass
//! returns the error, every later call returns [`ConcatError::Halted`], and
//! unmerged chunk files stay on disk.

use crate::config::ConcatMode;
use crate::error::{ConcatError, Error, Result};
use crate::status::{TaskStatus, TaskStatusRecord};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Boxed output stream the concentrator writes into
pub type OutputStream = Box<dyn AsyncWrite + Send + Unpin>;

/// One completed chunk waiting to be merged
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConcentrationTask {
    /// Chunk file on disk
    pub file_path: PathBuf,
    /// Sequence index of the chunk
    pub index: usize,
}

impl ConcentrationTask {
    /// Create a concentration task
    pub fn new(file_path: impl Into<PathBuf>, index: usize) -> Self {
        Self {
            file_path: file_path.into(),
            index,
        }
    }
}

/// Opens the output streams the concentrator writes to
///
/// The filesystem implementation is [`FsOutput`]; tests plug in in-memory or
/// deliberately slow sinks.
#[async_trait]
pub trait OutputOpener: Send + Sync {
    /// Create (truncate) the output at `path`
    async fn open(&self, path: &Path) -> io::Result<OutputStream>;
}

/// Writes outputs as regular files, creating parent directories as needed
///
/// An existing file is never truncated; opening it fails with
/// [`io::ErrorKind::AlreadyExists`].
#[derive(Clone, Copy, Debug, Default)]
pub struct FsOutput;

#[async_trait]
impl OutputOpener for FsOutput {
    async fn open(&self, path: &Path) -> io::Result<OutputStream> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await?;
        Ok(Box::new(file))
    }
}

/// Concentrator settings
#[derive(Clone, Debug)]
pub struct ConcentratorOptions {
    /// Output file (contiguous) or segment base name (segmented)
    pub output_path: PathBuf,
    /// Gap handling
    pub mode: ConcatMode,
    /// Delete each chunk file after its bytes are flushed to the output
    pub delete_after_written: bool,
}

struct MergeState {
    writer: Option<OutputStream>,
    current_path: PathBuf,
    /// Smallest index not yet merged
    next_index: usize,
    write_sequence: usize,
    /// Whether the active output has received any bytes
    current_has_data: bool,
    /// A gap was passed in segmented mode; split before the next chunk
    split_pending: bool,
    halted: Option<String>,
    closed: bool,
}

struct Shared {
    status: TaskStatusRecord,
    chunks: Mutex<BTreeMap<usize, ConcentrationTask>>,
    /// Set by every trigger, cleared by the pass that services it
    pending: AtomicBool,
    merge: tokio::sync::Mutex<MergeState>,
    outputs: Mutex<Vec<PathBuf>>,
    opener: Arc<dyn OutputOpener>,
    options: ConcentratorOptions,
}

/// Merges chunk files into ordered output file(s)
///
/// Cloning yields another handle to the same concentrator.
#[derive(Clone)]
pub struct FileConcentrator {
    shared: Arc<Shared>,
}

impl FileConcentrator {
    /// Create a concentrator writing regular files and open its first output
    pub async fn create(options: ConcentratorOptions, status: TaskStatusRecord) -> Result<Self> {
        Self::with_opener(options, status, Arc::new(FsOutput)).await
    }

    /// Create a concentrator with a custom output sink and open its first output
    pub async fn with_opener(
        options: ConcentratorOptions,
        status: TaskStatusRecord,
        opener: Arc<dyn OutputOpener>,
    ) -> Result<Self> {
        let first_path = segment_path(&options, 0);
        let writer = opener
            .open(&first_path)
            .await
            .map_err(|source| open_error(&first_path, source))?;

        tracing::debug!(
            output = %first_path.display(),
            mode = ?options.mode,
            "Concentrator opened output"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                status,
                chunks: Mutex::new(BTreeMap::new()),
                pending: AtomicBool::new(false),
                merge: tokio::sync::Mutex::new(MergeState {
                    writer: Some(writer),
                    current_path: first_path.clone(),
                    next_index: 0,
                    write_sequence: 0,
                    current_has_data: false,
                    split_pending: false,
                    halted: None,
                    closed: false,
                }),
                outputs: Mutex::new(vec![first_path]),
                opener,
                options,
            }),
        })
    }

    /// Register completed chunks and merge whatever became contiguous
    ///
    /// If another merge pass is already running this returns right away and
    /// the running pass picks the new chunks up.
    pub async fn add_tasks<I>(&self, tasks: I) -> Result<()>
    where
        I: IntoIterator<Item = ConcentrationTask>,
    {
        {
            let mut chunks = self.lock_chunks();
            for task in tasks {
                chunks.insert(task.index, task);
            }
        }
        self.check_writable().await
    }

    /// Run a merge pass, e.g. after a status in the shared record changed
    pub async fn check_writable(&self) -> Result<()> {
        self.shared.pending.store(true, Ordering::SeqCst);
        loop {
            let Ok(mut state) = self.shared.merge.try_lock() else {
                // The running pass observes `pending` before it releases the lock
                return Ok(());
            };
            let mut outcome = Ok(());
            while self.shared.pending.swap(false, Ordering::SeqCst) {
                if let Err(e) = self.merge_pass(&mut state).await {
                    outcome = Err(e);
                    break;
                }
            }
            drop(state);

            // A trigger may have landed between the last swap and the unlock
            if outcome.is_err() || !self.shared.pending.load(Ordering::SeqCst) {
                return outcome;
            }
        }
    }

    /// Wait for any running pass, merge what is left, and close the output
    ///
    /// Call only once no further chunks will be added. Returns every output
    /// path produced.
    pub async fn wait_all_files_written(&self) -> Result<Vec<PathBuf>> {
        let mut state = self.shared.merge.lock().await;
        self.shared.pending.store(false, Ordering::SeqCst);
        self.merge_pass(&mut state).await?;

        if let Some(mut writer) = state.writer.take() {
            let path = state.current_path.clone();
            writer
                .shutdown()
                .await
                .map_err(|source| ConcatError::Write { path, source })?;
        }
        state.closed = true;

        let unmerged = self.lock_chunks().len();
        if unmerged > 0 {
            tracing::warn!(
                unmerged,
                frontier = state.next_index,
                "Chunks left unmerged behind an unresolved index"
            );
        }
        Ok(self.output_paths())
    }

    /// Every output file opened so far, in order
    pub fn output_paths(&self) -> Vec<PathBuf> {
        self.shared
            .outputs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Configured destination; in contiguous mode the one and only output file
    pub fn output_path(&self) -> &Path {
        &self.shared.options.output_path
    }

    /// Merge mode
    pub fn mode(&self) -> ConcatMode {
        self.shared.options.mode
    }

    /// Chunks received but not merged yet
    pub fn unmerged(&self) -> usize {
        self.lock_chunks().len()
    }

    fn lock_chunks(&self) -> std::sync::MutexGuard<'_, BTreeMap<usize, ConcentrationTask>> {
        self.shared.chunks.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn merge_pass(&self, state: &mut MergeState) -> Result<()> {
        if let Some(reason) = &state.halted {
            return Err(ConcatError::Halted(reason.clone()).into());
        }
        if state.closed {
            return Err(ConcatError::Halted("concentrator already closed".to_string()).into());
        }

        loop {
            let index = state.next_index;
            let chunk = self.lock_chunks().remove(&index);

            match chunk {
                Some(chunk) => {
                    if let Err(e) = self.write_chunk(state, &chunk).await {
                        tracing::error!(index, error = %e, "Concatenation failed, halting merge");
                        state.halted = Some(e.to_string());
                        return Err(e);
                    }
                    state.next_index += 1;
                }
                None => match self.shared.status.get(index) {
                    Some(TaskStatus::Dropped) => {
                        tracing::debug!(index, "Skipping dropped chunk");
                        if self.shared.options.mode == ConcatMode::Segmented {
                            state.split_pending = true;
                        }
                        state.next_index += 1;
                    }
                    // Pending, or done but not handed over yet
                    _ => return Ok(()),
                },
            }
        }
    }

    async fn write_chunk(&self, state: &mut MergeState, chunk: &ConcentrationTask) -> Result<()> {
        if state.split_pending && state.current_has_data {
            self.rotate(state).await?;
        }
        state.split_pending = false;

        let mut source = match tokio::fs::File::open(&chunk.file_path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ConcatError::MissingChunk {
                    index: chunk.index,
                    path: chunk.file_path.clone(),
                }
                .into());
            }
            Err(e) => return Err(Error::Io(e)),
        };

        let path = state.current_path.clone();
        let Some(writer) = state.writer.as_mut() else {
            return Err(ConcatError::Halted("output stream is not open".to_string()).into());
        };
        let copied = async {
            let copied = tokio::io::copy(&mut source, &mut *writer).await?;
            writer.flush().await?;
            Ok::<_, io::Error>(copied)
        }
        .await
        .map_err(|source| ConcatError::Write { path, source })?;

        state.current_has_data = true;
        tracing::debug!(index = chunk.index, bytes = copied, "Chunk merged");

        if self.shared.options.delete_after_written {
            drop(source);
            if let Err(e) = tokio::fs::remove_file(&chunk.file_path).await {
                tracing::warn!(
                    path = %chunk.file_path.display(),
                    error = %e,
                    "Failed to delete merged chunk"
                );
            }
        }
        Ok(())
    }

    async fn rotate(&self, state: &mut MergeState) -> Result<()> {
        if let Some(mut writer) = state.writer.take() {
            writer
                .shutdown()
                .await
                .map_err(|source| ConcatError::Write {
                    path: state.current_path.clone(),
                    source,
                })?;
        }

        let sequence = state.write_sequence + 1;
        let path = segment_path(&self.shared.options, sequence);
        let writer = self
            .shared
            .opener
            .open(&path)
            .await
            .map_err(|source| open_error(&path, source))?;

        tracing::info!(
            segment = sequence,
            output = %path.display(),
            "Gap in sequence, starting new output segment"
        );

        state.writer = Some(writer);
        state.write_sequence = sequence;
        state.current_path = path.clone();
        state.current_has_data = false;
        self.shared
            .outputs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(path);
        Ok(())
    }
}

/// Path of output number `sequence`
///
/// Segmented outputs are named `<stem>_<sequence>.<ext>` next to the
/// configured path; contiguous mode always writes the configured path.
fn segment_path(options: &ConcentratorOptions, sequence: usize) -> PathBuf {
    output_file(&options.output_path, options.mode, sequence)
}

/// File that output number `sequence` is written to for a configured `base`
pub(crate) fn output_file(base: &Path, mode: ConcatMode, sequence: usize) -> PathBuf {
    match mode {
        ConcatMode::Contiguous => base.to_path_buf(),
        ConcatMode::Segmented => {
            let stem = base
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let name = match base.extension() {
                Some(ext) => format!("{stem}_{sequence}.{}", ext.to_string_lossy()),
                None => format!("{stem}_{sequence}"),
            };
            base.with_file_name(name)
        }
    }
}

fn open_error(path: &Path, source: io::Error) -> Error {
    if source.kind() == io::ErrorKind::AlreadyExists {
        ConcatError::OutputExists(path.to_path_buf()).into()
    } else {
        ConcatError::Write {
            path: path.to_path_buf(),
            source,
        }
        .into()
    }
}
