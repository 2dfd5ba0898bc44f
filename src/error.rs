//! Error types for shua
//!
//! This module provides the error taxonomy for the library:
//! - Fetch errors (bad status, timeout, truncated body) which feed the failure policy
//! - Concatenation errors raised by the file concentrator
//! - Configuration and input errors raised before a run starts
//! - Short machine-readable error codes used in progress logs

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for shua operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for shua
///
/// Task handlers return this type as well; the scheduler never propagates it,
/// it hands it to the failure policy instead.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "threads")
        key: Option<String>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A single fetch attempt failed
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Merging chunks into the output stream failed
    #[error("concat error: {0}")]
    Concat(#[from] ConcatError),

    /// Integer-range expression could not be expanded
    #[error("invalid expression: {0}")]
    InvalidExpression(String),

    /// Task input (URL list, JSON file) is malformed
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Remote URL list could not be loaded
    #[error("failed to load remote list from {url}: {reason}")]
    LoadRemoteList {
        /// URL of the list
        url: String,
        /// Why loading failed
        reason: String,
    },

    /// A task handler panicked; the panic payload is kept as text
    #[error("task panicked: {0}")]
    TaskPanicked(String),

    /// The scheduler already reached its terminal state
    #[error("scheduler already finished")]
    SchedulerFinished,

    /// Shutdown in progress - not accepting new work
    #[error("shutdown in progress")]
    ShuttingDown,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Errors from a single fetch attempt
#[derive(Debug, Error)]
pub enum FetchError {
    /// Server answered with a non-success status
    #[error("{url} returned HTTP {status}")]
    BadStatus {
        /// Requested URL
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// Body length did not match the advertised Content-Length
    #[error("{url}: expected {expected} bytes, received {actual}")]
    ContentLengthMismatch {
        /// Requested URL
        url: String,
        /// Advertised Content-Length
        expected: u64,
        /// Bytes actually received
        actual: u64,
    },

    /// Request did not complete within the configured timeout
    #[error("{url} timed out after {}ms", timeout.as_millis())]
    Timeout {
        /// Requested URL
        url: String,
        /// The timeout that fired
        timeout: Duration,
    },
}

/// Errors raised while merging chunks
#[derive(Debug, Error)]
pub enum ConcatError {
    /// A chunk reported as done has no file on disk
    #[error("chunk {index} missing at {path}")]
    MissingChunk {
        /// Sequence index of the chunk
        index: usize,
        /// Where the chunk was expected
        path: PathBuf,
    },

    /// Writing to an output segment failed
    #[error("failed to write {path}: {source}")]
    Write {
        /// Output segment being written
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The merge destination already exists
    #[error("output path {0} already exists")]
    OutputExists(PathBuf),

    /// A previous merge pass failed; the concentrator no longer writes
    #[error("concentrator halted after earlier failure: {0}")]
    Halted(String),
}

impl Error {
    /// Short machine-readable code for log lines
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Io(_) => "io_error",
            Error::Network(e) if e.is_timeout() => "timeout",
            Error::Network(e) if e.is_connect() => "connect_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::Fetch(FetchError::BadStatus { .. }) => "bad_status",
            Error::Fetch(FetchError::ContentLengthMismatch { .. }) => "bad_response",
            Error::Fetch(FetchError::Timeout { .. }) => "timeout",
            Error::Concat(ConcatError::MissingChunk { .. }) => "missing_chunk",
            Error::Concat(ConcatError::Write { .. }) => "write_error",
            Error::Concat(ConcatError::OutputExists(_)) => "output_exists",
            Error::Concat(ConcatError::Halted(_)) => "concat_halted",
            Error::InvalidExpression(_) => "invalid_expression",
            Error::InvalidInput(_) => "invalid_input",
            Error::LoadRemoteList { .. } => "load_remote_list",
            Error::TaskPanicked(_) => "task_panicked",
            Error::SchedulerFinished => "scheduler_finished",
            Error::ShuttingDown => "shutting_down",
            Error::Other(_) => "unknown",
        }
    }
}
