//! Failure policies for scheduled tasks
//!
//! When a task handler fails, the scheduler asks a [`FailurePolicy`] what to do
//! with the task. The policy sees the error and the task (including how many
//! failures it has already recorded) and returns a [`TaskFailDecision`].
//!
//! No delay is applied between attempts: a retried task re-enters the priority
//! queue immediately.
//!
//! # Example
//!
//! ```
//! use shua::retry::{TaskFailDecision, retry_limit_policy};
//! use shua::scheduler::SchedulerTask;
//! use shua::{Error, TaskId};
//!
//! let policy = retry_limit_policy::<u32>(2);
//! let mut task = SchedulerTask::new(TaskId::new(1), 7u32, 0);
//!
//! task.retry_count = 2;
//! assert_eq!(policy(&Error::Other("boom".into()), &task), TaskFailDecision::Retry);
//! task.retry_count = 3;
//! assert_eq!(policy(&Error::Other("boom".into()), &task), TaskFailDecision::Drop);
//! ```

use crate::error::{Error, FetchError};
use crate::scheduler::SchedulerTask;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// What the scheduler does with a task whose handler failed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskFailDecision {
    /// Re-enqueue with the same priority
    Retry,
    /// Abandon permanently
    Drop,
    /// Re-enqueue with priority + 1
    IncreasePriority,
}

impl TaskFailDecision {
    /// Whether the task goes back into the queue
    pub fn requeues(&self) -> bool {
        !matches!(self, TaskFailDecision::Drop)
    }
}

/// Caller-supplied decision function, consulted once per failed attempt
pub type FailurePolicy<P> =
    Arc<dyn Fn(&Error, &SchedulerTask<P>) -> TaskFailDecision + Send + Sync>;

/// Wrap a closure as a [`FailurePolicy`]
pub fn failure_policy<P, F>(decide: F) -> FailurePolicy<P>
where
    F: Fn(&Error, &SchedulerTask<P>) -> TaskFailDecision + Send + Sync + 'static,
{
    Arc::new(decide)
}

/// Policy that retries every failure forever (the scheduler default)
pub fn always_retry<P>() -> FailurePolicy<P> {
    failure_policy(|_, _| TaskFailDecision::Retry)
}

/// Policy used by the downloader: drop once `retry_count > limit`, otherwise retry
///
/// `retry_count` already includes the failure being decided on, so with
/// `limit = 2` a task is retried after its first and second failures and
/// dropped after the third.
pub fn retry_limit_policy<P>(limit: u32) -> FailurePolicy<P> {
    failure_policy(move |_, task| {
        if task.retry_count > limit {
            TaskFailDecision::Drop
        } else {
            TaskFailDecision::Retry
        }
    })
}

/// Trait for errors that can be classified as transient or permanent
///
/// The download policy does not branch on this; it is reported alongside
/// failures so logs distinguish "server flaked" from "URL is wrong".
pub trait IsRetryable {
    /// Returns true if the error is transient and another attempt may succeed
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            // Network errors are generally retryable
            Error::Network(e) => e.is_timeout() || e.is_connect() || e.is_body() || e.is_request(),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::UnexpectedEof
            ),
            Error::Fetch(FetchError::Timeout { .. }) => true,
            Error::Fetch(FetchError::ContentLengthMismatch { .. }) => true,
            // 5xx, 408 and 429 are worth another try; other 4xx are not
            Error::Fetch(FetchError::BadStatus { status, .. }) => {
                *status >= 500 || *status == 408 || *status == 429
            }
            Error::TaskPanicked(_) => false,
            Error::Config { .. }
            | Error::Serialization(_)
            | Error::Concat(_)
            | Error::InvalidExpression(_)
            | Error::InvalidInput(_)
            | Error::LoadRemoteList { .. }
            | Error::SchedulerFinished
            | Error::ShuttingDown
            | Error::Other(_) => false,
        }
    }
}
