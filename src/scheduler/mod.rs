//! Bounded-concurrency task scheduler with a pluggable failure policy.
//!
//! The scheduler owns a priority queue of tasks and a single driver loop. The
//! loop keeps at most `max_concurrency` handler invocations in flight, always
//! dequeuing the highest-priority task next. When a handler fails, the
//! configured [`FailurePolicy`] decides whether the task is retried, retried
//! with a higher priority, or dropped.
//!
//! Lifecycle events are delivered to every observer registered with
//! [`TaskScheduler::subscribe`]:
//! - [`SchedulerEvent::TaskFinish`] when a handler succeeds
//! - [`SchedulerEvent::TaskError`] when a handler fails (decision already applied)
//! - [`SchedulerEvent::TaskDrop`] when the decision was to drop
//! - [`SchedulerEvent::Finish`] exactly once, when the queue is empty and nothing
//!   is in flight
//!
//! [`SchedulerEvent::Cancelled`] replaces `Finish` when the cancellation token
//! fires. Either terminal event is the last one any observer sees.
//!
//! The driver wakes on handler completion, on [`TaskScheduler::add_tasks`],
//! and on cancellation; there is no polling interval.
//!
//! # Example
//!
//! ```
//! use shua::scheduler::{NewTask, SchedulerEvent, TaskScheduler};
//!
//! # #[tokio::main]
//! # async fn main() -> shua::Result<()> {
//! let scheduler = TaskScheduler::new(2);
//! let mut events = scheduler.subscribe();
//!
//! scheduler.add_tasks((0..3).map(|n| {
//!     NewTask::new(n, -n, |n: i64| async move {
//!         tracing::debug!(n, "working");
//!         Ok(())
//!     })
//! }))?;
//! scheduler.start();
//!
//! while let Some(event) = events.recv().await {
//!     if matches!(event, SchedulerEvent::Finish) {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use crate::priority_queue::{Prioritized, PriorityQueue};
use crate::retry::{FailurePolicy, TaskFailDecision, always_retry};
use crate::types::TaskId;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Async unit of work invoked with a clone of the task payload
pub type TaskHandler<P> = Arc<dyn Fn(P) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// A task as the scheduler tracks it
///
/// The handler is kept next to the task inside the queue rather than in this
/// struct, so events and policies only see plain data.
#[derive(Clone, Debug)]
pub struct SchedulerTask<P> {
    /// Identifier assigned at enqueue time
    pub id: TaskId,
    /// Caller-defined data handed to the handler
    pub payload: P,
    /// Higher runs first
    pub priority: i64,
    /// Failures recorded so far (incremented before the policy is consulted)
    pub retry_count: u32,
}

impl<P> SchedulerTask<P> {
    /// Build a task record with no recorded failures
    pub fn new(id: TaskId, payload: P, priority: i64) -> Self {
        Self {
            id,
            payload,
            priority,
            retry_count: 0,
        }
    }
}

/// Input to [`TaskScheduler::add_tasks`]
pub struct NewTask<P> {
    /// Work to run for this task
    pub handler: TaskHandler<P>,
    /// Caller-defined data
    pub payload: P,
    /// Initial priority
    pub priority: i64,
}

impl<P> NewTask<P> {
    /// Wrap an async closure as a task handler
    pub fn new<F, Fut>(payload: P, priority: i64, handler: F) -> Self
    where
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            handler: Arc::new(move |payload| handler(payload).boxed()),
            payload,
            priority,
        }
    }

    /// Use an already shared handler (one handler for many tasks)
    pub fn with_handler(payload: P, priority: i64, handler: TaskHandler<P>) -> Self {
        Self {
            handler,
            payload,
            priority,
        }
    }
}

/// Lifecycle events published to observers
#[derive(Clone, Debug)]
pub enum SchedulerEvent<P> {
    /// Handler succeeded
    TaskFinish {
        /// The finished task
        task: SchedulerTask<P>,
        /// Tasks finished so far, including this one
        finish_count: usize,
        /// Distinct tasks ever added
        total_count: usize,
        /// Tasks dropped so far
        drop_count: usize,
    },
    /// Handler failed; `decision` has already been applied
    TaskError {
        /// The task after the decision was applied
        task: SchedulerTask<P>,
        /// What the handler returned
        error: Arc<Error>,
        /// Policy outcome
        decision: TaskFailDecision,
    },
    /// Emitted after `TaskError` when the decision was to drop
    TaskDrop {
        /// The dropped task
        task: SchedulerTask<P>,
        /// Tasks finished so far
        finish_count: usize,
        /// Tasks dropped so far, including this one
        drop_count: usize,
        /// Distinct tasks ever added
        total_count: usize,
    },
    /// Queue drained and nothing in flight. Terminal.
    Finish,
    /// Cancellation token fired before the queue drained. Terminal.
    Cancelled {
        /// Tasks still waiting in the queue
        queued: usize,
        /// Handlers that were aborted
        in_flight: usize,
    },
}

impl<P> SchedulerEvent<P> {
    /// Whether no event can follow this one
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SchedulerEvent::Finish | SchedulerEvent::Cancelled { .. }
        )
    }
}

/// Point-in-time counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Tasks waiting in the queue
    pub queued: usize,
    /// Handlers currently running
    pub in_flight: usize,
    /// Tasks that succeeded
    pub finished: usize,
    /// Tasks that were dropped
    pub dropped: usize,
    /// Distinct tasks ever added
    pub total: usize,
}

struct Queued<P> {
    task: SchedulerTask<P>,
    handler: TaskHandler<P>,
}

impl<P> Prioritized for Queued<P> {
    fn priority(&self) -> i64 {
        self.task.priority
    }
}

type Completion<P> = (SchedulerTask<P>, TaskHandler<P>, Result<()>);

/// Pending work plus the flag that stops accepting more
///
/// `closed` is only read and written under the same lock as `tasks`, so the
/// driver's "nothing left" decision and `add_tasks` cannot interleave.
struct TaskQueue<P> {
    tasks: PriorityQueue<Queued<P>>,
    closed: bool,
}

struct Inner<P> {
    queue: Mutex<TaskQueue<P>>,
    max_concurrency: AtomicUsize,
    policy: RwLock<FailurePolicy<P>>,
    observers: Mutex<Vec<mpsc::UnboundedSender<SchedulerEvent<P>>>>,
    wake: Notify,
    next_id: AtomicU64,
    in_flight: AtomicUsize,
    finish_count: AtomicUsize,
    drop_count: AtomicUsize,
    total_count: AtomicUsize,
    started: AtomicBool,
    finished: watch::Sender<bool>,
    cancel: CancellationToken,
}

/// Generic bounded-concurrency executor
///
/// Cloning yields another handle to the same scheduler. Separate
/// `TaskScheduler::new` calls are fully independent.
pub struct TaskScheduler<P> {
    inner: Arc<Inner<P>>,
}

impl<P> Clone for TaskScheduler<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P> TaskScheduler<P>
where
    P: Clone + Send + 'static,
{
    /// Scheduler with the given concurrency limit and the always-retry policy
    pub fn new(max_concurrency: usize) -> Self {
        Self::with_cancellation(max_concurrency, CancellationToken::new())
    }

    /// Scheduler that stops when `cancel` fires
    pub fn with_cancellation(max_concurrency: usize, cancel: CancellationToken) -> Self {
        let (finished, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(TaskQueue {
                    tasks: PriorityQueue::new(),
                    closed: false,
                }),
                max_concurrency: AtomicUsize::new(max_concurrency.max(1)),
                policy: RwLock::new(always_retry()),
                observers: Mutex::new(Vec::new()),
                wake: Notify::new(),
                next_id: AtomicU64::new(0),
                in_flight: AtomicUsize::new(0),
                finish_count: AtomicUsize::new(0),
                drop_count: AtomicUsize::new(0),
                total_count: AtomicUsize::new(0),
                started: AtomicBool::new(false),
                finished,
                cancel,
            }),
        }
    }

    /// Set the concurrency limit (minimum 1) and failure policy
    ///
    /// Takes effect on the next scheduling step; handlers already running are
    /// not interrupted when the limit shrinks.
    pub fn configure(&self, max_concurrency: usize, policy: FailurePolicy<P>) {
        self.inner
            .max_concurrency
            .store(max_concurrency.max(1), Ordering::SeqCst);
        *self.inner.policy.write().unwrap_or_else(|e| e.into_inner()) = policy;
        self.inner.wake.notify_one();
    }

    /// Register an observer. Every observer receives every subsequent event.
    ///
    /// The channel closes after the terminal event. Subscribing after the
    /// terminal event yields a receiver that is already closed.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SchedulerEvent<P>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut observers = self.lock_observers();
        // Checked under the observer lock so a concurrent terminate cannot miss us
        if !self.is_finished() {
            observers.push(tx);
        }
        rx
    }

    /// Enqueue tasks, assigning ids and `retry_count = 0`
    ///
    /// Works before or after [`start`](Self::start); a running scheduler picks
    /// new tasks up on its next step. Once the driver has found nothing left
    /// to run, tasks are rejected with [`Error::SchedulerFinished`] and none
    /// of them are counted.
    pub fn add_tasks<I>(&self, tasks: I) -> Result<Vec<TaskId>>
    where
        I: IntoIterator<Item = NewTask<P>>,
    {
        if self.inner.cancel.is_cancelled() {
            return Err(Error::ShuttingDown);
        }

        let mut ids = Vec::new();
        {
            let mut queue = self.lock_queue();
            if queue.closed {
                return Err(Error::SchedulerFinished);
            }
            queue.tasks.insert_multi(tasks.into_iter().map(|new| {
                let id = TaskId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
                ids.push(id);
                Queued {
                    task: SchedulerTask::new(id, new.payload, new.priority),
                    handler: new.handler,
                }
            }));
            // Counted under the lock so no event can report more finishes than tasks
            self.inner
                .total_count
                .fetch_add(ids.len(), Ordering::SeqCst);
        }

        tracing::debug!(count = ids.len(), "Tasks added to scheduler");
        self.inner.wake.notify_one();
        Ok(ids)
    }

    /// Begin pulling work. Calling it again while running is a no-op.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            tracing::debug!("Scheduler already started");
            self.inner.wake.notify_one();
            return;
        }
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.drive().await });
    }

    /// Resolve once the terminal event has been emitted
    pub async fn wait_finished(&self) {
        let mut rx = self.inner.finished.subscribe();
        // The sender lives in `inner`, which we hold, so this cannot fail
        let _ = rx.wait_for(|finished| *finished).await;
    }

    /// Whether the terminal event has been emitted
    pub fn is_finished(&self) -> bool {
        *self.inner.finished.borrow()
    }

    /// Token that stops the scheduler when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Current counters
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            queued: self.lock_queue().tasks.size(),
            in_flight: self.inner.in_flight.load(Ordering::SeqCst),
            finished: self.inner.finish_count.load(Ordering::SeqCst),
            dropped: self.inner.drop_count.load(Ordering::SeqCst),
            total: self.inner.total_count.load(Ordering::SeqCst),
        }
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, TaskQueue<P>> {
        self.inner.lock_queue()
    }

    fn lock_observers(
        &self,
    ) -> std::sync::MutexGuard<'_, Vec<mpsc::UnboundedSender<SchedulerEvent<P>>>> {
        self.inner.observers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<P> Inner<P>
where
    P: Clone + Send + 'static,
{
    fn lock_queue(&self) -> std::sync::MutexGuard<'_, TaskQueue<P>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Stop accepting tasks if nothing is queued; decided under the queue lock
    fn close_if_drained(&self) -> bool {
        let mut queue = self.lock_queue();
        if queue.tasks.is_empty() {
            queue.closed = true;
        }
        queue.closed
    }

    /// The scheduling loop. Only this loop dequeues, so a task instance is
    /// never in flight twice.
    async fn drive(self: Arc<Self>) {
        let mut running: JoinSet<Completion<P>> = JoinSet::new();

        loop {
            // 1. Refill the concurrency window
            let limit = self.max_concurrency.load(Ordering::SeqCst);
            while running.len() < limit {
                let Some(Queued { task, handler }) = self.lock_queue().tasks.extract_max() else {
                    break;
                };
                self.in_flight.fetch_add(1, Ordering::SeqCst);
                tracing::trace!(task_id = %task.id, priority = task.priority, "Dispatching task");

                let invocation = handler(task.payload.clone());
                running.spawn(async move {
                    let outcome = match AssertUnwindSafe(invocation).catch_unwind().await {
                        Ok(result) => result,
                        Err(panic) => Err(Error::TaskPanicked(panic_message(panic.as_ref()))),
                    };
                    (task, handler, outcome)
                });
            }

            // 2. Terminal check: nothing queued and nothing running
            if running.is_empty() && self.close_if_drained() {
                self.terminate(SchedulerEvent::Finish);
                tracing::debug!("Scheduler finished");
                return;
            }

            // 3. Sleep until something changes
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    let in_flight = running.len();
                    running.shutdown().await;
                    self.in_flight.store(0, Ordering::SeqCst);
                    let queued = {
                        let mut queue = self.lock_queue();
                        queue.closed = true;
                        queue.tasks.size()
                    };
                    tracing::info!(queued, in_flight, "Scheduler cancelled");
                    self.terminate(SchedulerEvent::Cancelled { queued, in_flight });
                    return;
                }
                Some(joined) = running.join_next(), if !running.is_empty() => {
                    match joined {
                        Ok((task, handler, outcome)) => self.complete(task, handler, outcome),
                        Err(e) => {
                            // Handlers are panic-guarded and only aborted on cancel
                            self.in_flight.fetch_sub(1, Ordering::SeqCst);
                            tracing::error!(error = %e, "Task runner failed to join");
                        }
                    }
                }
                _ = self.wake.notified() => {}
            }
        }
    }

    fn complete(&self, mut task: SchedulerTask<P>, handler: TaskHandler<P>, outcome: Result<()>) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let error = match outcome {
            Ok(()) => {
                let finish_count = self.finish_count.fetch_add(1, Ordering::SeqCst) + 1;
                self.emit(SchedulerEvent::TaskFinish {
                    task,
                    finish_count,
                    total_count: self.total_count.load(Ordering::SeqCst),
                    drop_count: self.drop_count.load(Ordering::SeqCst),
                });
                return;
            }
            Err(error) => error,
        };

        task.retry_count += 1;
        let policy = Arc::clone(&*self.policy.read().unwrap_or_else(|e| e.into_inner()));
        let decision = policy(&error, &task);

        if decision == TaskFailDecision::IncreasePriority {
            task.priority += 1;
        }
        let snapshot = task.clone();

        match decision {
            TaskFailDecision::Drop => {
                let drop_count = self.drop_count.fetch_add(1, Ordering::SeqCst) + 1;
                self.emit(SchedulerEvent::TaskError {
                    task: snapshot.clone(),
                    error: Arc::new(error),
                    decision,
                });
                self.emit(SchedulerEvent::TaskDrop {
                    task: snapshot,
                    finish_count: self.finish_count.load(Ordering::SeqCst),
                    drop_count,
                    total_count: self.total_count.load(Ordering::SeqCst),
                });
            }
            TaskFailDecision::Retry | TaskFailDecision::IncreasePriority => {
                self.lock_queue().tasks.insert(Queued { task, handler });
                self.emit(SchedulerEvent::TaskError {
                    task: snapshot,
                    error: Arc::new(error),
                    decision,
                });
            }
        }
    }

    fn emit(&self, event: SchedulerEvent<P>) {
        let mut observers = self.observers.lock().unwrap_or_else(|e| e.into_inner());
        // Drop observers whose receiver is gone
        observers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn terminate(&self, event: SchedulerEvent<P>) {
        let mut observers = self.observers.lock().unwrap_or_else(|e| e.into_inner());
        for tx in observers.iter() {
            let _ = tx.send(event.clone());
        }
        // Dropping the senders closes every receiver after the terminal event
        observers.clear();
        self.finished.send_replace(true);
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
