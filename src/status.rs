//! Per-index task status shared between the orchestrator and the concentrator.
//!
//! The record is a grow-only arena indexed by task sequence index; the only
//! shrink is [`TaskStatusRecord::release`], which returns slots whose tasks
//! were never accepted. It has a
//! single writer (the orchestrator, reacting to scheduler events) and a single
//! reader (the concentrator's merge pass). Each slot moves at most once, from
//! [`TaskStatus::Pending`] to either [`TaskStatus::Done`] or
//! [`TaskStatus::Dropped`], and never reverts. Readers never wait: a slot that
//! is still pending is simply re-examined on the next merge pass.

use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::{Arc, RwLock};

/// Lifecycle of one download task, keyed by its sequence index
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Not resolved yet (queued, running, or waiting for a retry)
    Pending,
    /// Chunk file is complete on disk
    Done,
    /// Task was abandoned; its index is a confirmed gap
    Dropped,
}

impl TaskStatus {
    /// Whether the status is final
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Pending)
    }
}

/// Cloneable handle to the shared status arena
#[derive(Clone, Debug, Default)]
pub struct TaskStatusRecord {
    slots: Arc<RwLock<Vec<TaskStatus>>>,
}

impl TaskStatusRecord {
    /// Create an empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `count` pending slots and return the index range they occupy
    pub fn push_pending(&self, count: usize) -> Range<usize> {
        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
        let start = slots.len();
        slots.resize(start + count, TaskStatus::Pending);
        start..slots.len()
    }

    /// Give back slots from [`push_pending`](Self::push_pending) whose tasks were rejected
    ///
    /// Only the most recent range can be released, and only while every slot
    /// in it is still pending. Returns whether the slots were removed.
    pub(crate) fn release(&self, range: Range<usize>) -> bool {
        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
        let releasable = slots.len() == range.end
            && slots
                .get(range.clone())
                .is_some_and(|tail| tail.iter().all(|s| *s == TaskStatus::Pending));
        if releasable {
            slots.truncate(range.start);
        }
        releasable
    }

    /// Mark `index` as done. Returns false if the slot is unknown or already final.
    pub fn mark_done(&self, index: usize) -> bool {
        self.resolve(index, TaskStatus::Done)
    }

    /// Mark `index` as dropped. Returns false if the slot is unknown or already final.
    pub fn mark_dropped(&self, index: usize) -> bool {
        self.resolve(index, TaskStatus::Dropped)
    }

    fn resolve(&self, index: usize, status: TaskStatus) -> bool {
        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
        match slots.get_mut(index) {
            Some(slot) if *slot == TaskStatus::Pending => {
                *slot = status;
                true
            }
            Some(slot) => {
                tracing::warn!(
                    index,
                    current = ?slot,
                    requested = ?status,
                    "Ignoring status change for already resolved task"
                );
                false
            }
            None => false,
        }
    }

    /// Status of `index`, or `None` if no task was registered there yet
    pub fn get(&self, index: usize) -> Option<TaskStatus> {
        self.slots
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(index)
            .copied()
    }

    /// Number of registered slots
    pub fn len(&self) -> usize {
        self.slots.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether no slot has been registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Count slots currently in `status`
    pub fn count(&self, status: TaskStatus) -> usize {
        self.slots
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|s| **s == status)
            .count()
    }
}
