//! Max-priority queue used by the task scheduler.
//!
//! Items expose a numeric priority through [`Prioritized`]; the highest value
//! is extracted first. Internally this is a binary max-heap
//! ([`std::collections::BinaryHeap`]) over entries that carry the priority
//! captured at insert time plus an insertion sequence number. Among equal
//! priorities the earlier insertion wins, so callers that rely on FIFO order
//! within one priority level get it, but the scheduler itself only requires
//! the max-priority guarantee.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Anything that can be ordered by an integer priority (higher runs first)
pub trait Prioritized {
    /// Current priority of the item
    fn priority(&self) -> i64;
}

#[derive(Debug)]
struct HeapEntry<T> {
    priority: i64,
    seq: u64,
    item: T,
}

impl<T> PartialEq for HeapEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl<T> Eq for HeapEntry<T> {}

// BinaryHeap is a max-heap: higher priority wins, then lower sequence number (older)
impl<T> Ord for HeapEntry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.priority.cmp(&other.priority) {
            Ordering::Equal => other.seq.cmp(&self.seq),
            ordering => ordering,
        }
    }
}

impl<T> PartialOrd for HeapEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Binary max-heap keyed by [`Prioritized::priority`]
#[derive(Debug)]
pub struct PriorityQueue<T> {
    heap: BinaryHeap<HeapEntry<T>>,
    next_seq: u64,
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }
}

impl<T: Prioritized> PriorityQueue<T> {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert one item. O(log n).
    ///
    /// The priority is read once here; changing it afterwards requires
    /// extracting and re-inserting the item.
    pub fn insert(&mut self, item: T) {
        let entry = HeapEntry {
            priority: item.priority(),
            seq: self.next_seq,
            item,
        };
        self.next_seq += 1;
        self.heap.push(entry);
    }

    /// Insert every item from `items`
    pub fn insert_multi<I>(&mut self, items: I)
    where
        I: IntoIterator<Item = T>,
    {
        let items = items.into_iter();
        self.heap.reserve(items.size_hint().0);
        for item in items {
            self.insert(item);
        }
    }

    /// Remove and return the item with the highest priority
    pub fn extract_max(&mut self) -> Option<T> {
        self.heap.pop().map(|entry| entry.item)
    }

    /// Priority of the item `extract_max` would return next
    pub fn peek_priority(&self) -> Option<i64> {
        self.heap.peek().map(|entry| entry.priority)
    }

    /// Current item count
    pub fn size(&self) -> usize {
        self.heap.len()
    }

    /// Whether the queue holds no items
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
