// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Message queues: bounded ring buffers with blocking send/jam/receive.

use abi::{IosError, IosResult, MessageFlags, ProcessId, ThreadId};

use crate::threadqueue::ThreadQueue;

/// Identifies a message queue in the global pool.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(transparent)]
pub struct QueueId(pub usize);

/// One word of caller-defined payload. The original firmware posts a
/// physical address or small tagged value here; we keep the same
/// "opaque u32" shape since the kernel never interprets it.
pub type Message = u32;

pub struct MessageQueue {
    pub owner: ProcessId,
    pub registered_event_handler: bool,
    ring: Vec<Message>,
    head: usize,
    count: usize,
    pub receivers: ThreadQueue,
    pub senders: ThreadQueue,
}

impl MessageQueue {
    pub fn new(owner: ProcessId, capacity: usize) -> Self {
        MessageQueue {
            owner,
            registered_event_handler: false,
            ring: vec![0; capacity.max(1)],
            head: 0,
            count: 0,
            receivers: ThreadQueue::new(),
            senders: ThreadQueue::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.ring.len()
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_full(&self) -> bool {
        self.count == self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Inserts at the tail. Caller must have already checked capacity.
    fn push_tail(&mut self, msg: Message) {
        let cap = self.ring.len();
        let tail = (self.head + self.count) % cap;
        self.ring[tail] = msg;
        self.count += 1;
        if self.count > cap {
            crate::err::fault(crate::err::KernelFault::QueueOverflow);
        }
    }

    /// Inserts at the head (jam), i.e. at `first - 1 mod size`.
    fn push_head(&mut self, msg: Message) {
        let cap = self.ring.len();
        self.head = (self.head + cap - 1) % cap;
        self.ring[self.head] = msg;
        self.count += 1;
        if self.count > cap {
            crate::err::fault(crate::err::KernelFault::QueueOverflow);
        }
    }

    fn pop_head(&mut self) -> Message {
        let cap = self.ring.len();
        let msg = self.ring[self.head];
        self.head = (self.head + 1) % cap;
        self.count -= 1;
        msg
    }

    /// Attempts the non-blocking fast path for `send`/`jam`. Returns `Ok(Some(()))`
    /// if delivered without blocking, `Ok(None)` if the caller must block, or
    /// `Err` if non-blocking and full.
    pub fn try_send(
        &mut self,
        msg: Message,
        jam: bool,
        flags: MessageFlags,
    ) -> IosResult<Option<()>> {
        if self.is_full() {
            if flags.contains(MessageFlags::NON_BLOCKING) {
                return Err(IosError::Max);
            }
            return Ok(None);
        }
        if jam {
            self.push_head(msg);
        } else {
            self.push_tail(msg);
        }
        Ok(Some(()))
    }

    /// Attempts the non-blocking fast path for `receive`.
    pub fn try_receive(&mut self, flags: MessageFlags) -> IosResult<Option<Message>> {
        if self.is_empty() {
            if flags.contains(MessageFlags::NON_BLOCKING) {
                return Err(IosError::Max);
            }
            return Ok(None);
        }
        Ok(Some(self.pop_head()))
    }

    /// Drops a message without blocking, used for interrupt-context posts
    /// (timer expiry, event delivery) where the policy is "drop if full"
    /// rather than blocking.
    pub fn post_non_blocking(&mut self, msg: Message) -> bool {
        if self.is_full() {
            false
        } else {
            self.push_tail(msg);
            true
        }
    }

    /// Collects every waiting thread on both lists, for destruction.
    pub fn drain_waiters(&mut self) -> Vec<ThreadId> {
        let mut all = self.receivers.drain_all();
        all.extend(self.senders.drain_all());
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_wraps() {
        let mut q = MessageQueue::new(ProcessId(1), 2);
        assert_eq!(q.try_send(1, false, MessageFlags::empty()).unwrap(), Some(()));
        assert_eq!(q.try_send(2, false, MessageFlags::empty()).unwrap(), Some(()));
        assert!(q.is_full());
        assert_eq!(
            q.try_send(3, false, MessageFlags::NON_BLOCKING),
            Err(IosError::Max)
        );
        assert_eq!(q.try_receive(MessageFlags::empty()).unwrap(), Some(1));
        assert_eq!(q.try_send(3, false, MessageFlags::empty()).unwrap(), Some(()));
        assert_eq!(q.try_receive(MessageFlags::empty()).unwrap(), Some(2));
        assert_eq!(q.try_receive(MessageFlags::empty()).unwrap(), Some(3));
        assert!(q.is_empty());
    }

    #[test]
    fn jam_inserts_at_head() {
        let mut q = MessageQueue::new(ProcessId(1), 4);
        q.try_send(1, false, MessageFlags::empty()).unwrap();
        q.try_send(2, false, MessageFlags::empty()).unwrap();
        q.try_send(99, true, MessageFlags::empty()).unwrap();
        assert_eq!(q.try_receive(MessageFlags::empty()).unwrap(), Some(99));
        assert_eq!(q.try_receive(MessageFlags::empty()).unwrap(), Some(1));
        assert_eq!(q.try_receive(MessageFlags::empty()).unwrap(), Some(2));
    }

    #[test]
    fn non_blocking_receive_on_empty_fails_without_mutating_state() {
        let mut q = MessageQueue::new(ProcessId(1), 4);
        assert_eq!(
            q.try_receive(MessageFlags::NON_BLOCKING),
            Err(IosError::Max)
        );
        assert_eq!(q.count(), 0);
    }
}
