// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Timers: a sorted running list, armed against a single host alarm.
//!
//! The running list is kept sorted by next-trigger time so that the head is
//! always the next thing to fire; arming/disarming the host alarm is the
//! caller's job (`Kernel::drain_expired_timers` recomputes the head after
//! each mutation; the host-alarm primitive itself is a collaborator this
//! core only calls through `AlarmSink`).

use abi::ProcessId;

use crate::mqueue::{Message, QueueId};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(transparent)]
pub struct TimerId(pub usize);

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TimerState {
    Free,
    Stopped,
    Ready,
    Running,
}

/// Nanoseconds since kernel boot.
pub type Nanos = u64;

#[derive(Clone, Debug)]
pub struct Timer {
    pub owner: ProcessId,
    pub state: TimerState,
    pub next_trigger: Nanos,
    /// Microseconds; zero means one-shot.
    pub period_us: u64,
    pub queue: QueueId,
    pub message: Message,
}

/// Something the kernel can tell "please interrupt me again at this time".
/// A real build wires this to the host's OS timer; tests use a no-op that
/// just records the last arm request.
pub trait AlarmSink {
    fn arm(&mut self, trigger: Nanos);
    fn disarm(&mut self);
}

/// A running list ordered by `next_trigger`, represented as a sorted `Vec`
/// of indices into the timer pool (see the data model's "doubly-linked
/// indices"; a sorted `Vec` gives the same ordering with simpler removal
/// logic, acceptable as a naive-but-correct substitute at the pool sizes
/// this kernel deals with).
#[derive(Debug, Default)]
pub struct RunningList {
    entries: Vec<TimerId>,
}

impl RunningList {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn insert(&mut self, id: TimerId, trigger: Nanos, timers: &[Option<Timer>]) {
        let pos = self
            .entries
            .iter()
            .position(|other| {
                timers[other.0].as_ref().map(|t| t.next_trigger).unwrap_or(0) > trigger
            })
            .unwrap_or(self.entries.len());
        self.entries.insert(pos, id);
    }

    pub fn remove(&mut self, id: TimerId) {
        if let Some(pos) = self.entries.iter().position(|e| *e == id) {
            self.entries.remove(pos);
        }
    }

    pub fn head(&self) -> Option<TimerId> {
        self.entries.first().copied()
    }

    /// Splits off every timer whose trigger is `<= now`, in trigger order.
    pub fn pop_expired(&mut self, now: Nanos, timers: &[Option<Timer>]) -> Vec<TimerId> {
        let split = self
            .entries
            .iter()
            .position(|id| timers[id.0].as_ref().map(|t| t.next_trigger).unwrap_or(0) > now)
            .unwrap_or(self.entries.len());
        self.entries.drain(..split).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk(owner: u8, trigger: Nanos) -> Option<Timer> {
        Some(Timer {
            owner: ProcessId(owner),
            state: TimerState::Running,
            next_trigger: trigger,
            period_us: 0,
            queue: QueueId(0),
            message: 0,
        })
    }

    #[test]
    fn sorted_by_trigger() {
        let timers = vec![mk(1, 500), mk(1, 100), mk(1, 300)];
        let mut list = RunningList::new();
        list.insert(TimerId(0), 500, &timers);
        list.insert(TimerId(1), 100, &timers);
        list.insert(TimerId(2), 300, &timers);
        assert_eq!(list.head(), Some(TimerId(1)));
        let expired = list.pop_expired(300, &timers);
        assert_eq!(expired, vec![TimerId(1), TimerId(2)]);
        assert_eq!(list.head(), Some(TimerId(0)));
    }

    #[test]
    fn zero_delay_and_period_never_inserted() {
        // Modeled at the Kernel::create_timer level: delay == 0 && period == 0
        // means the timer is created Ready but never handed to `insert`.
        let list = RunningList::new();
        assert!(list.is_empty());
    }
}
