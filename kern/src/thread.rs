// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Thread records and the fiber-swap primitive that lets one kernel thread
//! hand control to another.
//!
//! There is no portable safe way to swap stacks (`ucontext`/`WinFiber`-style)
//! from Rust, so each kernel thread's "fiber" is a real `std::thread`, parked
//! on a private gate. Only one gate is open at a time per core: handing
//! control to a thread means opening its gate and waiting for our own to
//! close. The scheduler's global lock (`crate::kernel::Kernel`) is always
//! released before a thread parks on its gate, so the two mutexes are never
//! nested.

use std::sync::{Arc, Condvar, Mutex};

use abi::{Priority, ProcessId, ThreadFlags, ThreadId};

use crate::mqueue::QueueId;
use crate::semaphore::SemaphoreId;
use crate::timer::TimerId;

/// A gate a thread's host OS thread parks on between turns.
#[derive(Debug, Default)]
pub struct RunGate {
    may_run: Mutex<bool>,
    cv: Condvar,
}

impl RunGate {
    pub fn new(initially_open: bool) -> Arc<Self> {
        Arc::new(Self { may_run: Mutex::new(initially_open), cv: Condvar::new() })
    }

    /// Opens the gate and wakes whoever is parked on it.
    pub fn open(&self) {
        let mut guard = self.may_run.lock().unwrap();
        *guard = true;
        self.cv.notify_one();
    }

    /// Blocks the calling OS thread until the gate is opened, then closes it
    /// again (so the next turn requires another explicit `open`).
    pub fn park_until_turn(&self) {
        let mut guard = self.may_run.lock().unwrap();
        while !*guard {
            guard = self.cv.wait(guard).unwrap();
        }
        *guard = false;
    }
}

/// Why a thread is sitting on a wait list instead of the run queue.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WaitReason {
    ReceiveMessage(QueueId),
    SendOrJamMessage(QueueId),
    Semaphore(SemaphoreId),
    Timer(TimerId),
    JoinThread(ThreadId),
    Suspended,
}

/// Scheduling state of a thread (data model "Thread.state").
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ThreadState {
    /// Slot is unused.
    Available,
    /// On the global run queue, eligible to be picked.
    Ready,
    /// Currently holding a core's run gate.
    Running,
    /// Parked on some wait list, named by `WaitReason`.
    Waiting(WaitReason),
    /// Created but not yet started (`start-thread` moves it to `Ready`).
    Stopped,
    /// Exited; resources not yet reclaimed (detached threads skip this and
    /// go straight back to `Available`).
    Dead,
}

/// Outcome stashed in a thread's "wait result" slot by whatever woke it, so
/// the call that put it to sleep can resume with the right `Result`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WaitResult {
    Ok,
    Intr,
    Timeout,
}

pub struct Thread {
    pub id: ThreadId,
    pub process: ProcessId,
    pub base_priority: Priority,
    pub current_priority: Priority,
    pub state: ThreadState,
    pub flags: ThreadFlags,
    pub name: Option<String>,
    pub wait_result: Option<WaitResult>,
    pub join_waiters: crate::threadqueue::ThreadQueue,
    pub gate: Arc<RunGate>,
    pub exit_value: Option<i32>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl Thread {
    pub fn new(
        id: ThreadId,
        process: ProcessId,
        priority: Priority,
        flags: ThreadFlags,
        name: Option<String>,
    ) -> Self {
        Thread {
            id,
            process,
            base_priority: priority,
            current_priority: priority,
            state: ThreadState::Stopped,
            flags,
            name,
            wait_result: None,
            join_waiters: crate::threadqueue::ThreadQueue::new(),
            gate: RunGate::new(false),
            exit_value: None,
            handle: None,
        }
    }

    pub fn set_handle(&mut self, handle: std::thread::JoinHandle<()>) {
        self.handle = Some(handle);
    }

    pub fn take_handle(&mut self) -> Option<std::thread::JoinHandle<()>> {
        self.handle.take()
    }

    pub fn is_runnable(&self) -> bool {
        self.state == ThreadState::Ready
    }
}

impl std::fmt::Debug for Thread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id)
            .field("process", &self.process)
            .field("state", &self.state)
            .field("priority", &self.current_priority)
            .field("name", &self.name)
            .finish()
    }
}
