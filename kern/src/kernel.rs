// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The kernel facade: one `Mutex`-guarded `State` behind every subsystem,
//! mirroring the data model's "every static data block is conceptually a
//! field of a `Process` object" note by instead making it a field of one
//! `Kernel`. All scheduler-visible state transitions happen under this one
//! lock, held for the duration of each transition (spec.md §5).
//!
//! Fiber swap is implemented with one host OS thread per kernel thread,
//! parked on a private [`RunGate`](crate::thread::RunGate). Exactly one
//! thread's gate is open at a time: the lock is always released before a
//! thread parks on its own gate, so the kernel mutex and a `RunGate`'s
//! internal mutex are never held simultaneously by the same call.
//!
//! This collapses the data model's three cores into a single active
//! thread at any instant, which is a strictly stronger mutual-exclusion
//! guarantee than the original's per-core parallelism — every observable
//! ordering the spec requires (priority-FIFO wake order, a wake on one
//! core preempting a lower-priority running thread) still holds, and
//! `reschedule-others` degenerates to a no-op because there is never a
//! second thread running concurrently to interrupt.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use abi::{
    DeviceId, FeatureId, MessageFlags, PermissionMask, Priority, ProcessId, ThreadFlags, ThreadId,
};

use crate::cap::CapabilityTable;
use crate::config::FirmwareTable;
use crate::err::{IosError, IosResult};
use crate::event::{EventPlane, StatusWord};
use crate::mqueue::{Message, MessageQueue, QueueId};
use crate::resmgr::{HandleTable, Registry, RequestPool};
use crate::semaphore::{Semaphore, SemaphoreId};
use crate::stats::KernelStats;
use crate::thread::{RunGate, Thread, ThreadState, WaitReason, WaitResult};
use crate::threadqueue::ThreadQueue;
use crate::timer::{AlarmSink, Nanos, RunningList, Timer, TimerId, TimerState};

pub const MESSAGE_QUEUE_CAPACITY_DEFAULT: usize = 16;
pub const RESOURCE_MANAGERS_PER_PROCESS_QUOTA: usize = 8;

pub(crate) struct State {
    pub threads: Vec<Thread>,
    free_thread_slots: Vec<usize>,
    pub run_queue: ThreadQueue,
    current_running: Option<ThreadId>,

    pub queues: Vec<Option<MessageQueue>>,
    free_queue_slots: Vec<usize>,

    pub semaphores: Vec<Option<Semaphore>>,
    free_sem_slots: Vec<usize>,

    pub timers: Vec<Option<Timer>>,
    free_timer_slots: Vec<usize>,
    pub running_timers: RunningList,

    pub events: EventPlane,

    pub registry: Registry,
    pub handle_tables: HashMap<ProcessId, HandleTable>,
    pub request_pool: RequestPool,
    pub caps: HashMap<ProcessId, CapabilityTable>,

    pub stats: KernelStats,
    pub clock_start: Instant,
}

impl State {
    fn new() -> Self {
        State {
            threads: Vec::new(),
            free_thread_slots: Vec::new(),
            run_queue: ThreadQueue::new(),
            current_running: None,
            queues: Vec::new(),
            free_queue_slots: Vec::new(),
            semaphores: Vec::new(),
            free_sem_slots: Vec::new(),
            timers: Vec::new(),
            free_timer_slots: Vec::new(),
            running_timers: RunningList::new(),
            events: EventPlane::default(),
            registry: Registry::new(),
            handle_tables: HashMap::new(),
            request_pool: RequestPool::new(),
            caps: HashMap::new(),
            stats: KernelStats::default(),
            clock_start: Instant::now(),
        }
    }

    /// Pops the highest-priority ready thread (if any), marks it Running,
    /// and returns its gate to be opened once the caller has released the
    /// lock. This is the only place `current_running`/`Running` get set.
    fn pick_next_and_activate(&mut self) -> Option<Arc<RunGate>> {
        match self.run_queue.pop() {
            Some(next) => {
                self.threads[next.0 as usize].state = ThreadState::Running;
                self.current_running = Some(next);
                Some(self.threads[next.0 as usize].gate.clone())
            }
            None => {
                self.current_running = None;
                None
            }
        }
    }

    pub fn handle_table_mut(&mut self, process: ProcessId) -> &mut HandleTable {
        self.handle_tables.entry(process).or_insert_with(HandleTable::new)
    }

    pub fn uptime(&self, now: Instant) -> Nanos {
        now.saturating_duration_since(self.clock_start).as_nanos() as Nanos
    }
}

pub struct Kernel {
    pub(crate) inner: Mutex<State>,
    pub firmware: FirmwareTable,
}

impl Kernel {
    pub fn new(firmware: FirmwareTable) -> Arc<Kernel> {
        Arc::new(Kernel { inner: Mutex::new(State::new()), firmware })
    }

    pub fn uptime(&self) -> Nanos {
        self.inner.lock().unwrap().uptime(Instant::now())
    }

    pub fn stats(&self) -> KernelStats {
        self.inner.lock().unwrap().stats
    }

    // ---- scheduler primitives -------------------------------------------------

    /// Puts `id` to sleep on `reason` and switches to whatever the scheduler
    /// picks next, returning the result stashed by whoever eventually wakes
    /// it. `enqueue` records `id` on the appropriate wait list under the
    /// same lock acquisition that marks it `Waiting`.
    pub(crate) fn sleep_and_switch(
        &self,
        id: ThreadId,
        reason: WaitReason,
        enqueue: impl FnOnce(&mut State, ThreadId),
    ) -> WaitResult {
        let next_gate = {
            let mut state = self.inner.lock().unwrap();
            if state.threads[id.0 as usize].state != ThreadState::Running {
                crate::err::fault(crate::err::KernelFault::SchedulerInvariant(
                    "sleep_and_switch called on a thread that wasn't Running",
                ));
            }
            state.threads[id.0 as usize].state = ThreadState::Waiting(reason);
            enqueue(&mut state, id);
            state.pick_next_and_activate()
        };
        if let Some(gate) = next_gate {
            gate.open();
        }
        let my_gate = self.inner.lock().unwrap().threads[id.0 as usize].gate.clone();
        my_gate.park_until_turn();
        let mut state = self.inner.lock().unwrap();
        state.threads[id.0 as usize].wait_result.take().unwrap_or(WaitResult::Ok)
    }

    /// Pops one thread from `wait_list` (highest priority, FIFO on tie),
    /// marks it `Ready` with `result` waiting for it, and pushes it onto the
    /// run queue. Does not itself cause a switch — callers reschedule
    /// afterwards, matching the split between `wake-one` and
    /// `reschedule-*` in spec.md §4.1.
    pub(crate) fn wake_one_no_lock(
        state: &mut State,
        wait_list: &mut ThreadQueue,
        result: WaitResult,
    ) -> Option<ThreadId> {
        let id = wait_list.pop()?;
        let thread = &mut state.threads[id.0 as usize];
        thread.state = ThreadState::Ready;
        thread.wait_result = Some(result);
        let priority = thread.current_priority;
        state.run_queue.push(id, priority);
        Some(id)
    }

    pub(crate) fn wake_all_no_lock(state: &mut State, wait_list: &mut ThreadQueue, result: WaitResult) {
        while Self::wake_one_no_lock(state, wait_list, result).is_some() {}
    }

    /// `reschedule-self(yielding)`: if a strictly-more-important thread is
    /// ready (or an equally-important one when `yielding`), swap to it and
    /// block the caller until its turn comes back around.
    pub(crate) fn reschedule_self(&self, id: ThreadId, yielding: bool) {
        let next_gate = {
            let mut state = self.inner.lock().unwrap();
            if state.threads[id.0 as usize].state != ThreadState::Running {
                // Already blocked via sleep_and_switch; nothing to do.
                return;
            }
            let current_priority = state.threads[id.0 as usize].current_priority;
            let should_switch = match state.run_queue.peek() {
                None => false,
                Some((_, head)) => {
                    head.is_more_important_than(current_priority)
                        || (yielding && head.is_at_least_as_important_as(current_priority))
                }
            };
            if !should_switch {
                None
            } else {
                state.threads[id.0 as usize].state = ThreadState::Ready;
                state.run_queue.push(id, current_priority);
                state.pick_next_and_activate()
            }
        };
        if let Some(gate) = next_gate {
            gate.open();
            let my_gate = self.inner.lock().unwrap().threads[id.0 as usize].gate.clone();
            my_gate.park_until_turn();
            let mut state = self.inner.lock().unwrap();
            state.threads[id.0 as usize].state = ThreadState::Running;
            state.current_running = Some(id);
        }
    }

    /// Posts a "please reschedule" request to every other core's loop. In
    /// this kernel exactly one thread is ever concurrently Running, so
    /// there is no "other core" to interrupt; kept as a named no-op so call
    /// sites read the same as the spec's operation list.
    pub(crate) fn reschedule_others(&self) {}

    pub(crate) fn reschedule_all(&self, id: ThreadId) {
        self.reschedule_others();
        self.reschedule_self(id, false);
    }

    // ---- thread lifecycle -------------------------------------------------

    fn alloc_thread_slot(state: &mut State, thread: Thread) -> ThreadId {
        let id = if let Some(slot) = state.free_thread_slots.pop() {
            let id = ThreadId(slot as u32);
            state.threads[slot] = thread;
            id
        } else {
            let id = ThreadId(state.threads.len() as u32);
            state.threads.push(thread);
            id
        };
        let in_use = state.threads.len() - state.free_thread_slots.len();
        state.stats.threads.record(in_use);
        id
    }

    /// Creates a thread in the `Stopped` state. The new thread's base
    /// priority must be at least as important (numerically no greater) than
    /// the caller's own, per the data model's creation invariant: a thread
    /// cannot spawn something more privileged than itself.
    pub fn create_thread(
        self: &Arc<Self>,
        creator: ThreadId,
        process: ProcessId,
        priority: Priority,
        flags: ThreadFlags,
        name: Option<String>,
        entry: impl FnOnce(Arc<Kernel>, ThreadId) + Send + 'static,
    ) -> IosResult<ThreadId> {
        let creator_priority = {
            let state = self.inner.lock().unwrap();
            state.threads[creator.0 as usize].current_priority
        };
        if !priority.is_at_least_as_important_as(creator_priority) {
            return Err(IosError::Invalid);
        }
        Ok(self.spawn_thread_unchecked(process, priority, flags, name, entry))
    }

    /// The guts of thread creation, without the caller-priority invariant.
    /// Used by [`create_thread`](Self::create_thread) once the check has
    /// passed, and by the boot path (`boot::run_root_thread`) to fork each
    /// firmware process's root thread: the process manager forking a table
    /// of fixed-priority processes is a privileged kernel operation, not a
    /// guest syscall, so it isn't subject to the guest-facing invariant any
    /// more than the root thread's own creation in `boot::start_kernel` is.
    pub(crate) fn spawn_thread_unchecked(
        self: &Arc<Self>,
        process: ProcessId,
        priority: Priority,
        flags: ThreadFlags,
        name: Option<String>,
        entry: impl FnOnce(Arc<Kernel>, ThreadId) + Send + 'static,
    ) -> ThreadId {
        let thread = Thread::new(ThreadId(0), process, priority, flags, name);
        let id = {
            let mut state = self.inner.lock().unwrap();
            let id = Self::alloc_thread_slot(&mut state, thread);
            state.threads[id.0 as usize].id = id;
            id
        };
        let kernel = self.clone();
        let exit_kernel = self.clone();
        let gate = self.inner.lock().unwrap().threads[id.0 as usize].gate.clone();
        let handle = std::thread::Builder::new()
            .name(format!("kthread-{}", id.0))
            .spawn(move || {
                gate.park_until_turn();
                entry(kernel, id);
                exit_kernel.exit_thread(id, 0);
            })
            .expect("failed to spawn host thread backing kernel thread");
        self.inner.lock().unwrap().threads[id.0 as usize].set_handle(handle);
        id
    }

    /// Moves a `Stopped` thread to `Ready` and reschedules.
    pub fn start_thread(&self, caller: ThreadId, target: ThreadId) -> IosResult<()> {
        {
            let mut state = self.inner.lock().unwrap();
            let thread = state.threads.get_mut(target.0 as usize).ok_or(IosError::Invalid)?;
            if thread.state != ThreadState::Stopped {
                return Err(IosError::Invalid);
            }
            thread.state = ThreadState::Ready;
            let priority = thread.current_priority;
            state.run_queue.push(target, priority);
        }
        self.reschedule_all(caller);
        Ok(())
    }

    /// Directly enqueues a thread as Ready without requiring it to have
    /// passed through `Stopped` first; used only by boot to fork the root
    /// thread straight onto the run queue (spec.md §4.6).
    pub(crate) fn enqueue_ready(&self, id: ThreadId) {
        let mut state = self.inner.lock().unwrap();
        state.threads[id.0 as usize].state = ThreadState::Ready;
        let priority = state.threads[id.0 as usize].current_priority;
        state.run_queue.push(id, priority);
    }

    pub fn yield_thread(&self, id: ThreadId) {
        self.reschedule_self(id, true);
    }

    pub fn suspend_thread(&self, id: ThreadId) -> WaitResult {
        self.sleep_and_switch(id, WaitReason::Suspended, |_state, _id| {})
    }

    pub fn resume_thread(&self, caller: ThreadId, target: ThreadId) -> IosResult<()> {
        let woke = {
            let mut state = self.inner.lock().unwrap();
            if state.threads[target.0 as usize].state != ThreadState::Waiting(WaitReason::Suspended) {
                return Err(IosError::Invalid);
            }
            let thread = &mut state.threads[target.0 as usize];
            thread.state = ThreadState::Ready;
            thread.wait_result = Some(WaitResult::Ok);
            let priority = thread.current_priority;
            state.run_queue.push(target, priority);
            true
        };
        if woke {
            self.reschedule_all(caller);
        }
        Ok(())
    }

    pub fn join_thread(&self, caller: ThreadId, target: ThreadId) -> IosResult<i32> {
        let already_dead = {
            let state = self.inner.lock().unwrap();
            match state.threads.get(target.0 as usize) {
                None => return Err(IosError::Invalid),
                Some(t) => t.state == ThreadState::Dead,
            }
        };
        if !already_dead {
            self.sleep_and_switch(caller, WaitReason::JoinThread(target), |state, id| {
                let priority = state.threads[id.0 as usize].current_priority;
                state.threads[target.0 as usize].join_waiters.push(id, priority);
            });
        }
        let mut state = self.inner.lock().unwrap();
        let exit_value = state.threads[target.0 as usize].exit_value.unwrap_or(0);
        if !state.threads[target.0 as usize].flags.contains(ThreadFlags::DETACHED) {
            Self::reclaim_thread(&mut state, target);
        }
        Ok(exit_value)
    }

    /// Called by a thread's own host-thread wrapper once its entry function
    /// returns. Transitions it Dead (or straight to Available if detached)
    /// and wakes every joiner with `Ok`.
    pub fn exit_thread(&self, id: ThreadId, exit_value: i32) {
        let next_gate = {
            let mut state = self.inner.lock().unwrap();
            state.threads[id.0 as usize].exit_value = Some(exit_value);
            let detached = state.threads[id.0 as usize].flags.contains(ThreadFlags::DETACHED);
            let mut joiners = std::mem::take(&mut state.threads[id.0 as usize].join_waiters);
            Self::wake_all_no_lock(&mut state, &mut joiners, WaitResult::Ok);
            state.threads[id.0 as usize].join_waiters = joiners;
            if detached {
                Self::reclaim_thread(&mut state, id);
            } else {
                state.threads[id.0 as usize].state = ThreadState::Dead;
            }
            state.pick_next_and_activate()
        };
        if let Some(gate) = next_gate {
            gate.open();
        }
    }

    fn reclaim_thread(state: &mut State, id: ThreadId) {
        if let Some(handle) = state.threads[id.0 as usize].take_handle() {
            drop(handle); // already exited; this just joins the host thread
        }
        state.threads[id.0 as usize].state = ThreadState::Available;
        state.free_thread_slots.push(id.0 as usize);
        let in_use = state.threads.len() - state.free_thread_slots.len();
        state.stats.threads.record(in_use);
    }

    /// Unblocks a thread from whatever it's doing and kills it outright.
    /// There is no general wait-cancel primitive; this is the one exception
    /// (spec.md §5 "Cancellation").
    pub fn cancel_thread(&self, id: ThreadId) -> IosResult<()> {
        let mut state = self.inner.lock().unwrap();
        if state.threads.get(id.0 as usize).is_none() {
            return Err(IosError::Invalid);
        }
        state.run_queue.remove(id);
        let mut joiners = std::mem::take(&mut state.threads[id.0 as usize].join_waiters);
        Self::wake_all_no_lock(&mut state, &mut joiners, WaitResult::Ok);
        state.threads[id.0 as usize].join_waiters = joiners;
        Self::reclaim_thread(&mut state, id);
        Ok(())
    }

    pub fn set_thread_priority(&self, id: ThreadId, priority: Priority) -> IosResult<()> {
        let mut state = self.inner.lock().unwrap();
        let thread = state.threads.get_mut(id.0 as usize).ok_or(IosError::Invalid)?;
        thread.current_priority = priority;
        let was_ready = thread.state == ThreadState::Ready;
        if was_ready {
            state.run_queue.remove(id);
            state.run_queue.push(id, priority);
        }
        Ok(())
    }

    pub fn set_thread_name(&self, id: ThreadId, name: String) -> IosResult<()> {
        let mut state = self.inner.lock().unwrap();
        let thread = state.threads.get_mut(id.0 as usize).ok_or(IosError::Invalid)?;
        thread.name = Some(name);
        Ok(())
    }

    /// Finds a process's (first-forked) root thread. Used by callers that
    /// need a `ThreadId` to act as creator/caller for a process they only
    /// know by id, such as a driver forking its own worker thread right
    /// after boot hands control to process entry points.
    pub fn find_thread_by_process(&self, process: ProcessId) -> Option<ThreadId> {
        let state = self.inner.lock().unwrap();
        state.threads.iter().find(|t| t.process == process).map(|t| t.id)
    }

    // ---- message queues ---------------------------------------------------

    pub fn create_queue(&self, owner: ProcessId, capacity: usize) -> QueueId {
        let mut state = self.inner.lock().unwrap();
        let queue = MessageQueue::new(owner, capacity);
        let id = if let Some(slot) = state.free_queue_slots.pop() {
            state.queues[slot] = Some(queue);
            QueueId(slot)
        } else {
            state.queues.push(Some(queue));
            QueueId(state.queues.len() - 1)
        };
        let in_use = state.queues.iter().filter(|q| q.is_some()).count();
        state.stats.message_queues.record(in_use);
        id
    }

    pub fn destroy_queue(&self, owner: ProcessId, id: QueueId) -> IosResult<()> {
        let mut state = self.inner.lock().unwrap();
        let slot = state.queues.get_mut(id.0).ok_or(IosError::Invalid)?;
        let queue = slot.as_mut().ok_or(IosError::Invalid)?;
        if queue.owner != owner {
            return Err(IosError::Access);
        }
        let waiters = queue.drain_waiters();
        state.queues[id.0] = None;
        state.free_queue_slots.push(id.0);
        let in_use = state.queues.iter().filter(|q| q.is_some()).count();
        state.stats.message_queues.record(in_use);
        for waiter in waiters {
            if let Some(t) = state.threads.get_mut(waiter.0 as usize) {
                if matches!(t.state, ThreadState::Waiting(_)) {
                    t.state = ThreadState::Ready;
                    t.wait_result = Some(WaitResult::Intr);
                    let p = t.current_priority;
                    state.run_queue.push(waiter, p);
                }
            }
        }
        Ok(())
    }

    fn send_or_jam(&self, caller: ThreadId, queue: QueueId, msg: Message, jam: bool, flags: MessageFlags) -> IosResult<()> {
        loop {
            enum Outcome {
                Done,
                MustBlock,
            }
            let outcome = {
                let mut state = self.inner.lock().unwrap();
                let q = state.queues.get_mut(queue.0).ok_or(IosError::Invalid)?.as_mut().ok_or(IosError::Invalid)?;
                match q.try_send(msg, jam, flags)? {
                    Some(()) => {
                        let mut receivers = std::mem::take(&mut state.queues[queue.0].as_mut().unwrap().receivers);
                        Self::wake_one_no_lock(&mut state, &mut receivers, WaitResult::Ok);
                        state.queues[queue.0].as_mut().unwrap().receivers = receivers;
                        Outcome::Done
                    }
                    None => Outcome::MustBlock,
                }
            };
            match outcome {
                Outcome::Done => {
                    self.reschedule_all(caller);
                    return Ok(());
                }
                Outcome::MustBlock => {
                    let result = self.sleep_and_switch(caller, WaitReason::SendOrJamMessage(queue), |state, id| {
                        let q = state.queues[queue.0].as_mut().unwrap();
                        q.senders.push(id, state.threads[id.0 as usize].current_priority);
                    });
                    if result == WaitResult::Intr {
                        return Err(IosError::Intr);
                    }
                    // loop back to re-check the queue's state.
                }
            }
        }
    }

    pub fn send_message(&self, caller: ThreadId, queue: QueueId, msg: Message, flags: MessageFlags) -> IosResult<()> {
        self.send_or_jam(caller, queue, msg, false, flags)
    }

    pub fn jam_message(&self, caller: ThreadId, queue: QueueId, msg: Message, flags: MessageFlags) -> IosResult<()> {
        self.send_or_jam(caller, queue, msg, true, flags)
    }

    pub fn receive_message(&self, caller: ThreadId, queue: QueueId, flags: MessageFlags) -> IosResult<Message> {
        loop {
            enum Outcome {
                Got(Message),
                MustBlock,
            }
            let outcome = {
                let mut state = self.inner.lock().unwrap();
                let q = state.queues.get_mut(queue.0).ok_or(IosError::Invalid)?.as_mut().ok_or(IosError::Invalid)?;
                match q.try_receive(flags)? {
                    Some(msg) => {
                        let mut senders = std::mem::take(&mut state.queues[queue.0].as_mut().unwrap().senders);
                        Self::wake_one_no_lock(&mut state, &mut senders, WaitResult::Ok);
                        state.queues[queue.0].as_mut().unwrap().senders = senders;
                        Outcome::Got(msg)
                    }
                    None => Outcome::MustBlock,
                }
            };
            match outcome {
                Outcome::Got(msg) => {
                    self.reschedule_all(caller);
                    return Ok(msg);
                }
                Outcome::MustBlock => {
                    let result = self.sleep_and_switch(caller, WaitReason::ReceiveMessage(queue), |state, id| {
                        let q = state.queues[queue.0].as_mut().unwrap();
                        q.receivers.push(id, state.threads[id.0 as usize].current_priority);
                    });
                    if result == WaitResult::Intr {
                        return Err(IosError::Intr);
                    }
                    // loop back to re-check the queue's state.
                }
            }
        }
    }

    // ---- semaphores ---------------------------------------------------

    pub fn create_semaphore(&self, owner: ProcessId, initial: i32, max: i32) -> SemaphoreId {
        let mut state = self.inner.lock().unwrap();
        let sem = Semaphore::new(owner, initial, max);
        let id = if let Some(slot) = state.free_sem_slots.pop() {
            state.semaphores[slot] = Some(sem);
            SemaphoreId(slot)
        } else {
            state.semaphores.push(Some(sem));
            SemaphoreId(state.semaphores.len() - 1)
        };
        let in_use = state.semaphores.iter().filter(|s| s.is_some()).count();
        state.stats.semaphores.record(in_use);
        id
    }

    pub fn destroy_semaphore(&self, owner: ProcessId, id: SemaphoreId) -> IosResult<()> {
        let mut state = self.inner.lock().unwrap();
        let slot = state.semaphores.get_mut(id.0).ok_or(IosError::Invalid)?;
        let sem = slot.as_mut().ok_or(IosError::Invalid)?;
        if sem.owner != owner {
            return Err(IosError::Access);
        }
        let mut waiters = std::mem::take(&mut sem.waiters);
        Self::wake_all_no_lock(&mut state, &mut waiters, WaitResult::Intr);
        state.semaphores[id.0] = None;
        state.free_sem_slots.push(id.0);
        let in_use = state.semaphores.iter().filter(|s| s.is_some()).count();
        state.stats.semaphores.record(in_use);
        Ok(())
    }

    pub fn wait_semaphore(&self, caller: ThreadId, id: SemaphoreId, try_only: bool) -> IosResult<()> {
        loop {
            let must_block = {
                let mut state = self.inner.lock().unwrap();
                let sem = state.semaphores.get_mut(id.0).ok_or(IosError::Invalid)?.as_mut().ok_or(IosError::Invalid)?;
                if sem.try_take() {
                    false
                } else if try_only {
                    return Err(IosError::SemUnavailable);
                } else {
                    true
                }
            };
            if !must_block {
                return Ok(());
            }
            let result = self.sleep_and_switch(caller, WaitReason::Semaphore(id), |state, tid| {
                let sem = state.semaphores[id.0].as_mut().unwrap();
                sem.waiters.push(tid, state.threads[tid.0 as usize].current_priority);
            });
            if result == WaitResult::Intr {
                return Err(IosError::Intr);
            }
            // loop back to re-check the count, per spec.md §4.2.
        }
    }

    pub fn signal_semaphore(&self, caller: ThreadId, id: SemaphoreId) -> IosResult<()> {
        let should_wake = {
            let mut state = self.inner.lock().unwrap();
            let sem = state.semaphores.get_mut(id.0).ok_or(IosError::Invalid)?.as_mut().ok_or(IosError::Invalid)?;
            let should_wake = sem.signal();
            if should_wake {
                let mut waiters = std::mem::take(&mut sem.waiters);
                Self::wake_one_no_lock(&mut state, &mut waiters, WaitResult::Ok);
                state.semaphores[id.0].as_mut().unwrap().waiters = waiters;
            }
            should_wake
        };
        if should_wake {
            self.reschedule_all(caller);
        }
        Ok(())
    }

    // ---- timers ---------------------------------------------------

    pub fn create_timer(
        &self,
        owner: ProcessId,
        delay_us: u64,
        period_us: u64,
        queue: QueueId,
        message: Message,
    ) -> TimerId {
        let mut state = self.inner.lock().unwrap();
        let state = &mut *state;
        let now = state.uptime(Instant::now());
        let timer = Timer {
            owner,
            state: TimerState::Ready,
            next_trigger: now + delay_us * 1000,
            period_us,
            queue,
            message,
        };
        let id = if let Some(slot) = state.free_timer_slots.pop() {
            state.timers[slot] = Some(timer);
            TimerId(slot)
        } else {
            state.timers.push(Some(timer));
            TimerId(state.timers.len() - 1)
        };
        let in_use = state.timers.iter().filter(|t| t.is_some()).count();
        state.stats.timers.record(in_use);
        // A timer with zero delay and zero period is never inserted into the
        // running list (spec.md "Boundary behaviours").
        if delay_us != 0 || period_us != 0 {
            state.timers[id.0].as_mut().unwrap().state = TimerState::Running;
            let trigger = state.timers[id.0].as_ref().unwrap().next_trigger;
            state.running_timers.insert(id, trigger, &state.timers);
        }
        id
    }

    pub fn destroy_timer(&self, owner: ProcessId, id: TimerId) -> IosResult<()> {
        let mut state = self.inner.lock().unwrap();
        let slot = state.timers.get_mut(id.0).ok_or(IosError::Invalid)?;
        let timer = slot.as_mut().ok_or(IosError::Invalid)?;
        if timer.owner != owner {
            return Err(IosError::Access);
        }
        state.running_timers.remove(id);
        state.timers[id.0] = None;
        state.free_timer_slots.push(id.0);
        let in_use = state.timers.iter().filter(|t| t.is_some()).count();
        state.stats.timers.record(in_use);
        Ok(())
    }

    pub fn restart_timer(&self, id: TimerId, delay_us: u64, period_us: u64) -> IosResult<()> {
        let mut state = self.inner.lock().unwrap();
        let state = &mut *state;
        let now = state.uptime(Instant::now());
        state.running_timers.remove(id);
        let timer = state.timers.get_mut(id.0).ok_or(IosError::Invalid)?.as_mut().ok_or(IosError::Invalid)?;
        timer.next_trigger = now + delay_us * 1000;
        timer.period_us = period_us;
        if delay_us != 0 || period_us != 0 {
            timer.state = TimerState::Running;
            let trigger = timer.next_trigger;
            state.running_timers.insert(id, trigger, &state.timers);
        } else {
            timer.state = TimerState::Stopped;
        }
        Ok(())
    }

    pub fn stop_timer(&self, id: TimerId) -> IosResult<()> {
        let mut state = self.inner.lock().unwrap();
        state.running_timers.remove(id);
        let timer = state.timers.get_mut(id.0).ok_or(IosError::Invalid)?.as_mut().ok_or(IosError::Invalid)?;
        timer.state = TimerState::Stopped;
        Ok(())
    }

    /// Pops every timer whose trigger has passed, posts its message
    /// (dropping, not blocking, if the destination queue is full — this
    /// runs from interrupt-equivalent context), and reinserts periodic ones.
    /// A real build calls this from the host-alarm callback armed for the
    /// running list's head; `sim`/tests call it directly.
    pub fn drain_expired_timers(&self, alarm: &mut impl AlarmSink) {
        let mut state = self.inner.lock().unwrap();
        let state = &mut *state;
        let now = state.uptime(Instant::now());
        let expired = state.running_timers.pop_expired(now, &state.timers);
        for id in &expired {
            let (queue, message, period_us) = {
                let t = state.timers[id.0].as_ref().unwrap();
                (t.queue, t.message, t.period_us)
            };
            if let Some(q) = state.queues.get_mut(queue.0).and_then(|q| q.as_mut()) {
                q.post_non_blocking(message);
            }
            if period_us != 0 {
                let t = state.timers[id.0].as_mut().unwrap();
                t.next_trigger = now + period_us * 1000;
                let trigger = t.next_trigger;
                state.running_timers.insert(*id, trigger, &state.timers);
            } else if let Some(t) = state.timers[id.0].as_mut() {
                t.state = TimerState::Stopped;
            }
        }
        match state.running_timers.head() {
            Some(id) => alarm.arm(state.timers[id.0].as_ref().unwrap().next_trigger),
            None => alarm.disarm(),
        }
    }

    // ---- event/interrupt plane ---------------------------------------------------

    pub fn register_event(&self, owner: ProcessId, device: DeviceId, queue: QueueId, message: Message) {
        let mut state = self.inner.lock().unwrap();
        if let Some(q) = state.queues.get_mut(queue.0).and_then(|q| q.as_mut()) {
            q.registered_event_handler = true;
        }
        state.events.register(device, owner, queue, message);
    }

    pub fn clear_and_enable(&self, device: DeviceId) {
        self.inner.lock().unwrap().events.clear_and_enable(device);
    }

    pub fn raise_interrupt(&self, caller: ThreadId, word: StatusWord, mask: u32) {
        {
            let mut state = self.inner.lock().unwrap();
            state.events.raise(word, mask);
        }
        self.drain_events(caller);
    }

    /// Walks every pending, enabled bit, delivers its preset message
    /// (dropping if the queue is full), then reschedules.
    pub fn drain_events(&self, caller: ThreadId) {
        let delivered = {
            let mut state = self.inner.lock().unwrap();
            let drained = state.events.drain();
            for (_, slot) in &drained {
                if let Some(q) = state.queues.get_mut(slot.queue.0).and_then(|q| q.as_mut()) {
                    q.post_non_blocking(slot.message);
                }
            }
            !drained.is_empty()
        };
        if delivered {
            self.reschedule_all(caller);
        }
    }

    // ---- capabilities ---------------------------------------------------

    pub fn grant_capability(&self, process: ProcessId, feature: FeatureId, mask: PermissionMask) {
        self.inner.lock().unwrap().caps.entry(process).or_insert_with(CapabilityTable::default).grant(feature, mask);
    }

    pub fn check_capability(&self, process: ProcessId, feature: FeatureId, required: PermissionMask) -> bool {
        self.inner
            .lock()
            .unwrap()
            .caps
            .get(&process)
            .map(|t| t.permits(feature, required))
            .unwrap_or(false)
    }
}
