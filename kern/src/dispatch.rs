// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Dispatch of guest (or kernel-client) requests to resource managers, and
//! the reply path back. Grounded on `ios_kernel_resourcemanager.cpp`'s
//! `IOS_Open`/`IOS_Close`/`IOS_Ioctl`/... family and its `IOS_ResourceReply`.

use abi::{Command, IosError, IosResult, ProcessId, ResourceHandleId, ThreadId};

use crate::kernel::Kernel;
use crate::mqueue::{Message, QueueId};
use crate::resmgr::{HandleState, ReplyDestination, ResourceManagerId, ResourceRequest, RequestId};

/// A reply delivered back to whoever dispatched a request: either written
/// into a guest IPC block and submitted through the collaborator, or
/// encoded as a plain message posted to the requester's queue.
pub trait GuestIpcSink {
    /// Writes `result` into the IPC block at `physical_address` and raises
    /// the owning core's IPC interrupt.
    fn submit_reply(&mut self, physical_address: u32, result: i32);
}

/// A [`GuestIpcSink`] for hosts with no physical guest IPC block to write
/// into — every request this core dispatches through [`ReplyDestination::Queue`]
/// never reaches `submit_reply`, so resource managers that only ever see
/// kernel-client (`userlib`) callers can use this rather than modelling the
/// guest MMIO path.
pub struct NoGuestIpc;

impl GuestIpcSink for NoGuestIpc {
    fn submit_reply(&mut self, physical_address: u32, result: i32) {
        tracing::error!(physical_address, result, "submit_reply on NoGuestIpc sink");
    }
}

impl Kernel {
    /// `register(device-path, queue)`.
    pub fn register_resource_manager(
        &self,
        process: ProcessId,
        path: &str,
        queue: QueueId,
    ) -> IosResult<ResourceManagerId> {
        let mut state = self.inner.lock().unwrap();
        let id = state.registry.register(
            path,
            process,
            queue,
            crate::kernel::RESOURCE_MANAGERS_PER_PROCESS_QUOTA,
        )?;
        let in_use = state.registry.manager_count();
        state.stats.resource_managers.record(in_use);
        Ok(id)
    }

    pub fn set_resource_permission_group(&self, process: ProcessId, path: &str, group: i32) -> IosResult<()> {
        let mut state = self.inner.lock().unwrap();
        let id = state.registry.find_by_path(path).ok_or(IosError::NoExists)?;
        let manager = state.registry.get_mut(id).ok_or(IosError::NoExists)?;
        if manager.owner != process {
            return Err(IosError::Access);
        }
        manager.permission_group = group;
        Ok(())
    }

    /// `open(path, mode)`: allocates a handle (`Opening`) and a request,
    /// then posts the request onto the manager's queue.
    pub fn dispatch_open(
        &self,
        caller: ThreadId,
        process: ProcessId,
        path: &str,
        mode: u32,
        destination: ReplyDestination,
    ) -> IosResult<ResourceHandleId> {
        let (manager_id, manager_queue, handle) = {
            let mut state = self.inner.lock().unwrap();
            let manager_id = state.registry.find_by_path(path).ok_or(IosError::NoExists)?;
            let handle = state.handle_table_mut(process).alloc_opening(manager_id)?;
            let manager_queue = state.registry.get(manager_id).unwrap().queue;
            (manager_id, manager_queue, handle)
        };
        let request = ResourceRequest {
            command: Command::Open,
            args: [mode, 0, 0, 0, 0],
            path: Some(path.to_string()),
            cpu_core: 0,
            process,
            title_id: 0,
            destination,
            handle,
            manager: manager_id,
        };
        match self.enqueue_request(caller, manager_id, manager_queue, process, request) {
            Ok(()) => Ok(handle),
            Err(e) => {
                let mut state = self.inner.lock().unwrap();
                state.handle_table_mut(process).complete_open(handle, Err(e));
                Err(e)
            }
        }
    }

    /// `close(handle)`.
    pub fn dispatch_close(
        &self,
        caller: ThreadId,
        process: ProcessId,
        handle: ResourceHandleId,
        destination: ReplyDestination,
    ) -> IosResult<()> {
        let (manager_id, manager_queue) = {
            let mut state = self.inner.lock().unwrap();
            let manager_id = state
                .handle_tables
                .get(&process)
                .and_then(|t| t.resolve_open(handle).ok().and_then(|s| s.manager))
                .ok_or(IosError::InvalidHandle)?;
            state.handle_table_mut(process).transition_to_closing(handle)?;
            let manager_queue = state.registry.get(manager_id).unwrap().queue;
            (manager_id, manager_queue)
        };
        let request = ResourceRequest {
            command: Command::Close,
            args: [0; 5],
            path: None,
            cpu_core: 0,
            process,
            title_id: 0,
            destination,
            handle,
            manager: manager_id,
        };
        self.enqueue_request(caller, manager_id, manager_queue, process, request)
    }

    /// `read`/`write`/`seek`/`ioctl`/`ioctlv(handle, ...)`.
    pub fn dispatch_command(
        &self,
        caller: ThreadId,
        process: ProcessId,
        handle: ResourceHandleId,
        command: Command,
        args: [u32; 5],
        destination: ReplyDestination,
    ) -> IosResult<()> {
        let (manager_id, manager_queue) = {
            let state = self.inner.lock().unwrap();
            let manager_id = state
                .handle_tables
                .get(&process)
                .and_then(|t| t.resolve_open(handle).ok().and_then(|s| s.manager))
                .ok_or(IosError::InvalidHandle)?;
            let manager_queue = state.registry.get(manager_id).unwrap().queue;
            (manager_id, manager_queue)
        };
        let request = ResourceRequest {
            command,
            args,
            path: None,
            cpu_core: 0,
            process,
            title_id: 0,
            destination,
            handle,
            manager: manager_id,
        };
        self.enqueue_request(caller, manager_id, manager_queue, process, request)
    }

    fn enqueue_request(
        &self,
        caller: ThreadId,
        manager_id: ResourceManagerId,
        manager_queue: QueueId,
        process: ProcessId,
        request: ResourceRequest,
    ) -> IosResult<()> {
        let request_id = {
            let mut state = self.inner.lock().unwrap();
            let id = state.request_pool.alloc(process, request)?;
            state.registry.get_mut(manager_id).unwrap().pending_requests.push(id);
            state.registry.get_mut(manager_id).unwrap().request_count += 1;
            let global_count = state.request_pool.global_count();
            state.stats.resource_requests.record(global_count);
            id
        };
        // Posting to the manager's queue is itself a send-message, which
        // blocks the caller if the manager's queue is momentarily full. The
        // only failure mode here is `Intr` (the manager's queue was
        // destroyed while we waited); that leaves the request allocated
        // with no manager left to serve it, which in practice means the
        // manager is gone and its whole pending list is being torn down
        // anyway.
        self.send_message(caller, manager_queue, encode_request(request_id), Default::default())
    }

    /// Looks up a pending request by the id a manager's worker thread just
    /// dequeued from its message queue (see [`decode_request`]).
    pub fn get_request(&self, id: RequestId) -> Option<ResourceRequest> {
        self.inner.lock().unwrap().request_pool.get(id).cloned()
    }

    /// `reply(request, result)`, called by a resource manager's worker
    /// thread once it has handled a dequeued request.
    pub fn resource_reply(
        &self,
        caller: ThreadId,
        manager_process: ProcessId,
        request_id: RequestId,
        result: IosResult<i32>,
        ipc: &mut impl GuestIpcSink,
    ) -> IosResult<()> {
        let (request, reply_code) = {
            let mut state = self.inner.lock().unwrap();
            let request = state.request_pool.get(request_id).ok_or(IosError::Invalid)?.clone();
            let manager = state.registry.get(request.manager).ok_or(IosError::Invalid)?;
            if manager.owner != manager_process {
                return Err(IosError::Access);
            }

            match request.command {
                Command::Open => {
                    state.handle_table_mut(request.process).complete_open(request.handle, result);
                }
                Command::Close => {
                    state.handle_table_mut(request.process).complete_close(request.handle);
                }
                _ => {}
            }

            let reply_code = match result {
                Ok(v) if request.command == Command::Open => v,
                Ok(v) => v,
                Err(e) => e.as_i32(),
            };

            if let Some(manager) = state.registry.get_mut(request.manager) {
                manager.pending_requests.retain(|r| *r != request_id);
                manager.request_count = manager.request_count.saturating_sub(1);
                if manager.pending_requests.len() != manager.request_count {
                    crate::err::fault(crate::err::KernelFault::ManagerListLengthMismatch);
                }
            }
            state.request_pool.free(request_id);
            (request, reply_code)
        };

        match &request.destination {
            ReplyDestination::GuestIpc { physical_address } => {
                ipc.submit_reply(*physical_address, reply_code);
            }
            ReplyDestination::Queue(queue) => {
                // Interrupt-context-style delivery: a non-blocking post, per
                // spec.md §4.4 ("a reply message ... via non-blocking send").
                // The request has already been freed above, so the message
                // carries the reply code itself rather than the (now stale)
                // request id.
                let mut state = self.inner.lock().unwrap();
                if let Some(q) = state.queues.get_mut(queue.0).and_then(|q| q.as_mut()) {
                    q.post_non_blocking(reply_code as Message);
                }
            }
        }
        self.reschedule_all(caller);
        Ok(())
    }
}

/// Requests travel through message queues as their pool index; the manager's
/// worker thread looks the request back up by id once it dequeues this word.
fn encode_request(id: RequestId) -> Message {
    id.0 as Message
}

pub fn decode_request(msg: Message) -> RequestId {
    RequestId(msg as usize)
}

/// True only while a handle is in a state where a manager may still act on
/// it; used by worker-thread handlers sanity-checking a dequeued request.
pub fn handle_is_pending(state: HandleState) -> bool {
    matches!(state, HandleState::Opening | HandleState::Open | HandleState::Closing)
}
