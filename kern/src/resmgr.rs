// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Resource-manager registry, per-process handle tables, and the pooled
//! resource-request objects that flow between the IPC dispatch path and a
//! manager's worker thread.

use indexmap::IndexMap;

use abi::{Command, Generation, IosError, IosResult, ProcessId, ResourceHandleId};

use crate::mqueue::QueueId;

pub const MAX_PATH_LEN: usize = 32;
pub const HANDLES_PER_PROCESS: usize = 96;
pub const REQUESTS_GLOBAL_CAP: usize = 480;
pub const REQUESTS_PER_PROCESS_CAP: usize = 256;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(transparent)]
pub struct ResourceManagerId(pub usize);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(transparent)]
pub struct RequestId(pub usize);

pub struct ResourceManager {
    pub path: String,
    pub owner: ProcessId,
    pub queue: QueueId,
    pub permission_group: i32,
    pub open_handle_count: usize,
    pub request_count: usize,
    pub pending_requests: Vec<RequestId>,
}

/// Registered managers, ordered by registration (the spec leaves sort order
/// unconstrained and says readers search by path; an `IndexMap` gives us
/// stable iteration plus O(1) path lookup in one structure).
#[derive(Default)]
pub struct Registry {
    by_path: IndexMap<String, ResourceManagerId>,
    managers: Vec<Option<ResourceManager>>,
    free_slots: Vec<usize>,
    per_process_manager_count: std::collections::HashMap<ProcessId, usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        path: &str,
        owner: ProcessId,
        queue: QueueId,
        quota_per_process: usize,
    ) -> IosResult<ResourceManagerId> {
        if self.by_path.contains_key(path) {
            return Err(IosError::Exists);
        }
        let owned = *self.per_process_manager_count.get(&owner).unwrap_or(&0);
        if owned >= quota_per_process {
            return Err(IosError::Max);
        }
        let manager = ResourceManager {
            path: path.to_string(),
            owner,
            queue,
            permission_group: 0,
            open_handle_count: 0,
            request_count: 0,
            pending_requests: Vec::new(),
        };
        let id = if let Some(slot) = self.free_slots.pop() {
            self.managers[slot] = Some(manager);
            ResourceManagerId(slot)
        } else {
            self.managers.push(Some(manager));
            ResourceManagerId(self.managers.len() - 1)
        };
        self.by_path.insert(path.to_string(), id);
        *self.per_process_manager_count.entry(owner).or_insert(0) += 1;
        Ok(id)
    }

    pub fn find_by_path(&self, path: &str) -> Option<ResourceManagerId> {
        self.by_path.get(path).copied()
    }

    /// Number of currently-registered managers, for
    /// [`crate::stats::KernelStats`].
    pub fn manager_count(&self) -> usize {
        self.managers.iter().filter(|m| m.is_some()).count()
    }

    pub fn get(&self, id: ResourceManagerId) -> Option<&ResourceManager> {
        self.managers.get(id.0).and_then(|m| m.as_ref())
    }

    pub fn get_mut(&mut self, id: ResourceManagerId) -> Option<&mut ResourceManager> {
        self.managers.get_mut(id.0).and_then(|m| m.as_mut())
    }

    /// Tears down a manager, detaching its outstanding requests (the caller
    /// is expected to have already error-replied them). Not part of the
    /// normal flow (the spec notes destruction is not normally invoked).
    pub fn unregister(&mut self, id: ResourceManagerId) {
        if let Some(manager) = self.managers.get_mut(id.0).and_then(|m| m.take()) {
            self.by_path.shift_remove(&manager.path);
            if let Some(count) = self.per_process_manager_count.get_mut(&manager.owner) {
                *count = count.saturating_sub(1);
            }
            self.free_slots.push(id.0);
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HandleState {
    Free,
    Opening,
    Open,
    Closing,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ResourceHandleSlot {
    pub state: HandleState,
    pub generation: Generation,
    pub manager: Option<ResourceManagerId>,
    /// The device-specific handle value the manager's `reply` supplied.
    pub device_handle: i32,
}

impl Default for ResourceHandleSlot {
    fn default() -> Self {
        ResourceHandleSlot {
            state: HandleState::Free,
            generation: Generation::default(),
            manager: None,
            device_handle: -1,
        }
    }
}

/// A process's fixed-size, generation-tagged handle table.
pub struct HandleTable {
    slots: Vec<ResourceHandleSlot>,
    free_slots: Vec<usize>,
}

impl HandleTable {
    pub fn new() -> Self {
        let slots = (0..HANDLES_PER_PROCESS).map(|_| ResourceHandleSlot::default()).collect();
        HandleTable { slots, free_slots: (0..HANDLES_PER_PROCESS).rev().collect() }
    }

    /// Allocates a slot in `Opening` state bound to `manager`, returning its
    /// encoded handle id (generation bumped from whatever the slot held last).
    pub fn alloc_opening(&mut self, manager: ResourceManagerId) -> IosResult<ResourceHandleId> {
        let index = self.free_slots.pop().ok_or(IosError::Max)?;
        let generation = self.slots[index].generation.next();
        self.slots[index] = ResourceHandleSlot {
            state: HandleState::Opening,
            generation,
            manager: Some(manager),
            device_handle: -1,
        };
        Ok(ResourceHandleId::encode(index, generation))
    }

    fn resolve(&self, id: ResourceHandleId) -> IosResult<&ResourceHandleSlot> {
        let index = id.index();
        let slot = self.slots.get(index).ok_or(IosError::InvalidHandle)?;
        if slot.state == HandleState::Free {
            return Err(IosError::InvalidHandle);
        }
        if slot.generation != id.generation() {
            return Err(IosError::StaleHandle);
        }
        Ok(slot)
    }

    /// Looks up a handle that must currently be `Open`, as required before
    /// read/write/seek/ioctl/ioctlv/close.
    pub fn resolve_open(&self, id: ResourceHandleId) -> IosResult<&ResourceHandleSlot> {
        let slot = self.resolve(id)?;
        if slot.state != HandleState::Open {
            return Err(IosError::InvalidHandle);
        }
        Ok(slot)
    }

    pub fn transition_to_closing(&mut self, id: ResourceHandleId) -> IosResult<()> {
        let index = id.index();
        {
            let slot = self.resolve(id)?;
            if slot.state != HandleState::Open {
                return Err(IosError::InvalidHandle);
            }
        }
        self.slots[index].state = HandleState::Closing;
        Ok(())
    }

    /// Completes an `open` reply: success promotes `Opening -> Open` and
    /// records the device handle; failure frees the slot.
    pub fn complete_open(&mut self, id: ResourceHandleId, result: IosResult<i32>) {
        let index = id.index();
        match result {
            Ok(device_handle) => {
                self.slots[index].state = HandleState::Open;
                self.slots[index].device_handle = device_handle;
            }
            Err(_) => self.free(index),
        }
    }

    /// Completes a `close` reply: the handle is freed regardless of result.
    pub fn complete_close(&mut self, id: ResourceHandleId) {
        self.free(id.index());
    }

    fn free(&mut self, index: usize) {
        self.slots[index].state = HandleState::Free;
        self.slots[index].manager = None;
        self.free_slots.push(index);
    }
}

/// Where a resource request's reply should be delivered.
#[derive(Clone, Debug)]
pub enum ReplyDestination {
    /// The request originated from a guest IPC block; the reply is written
    /// back into it and the guest IPC driver's `submit-reply` is invoked.
    GuestIpc { physical_address: u32 },
    /// The request originated from a kernel client; the reply (the request's
    /// encoded physical address / identifying word) is posted as an ordinary
    /// message on this queue.
    Queue(QueueId),
}

#[derive(Clone, Debug)]
pub struct ResourceRequest {
    pub command: Command,
    pub args: [u32; 5],
    pub path: Option<String>,
    pub cpu_core: u32,
    pub process: ProcessId,
    pub title_id: u64,
    pub destination: ReplyDestination,
    pub handle: ResourceHandleId,
    pub manager: ResourceManagerId,
}

#[derive(Default)]
pub struct RequestPool {
    slots: Vec<Option<ResourceRequest>>,
    free_slots: Vec<usize>,
    per_process_count: std::collections::HashMap<ProcessId, usize>,
    global_count: usize,
    pub high_water_global: usize,
    pub high_water_per_process: usize,
}

impl RequestPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, process: ProcessId, request: ResourceRequest) -> IosResult<RequestId> {
        if self.global_count >= REQUESTS_GLOBAL_CAP {
            return Err(IosError::Max);
        }
        let owned = *self.per_process_count.get(&process).unwrap_or(&0);
        if owned >= REQUESTS_PER_PROCESS_CAP {
            return Err(IosError::ClientTxnLimit);
        }
        let id = if let Some(slot) = self.free_slots.pop() {
            self.slots[slot] = Some(request);
            RequestId(slot)
        } else {
            self.slots.push(Some(request));
            RequestId(self.slots.len() - 1)
        };
        self.global_count += 1;
        let count = self.per_process_count.entry(process).or_insert(0);
        *count += 1;
        self.high_water_global = self.high_water_global.max(self.global_count);
        self.high_water_per_process = self.high_water_per_process.max(*count);
        Ok(id)
    }

    pub fn get(&self, id: RequestId) -> Option<&ResourceRequest> {
        self.slots.get(id.0).and_then(|r| r.as_ref())
    }

    pub fn free(&mut self, id: RequestId) -> Option<ResourceRequest> {
        let taken = self.slots.get_mut(id.0).and_then(|r| r.take());
        if let Some(request) = &taken {
            self.global_count = self.global_count.saturating_sub(1);
            if let Some(count) = self.per_process_count.get_mut(&request.process) {
                *count = count.saturating_sub(1);
            }
            self.free_slots.push(id.0);
        }
        let actual = self.slots.iter().filter(|r| r.is_some()).count();
        if actual != self.global_count {
            crate::err::fault(crate::err::KernelFault::RequestAccountingDiverged {
                counted: self.global_count,
                actual,
            });
        }
        taken
    }

    pub fn global_count(&self) -> usize {
        self.global_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_rejects_duplicate_path() {
        let mut reg = Registry::new();
        reg.register("/dev/acp_main", ProcessId(5), QueueId(0), 8).unwrap();
        assert_eq!(
            reg.register("/dev/acp_main", ProcessId(6), QueueId(1), 8),
            Err(IosError::Exists)
        );
    }

    #[test]
    fn handle_generation_bumps_on_reuse() {
        let mut table = HandleTable::new();
        let mgr = ResourceManagerId(0);
        let h0 = table.alloc_opening(mgr).unwrap();
        assert_eq!(h0.index(), 0);
        table.complete_open(h0, Ok(42));
        assert!(table.resolve_open(h0).is_ok());

        table.transition_to_closing(h0).unwrap();
        table.complete_close(h0);
        assert_eq!(table.resolve_open(h0), Err(IosError::InvalidHandle));

        let h1 = table.alloc_opening(mgr).unwrap();
        assert_eq!(h1.index(), 0);
        assert_ne!(h1.generation(), h0.generation());
        table.complete_open(h1, Ok(7));
        assert_eq!(table.resolve_open(h0), Err(IosError::StaleHandle));
        assert!(table.resolve_open(h1).is_ok());
    }

    #[test]
    fn request_quota_enforced_per_process_and_globally() {
        let mut pool = RequestPool::new();
        let p = ProcessId(5);
        for _ in 0..REQUESTS_PER_PROCESS_CAP {
            pool.alloc(p, dummy_request(p)).unwrap();
        }
        assert_eq!(pool.alloc(p, dummy_request(p)), Err(IosError::ClientTxnLimit));
    }

    fn dummy_request(process: ProcessId) -> ResourceRequest {
        ResourceRequest {
            command: Command::Open,
            args: [0; 5],
            path: None,
            cpu_core: 0,
            process,
            title_id: 0,
            destination: ReplyDestination::Queue(QueueId(0)),
            handle: ResourceHandleId(0),
            manager: ResourceManagerId(0),
        }
    }
}
