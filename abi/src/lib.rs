// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Wire types and identifiers shared between the kernel core and the
//! collaborators (guest CPU driver, device handlers, kernel clients) that sit
//! on either side of the resource-manager boundary.
//!
//! Everything here is `Copy`, allocation-free, and deliberately thin: it
//! describes *shapes*, not behavior. Behavior lives in `kern`.

mod error;
mod ids;
mod ipc;
mod ioctl;
mod priority;

pub use error::{IosError, IosResult};
pub use ids::{
    DeviceId, FeatureId, Generation, ProcessId, ResourceHandleId, ThreadId,
};
pub use ioctl::IoctlVector;
pub use ipc::{Command, IpcBlock, IPC_BLOCK_WIRE_SIZE};
pub use priority::Priority;

bitflags::bitflags! {
    /// Per-thread behavior flags (spec.md data model: Thread.flags).
    #[derive(Default)]
    pub struct ThreadFlags: u32 {
        /// Thread resources (TLS, stacks) are reclaimed automatically on
        /// exit rather than requiring a `join`.
        const DETACHED = 1 << 0;
        /// Thread owns the per-process IPC buffer pool and must tear it
        /// down on exit.
        const OWNS_IPC_BUFFER_POOL = 1 << 1;
        /// Thread allocated thread-local storage that must be released.
        const OWNS_TLS = 1 << 2;
    }
}

bitflags::bitflags! {
    /// Flags passed to `send-message` / `jam-message` / `receive-message`.
    #[derive(Default)]
    pub struct MessageFlags: u32 {
        /// Fail with `Max` rather than blocking when the queue has no room
        /// (send/jam) or no messages (receive).
        const NON_BLOCKING = 1 << 0;
    }
}

/// A 64-bit permission mask associated with a `FeatureId` in a process's
/// client-capability table (spec.md "Process identity").
pub type PermissionMask = u64;

/// The feature id / mask pair granted to the kernel and the privileged
/// system processes at boot (spec.md §4.6 step 2).
pub const ALL_CAPABILITY_FEATURE: FeatureId = FeatureId(0x7fff_ffff);
pub const ALL_CAPABILITY_MASK: PermissionMask = !0u64;

/// The default, narrow capability grant given to ordinary processes at boot.
pub const DEFAULT_CAPABILITY_FEATURE: FeatureId = FeatureId(1);
pub const DEFAULT_CAPABILITY_MASK: PermissionMask = 0xf;

/// Number of client-capability table entries per process (spec.md: "≤16").
pub const CAPABILITIES_PER_PROCESS: usize = 16;
