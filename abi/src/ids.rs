// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/// Identifies one of the fixed, closed set of emulated processes (spec.md
/// "Process identity"; roughly 14 of them in a full boot table, two of which
/// are reserved for the kernel and "master control").
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(transparent)]
pub struct ProcessId(pub u8);

impl ProcessId {
    /// Reserved id for the kernel itself, used as the "owning process" of
    /// kernel-internal objects such as the per-core idle queues.
    pub const KERNEL: Self = Self(0);
}

/// Names one kernel-level thread. Threads are not generation-tagged (unlike
/// resource handles and task ids in the teacher's rendezvous-IPC kernel);
/// spec.md's Thread model has no notion of "stale thread id", only
/// create/destroy through explicit lifecycle calls.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(transparent)]
pub struct ThreadId(pub u32);

/// Generation counter embedded in a `ResourceHandleId`, incremented each time
/// a table slot is reused.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
#[repr(transparent)]
pub struct Generation(pub u32);

impl Generation {
    pub fn next(self) -> Self {
        Generation(self.0.wrapping_add(1))
    }
}

/// A per-process, generation-tagged reference to an opened device session
/// (spec.md "Resource handle"). Returned to the guest as a signed 32-bit
/// integer: negative values are `IosError` codes, non-negative values encode
/// `(generation << INDEX_BITS) | index`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(transparent)]
pub struct ResourceHandleId(pub i32);

impl ResourceHandleId {
    /// Number of bits used for the table index; the remainder is generation.
    pub const INDEX_BITS: u32 = 12;
    pub const INDEX_MASK: i32 = (1 << Self::INDEX_BITS) - 1;

    pub fn encode(index: usize, generation: Generation) -> Self {
        debug_assert!(index as i32 <= Self::INDEX_MASK);
        Self(((generation.0 as i32) << Self::INDEX_BITS) | (index as i32))
    }

    pub fn index(self) -> usize {
        (self.0 & Self::INDEX_MASK) as usize
    }

    pub fn generation(self) -> Generation {
        Generation((self.0 >> Self::INDEX_BITS) as u32)
    }
}

/// Indexes the fixed-size event-handler table (spec.md "Event handler
/// table"; typically <= 48 slots).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(transparent)]
pub struct DeviceId(pub u8);

/// A 32-bit signed feature identifier in a process's client-capability
/// table. `-1` denotes an empty slot (spec.md "Process identity").
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(transparent)]
pub struct FeatureId(pub i32);

impl FeatureId {
    pub const EMPTY: Self = Self(-1);
}
