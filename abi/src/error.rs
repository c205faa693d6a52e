// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/// The kernel's error taxonomy (spec.md §7).
///
/// These are returned from kernel primitives as ordinary `Result` errors on
/// the host-client API, and written as small negative integers into the IPC
/// block's `reply` field when the kernel is answering a guest request
/// (spec.md §6 "Resource-handle encoding", "Error codes").
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(i32)]
pub enum IosError {
    Ok = 0,
    /// Argument shape is wrong, handle out of range, null where forbidden.
    Invalid = -1,
    /// Caller's process does not own the referenced object, or a capability
    /// check failed.
    Access = -2,
    /// Attempted to register something that already exists.
    Exists = -3,
    /// Looked up something that does not exist.
    NoExists = -4,
    /// A wait was interrupted by destruction of the object waited on.
    Intr = -5,
    /// A bounded resource is exhausted (full queue on non-blocking send, or
    /// all handles/requests/managers/semaphores/timers in use).
    Max = -6,
    /// Out of backing memory; a free list was empty though quotas implied
    /// room remained.
    FailAlloc = -7,
    /// `try`-wait on a semaphore whose count is already zero.
    SemUnavailable = -8,
    /// A resource-handle's generation did not match the live slot's.
    StaleHandle = -9,
    /// A resource-handle index was out of range, or named a free slot.
    InvalidHandle = -10,
    /// Per-process resource-request quota exceeded.
    ClientTxnLimit = -11,
    /// A timer sentinel message was received on an awaited queue.
    Timeout = -12,
    /// The device does not implement the requested command.
    UnsupportedCmd = -13,
    /// Device-specific: resource is busy.
    Busy = -14,
    /// Device-specific: a buffer's alignment violated the device's
    /// requirements.
    Alignment = -15,
    /// Device-specific: no resource available to satisfy the request.
    NoResource = -16,
    /// Device-specific: the device is not ready to accept requests.
    NotReady = -17,
    /// A timer expired (distinct from `Timeout`, used for timer-API replies
    /// like `stop` on an already-expired one-shot timer).
    Expired = -18,
}

impl IosError {
    /// True if this represents success.
    pub fn is_ok(self) -> bool {
        self == IosError::Ok
    }

    /// Converts to the signed 32-bit value written into an `IpcBlock.reply`
    /// field or returned from a kernel client call.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Recovers an error from a reply code, for the client side of the wire
    /// contract (spec.md "IPC block": "reply error code"). Negative codes
    /// outside the known taxonomy are folded to `Invalid` rather than
    /// panicking — an unrecognised negative reply is still an error, just
    /// not one this build's taxonomy names.
    pub fn from_i32(code: i32) -> Option<IosError> {
        Some(match code {
            0 => return None,
            -1 => IosError::Invalid,
            -2 => IosError::Access,
            -3 => IosError::Exists,
            -4 => IosError::NoExists,
            -5 => IosError::Intr,
            -6 => IosError::Max,
            -7 => IosError::FailAlloc,
            -8 => IosError::SemUnavailable,
            -9 => IosError::StaleHandle,
            -10 => IosError::InvalidHandle,
            -11 => IosError::ClientTxnLimit,
            -12 => IosError::Timeout,
            -13 => IosError::UnsupportedCmd,
            -14 => IosError::Busy,
            -15 => IosError::Alignment,
            -16 => IosError::NoResource,
            -17 => IosError::NotReady,
            -18 => IosError::Expired,
            code if code < 0 => IosError::Invalid,
            _ => return None,
        })
    }
}

impl core::fmt::Display for IosError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Debug::fmt(self, f)
    }
}

impl std::error::Error for IosError {}

pub type IosResult<T> = Result<T, IosError>;
