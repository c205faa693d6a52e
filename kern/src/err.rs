// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Common error-handling support.
//!
//! Recoverable failures travel as plain `abi::IosError` values — they are
//! never exceptional from the kernel's point of view, just an outcome the
//! caller (guest or kernel client) is expected to handle. `KernelFault`
//! covers the other half of spec.md §7: assertion failures that indicate a
//! memory-safety violation (accounting counters disagreeing with pool
//! state, an intrusive list whose length doesn't match its node count).
//! Those are fatal by design — there is no way to recover from a corrupted
//! free list — so `fault` logs and aborts rather than returning a `Result`
//! anyone could plausibly ignore.

pub use abi::{IosError, IosResult};

#[derive(Debug, thiserror::Error)]
pub enum KernelFault {
    #[error(
        "resource-request accounting diverged: per-process counters summed to \
         {counted}, pool reports {actual} allocated objects"
    )]
    RequestAccountingDiverged { counted: usize, actual: usize },

    #[error("resource manager's pending-request list length does not match its request_count")]
    ManagerListLengthMismatch,

    #[error("message queue invariant violated: count exceeds capacity")]
    QueueOverflow,

    #[error("scheduler invariant violated: {0}")]
    SchedulerInvariant(&'static str),
}

/// Reports a fatal kernel invariant violation and aborts the process.
///
/// Mirrors the firmware's own behavior (spec.md §7: "the implementation
/// abort()s because they indicate a memory-safety violation"); there is no
/// `Result` return here because the caller has no recovery path to offer.
pub fn fault(f: KernelFault) -> ! {
    tracing::error!(error = %f, "kernel assertion failed");
    std::process::abort();
}
