// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! IOS kernel core: a host-process reimplementation of a proprietary
//! microkernel's scheduler, message queues, semaphores, timers, event
//! plane, and resource-manager dispatch fabric.
//!
//! # Algorithm naivety principles
//!
//! This implementation uses *deliberately naive algorithms* wherever the
//! original firmware's fixed-size pools allow it:
//!
//! 1. Use safe Rust for as much as possible.
//! 2. Use easily understood and debugged algorithms (linear scans over
//!    small fixed pools rather than clever indexing schemes).
//! 3. Revisit these decisions if they become performance problems, which at
//!    these pool sizes (hundreds of objects, not millions) they won't.

pub mod boot;
pub mod cap;
pub mod config;
pub mod dispatch;
pub mod err;
pub mod event;
pub mod kernel;
pub mod mqueue;
pub mod resmgr;
pub mod semaphore;
pub mod stats;
pub mod thread;
pub mod threadqueue;
pub mod time;
pub mod timer;

pub use err::{IosError, IosResult, KernelFault};
pub use kernel::Kernel;
