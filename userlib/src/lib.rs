// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Client-side IPC marshalling (spec.md §4.5): the library an IOS client
//! links against. It never reaches into `kern`'s internals, only its
//! public client API (`Kernel::dispatch_open` and friends) — the same
//! boundary the original's `nn::ipc::ClientCommand` keeps from the
//! resource-manager dispatcher it calls through.

pub mod alloc;
pub mod client;
pub mod marshal;

pub use alloc::ScratchAllocator;
pub use client::Client;
pub use marshal::{IoctlvCall, ManagedBuffer};
