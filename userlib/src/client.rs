// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The ergonomic client surface an IOS client links against: `open` /
//! `close` / `read` / `write` / `seek` / `ioctl` / `ioctlv`, each
//! synchronous from the caller's point of view (spec.md §6: "Every kernel
//! API is synchronous from the caller's viewpoint; async behaviour is
//! expressed as the reply arrives on the queue you named").
//!
//! Every call here names its own private reply queue and blocks on it,
//! mirroring the original's per-`ClientCommandHelper` request/response
//! buffer pair rather than a shared completion port.

use std::sync::Arc;

use abi::{Command, IosError, IosResult, MessageFlags, ProcessId, ResourceHandleId, ThreadId};
use kern::resmgr::ReplyDestination;
use kern::Kernel;

use crate::alloc::ScratchAllocator;
use crate::marshal::{IoctlvCall, ManagedBuffer};

pub struct Client {
    kernel: Arc<Kernel>,
    caller: ThreadId,
    process: ProcessId,
    reply_queue: kern::mqueue::QueueId,
}

impl Client {
    /// `caller` must be a thread already running in `process`; the reply
    /// queue this creates is torn down when the `Client` is dropped.
    pub fn new(kernel: Arc<Kernel>, caller: ThreadId, process: ProcessId) -> Self {
        let reply_queue = kernel.create_queue(process, 1);
        Client { kernel, caller, process, reply_queue }
    }

    pub fn open(&self, path: &str, mode: u32) -> IosResult<ResourceHandleId> {
        let handle = self.kernel.dispatch_open(
            self.caller,
            self.process,
            path,
            mode,
            ReplyDestination::Queue(self.reply_queue),
        )?;
        self.await_reply()?;
        Ok(handle)
    }

    pub fn close(&self, handle: ResourceHandleId) -> IosResult<()> {
        self.kernel.dispatch_close(self.caller, self.process, handle, ReplyDestination::Queue(self.reply_queue))?;
        self.await_reply().map(|_| ())
    }

    pub fn read(&self, handle: ResourceHandleId, buf: &mut [u8]) -> IosResult<i32> {
        self.command(handle, Command::Read, [buf.as_ptr() as u32, buf.len() as u32, 0, 0, 0])
    }

    pub fn write(&self, handle: ResourceHandleId, buf: &[u8]) -> IosResult<i32> {
        self.command(handle, Command::Write, [buf.as_ptr() as u32, buf.len() as u32, 0, 0, 0])
    }

    pub fn seek(&self, handle: ResourceHandleId, offset: u32, origin: u32) -> IosResult<i32> {
        self.command(handle, Command::Seek, [offset, origin, 0, 0, 0])
    }

    pub fn ioctl(&self, handle: ResourceHandleId, cmd: u32, input: &[u8], output: &mut [u8]) -> IosResult<i32> {
        self.command(
            handle,
            Command::Ioctl,
            [cmd, input.as_ptr() as u32, input.len() as u32, output.as_ptr() as u32, output.len() as u32],
        )
    }

    /// `ioctlv(handle, cmd, buffers)`: marshals `buffers` through the
    /// managed-buffer splitter (spec.md §4.5), issues the call, waits for
    /// the reply, then copies unaligned output scratch back into the
    /// caller's buffers before releasing every allocation the call made.
    pub fn ioctlv(
        &self,
        alloc: &mut ScratchAllocator,
        handle: ResourceHandleId,
        cmd: u32,
        buffers: Vec<ManagedBuffer<'_>>,
    ) -> IosResult<i32> {
        let call = IoctlvCall::build(alloc, buffers);
        call.write_request_header(alloc, handle.0 as u32, cmd, [0, 0]);
        let num_vec_out = call.num_vec_out();
        let num_in = call.vecs().len() - num_vec_out;
        let vec_ptr = call.vecs().as_ptr() as u32;
        let result = self.command(handle, Command::Ioctlv, [cmd, num_in as u32, num_vec_out as u32, vec_ptr, 0]);
        let result = result.and_then(|reply| match IosError::from_i32(call.read_response_header(alloc)) {
            Some(e) => Err(e),
            None => Ok(reply),
        });
        call.finish(alloc);
        result
    }

    fn command(&self, handle: ResourceHandleId, command: Command, args: [u32; 5]) -> IosResult<i32> {
        self.kernel.dispatch_command(
            self.caller,
            self.process,
            handle,
            command,
            args,
            ReplyDestination::Queue(self.reply_queue),
        )?;
        self.await_reply()
    }

    fn await_reply(&self) -> IosResult<i32> {
        let msg = self.kernel.receive_message(self.caller, self.reply_queue, MessageFlags::default())?;
        let code = msg as i32;
        match IosError::from_i32(code) {
            Some(e) => Err(e),
            None => Ok(code),
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        let _ = self.kernel.destroy_queue(self.process, self.reply_queue);
    }
}
