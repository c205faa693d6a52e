// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! An example resource manager, grounded on `ios_acp_acp_main_thread.cpp`:
//! registers `/dev/acp_main`, accepts any number of opens and closes, and
//! answers a pair of power-management ioctls (resume/suspend) with success.
//! Any other command comes back `UnsupportedCmd`.

use std::sync::Arc;

use abi::{Command, IosError, IosResult, MessageFlags, Priority, ProcessId, ThreadFlags, ThreadId};
use kern::dispatch::{decode_request, NoGuestIpc};
use kern::Kernel;

pub const DEVICE_PATH: &str = "/dev/acp_main";

/// Sub-commands the ACP driver answers over its `Ioctl` command, mirroring
/// the original's `ios::acp::Command::{Resume,Suspend}`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum AcpCommand {
    Resume = 0,
    Suspend = 1,
}

impl AcpCommand {
    fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(AcpCommand::Resume),
            1 => Some(AcpCommand::Suspend),
            _ => None,
        }
    }
}

const THREAD_PRIORITY: Priority = Priority(50);
const QUEUE_CAPACITY: usize = 100;

/// Registers the manager and forks its worker thread from `caller` (the
/// process's own root thread, already running by the time boot hands
/// control to process entry points). Returns once the worker is on the run
/// queue, the same point at which the original's `startAcpMainThread`
/// returns to its caller.
pub fn start(kernel: &Arc<Kernel>, caller: ThreadId, process: ProcessId) -> IosResult<ThreadId> {
    let queue = kernel.create_queue(process, QUEUE_CAPACITY);
    let registration = kernel.register_resource_manager(process, DEVICE_PATH, queue);
    if let Err(e) = registration {
        let _ = kernel.destroy_queue(process, queue);
        return Err(e);
    }

    let worker = kernel.create_thread(
        caller,
        process,
        THREAD_PRIORITY,
        ThreadFlags::DETACHED,
        Some("AcpMainThread".to_string()),
        move |kernel, id| main_thread(kernel, id, queue),
    )?;
    kernel.start_thread(caller, worker)?;
    Ok(worker)
}

fn main_thread(kernel: Arc<Kernel>, self_id: ThreadId, queue: kern::mqueue::QueueId) {
    let mut ipc = NoGuestIpc;
    loop {
        let msg = match kernel.receive_message(self_id, queue, MessageFlags::default()) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(?e, "acp main thread's queue was torn down, exiting");
                return;
            }
        };
        let request_id = decode_request(msg);
        let Some(request) = kernel.get_request(request_id) else {
            tracing::error!("dequeued a request id no longer in the pool");
            continue;
        };

        let result = handle(&request);
        if let Err(e) = kernel.resource_reply(self_id, request.process, request_id, result, &mut ipc) {
            tracing::error!(?e, "failed to reply to a resource request");
        }
    }
}

fn handle(request: &kern::resmgr::ResourceRequest) -> IosResult<i32> {
    match request.command {
        Command::Open | Command::Close => Ok(0),
        Command::Ioctl | Command::Ioctlv => match AcpCommand::from_u32(request.args[0]) {
            Some(AcpCommand::Resume) | Some(AcpCommand::Suspend) => Ok(0),
            None => Err(IosError::Invalid),
        },
        _ => Err(IosError::UnsupportedCmd),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resume_and_suspend_round_trip_through_u32() {
        assert_eq!(AcpCommand::from_u32(AcpCommand::Resume as u32), Some(AcpCommand::Resume));
        assert_eq!(AcpCommand::from_u32(AcpCommand::Suspend as u32), Some(AcpCommand::Suspend));
        assert_eq!(AcpCommand::from_u32(99), None);
    }
}
