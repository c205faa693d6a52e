// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host-process analogue of the teacher's `arch/simulator.rs` +
//! `kern/src/startup.rs`: boots the kernel against the bundled firmware
//! table, starts the ACP example resource manager, then drives a couple of
//! guest-style IPC calls through `userlib::Client` to demonstrate the path
//! end to end.

use std::sync::{mpsc, Arc};
use std::time::Duration;

use abi::{Priority, ProcessId, ThreadFlags, ThreadId};
use kern::boot;
use kern::config::FirmwareTable;
use kern::Kernel;
use userlib::{Client, ManagedBuffer, ScratchAllocator};

/// Priority of the fiber that drives the demo's blocking `Client` calls.
/// Must be at least as important as `acp_root` (`Priority::LOWEST`), which
/// forks it.
const DEMO_CLIENT_PRIORITY: Priority = Priority(100);

fn main() {
    tracing_subscriber::fmt::init();

    let firmware = FirmwareTable::default_table();
    let acp = firmware
        .process_by_name("ACP")
        .expect("bundled firmware table names an ACP process");
    let acp_process = ProcessId(acp.id);

    let kernel = boot::start_kernel(firmware);

    // `boot::run_root_thread` already forked a no-op placeholder thread for
    // every firmware process; give it a moment to land before we fork the
    // real ACP worker on top of it. A production boot sequence would hand
    // process entry points to `spawn_thread_unchecked` directly instead of
    // the no-op closure it uses today; `sim` stands in for that wiring.
    std::thread::sleep(Duration::from_millis(10));

    let acp_root = kernel
        .find_thread_by_process(acp_process)
        .expect("ACP's root thread was forked during boot");
    drv_acp_server::start(&kernel, acp_root, acp_process).expect("failed to start ACP resource manager");

    // `acp_root` is just the boot-time placeholder that forked this process's
    // threads; it has already exited by now, so it can't be the thread that
    // blocks on `Client`'s replies (a kernel thread only blocks-and-resumes
    // as itself while it's still alive). Fork a dedicated fiber for the demo
    // sequence instead, the way a real guest thread would run it.
    let (done_tx, done_rx) = mpsc::channel();
    let worker = kernel
        .create_thread(
            acp_root,
            acp_process,
            DEMO_CLIENT_PRIORITY,
            ThreadFlags::DETACHED,
            Some("AcpDemoClient".to_string()),
            move |kernel, id| {
                run_demo(&kernel, id, acp_process);
                let _ = done_tx.send(());
            },
        )
        .expect("failed to create demo client thread");
    kernel.start_thread(acp_root, worker).expect("failed to start demo client thread");

    done_rx.recv().expect("demo client thread finished");
    tracing::info!("demo sequence complete");
}

/// Runs on its own kernel thread (`caller`) so `Client`'s blocking calls have
/// a live fiber to park and resume.
fn run_demo(kernel: &Arc<Kernel>, caller: ThreadId, process: ProcessId) {
    let client = Client::new(kernel.clone(), caller, process);
    let handle = client.open(drv_acp_server::DEVICE_PATH, 0).expect("open /dev/acp_main");
    tracing::info!(?handle, "opened ACP device");

    let result = client
        .ioctl(handle, drv_acp_server::AcpCommand::Resume as u32, &[], &mut [])
        .expect("resume ioctl");
    tracing::info!(result, "resume ioctl completed");

    let mut alloc = ScratchAllocator::new(16);
    let mut unused_output = [0u8; 4];
    let result = client
        .ioctlv(&mut alloc, handle, drv_acp_server::AcpCommand::Suspend as u32, vec![ManagedBuffer::output(&mut unused_output)])
        .expect("suspend ioctlv");
    tracing::info!(result, "suspend ioctlv completed");

    client.close(handle).expect("close /dev/acp_main");
}
