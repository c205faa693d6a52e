// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use byteorder::{BigEndian, ByteOrder};

use crate::ids::ProcessId;

/// Commands a guest (or kernel client) can issue through an `IpcBlock`
/// (spec.md "IPC block").
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum Command {
    Open = 0,
    Close = 1,
    Read = 2,
    Write = 3,
    Seek = 4,
    Ioctl = 5,
    Ioctlv = 6,
    Reply = 7,
}

impl Command {
    pub fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            0 => Command::Open,
            1 => Command::Close,
            2 => Command::Read,
            3 => Command::Write,
            4 => Command::Seek,
            5 => Command::Ioctl,
            6 => Command::Ioctlv,
            7 => Command::Reply,
            _ => return None,
        })
    }
}

/// Size in bytes of the wire-format IPC block (spec.md §6: "Size 0x80
/// bytes"). Any implementation must preserve field offsets because guest
/// code accesses them by offset.
pub const IPC_BLOCK_WIRE_SIZE: usize = 0x80;

const OFF_COMMAND: usize = 0x00;
const OFF_REPLY: usize = 0x04;
const OFF_HANDLE: usize = 0x08;
const OFF_FLAGS: usize = 0x0C;
const OFF_CPU_ID: usize = 0x10;
const OFF_PROCESS_ID: usize = 0x14;
const OFF_TITLE_ID: usize = 0x18;
// 4 reserved bytes at 0x20
const OFF_ARGS: usize = 0x24;
const OFF_PREV_COMMAND: usize = 0x38;
const OFF_PREV_HANDLE: usize = 0x3C;
const OFF_BUFFER1: usize = 0x40;
const OFF_BUFFER2: usize = 0x44;
const OFF_NAME_BUFFER: usize = 0x48;
const NAME_BUFFER_LEN: usize = 0x20;

/// Host-endian, in-kernel representation of the guest/kernel IPC request
/// block (spec.md §3 "IPC block (wire format at the process boundary)").
///
/// Internal kernel state is always host-endian (spec.md §9 "Big-endian wire
/// structs"); conversion to/from the big-endian wire format happens only at
/// `to_wire`/`from_wire`, which is the kernel/guest boundary.
#[derive(Clone, Debug)]
pub struct IpcBlock {
    pub command: u32,
    pub reply: i32,
    pub handle: i32,
    pub cpu_core: u32,
    pub process_id: u32,
    pub title_id: u64,
    /// Five 32-bit command-specific argument slots. Interpreted per
    /// `command`: open{path_len, mode, ..}, close{unk_arg0, ..},
    /// read/write{ptr, len, ..}, seek{offset, origin, ..},
    /// ioctl{cmd, in_buf, in_len, out_buf, out_len},
    /// ioctlv{cmd, num_in, num_out, vec_ptr, ..}.
    pub args: [u32; 5],
    /// Command issued on the previous hop of a re-entrant call, for re-entry
    /// tracking.
    pub prev_command: u32,
    pub prev_handle: i32,
    pub buffer1: u32,
    pub buffer2: u32,
    /// Device path for `open` requests, NUL-padded.
    pub path: [u8; NAME_BUFFER_LEN],
}

impl Default for IpcBlock {
    fn default() -> Self {
        IpcBlock {
            command: Command::Open as u32,
            reply: 0,
            handle: -1,
            cpu_core: 0,
            process_id: 0,
            title_id: 0,
            args: [0; 5],
            prev_command: 0,
            prev_handle: -1,
            buffer1: 0,
            buffer2: 0,
            path: [0u8; NAME_BUFFER_LEN],
        }
    }
}

impl IpcBlock {
    pub fn process_id(&self) -> ProcessId {
        ProcessId(self.process_id as u8)
    }

    pub fn path_str(&self) -> &str {
        let len = self.path.iter().position(|&b| b == 0).unwrap_or(self.path.len());
        core::str::from_utf8(&self.path[..len]).unwrap_or("")
    }

    pub fn set_path(&mut self, path: &str) {
        self.path = [0u8; NAME_BUFFER_LEN];
        let bytes = path.as_bytes();
        let n = bytes.len().min(NAME_BUFFER_LEN - 1);
        self.path[..n].copy_from_slice(&bytes[..n]);
    }

    /// Serializes this block into the big-endian wire layout, preserving the
    /// exact field offsets guest code depends on.
    pub fn to_wire(&self) -> [u8; IPC_BLOCK_WIRE_SIZE] {
        let mut out = [0u8; IPC_BLOCK_WIRE_SIZE];
        BigEndian::write_u32(&mut out[OFF_COMMAND..], self.command);
        BigEndian::write_i32(&mut out[OFF_REPLY..], self.reply);
        BigEndian::write_i32(&mut out[OFF_HANDLE..], self.handle);
        BigEndian::write_u32(&mut out[OFF_FLAGS..], 0);
        BigEndian::write_u32(&mut out[OFF_CPU_ID..], self.cpu_core);
        BigEndian::write_u32(&mut out[OFF_PROCESS_ID..], self.process_id);
        BigEndian::write_u64(&mut out[OFF_TITLE_ID..], self.title_id);
        for (i, arg) in self.args.iter().enumerate() {
            BigEndian::write_u32(&mut out[OFF_ARGS + i * 4..], *arg);
        }
        BigEndian::write_u32(&mut out[OFF_PREV_COMMAND..], self.prev_command);
        BigEndian::write_i32(&mut out[OFF_PREV_HANDLE..], self.prev_handle);
        BigEndian::write_u32(&mut out[OFF_BUFFER1..], self.buffer1);
        BigEndian::write_u32(&mut out[OFF_BUFFER2..], self.buffer2);
        out[OFF_NAME_BUFFER..OFF_NAME_BUFFER + NAME_BUFFER_LEN]
            .copy_from_slice(&self.path);
        out
    }

    /// Parses a big-endian wire block back into host-endian form.
    pub fn from_wire(buf: &[u8; IPC_BLOCK_WIRE_SIZE]) -> Self {
        let mut args = [0u32; 5];
        for (i, slot) in args.iter_mut().enumerate() {
            *slot = BigEndian::read_u32(&buf[OFF_ARGS + i * 4..]);
        }
        let mut path = [0u8; NAME_BUFFER_LEN];
        path.copy_from_slice(&buf[OFF_NAME_BUFFER..OFF_NAME_BUFFER + NAME_BUFFER_LEN]);
        IpcBlock {
            command: BigEndian::read_u32(&buf[OFF_COMMAND..]),
            reply: BigEndian::read_i32(&buf[OFF_REPLY..]),
            handle: BigEndian::read_i32(&buf[OFF_HANDLE..]),
            cpu_core: BigEndian::read_u32(&buf[OFF_CPU_ID..]),
            process_id: BigEndian::read_u32(&buf[OFF_PROCESS_ID..]),
            title_id: BigEndian::read_u64(&buf[OFF_TITLE_ID..]),
            args,
            prev_command: BigEndian::read_u32(&buf[OFF_PREV_COMMAND..]),
            prev_handle: BigEndian::read_i32(&buf[OFF_PREV_HANDLE..]),
            buffer1: BigEndian::read_u32(&buf[OFF_BUFFER1..]),
            buffer2: BigEndian::read_u32(&buf[OFF_BUFFER2..]),
            path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_wire_format() {
        let mut block = IpcBlock {
            command: Command::Ioctl as u32,
            reply: -5,
            handle: 3,
            cpu_core: 1,
            process_id: 7,
            title_id: 0x0005_0010_1234_5678,
            args: [1, 2, 3, 4, 5],
            prev_command: Command::Open as u32,
            prev_handle: 2,
            buffer1: 0x1000,
            buffer2: 0x2000,
            path: [0; 32],
        };
        block.set_path("/dev/acp_main");
        let wire = block.to_wire();
        assert_eq!(wire.len(), IPC_BLOCK_WIRE_SIZE);
        let back = IpcBlock::from_wire(&wire);
        assert_eq!(back.command, block.command);
        assert_eq!(back.reply, block.reply);
        assert_eq!(back.title_id, block.title_id);
        assert_eq!(back.args, block.args);
        assert_eq!(back.path_str(), "/dev/acp_main");
    }

    #[test]
    fn field_offsets_match_wire_contract() {
        let mut block = IpcBlock::default();
        block.command = 0xAABBCCDD;
        let wire = block.to_wire();
        assert_eq!(&wire[OFF_COMMAND..OFF_COMMAND + 4], &[0xAA, 0xBB, 0xCC, 0xDD]);
        assert_eq!(wire.len() - OFF_NAME_BUFFER, 32 + 0x18);
    }
}
