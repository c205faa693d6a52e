// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use byteorder::{BigEndian, ByteOrder};

/// One entry of an ioctlv vector array (spec.md §6 "Ioctl-vec entry"): 12
/// bytes, big-endian on the wire. For ioctlv, the kernel only ever sees
/// `physical_address` (mapped through the collaborator's guest-memory
/// translator); `virtual_address` and `length` are carried through for the
/// guest driver's own bookkeeping.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub struct IoctlVector {
    pub virtual_address: u32,
    pub length: u32,
    pub physical_address: u32,
}

pub const IOCTL_VECTOR_WIRE_SIZE: usize = 12;

impl IoctlVector {
    pub fn to_wire(&self) -> [u8; IOCTL_VECTOR_WIRE_SIZE] {
        let mut out = [0u8; IOCTL_VECTOR_WIRE_SIZE];
        BigEndian::write_u32(&mut out[0..4], self.virtual_address);
        BigEndian::write_u32(&mut out[4..8], self.length);
        BigEndian::write_u32(&mut out[8..12], self.physical_address);
        out
    }

    pub fn from_wire(buf: &[u8; IOCTL_VECTOR_WIRE_SIZE]) -> Self {
        IoctlVector {
            virtual_address: BigEndian::read_u32(&buf[0..4]),
            length: BigEndian::read_u32(&buf[4..8]),
            physical_address: BigEndian::read_u32(&buf[8..12]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let v = IoctlVector {
            virtual_address: 0x1003,
            length: 127,
            physical_address: 0x1003_0000,
        };
        assert_eq!(IoctlVector::from_wire(&v.to_wire()), v);
    }
}
