// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Event/interrupt plane: a fixed-size device-id-indexed handler table and
//! two interrupt-status words (AHBALL, AHBLT).

use abi::{DeviceId, ProcessId};

use crate::mqueue::{Message, QueueId};

pub const MAX_DEVICES: usize = 48;

/// Devices `0..AHBALL_DEVICE_COUNT` are addressed by a bit in `ahball`;
/// everything at or above it is addressed by a bit in `ahblt`, at
/// `device.0 - AHBALL_DEVICE_COUNT`. Each device belongs to exactly one of
/// the two words, matching the original's per-device routing in
/// `IOS_ClearAndEnable` (never both, unlike a single flattened bitset).
pub const AHBALL_DEVICE_COUNT: usize = 32;

#[derive(Copy, Clone, Debug)]
pub struct EventSlot {
    pub queue: QueueId,
    pub message: Message,
    pub owner: ProcessId,
}

/// One of the two hardware-mirrored interrupt-status words named in the
/// data model.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StatusWord {
    AhbAll,
    AhbLt,
}

fn word_for(device: DeviceId) -> StatusWord {
    if (device.0 as usize) < AHBALL_DEVICE_COUNT {
        StatusWord::AhbAll
    } else {
        StatusWord::AhbLt
    }
}

fn bit_for(device: DeviceId) -> u32 {
    1u32 << (device.0 as usize % AHBALL_DEVICE_COUNT)
}

pub struct EventPlane {
    slots: [Option<EventSlot>; MAX_DEVICES],
    ahball_status: u32,
    ahball_mask: u32,
    ahblt_status: u32,
    ahblt_mask: u32,
}

impl Default for EventPlane {
    fn default() -> Self {
        EventPlane {
            slots: [None; MAX_DEVICES],
            ahball_status: 0,
            ahball_mask: 0,
            ahblt_status: 0,
            ahblt_mask: 0,
        }
    }
}

impl EventPlane {
    /// Registers `(queue, message)` for `device`, marking `queue` as
    /// event-handler-owned so it can't be silently destroyed.
    pub fn register(&mut self, device: DeviceId, owner: ProcessId, queue: QueueId, message: Message) {
        self.slots[device.0 as usize] = Some(EventSlot { queue, message, owner });
    }

    /// Clears the device's pending bit and sets its mask bit, in whichever
    /// one of the two status words the device belongs to (conservatively
    /// clearing rather than skipping it to avoid a race, at the cost of a
    /// spurious wakeup; we hold the scheduler lock for the whole operation
    /// so there's no actual race with `raise`).
    pub fn clear_and_enable(&mut self, device: DeviceId) {
        let bit = bit_for(device);
        match word_for(device) {
            StatusWord::AhbAll => {
                self.ahball_status &= !bit;
                self.ahball_mask |= bit;
            }
            StatusWord::AhbLt => {
                self.ahblt_status &= !bit;
                self.ahblt_mask |= bit;
            }
        }
    }

    pub fn raise(&mut self, word: StatusWord, mask: u32) {
        match word {
            StatusWord::AhbAll => self.ahball_status |= mask,
            StatusWord::AhbLt => self.ahblt_status |= mask,
        }
    }

    /// Walks every bit set in `(status & mask)` for both words, returning
    /// the `(device, slot)` pairs to deliver, and clears+disables each bit
    /// that was drained. `ahblt`'s bit `n` maps back to device
    /// `AHBALL_DEVICE_COUNT + n`, so the two words never alias.
    pub fn drain(&mut self) -> Vec<(DeviceId, EventSlot)> {
        let mut out = Vec::new();
        for (word, base) in [(StatusWord::AhbAll, 0usize), (StatusWord::AhbLt, AHBALL_DEVICE_COUNT)] {
            let (status, mask) = match word {
                StatusWord::AhbAll => (self.ahball_status, self.ahball_mask),
                StatusWord::AhbLt => (self.ahblt_status, self.ahblt_mask),
            };
            let mut pending = status & mask;
            while pending != 0 {
                let bit_index = pending.trailing_zeros() as usize;
                let bit = 1u32 << bit_index;
                pending &= !bit;
                let device_index = base + bit_index;
                if let Some(slot) = self.slots.get(device_index).copied().flatten() {
                    out.push((DeviceId(device_index as u8), slot));
                }
                match word {
                    StatusWord::AhbAll => {
                        self.ahball_status &= !bit;
                        self.ahball_mask &= !bit;
                    }
                    StatusWord::AhbLt => {
                        self.ahblt_status &= !bit;
                        self.ahblt_mask &= !bit;
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_delivers_and_clears() {
        let mut plane = EventPlane::default();
        plane.register(DeviceId(3), ProcessId(1), QueueId(0), 0xAA);
        plane.clear_and_enable(DeviceId(3));
        plane.raise(StatusWord::AhbAll, 1 << 3);
        let delivered = plane.drain();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, DeviceId(3));
        assert_eq!(delivered[0].1.message, 0xAA);
        assert!(plane.drain().is_empty());
    }

    #[test]
    fn high_device_lands_in_ahblt_without_aliasing_low_device() {
        let mut plane = EventPlane::default();
        // DeviceId(3) and DeviceId(35) share the same bit position mod 32,
        // so they must never be confused with each other.
        plane.register(DeviceId(3), ProcessId(1), QueueId(0), 0xAA);
        plane.register(DeviceId(35), ProcessId(1), QueueId(1), 0xBB);
        plane.clear_and_enable(DeviceId(3));
        plane.clear_and_enable(DeviceId(35));
        assert_eq!(word_for(DeviceId(3)), StatusWord::AhbAll);
        assert_eq!(word_for(DeviceId(35)), StatusWord::AhbLt);

        plane.raise(StatusWord::AhbLt, bit_for(DeviceId(35)));
        let delivered = plane.drain();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, DeviceId(35));
        assert_eq!(delivered[0].1.message, 0xBB);
    }
}
