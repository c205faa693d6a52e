// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! High-water-mark accounting, gathered across the pools that enforce a
//! quota (threads, message queues, semaphores, timers, resource managers,
//! resource requests, resource handles). The original firmware scatters a
//! `most*` field next to each pool's free-list head; we keep the same shape
//! but collect them under one struct so `sim`/tests can snapshot the whole
//! kernel's utilization in one call.

#[derive(Copy, Clone, Debug, Default)]
pub struct PoolStats {
    pub in_use: usize,
    pub high_water: usize,
    pub capacity: usize,
}

impl PoolStats {
    pub fn record(&mut self, in_use: usize) {
        self.in_use = in_use;
        self.high_water = self.high_water.max(in_use);
    }
}

#[derive(Copy, Clone, Debug, Default)]
pub struct KernelStats {
    pub threads: PoolStats,
    pub message_queues: PoolStats,
    pub semaphores: PoolStats,
    pub timers: PoolStats,
    pub resource_managers: PoolStats,
    pub resource_requests: PoolStats,
}
