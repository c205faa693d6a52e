// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `IOS_GetTimerTicks`-equivalent uptime query, exposed as a small borrowed
//! handle rather than a bare free function so call sites read the same way
//! `Kernel::stats()`/`Kernel::uptime()` do.

use crate::kernel::Kernel;
use crate::timer::Nanos;

/// A read-only handle onto a kernel's monotonic clock.
pub struct Clock<'k> {
    kernel: &'k Kernel,
}

impl<'k> Clock<'k> {
    pub fn new(kernel: &'k Kernel) -> Self {
        Clock { kernel }
    }

    /// Nanoseconds elapsed since the kernel was constructed.
    pub fn now(&self) -> Nanos {
        self.kernel.uptime()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FirmwareTable;

    #[test]
    fn now_is_monotonic() {
        let kernel = Kernel::new(FirmwareTable::default_table());
        let clock = Clock::new(&kernel);
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }
}
