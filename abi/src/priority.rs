// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/// Thread scheduling priority. Numerically smaller is more important: a
/// thread at priority 0 preempts one at priority 1, and so on (spec.md
/// "Thread": "base priority (0..127; smaller = higher)").
///
/// This type deliberately does not implement `PartialOrd`/`Ord`, to avoid
/// confusing "greater" with "more important" at call sites; use
/// `is_more_important_than` instead.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
#[repr(transparent)]
pub struct Priority(pub u8);

impl Priority {
    /// Lowest priority (least important) a thread may hold; used for the
    /// root kernel thread (spec.md §4.6).
    pub const LOWEST: Priority = Priority(127);

    pub fn is_more_important_than(self, other: Self) -> bool {
        self.0 < other.0
    }

    pub fn is_at_least_as_important_as(self, other: Self) -> bool {
        self.0 <= other.0
    }
}
