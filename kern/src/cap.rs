// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-process client-capability table: feature-id → permission mask.

use abi::{FeatureId, PermissionMask, CAPABILITIES_PER_PROCESS};

#[derive(Copy, Clone, Debug)]
pub struct CapabilityTable {
    entries: [(FeatureId, PermissionMask); CAPABILITIES_PER_PROCESS],
}

impl Default for CapabilityTable {
    fn default() -> Self {
        CapabilityTable { entries: [(FeatureId::EMPTY, 0); CAPABILITIES_PER_PROCESS] }
    }
}

impl CapabilityTable {
    /// Grants `mask` for `feature`, overwriting any prior grant for that
    /// feature or filling the first empty slot. Silently drops the grant if
    /// the table is full and the feature isn't already present (the spec
    /// does not define an error path here; this table is only ever written
    /// by the trusted boot sequence).
    pub fn grant(&mut self, feature: FeatureId, mask: PermissionMask) {
        if let Some(slot) = self.entries.iter_mut().find(|(f, _)| *f == feature) {
            slot.1 = mask;
            return;
        }
        if let Some(slot) = self.entries.iter_mut().find(|(f, _)| *f == FeatureId::EMPTY) {
            *slot = (feature, mask);
        }
    }

    pub fn mask_for(&self, feature: FeatureId) -> PermissionMask {
        self.entries
            .iter()
            .find(|(f, _)| *f == feature)
            .map(|(_, m)| *m)
            .unwrap_or(0)
    }

    pub fn permits(&self, feature: FeatureId, required: PermissionMask) -> bool {
        self.mask_for(feature) & required == required
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grant_and_check() {
        let mut t = CapabilityTable::default();
        t.grant(FeatureId(1), 0xf);
        assert!(t.permits(FeatureId(1), 0x3));
        assert!(!t.permits(FeatureId(1), 0x10));
        assert!(!t.permits(FeatureId(2), 0x1));
    }

    #[test]
    fn all_capability_grant() {
        let mut t = CapabilityTable::default();
        t.grant(abi::ALL_CAPABILITY_FEATURE, abi::ALL_CAPABILITY_MASK);
        assert!(t.permits(abi::ALL_CAPABILITY_FEATURE, 0xdead_beef));
    }
}
