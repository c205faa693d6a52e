// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Firmware-version-pinned boot tables: the fixed process table and the
//! resource-manager registration table the root thread walks during step 4
//! and step 5 of boot (spec.md §4.6). Parsed once at startup with `serde` +
//! `toml`, the same stack the teacher's `build-util` crate uses for its
//! build-time app descriptor, adapted here to ordinary runtime parsing since
//! this kernel runs as a host process rather than being cross-compiled.

use indexmap::IndexMap;
use serde::Deserialize;

use abi::{FeatureId, Priority, ProcessId, PermissionMask, ALL_CAPABILITY_FEATURE, ALL_CAPABILITY_MASK, DEFAULT_CAPABILITY_FEATURE, DEFAULT_CAPABILITY_MASK};

/// The table bundled into the binary via `include_str!`; overridable by
/// tests or `sim` through `FirmwareTable::parse`.
pub const DEFAULT_FIRMWARE_TOML: &str = include_str!("../config/firmware.toml");

#[derive(Debug, Deserialize)]
pub struct ProcessTableEntry {
    pub id: u8,
    pub name: String,
    /// Base priority the process's root thread is forked with.
    pub priority: u8,
    /// Privileged processes get the "all" capability at boot (spec.md
    /// §4.6 step 2); everyone else gets the narrow default.
    #[serde(default)]
    pub privileged: bool,
}

#[derive(Debug, Deserialize)]
pub struct ResourceManagerBootEntry {
    pub path: String,
    pub system_mode_flags: u32,
    pub owning_process: String,
    /// Opaque fourth field; see SPEC_FULL.md's open-question resolution —
    /// reproduced as-is, never interpreted by this core.
    #[serde(default)]
    pub unk4: u32,
}

#[derive(Debug, Deserialize, Default)]
struct RawFirmwareTable {
    #[serde(rename = "process", default)]
    processes: Vec<ProcessTableEntry>,
    #[serde(rename = "resource_manager", default)]
    resource_managers: Vec<ResourceManagerBootEntry>,
}

#[derive(Debug, Default)]
pub struct FirmwareTable {
    pub processes: Vec<ProcessTableEntry>,
    pub resource_managers: Vec<ResourceManagerBootEntry>,
    by_name: IndexMap<String, usize>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("malformed firmware table: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("resource manager {path:?} names unknown owning process {owner:?}")]
    UnknownOwner { path: String, owner: String },
}

impl FirmwareTable {
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let raw: RawFirmwareTable = toml::from_str(text)?;
        let mut by_name = IndexMap::new();
        for (idx, p) in raw.processes.iter().enumerate() {
            by_name.insert(p.name.clone(), idx);
        }
        for rm in &raw.resource_managers {
            if !by_name.contains_key(&rm.owning_process) {
                return Err(ConfigError::UnknownOwner {
                    path: rm.path.clone(),
                    owner: rm.owning_process.clone(),
                });
            }
        }
        Ok(FirmwareTable { processes: raw.processes, resource_managers: raw.resource_managers, by_name })
    }

    pub fn default_table() -> Self {
        Self::parse(DEFAULT_FIRMWARE_TOML).expect("bundled firmware.toml is well-formed")
    }

    pub fn process_by_name(&self, name: &str) -> Option<&ProcessTableEntry> {
        self.by_name.get(name).map(|&idx| &self.processes[idx])
    }

    pub fn capability_for(entry: &ProcessTableEntry) -> (FeatureId, PermissionMask) {
        if entry.privileged {
            (ALL_CAPABILITY_FEATURE, ALL_CAPABILITY_MASK)
        } else {
            (DEFAULT_CAPABILITY_FEATURE, DEFAULT_CAPABILITY_MASK)
        }
    }

    pub fn process_id(entry: &ProcessTableEntry) -> ProcessId {
        ProcessId(entry.id)
    }

    pub fn priority(entry: &ProcessTableEntry) -> Priority {
        Priority(entry.priority)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_table_parses_and_is_internally_consistent() {
        let table = FirmwareTable::default_table();
        assert!(!table.processes.is_empty());
        for rm in &table.resource_managers {
            assert!(table.process_by_name(&rm.owning_process).is_some());
        }
    }

    #[test]
    fn unknown_owner_is_rejected() {
        let text = r#"
            [[process]]
            id = 1
            name = "FS"
            priority = 30

            [[resource_manager]]
            path = "/dev/fsa"
            system_mode_flags = 0
            owning_process = "NOPE"
        "#;
        assert!(matches!(FirmwareTable::parse(text), Err(ConfigError::UnknownOwner { .. })));
    }
}
