// Copyright 2023 drey7925
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::format::UnknownBlockPolicy;

#[derive(Clone, Serialize, Deserialize, Debug)]
#[serde(default)]
pub struct WorldSettings {
    /// Interval between update-drain ticks, in milliseconds.
    pub tick_interval_ms: u64,
    /// Interval between save/backup sweeps, in seconds.
    pub maintenance_interval_secs: u64,
    /// Aggregate block-update budget per tick, shared across observers.
    /// More observers means a smaller per-observer slice, bounding outbound
    /// traffic.
    pub max_updates_per_tick: usize,
    /// Floor for the per-tick budget so a crowded world still drains.
    pub min_updates_per_tick: usize,
    /// Back the map up once this many changes accumulate. 0 disables
    /// backups.
    pub backup_after_changes: u64,
    /// Keep the map in memory when the last player leaves.
    pub keep_loaded: bool,
    /// Reject map files containing unknown block bytes instead of coercing
    /// them to air.
    pub strict_block_validation: bool,
    /// Grid size for worlds created from scratch.
    pub default_dimensions: (u16, u16, u16),
}

pub const FILENAME: &str = "world.ron";

impl Default for WorldSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 50,
            maintenance_interval_secs: 60,
            max_updates_per_tick: 2048,
            min_updates_per_tick: 128,
            backup_after_changes: 1,
            keep_loaded: false,
            strict_block_validation: false,
            default_dimensions: (128, 128, 64),
        }
    }
}

impl WorldSettings {
    pub fn unknown_block_policy(&self) -> UnknownBlockPolicy {
        if self.strict_block_validation {
            UnknownBlockPolicy::Reject
        } else {
            UnknownBlockPolicy::ReplaceWithAir
        }
    }
}

pub fn load(data_dir: &Path) -> Result<WorldSettings> {
    let config_file = data_dir.join(FILENAME);
    if !config_file.exists() {
        log::info!("No settings found at {}; using defaults", config_file.display());
        return Ok(Default::default());
    }
    let config = ron::from_str::<WorldSettings>(&std::fs::read_to_string(&config_file)?)
        .with_context(|| format!("Parsing {}", config_file.display()))?;
    log::info!("Loaded settings from {}", config_file.display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load(dir.path()).unwrap();
        assert_eq!(settings.tick_interval_ms, 50);
    }

    #[test]
    fn round_trip_through_ron() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = WorldSettings::default();
        settings.keep_loaded = true;
        settings.max_updates_per_tick = 64;
        std::fs::write(
            dir.path().join(FILENAME),
            ron::ser::to_string(&settings).unwrap(),
        )
        .unwrap();
        let loaded = load(dir.path()).unwrap();
        assert!(loaded.keep_loaded);
        assert_eq!(loaded.max_updates_per_tick, 64);
    }
}
