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

use anyhow::{bail, Context, Result};
use galena_core::coordinates::BlockCoordinate;
use galena_core::geometry::BoundingBox;
use log::warn;
use rustc_hash::FxHashSet;

use super::ranks::{PlayerProfile, RankId, RankResolver};

/// How a zone record encodes its minimum-build rank. Selected by the map
/// format's version table.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ZoneRankEncoding {
    /// Rank stored by name; current format.
    Named,
    /// Rank stored as a raw ladder index, and the include/exclude sections
    /// may be missing entirely; written by servers before per-player
    /// overrides existed.
    LegacyIndex,
}

/// A named region of the map with its own build rule: a bounding box, a
/// minimum rank, and per-player include/exclude overrides.
///
/// Name uniqueness (case-insensitive) is enforced by the owning map's zone
/// registry, not here.
#[derive(Clone, Debug)]
pub struct Zone {
    name: String,
    bounds: BoundingBox,
    min_build_rank: RankId,
    // Both sets hold lowercased names.
    included: FxHashSet<String>,
    excluded: FxHashSet<String>,
}

impl Zone {
    pub fn new(name: impl Into<String>, bounds: BoundingBox, min_build_rank: RankId) -> Zone {
        Zone {
            name: name.into(),
            bounds,
            min_build_rank,
            included: FxHashSet::default(),
            excluded: FxHashSet::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn bounds(&self) -> BoundingBox {
        self.bounds
    }
    pub fn min_build_rank(&self) -> RankId {
        self.min_build_rank
    }
    pub fn set_min_build_rank(&mut self, rank: RankId) {
        self.min_build_rank = rank;
    }
    pub fn set_bounds(&mut self, bounds: BoundingBox) {
        self.bounds = bounds;
    }

    #[inline]
    pub fn contains(&self, coord: BlockCoordinate) -> bool {
        self.bounds.contains_point(coord)
    }

    /// Whether the player may build inside this zone. Evaluation order:
    /// explicit include wins over everything, explicit exclude wins over
    /// rank, otherwise the rank comparison decides.
    pub fn can_build(&self, player: &PlayerProfile) -> bool {
        let key = player.name.to_lowercase();
        if self.included.contains(&key) {
            return true;
        }
        if self.excluded.contains(&key) {
            return false;
        }
        player.rank >= self.min_build_rank
    }

    /// Toggles the player onto (or back off) the include list, removing them
    /// from the exclude list if present. Returns true if the player is now
    /// included.
    pub fn include(&mut self, player_name: &str) -> bool {
        let key = player_name.to_lowercase();
        self.excluded.remove(&key);
        if self.included.remove(&key) {
            false
        } else {
            self.included.insert(key);
            true
        }
    }

    /// Toggles the player onto (or back off) the exclude list, removing them
    /// from the include list if present. Returns true if the player is now
    /// excluded.
    pub fn exclude(&mut self, player_name: &str) -> bool {
        let key = player_name.to_lowercase();
        self.included.remove(&key);
        if self.excluded.remove(&key) {
            false
        } else {
            self.excluded.insert(key);
            true
        }
    }

    pub fn included_players(&self) -> impl Iterator<Item = &str> {
        self.included.iter().map(String::as_str)
    }
    pub fn excluded_players(&self) -> impl Iterator<Item = &str> {
        self.excluded.iter().map(String::as_str)
    }

    /// Flat record form:
    /// `"<name> <xMin> <yMin> <zMin> <xMax> <yMax> <zMax> <rank>,<included>,<excluded>"`.
    /// Note the corner-pair ordering differs from [BoundingBox]'s own string
    /// form; this layout predates it.
    pub fn serialize(&self, ranks: &dyn RankResolver) -> String {
        let min = self.bounds.min_vertex();
        let max = self.bounds.max_vertex();
        let rank_name = match ranks.name_of(self.min_build_rank) {
            Some(name) => name.to_string(),
            None => {
                // A rank that the current ladder can't name round-trips as
                // its ordinal, which the loader resolves as a legacy index.
                warn!(
                    "Zone {} has rank {:?} with no name in the current ladder",
                    self.name, self.min_build_rank
                );
                self.min_build_rank.0.to_string()
            }
        };
        let mut included: Vec<_> = self.included.iter().map(String::as_str).collect();
        included.sort_unstable();
        let mut excluded: Vec<_> = self.excluded.iter().map(String::as_str).collect();
        excluded.sort_unstable();
        format!(
            "{} {} {} {} {} {} {} {},{},{}",
            self.name,
            min.x,
            min.y,
            min.z,
            max.x,
            max.y,
            max.z,
            rank_name,
            included.join(" "),
            excluded.join(" ")
        )
    }

    /// Parses a zone record. Unresolvable rank identifiers degrade to the
    /// lowest rank with a logged warning rather than failing the record;
    /// structural damage (missing fields, unparseable coordinates) is an
    /// error so the caller can skip the record.
    pub fn deserialize(
        raw: &str,
        encoding: ZoneRankEncoding,
        ranks: &dyn RankResolver,
    ) -> Result<Zone> {
        let sections: Vec<&str> = raw.split(',').collect();
        match encoding {
            ZoneRankEncoding::Named => {
                if sections.len() != 3 {
                    bail!("Expected 3 comma-separated sections, got {}", sections.len());
                }
            }
            ZoneRankEncoding::LegacyIndex => {
                if sections.len() != 1 && sections.len() != 3 {
                    bail!("Expected 1 or 3 comma-separated sections, got {}", sections.len());
                }
            }
        }

        let header: Vec<&str> = sections[0].split_whitespace().collect();
        if header.len() != 8 {
            bail!("Expected 8 header fields, got {}", header.len());
        }
        let name = header[0].to_string();
        let mut corners = [0i32; 6];
        for (slot, piece) in corners.iter_mut().zip(&header[1..7]) {
            *slot = piece
                .parse()
                .with_context(|| format!("Bad zone coordinate {piece:?}"))?;
        }
        let bounds = BoundingBox::from_corners(
            BlockCoordinate::new(corners[0], corners[1], corners[2]),
            BlockCoordinate::new(corners[3], corners[4], corners[5]),
        );

        let min_build_rank = resolve_rank_identifier(&name, header[7], ranks);

        let mut zone = Zone::new(name, bounds, min_build_rank);
        if let Some(included) = sections.get(1) {
            for player in included.split_whitespace() {
                zone.included.insert(player.to_lowercase());
            }
        }
        if let Some(excluded) = sections.get(2) {
            for player in excluded.split_whitespace() {
                zone.excluded.insert(player.to_lowercase());
            }
        }
        Ok(zone)
    }
}

/// Best-effort rank resolution for persisted identifiers: by name first,
/// then as a raw ladder index (legacy files), then the lowest defined rank.
/// The fallback is recovery policy - old files must stay loadable - so it
/// warns instead of failing.
fn resolve_rank_identifier(zone_name: &str, identifier: &str, ranks: &dyn RankResolver) -> RankId {
    if let Some(rank) = ranks.by_name(identifier) {
        return rank;
    }
    if let Ok(index) = identifier.parse::<usize>() {
        if let Some(rank) = ranks.by_index(index) {
            return rank;
        }
    }
    warn!(
        "Zone {} references unknown rank {:?}; falling back to the lowest rank",
        zone_name, identifier
    );
    ranks.lowest()
}
