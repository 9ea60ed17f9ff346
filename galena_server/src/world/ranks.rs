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

use anyhow::{ensure, Result};

/// A position on the server's rank ladder. Higher ordinal means more
/// privilege; comparisons between RankIds from different resolvers are
/// meaningless.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct RankId(pub u16);

/// Seam to the external permission system. The map core never interprets
/// rank identities beyond their total order; resolution of names and legacy
/// ladder indices is the collaborator's business.
pub trait RankResolver: Send + Sync {
    /// Resolves a rank name, case-insensitively.
    fn by_name(&self, name: &str) -> Option<RankId>;
    /// Resolves a raw ladder index, as stored by old map files.
    fn by_index(&self, index: usize) -> Option<RankId>;
    /// Canonical name of a rank, for serialization.
    fn name_of(&self, rank: RankId) -> Option<&str>;
    /// The bottom of the ladder; the fallback when an identifier from an old
    /// file cannot be resolved at all.
    fn lowest(&self) -> RankId;
}

/// A fixed rank ladder, lowest first. Sufficient for tests and for servers
/// whose rank list is static configuration.
pub struct StaticRankList {
    names: Vec<String>,
}
impl StaticRankList {
    pub fn new(names: impl IntoIterator<Item = impl Into<String>>) -> Result<StaticRankList> {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        ensure!(!names.is_empty(), "Rank ladder must have at least one rank");
        Ok(StaticRankList { names })
    }
}
impl RankResolver for StaticRankList {
    fn by_name(&self, name: &str) -> Option<RankId> {
        self.names
            .iter()
            .position(|n| n.eq_ignore_ascii_case(name))
            .map(|i| RankId(i as u16))
    }

    fn by_index(&self, index: usize) -> Option<RankId> {
        if index < self.names.len() {
            Some(RankId(index as u16))
        } else {
            None
        }
    }

    fn name_of(&self, rank: RankId) -> Option<&str> {
        self.names.get(rank.0 as usize).map(String::as_str)
    }

    fn lowest(&self) -> RankId {
        RankId(0)
    }
}

/// A player's identity as the permission system sees it: just a name and a
/// rank. Session state lives with the connection, not here.
#[derive(Clone, Debug)]
pub struct PlayerProfile {
    pub name: String,
    pub rank: RankId,
}
impl PlayerProfile {
    pub fn new(name: impl Into<String>, rank: RankId) -> Self {
        Self {
            name: name.into(),
            rank,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ladder_resolution() {
        let ranks = StaticRankList::new(["guest", "builder", "op"]).unwrap();
        assert_eq!(ranks.by_name("Builder"), Some(RankId(1)));
        assert_eq!(ranks.by_name("king"), None);
        assert_eq!(ranks.by_index(2), Some(RankId(2)));
        assert_eq!(ranks.by_index(3), None);
        assert_eq!(ranks.name_of(RankId(0)), Some("guest"));
        assert_eq!(ranks.lowest(), RankId(0));
        assert!(ranks.by_name("op").unwrap() > ranks.by_name("guest").unwrap());
    }
}
