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

use std::fmt::Debug;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum BlockError {
    #[error("Block ID 0x{0:x} is not a known block type")]
    UnknownId(u8),
}

/// Highest block ID defined by the classic protocol (obsidian).
/// Everything above this is rejected or coerced to air, depending on the
/// caller's validation policy.
pub const MAX_KNOWN_BLOCK_ID: u8 = 49;

/// A single cell's block type. One byte on the wire and on disk.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct BlockId(pub u8);
impl BlockId {
    pub const AIR: BlockId = BlockId(0);
    pub const STONE: BlockId = BlockId(1);
    pub const GRASS: BlockId = BlockId(2);
    pub const DIRT: BlockId = BlockId(3);

    #[inline]
    pub fn is_known(&self) -> bool {
        self.0 <= MAX_KNOWN_BLOCK_ID
    }
    /// Builds a BlockId, rejecting bytes outside the known block-type range.
    pub fn checked(id: u8) -> Result<BlockId, BlockError> {
        if id <= MAX_KNOWN_BLOCK_ID {
            Ok(BlockId(id))
        } else {
            Err(BlockError::UnknownId(id))
        }
    }
    #[inline]
    pub fn is_air(&self) -> bool {
        self.0 == 0
    }
}

impl From<u8> for BlockId {
    fn from(value: u8) -> Self {
        BlockId(value)
    }
}
impl From<BlockId> for u8 {
    fn from(value: BlockId) -> Self {
        value.0
    }
}
impl Debug for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&format!("block:0x{:x}", self.0))
    }
}
