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

//! A dense bit-per-cell presence index over a bounded 3D region, used to
//! track which cells of a selection have been touched (undo buffers, flood
//! fills, draw operations).

use bitvec::prelude as bv;
use thiserror::Error;

use crate::coordinates::BlockCoordinate;
use crate::geometry::BoundingBox;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum BitGridError {
    #[error("Coordinate {0:?} is outside the grid bounds")]
    OutOfBounds(BlockCoordinate),
    #[error("Grid was modified during iteration (version {snapshot} != {current})")]
    ConcurrentModification { snapshot: u64, current: u64 },
}

/// One bit per cell of a [BoundingBox].
///
/// Mutations bump an internal generation counter; iterators snapshot it and
/// fail on the next advance if the grid changed underneath them, rather than
/// yielding coordinates from a mix of generations.
pub struct BitGrid {
    bounds: BoundingBox,
    dim_x: usize,
    dim_y: usize,
    bits: bv::BitVec<u32, bv::Lsb0>,
    len: usize,
    version: u64,
}

impl BitGrid {
    pub fn new(bounds: BoundingBox) -> Self {
        let volume = bounds.volume() as usize;
        Self {
            bounds,
            dim_x: bounds.width_x() as usize,
            dim_y: bounds.width_y() as usize,
            bits: bv::bitvec![u32, bv::Lsb0; 0; volume],
            len: 0,
            version: 0,
        }
    }

    pub fn bounds(&self) -> BoundingBox {
        self.bounds
    }

    /// Count of set bits, tracked incrementally.
    pub fn len(&self) -> usize {
        self.len
    }
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The generation counter. Bumped by every effective mutation.
    pub fn version(&self) -> u64 {
        self.version
    }

    #[inline]
    fn linear_index(&self, coord: BlockCoordinate) -> Result<usize, BitGridError> {
        if !self.bounds.contains_point(coord) {
            return Err(BitGridError::OutOfBounds(coord));
        }
        let offset = self.bounds.min_vertex();
        let x = (coord.x - offset.x) as usize;
        let y = (coord.y - offset.y) as usize;
        let z = (coord.z - offset.z) as usize;
        Ok((z * self.dim_y + y) * self.dim_x + x)
    }

    #[inline]
    fn coordinate_of(&self, index: usize) -> BlockCoordinate {
        let offset = self.bounds.min_vertex();
        BlockCoordinate {
            x: offset.x + (index % self.dim_x) as i32,
            y: offset.y + ((index / self.dim_x) % self.dim_y) as i32,
            z: offset.z + (index / (self.dim_x * self.dim_y)) as i32,
        }
    }

    pub fn get(&self, coord: BlockCoordinate) -> Result<bool, BitGridError> {
        Ok(self.bits[self.linear_index(coord)?])
    }

    /// Sets the bit and returns its previous value. Setting an already-set
    /// bit leaves the count and generation untouched.
    pub fn set(&mut self, coord: BlockCoordinate) -> Result<bool, BitGridError> {
        let index = self.linear_index(coord)?;
        let prev = self.bits.replace(index, true);
        if !prev {
            self.len += 1;
            self.version += 1;
        }
        Ok(prev)
    }

    /// Clears the bit and returns its previous value.
    pub fn unset(&mut self, coord: BlockCoordinate) -> Result<bool, BitGridError> {
        let index = self.linear_index(coord)?;
        let prev = self.bits.replace(index, false);
        if prev {
            self.len -= 1;
            self.version += 1;
        }
        Ok(prev)
    }

    /// Zeroes the whole backing store. One generation bump regardless of how
    /// many bits were live.
    pub fn clear(&mut self) {
        self.bits.fill(false);
        self.len = 0;
        self.version += 1;
    }

    /// Starts a traversal of all set bits in ascending linear order.
    ///
    /// The cursor snapshots the generation counter and does not borrow the
    /// grid between advances, so a caller can interleave other grid access
    /// (e.g. re-locking a shared grid on every step). If the grid mutates
    /// after the cursor was taken, the next [SetBitCursor::advance] reports
    /// [BitGridError::ConcurrentModification] instead of yielding
    /// coordinates from a mix of generations.
    pub fn cursor(&self) -> SetBitCursor {
        SetBitCursor {
            snapshot: self.version,
            next_index: 0,
            done: false,
        }
    }

    /// Iterator over set-bit coordinates, for the common case where the grid
    /// is borrowed for the whole traversal. Same fail-fast contract as
    /// [BitGrid::cursor].
    pub fn iter(&self) -> SetBits<'_> {
        SetBits {
            grid: self,
            cursor: self.cursor(),
        }
    }
}

/// A borrowless traversal position; see [BitGrid::cursor].
pub struct SetBitCursor {
    snapshot: u64,
    next_index: usize,
    done: bool,
}

impl SetBitCursor {
    pub fn advance(&mut self, grid: &BitGrid) -> Option<Result<BlockCoordinate, BitGridError>> {
        if self.done {
            return None;
        }
        if grid.version != self.snapshot {
            self.done = true;
            return Some(Err(BitGridError::ConcurrentModification {
                snapshot: self.snapshot,
                current: grid.version,
            }));
        }
        match grid.bits[self.next_index.min(grid.bits.len())..].first_one() {
            Some(offset) => {
                let index = self.next_index + offset;
                self.next_index = index + 1;
                Some(Ok(grid.coordinate_of(index)))
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}

pub struct SetBits<'a> {
    grid: &'a BitGrid,
    cursor: SetBitCursor,
}

impl Iterator for SetBits<'_> {
    type Item = Result<BlockCoordinate, BitGridError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.cursor.advance(self.grid)
    }
}
