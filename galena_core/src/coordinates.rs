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
use std::str::FromStr;

use anyhow::bail;
use thiserror::Error;

/// A 3D coordinate in a map. The z axis is vertical (height); x and y span
/// the horizontal plane, matching the on-disk block ordering.
///
/// Coordinates are signed so that out-of-grid positions (e.g. a selection
/// corner dragged past the edge) can be represented; the map itself treats
/// anything outside `[0, dimension)` as air.
#[derive(PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub struct BlockCoordinate {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Debug for BlockCoordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("[{}, {}, {}]", self.x, self.y, self.z))
    }
}
impl BlockCoordinate {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub fn try_delta(&self, x: i32, y: i32, z: i32) -> Option<BlockCoordinate> {
        let x = self.x.checked_add(x)?;
        let y = self.y.checked_add(y)?;
        let z = self.z.checked_add(z)?;

        Some(BlockCoordinate { x, y, z })
    }
}
impl ToString for BlockCoordinate {
    fn to_string(&self) -> String {
        let mut result = String::new();
        result += self.x.to_string().as_str();
        result += ",";
        result += self.y.to_string().as_str();
        result += ",";
        result += self.z.to_string().as_str();
        result
    }
}
impl FromStr for BlockCoordinate {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let pieces: Vec<_> = s.split(',').collect();
        if pieces.len() != 3 {
            bail!("Wrong number of components");
        };
        Ok(BlockCoordinate::new(
            pieces[0].parse()?,
            pieces[1].parse()?,
            pieces[2].parse()?,
        ))
    }
}

/// Largest accepted map edge, exclusive. Anything this size or bigger fails
/// dimension validation outright rather than attempting a multi-gigabyte
/// allocation from a corrupt header.
pub const MAX_MAP_DIMENSION: u16 = 2048;
/// Map edges must be multiples of this, a constraint inherited from the
/// client protocol's chunked level transfer.
pub const MAP_DIMENSION_ALIGNMENT: u16 = 16;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DimensionError {
    #[error("Map dimension {0}={1} must be nonzero")]
    Zero(&'static str, u16),
    #[error("Map dimension {0}={1} is not a multiple of 16")]
    NotAligned(&'static str, u16),
    #[error("Map dimension {0}={1} must be less than 2048")]
    TooLarge(&'static str, u16),
}

/// Validated dimensions of a map's voxel grid.
///
/// The block array covers `x: [0, width_x)`, `y: [0, width_y)`,
/// `z: [0, height)`, linearized as `(z * width_y + y) * width_x + x`.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub struct MapDimensions {
    width_x: u16,
    width_y: u16,
    height: u16,
}
impl MapDimensions {
    pub fn try_new(width_x: u16, width_y: u16, height: u16) -> Result<Self, DimensionError> {
        for (axis, value) in [("width_x", width_x), ("width_y", width_y), ("height", height)] {
            if value == 0 {
                return Err(DimensionError::Zero(axis, value));
            }
            if value % MAP_DIMENSION_ALIGNMENT != 0 {
                return Err(DimensionError::NotAligned(axis, value));
            }
            if value >= MAX_MAP_DIMENSION {
                return Err(DimensionError::TooLarge(axis, value));
            }
        }
        Ok(Self {
            width_x,
            width_y,
            height,
        })
    }

    pub fn width_x(&self) -> u16 {
        self.width_x
    }
    pub fn width_y(&self) -> u16 {
        self.width_y
    }
    pub fn height(&self) -> u16 {
        self.height
    }

    /// Total cell count; always equals the block array length.
    pub fn volume(&self) -> usize {
        self.width_x as usize * self.width_y as usize * self.height as usize
    }

    #[inline]
    pub fn contains(&self, coord: BlockCoordinate) -> bool {
        (0..self.width_x as i32).contains(&coord.x)
            && (0..self.width_y as i32).contains(&coord.y)
            && (0..self.height as i32).contains(&coord.z)
    }

    /// Linear index of a coordinate, or None when it falls outside the grid.
    #[inline]
    pub fn index(&self, coord: BlockCoordinate) -> Option<usize> {
        if !self.contains(coord) {
            return None;
        }
        Some(
            (coord.z as usize * self.width_y as usize + coord.y as usize) * self.width_x as usize
                + coord.x as usize,
        )
    }

    /// The grid's center cell, used to self-heal an out-of-grid spawn.
    pub fn center(&self) -> BlockCoordinate {
        BlockCoordinate {
            x: self.width_x as i32 / 2,
            y: self.width_y as i32 / 2,
            z: self.height as i32 / 2,
        }
    }
}

/// Where joining players appear, plus the direction they face.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub struct SpawnPoint {
    pub position: BlockCoordinate,
    /// Compass heading (yaw) in protocol units, 256 steps per revolution.
    pub heading: u8,
    pub pitch: u8,
}
impl SpawnPoint {
    pub fn at(position: BlockCoordinate) -> Self {
        Self {
            position,
            heading: 0,
            pitch: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinate_string_round_trip() {
        let c = BlockCoordinate::new(-3, 17, 200);
        assert_eq!(c.to_string().parse::<BlockCoordinate>().unwrap(), c);
        assert!("1,2".parse::<BlockCoordinate>().is_err());
        assert!("1,2,fish".parse::<BlockCoordinate>().is_err());
    }

    #[test]
    fn dimension_validation() {
        assert!(MapDimensions::try_new(128, 128, 64).is_ok());
        assert_eq!(
            MapDimensions::try_new(0, 128, 64),
            Err(DimensionError::Zero("width_x", 0))
        );
        assert_eq!(
            MapDimensions::try_new(128, 100, 64),
            Err(DimensionError::NotAligned("width_y", 100))
        );
        assert_eq!(
            MapDimensions::try_new(128, 128, 2048),
            Err(DimensionError::TooLarge("height", 2048))
        );
    }

    #[test]
    fn indexing_matches_layout() {
        let dims = MapDimensions::try_new(32, 16, 16).unwrap();
        assert_eq!(dims.volume(), 32 * 16 * 16);
        assert_eq!(dims.index(BlockCoordinate::new(0, 0, 0)), Some(0));
        assert_eq!(dims.index(BlockCoordinate::new(1, 0, 0)), Some(1));
        assert_eq!(dims.index(BlockCoordinate::new(0, 1, 0)), Some(32));
        assert_eq!(dims.index(BlockCoordinate::new(0, 0, 1)), Some(32 * 16));
        assert_eq!(dims.index(BlockCoordinate::new(-1, 0, 0)), None);
        assert_eq!(dims.index(BlockCoordinate::new(32, 0, 0)), None);
    }
}
