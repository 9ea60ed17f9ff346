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

use crate::coordinates::BlockCoordinate;

/// An axis-aligned box of whole cells, inclusive on both ends.
///
/// Construction normalizes the corners so `x_min <= x_max` (and likewise for
/// the other axes) always holds. A box can never be thinner than one cell;
/// [BoundingBox::EMPTY] (the 1x1x1 box at the origin) doubles as the
/// no-overlap sentinel returned by [BoundingBox::intersection].
#[derive(PartialEq, Eq, Hash, Clone, Copy)]
pub struct BoundingBox {
    x_min: i32,
    y_min: i32,
    z_min: i32,
    x_max: i32,
    y_max: i32,
    z_max: i32,
}

impl BoundingBox {
    pub const EMPTY: BoundingBox = BoundingBox {
        x_min: 0,
        y_min: 0,
        z_min: 0,
        x_max: 0,
        y_max: 0,
        z_max: 0,
    };

    /// Builds a box spanning two opposite corners, given in any order.
    pub fn from_corners(a: BlockCoordinate, b: BlockCoordinate) -> Self {
        Self {
            x_min: a.x.min(b.x),
            y_min: a.y.min(b.y),
            z_min: a.z.min(b.z),
            x_max: a.x.max(b.x),
            y_max: a.y.max(b.y),
            z_max: a.z.max(b.z),
        }
    }

    /// Builds a box from one corner plus cell counts along each axis.
    /// Negative sizes extend toward negative coordinates.
    pub fn from_origin_size(origin: BlockCoordinate, dx: i32, dy: i32, dz: i32) -> Self {
        fn far(origin: i32, size: i32) -> i32 {
            if size < 0 {
                origin + size + 1
            } else {
                origin + size - 1
            }
        }
        Self::from_corners(
            origin,
            BlockCoordinate::new(far(origin.x, dx), far(origin.y, dy), far(origin.z, dz)),
        )
    }

    pub fn min_vertex(&self) -> BlockCoordinate {
        BlockCoordinate::new(self.x_min, self.y_min, self.z_min)
    }
    pub fn max_vertex(&self) -> BlockCoordinate {
        BlockCoordinate::new(self.x_max, self.y_max, self.z_max)
    }
    pub fn center(&self) -> BlockCoordinate {
        BlockCoordinate::new(
            (self.x_min + self.x_max) / 2,
            (self.y_min + self.y_max) / 2,
            (self.z_min + self.z_max) / 2,
        )
    }

    pub fn width_x(&self) -> u64 {
        (self.x_max as i64 - self.x_min as i64) as u64 + 1
    }
    pub fn width_y(&self) -> u64 {
        (self.y_max as i64 - self.y_min as i64) as u64 + 1
    }
    pub fn height(&self) -> u64 {
        (self.z_max as i64 - self.z_min as i64) as u64 + 1
    }
    pub fn volume(&self) -> u64 {
        self.width_x() * self.width_y() * self.height()
    }

    /// True if the two boxes share at least one cell. Computed as an axis
    /// separation test: disjoint on any axis means disjoint overall.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        !(self.x_min > other.x_max
            || self.x_max < other.x_min
            || self.y_min > other.y_max
            || self.y_max < other.y_min
            || self.z_min > other.z_max
            || self.z_max < other.z_min)
    }

    /// True if `other` lies wholly inside this box.
    pub fn contains(&self, other: &BoundingBox) -> bool {
        self.x_min <= other.x_min
            && self.x_max >= other.x_max
            && self.y_min <= other.y_min
            && self.y_max >= other.y_max
            && self.z_min <= other.z_min
            && self.z_max >= other.z_max
    }

    #[inline]
    pub fn contains_point(&self, coord: BlockCoordinate) -> bool {
        (self.x_min..=self.x_max).contains(&coord.x)
            && (self.y_min..=self.y_max).contains(&coord.y)
            && (self.z_min..=self.z_max).contains(&coord.z)
    }

    /// The overlapping box, or [BoundingBox::EMPTY] when the boxes are
    /// disjoint.
    pub fn intersection(&self, other: &BoundingBox) -> BoundingBox {
        if !self.intersects(other) {
            return BoundingBox::EMPTY;
        }
        BoundingBox {
            x_min: self.x_min.max(other.x_min),
            y_min: self.y_min.max(other.y_min),
            z_min: self.z_min.max(other.z_min),
            x_max: self.x_max.min(other.x_max),
            y_max: self.y_max.min(other.y_max),
            z_max: self.z_max.min(other.z_max),
        }
    }
}

impl Debug for BoundingBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!(
            "box[{}..{}, {}..{}, {}..{}]",
            self.x_min, self.x_max, self.y_min, self.y_max, self.z_min, self.z_max
        ))
    }
}

impl ToString for BoundingBox {
    fn to_string(&self) -> String {
        format!(
            "{} {} {} {} {} {}",
            self.x_min, self.x_max, self.y_min, self.y_max, self.z_min, self.z_max
        )
    }
}
impl FromStr for BoundingBox {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let pieces: Vec<_> = s.split_whitespace().collect();
        if pieces.len() != 6 {
            bail!("Wrong number of components");
        }
        let mut vals = [0i32; 6];
        for (slot, piece) in vals.iter_mut().zip(pieces) {
            *slot = piece.parse()?;
        }
        // The serialized order is xMin xMax yMin yMax zMin zMax; going
        // through from_corners re-normalizes files edited by hand.
        Ok(BoundingBox::from_corners(
            BlockCoordinate::new(vals[0], vals[2], vals[4]),
            BlockCoordinate::new(vals[1], vals[3], vals[5]),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxed(ax: i32, ay: i32, az: i32, bx: i32, by: i32, bz: i32) -> BoundingBox {
        BoundingBox::from_corners(
            BlockCoordinate::new(ax, ay, az),
            BlockCoordinate::new(bx, by, bz),
        )
    }

    #[test]
    fn corners_normalize() {
        let a = boxed(5, -2, 9, 0, 4, 3);
        assert_eq!(a.min_vertex(), BlockCoordinate::new(0, -2, 3));
        assert_eq!(a.max_vertex(), BlockCoordinate::new(5, 4, 9));
        assert_eq!(a, boxed(0, 4, 3, 5, -2, 9));
    }

    #[test]
    fn from_origin_size_negative_extents() {
        let a = BoundingBox::from_origin_size(BlockCoordinate::new(10, 10, 10), -3, 2, 1);
        assert_eq!(a.min_vertex(), BlockCoordinate::new(8, 10, 10));
        assert_eq!(a.max_vertex(), BlockCoordinate::new(10, 11, 10));
        assert_eq!(a.volume(), 6);
    }

    #[test]
    fn empty_is_unit_box() {
        assert_eq!(BoundingBox::EMPTY.volume(), 1);
        assert!(BoundingBox::EMPTY.contains_point(BlockCoordinate::new(0, 0, 0)));
    }

    #[test]
    fn intersection_agrees_with_intersects() {
        let cases = [
            (boxed(0, 0, 0, 7, 7, 7), boxed(4, 4, 4, 12, 12, 12)),
            (boxed(0, 0, 0, 7, 7, 7), boxed(8, 0, 0, 9, 7, 7)),
            (boxed(0, 0, 0, 7, 7, 7), boxed(7, 7, 7, 7, 7, 7)),
            (boxed(-5, -5, -5, -1, -1, -1), boxed(0, 0, 0, 3, 3, 3)),
        ];
        for (a, b) in cases {
            let i = a.intersection(&b);
            assert_eq!(a.intersects(&b), i != BoundingBox::EMPTY);
            assert!(i.volume() <= a.volume().min(b.volume()));
            if a.intersects(&b) {
                assert!(a.contains(&i));
                assert!(b.contains(&i));
            }
        }
    }

    #[test]
    fn containment() {
        let outer = boxed(0, 0, 0, 15, 15, 15);
        let inner = boxed(2, 2, 2, 7, 7, 7);
        assert!(outer.contains(&inner));
        assert!(!inner.contains(&outer));
        assert!(outer.contains_point(BlockCoordinate::new(15, 0, 7)));
        assert!(!outer.contains_point(BlockCoordinate::new(16, 0, 7)));
    }

    #[test]
    fn string_round_trip() {
        let a = boxed(-4, 2, 0, 9, 5, 31);
        assert_eq!(a.to_string().parse::<BoundingBox>().unwrap(), a);
        assert!("1 2 3 4 5".parse::<BoundingBox>().is_err());
        assert!("1 2 3 4 5 six".parse::<BoundingBox>().is_err());
    }
}
