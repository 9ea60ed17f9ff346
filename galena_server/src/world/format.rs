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

//! The binary map file format.
//!
//! Layout (all integers little-endian):
//! magic u32, format version u16, dimensions 3 x u16, spawn (3 x i16 +
//! heading u8 + pitch u8), metadata section (u16 count, then per entry a
//! u32-length-prefixed key and value), and finally the raw block bytes,
//! gzip-compressed, running to end of file. Zone definitions ride in the
//! metadata section under synthetic `@zone<N>` keys.
//!
//! Decoding goes through [FORMAT_DECODERS], a version-range table, so a new
//! format revision is a new table entry rather than conditionals in the read
//! path. Version 1 files differ only in their zone records (rank stored as a
//! raw ladder index, override lists optional).

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::ops::RangeInclusive;
use std::path::Path;

use anyhow::{bail, ensure, Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use galena_core::block_id::{BlockId, MAX_KNOWN_BLOCK_ID};
use galena_core::coordinates::{BlockCoordinate, MapDimensions, SpawnPoint};
use log::warn;
use rustc_hash::FxHashMap;
use tempfile::NamedTempFile;

use super::map::Map;
use super::ranks::RankResolver;
use super::zone::{Zone, ZoneRankEncoding};

pub const MAP_MAGIC: u32 = u32::from_le_bytes(*b"glnm");
pub const FORMAT_VERSION: u16 = 2;

/// Longest accepted metadata key or value. Anything bigger is a corrupt
/// length prefix, not a plausible entry.
const MAX_METADATA_STRING: u32 = 1 << 20;

const ZONE_KEY_PREFIX: &str = "@zone";

/// What to do with block bytes outside the known id range.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnknownBlockPolicy {
    /// Reject the whole file.
    Reject,
    /// Coerce unknown bytes to air and keep loading.
    ReplaceWithAir,
}

type FormatDecoder =
    fn(&mut dyn Read, UnknownBlockPolicy, &dyn RankResolver) -> Result<Map>;

/// Version-range decode table. Ranges must not overlap; first match wins.
const FORMAT_DECODERS: &[(RangeInclusive<u16>, FormatDecoder)] =
    &[(1..=1, decode_v1), (2..=2, decode_v2)];

fn decode_v1(
    r: &mut dyn Read,
    policy: UnknownBlockPolicy,
    ranks: &dyn RankResolver,
) -> Result<Map> {
    decode_body(r, policy, ranks, ZoneRankEncoding::LegacyIndex)
}

fn decode_v2(
    r: &mut dyn Read,
    policy: UnknownBlockPolicy,
    ranks: &dyn RankResolver,
) -> Result<Map> {
    decode_body(r, policy, ranks, ZoneRankEncoding::Named)
}

/// Loads a map file. Structural damage (bad magic, unsupported version,
/// invalid dimensions, truncation) fails the whole load; a corrupt zone
/// entry is skipped with a warning; an out-of-grid spawn self-heals.
pub fn load_map(
    path: &Path,
    policy: UnknownBlockPolicy,
    ranks: &dyn RankResolver,
) -> Result<Map> {
    let file =
        File::open(path).with_context(|| format!("Opening map file {}", path.display()))?;
    let mut reader = BufReader::new(file);
    decode_map(&mut reader, policy, ranks)
        .with_context(|| format!("Loading map file {}", path.display()))
}

pub(crate) fn decode_map(
    r: &mut dyn Read,
    policy: UnknownBlockPolicy,
    ranks: &dyn RankResolver,
) -> Result<Map> {
    let magic = read_u32(r)?;
    ensure!(
        magic == MAP_MAGIC,
        "Bad magic 0x{magic:08x}; not a map file"
    );
    let version = read_u16(r)?;
    let decoder = FORMAT_DECODERS
        .iter()
        .find(|(range, _)| range.contains(&version))
        .map(|(_, decoder)| decoder);
    match decoder {
        Some(decoder) => decoder(r, policy, ranks),
        None => bail!("Unsupported map format version {version}"),
    }
}

fn decode_body(
    r: &mut dyn Read,
    policy: UnknownBlockPolicy,
    ranks: &dyn RankResolver,
    zone_encoding: ZoneRankEncoding,
) -> Result<Map> {
    let width_x = read_u16(r)?;
    let width_y = read_u16(r)?;
    let height = read_u16(r)?;
    let dimensions = MapDimensions::try_new(width_x, width_y, height)
        .context("Invalid map dimensions")?;

    let spawn = SpawnPoint {
        position: BlockCoordinate::new(
            read_i16(r)? as i32,
            read_i16(r)? as i32,
            read_i16(r)? as i32,
        ),
        heading: read_u8(r)?,
        pitch: read_u8(r)?,
    };

    let mut zones = Vec::new();
    let mut metadata = FxHashMap::default();
    let entry_count = read_u16(r)?;
    for _ in 0..entry_count {
        let key = read_string(r).context("Reading metadata key")?;
        let value = read_string(r).context("Reading metadata value")?;
        if key.starts_with(ZONE_KEY_PREFIX) {
            // Zone corruption is recoverable at entry granularity: skip the
            // one record, keep the map.
            match Zone::deserialize(&value, zone_encoding, ranks) {
                Ok(zone) => zones.push(zone),
                Err(e) => warn!("Skipping corrupt zone entry {key}: {e:#}"),
            }
        } else {
            metadata.insert(key, value);
        }
    }

    let mut blocks = vec![0u8; dimensions.volume()].into_boxed_slice();
    let mut gz = GzDecoder::new(r);
    gz.read_exact(&mut blocks)
        .context("Reading compressed block array")?;

    let mut unknown = 0u64;
    for byte in blocks.iter_mut() {
        if *byte > MAX_KNOWN_BLOCK_ID {
            match policy {
                UnknownBlockPolicy::Reject => {
                    bail!("Unknown block id 0x{:02x} in block array", *byte)
                }
                UnknownBlockPolicy::ReplaceWithAir => {
                    *byte = BlockId::AIR.0;
                    unknown += 1;
                }
            }
        }
    }
    if unknown > 0 {
        warn!("Replaced {unknown} unknown block bytes with air");
    }

    Ok(Map::from_parts(dimensions, blocks, spawn, zones, metadata))
}

/// Saves a map atomically: the full file is written to a temporary sibling
/// and renamed over the target only on success, so a failed save leaves the
/// previous file intact.
pub fn save_map(map: &Map, ranks: &dyn RankResolver, path: &Path) -> Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
    let mut temp = match dir {
        Some(dir) => NamedTempFile::new_in(dir),
        None => NamedTempFile::new(),
    }
    .context("Creating temporary map file")?;
    {
        let mut writer = BufWriter::new(temp.as_file_mut());
        encode_map(map, ranks, &mut writer)?;
        writer.flush()?;
    }
    temp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("Replacing map file {}", path.display()))?;
    Ok(())
}

pub(crate) fn encode_map(map: &Map, ranks: &dyn RankResolver, w: &mut dyn Write) -> Result<()> {
    w.write_all(&MAP_MAGIC.to_le_bytes())?;
    w.write_all(&FORMAT_VERSION.to_le_bytes())?;

    let dims = map.dimensions();
    w.write_all(&dims.width_x().to_le_bytes())?;
    w.write_all(&dims.width_y().to_le_bytes())?;
    w.write_all(&dims.height().to_le_bytes())?;

    let spawn = map.spawn();
    // set_spawn and from_parts keep the spawn in-grid, and the grid fits i16.
    w.write_all(&(spawn.position.x as i16).to_le_bytes())?;
    w.write_all(&(spawn.position.y as i16).to_le_bytes())?;
    w.write_all(&(spawn.position.z as i16).to_le_bytes())?;
    w.write_all(&[spawn.heading, spawn.pitch])?;

    let metadata = map.metadata_entries();
    let zones = map.zones();
    let entry_count = metadata.len() + zones.len();
    ensure!(
        u16::try_from(entry_count).is_ok(),
        "Too many metadata entries ({entry_count}) for the format"
    );
    w.write_all(&(entry_count as u16).to_le_bytes())?;
    for (key, value) in &metadata {
        write_string(w, key)?;
        write_string(w, value)?;
    }
    for (i, zone) in zones.iter().enumerate() {
        write_string(w, &format!("{ZONE_KEY_PREFIX}{i}"))?;
        write_string(w, &zone.serialize(ranks))?;
    }

    let mut gz = GzEncoder::new(w, Compression::default());
    gz.write_all(&map.blocks_snapshot())?;
    gz.finish()?;
    Ok(())
}

fn read_u8(r: &mut dyn Read) -> Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}
fn read_u16(r: &mut dyn Read) -> Result<u16> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}
fn read_i16(r: &mut dyn Read) -> Result<i16> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    Ok(i16::from_le_bytes(buf))
}
fn read_u32(r: &mut dyn Read) -> Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}
fn read_string(r: &mut dyn Read) -> Result<String> {
    let len = read_u32(r)?;
    ensure!(
        len <= MAX_METADATA_STRING,
        "Implausible string length {len}"
    );
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).context("Metadata string is not valid UTF-8")
}
fn write_string(w: &mut dyn Write, s: &str) -> Result<()> {
    ensure!(
        s.len() as u64 <= MAX_METADATA_STRING as u64,
        "String too long for the format"
    );
    w.write_all(&(s.len() as u32).to_le_bytes())?;
    w.write_all(s.as_bytes())?;
    Ok(())
}
