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

use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use galena_core::block_id::BlockId;
use galena_core::coordinates::{BlockCoordinate, MapDimensions, SpawnPoint};
use galena_core::geometry::BoundingBox;
use log::warn;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;

use super::ranks::PlayerProfile;
use super::zone::Zone;

/// One queued mutation: who asked for it, where, and the new block type.
/// `origin == None` means the server itself (draw commands, physics, admin
/// edits); observers use the origin to skip echoing a change back to the
/// session that made it.
#[derive(Clone, Copy, Debug)]
pub struct BlockUpdate {
    pub origin: Option<NonZeroU64>,
    pub coord: BlockCoordinate,
    pub new_block: BlockId,
}

/// Verdict of [Map::test_zones]: every zone covering the coordinate, split
/// by whether it permits the player. Admin commands display both halves.
#[derive(Debug, Default)]
pub struct ZoneTest {
    pub allowed: Vec<Arc<Zone>>,
    pub denied: Vec<Arc<Zone>>,
}
impl ZoneTest {
    /// The overall verdict: every covering zone must permit the player.
    pub fn permitted(&self) -> bool {
        self.denied.is_empty()
    }
}

/// The authoritative voxel grid of one world, plus its zone overlay,
/// metadata, and the pending block-update queue.
///
/// This struct provides safe interior mutability - a shared reference is
/// sufficient to read and write it. The block array is mutated only from the
/// single tick context that calls [Map::drain_updates]; everything else
/// enqueues through [Map::queue_update] or reads, so direct block reads are
/// at most one tick stale.
#[derive(Debug)]
pub struct Map {
    dimensions: MapDimensions,
    blocks: RwLock<Box<[u8]>>,
    spawn: Mutex<SpawnPoint>,
    // Keyed by lowercased zone name. The flat snapshot is what the hot query
    // path reads; it is rebuilt and swapped under the `zones` lock so readers
    // never observe a half-updated list.
    zones: Mutex<FxHashMap<String, Arc<Zone>>>,
    zone_snapshot: ArcSwap<Vec<Arc<Zone>>>,
    metadata: Mutex<FxHashMap<String, String>>,
    update_sender: mpsc::UnboundedSender<BlockUpdate>,
    // Single consumer: the tick that drains. The mutex makes that contract
    // explicit rather than trusting callers.
    update_receiver: Mutex<mpsc::UnboundedReceiver<BlockUpdate>>,
    changes_since_save: AtomicU64,
    changes_since_backup: AtomicU64,
}

impl Map {
    /// An all-air map with the spawn at the grid center.
    pub fn empty(dimensions: MapDimensions) -> Map {
        Self::from_parts(
            dimensions,
            vec![0; dimensions.volume()].into_boxed_slice(),
            SpawnPoint::at(dimensions.center()),
            Vec::new(),
            FxHashMap::default(),
        )
    }

    /// Assembles a map from already-validated pieces (the loader's entry
    /// point). An out-of-grid spawn self-heals to the center with a warning;
    /// block array length is the caller's responsibility.
    pub(crate) fn from_parts(
        dimensions: MapDimensions,
        blocks: Box<[u8]>,
        spawn: SpawnPoint,
        zones: Vec<Zone>,
        metadata: FxHashMap<String, String>,
    ) -> Map {
        debug_assert_eq!(blocks.len(), dimensions.volume());
        let spawn = if dimensions.contains(spawn.position) {
            spawn
        } else {
            warn!(
                "Spawn {:?} is outside the {}x{}x{} grid; resetting to center",
                spawn.position,
                dimensions.width_x(),
                dimensions.width_y(),
                dimensions.height()
            );
            SpawnPoint::at(dimensions.center())
        };
        let (update_sender, update_receiver) = mpsc::unbounded_channel();
        let map = Map {
            dimensions,
            blocks: RwLock::new(blocks),
            spawn: Mutex::new(spawn),
            zones: Mutex::new(FxHashMap::default()),
            zone_snapshot: ArcSwap::from_pointee(Vec::new()),
            metadata: Mutex::new(metadata),
            update_sender,
            update_receiver: Mutex::new(update_receiver),
            changes_since_save: AtomicU64::new(0),
            changes_since_backup: AtomicU64::new(0),
        };
        {
            let mut registry = map.zones.lock();
            for zone in zones {
                let key = zone.name().to_lowercase();
                if registry.insert(key, Arc::new(zone)).is_some() {
                    warn!("Duplicate zone name while assembling map; keeping the later one");
                }
            }
            map.rebuild_zone_snapshot(&registry);
        }
        map
    }

    pub fn dimensions(&self) -> MapDimensions {
        self.dimensions
    }

    pub fn spawn(&self) -> SpawnPoint {
        *self.spawn.lock()
    }

    /// Moves the spawn. Returns false (and changes nothing) if the position
    /// is outside the grid.
    pub fn set_spawn(&self, spawn: SpawnPoint) -> bool {
        if !self.dimensions.contains(spawn.position) {
            return false;
        }
        *self.spawn.lock() = spawn;
        self.bump_dirty(1);
        true
    }

    /// Reads one block. Out-of-grid coordinates read as air; callers that
    /// care should bounds-check with [MapDimensions::contains] first.
    pub fn get_block(&self, coord: BlockCoordinate) -> BlockId {
        match self.dimensions.index(coord) {
            Some(index) => BlockId(self.blocks.read()[index]),
            None => BlockId::AIR,
        }
    }

    /// Bulk-fills a region, clamped to the grid. Used to make a fresh world
    /// usable (flat ground) without a terrain generator, and by draw
    /// commands. Returns the number of cells written.
    pub fn fill(&self, region: &BoundingBox, block: BlockId) -> u64 {
        let grid = BoundingBox::from_origin_size(
            BlockCoordinate::new(0, 0, 0),
            self.dimensions.width_x() as i32,
            self.dimensions.width_y() as i32,
            self.dimensions.height() as i32,
        );
        if !grid.intersects(region) {
            return 0;
        }
        let clipped = grid.intersection(region);
        let min = clipped.min_vertex();
        let max = clipped.max_vertex();
        let mut blocks = self.blocks.write();
        let mut written = 0u64;
        for z in min.z..=max.z {
            for y in min.y..=max.y {
                // Rows are contiguous in x; fill them as slices.
                let row_start = self
                    .dimensions
                    .index(BlockCoordinate::new(min.x, y, z))
                    .expect("clipped region is in-grid");
                let row_end = row_start + (max.x - min.x) as usize + 1;
                blocks[row_start..row_end].fill(block.0);
                written += (max.x - min.x) as u64 + 1;
            }
        }
        self.bump_dirty(written);
        written
    }

    /// Enqueues a block mutation. Callable from any thread, never blocks,
    /// never fails; the update is applied (FIFO) by a later drain tick.
    /// Permission checks belong before this call, not after.
    pub fn queue_update(&self, update: BlockUpdate) {
        // The receiver lives in this struct, so the channel can't be closed.
        let _ = self.update_sender.send(update);
    }

    /// Number of updates waiting for a drain tick.
    pub fn pending_updates(&self) -> usize {
        self.update_receiver.lock().len()
    }

    /// Dequeues up to `budget` updates and applies them to the block array
    /// in enqueue order. Returns the applied updates for broadcast.
    ///
    /// Must only be called from the single tick context; concurrent drains
    /// would serialize on the receiver lock but interleave their batches.
    /// Out-of-grid updates are dropped silently per the write contract.
    pub(crate) fn drain_updates(&self, budget: usize) -> Vec<BlockUpdate> {
        let mut receiver = self.update_receiver.lock();
        let mut applied = Vec::new();
        if budget == 0 {
            return applied;
        }
        let mut blocks = self.blocks.write();
        while applied.len() < budget {
            let update = match receiver.try_recv() {
                Ok(update) => update,
                Err(_) => break,
            };
            if let Some(index) = self.dimensions.index(update.coord) {
                blocks[index] = update.new_block.0;
                applied.push(update);
            }
        }
        drop(blocks);
        self.bump_dirty(applied.len() as u64);
        applied
    }

    /// Adds a zone. Returns false without changes if a zone with that name
    /// (case-insensitive) already exists.
    pub fn add_zone(&self, zone: Zone) -> bool {
        let mut registry = self.zones.lock();
        let key = zone.name().to_lowercase();
        if registry.contains_key(&key) {
            return false;
        }
        registry.insert(key, Arc::new(zone));
        self.rebuild_zone_snapshot(&registry);
        self.bump_dirty(1);
        true
    }

    /// Removes a zone by name. Returns false if no such zone exists.
    pub fn remove_zone(&self, name: &str) -> bool {
        let mut registry = self.zones.lock();
        if registry.remove(&name.to_lowercase()).is_none() {
            return false;
        }
        self.rebuild_zone_snapshot(&registry);
        self.bump_dirty(1);
        true
    }

    /// Edits a zone in place (rank changes, include/exclude updates).
    /// The mutation happens on a copy that is swapped in atomically, so
    /// concurrent zone queries see either the old or the new zone, never a
    /// partial edit. Returns false if no such zone exists.
    pub fn update_zone(&self, name: &str, mutator: impl FnOnce(&mut Zone)) -> bool {
        let mut registry = self.zones.lock();
        let Some(slot) = registry.get_mut(&name.to_lowercase()) else {
            return false;
        };
        let mut updated = (**slot).clone();
        mutator(&mut updated);
        *slot = Arc::new(updated);
        self.rebuild_zone_snapshot(&registry);
        self.bump_dirty(1);
        true
    }

    pub fn zone(&self, name: &str) -> Option<Arc<Zone>> {
        self.zones.lock().get(&name.to_lowercase()).cloned()
    }

    /// The current zone list, name-sorted. Lock-free; the returned snapshot
    /// stays coherent even if zones change concurrently.
    pub fn zones(&self) -> Arc<Vec<Arc<Zone>>> {
        self.zone_snapshot.load_full()
    }

    fn rebuild_zone_snapshot(&self, registry: &FxHashMap<String, Arc<Zone>>) {
        let mut list: Vec<_> = registry.values().cloned().collect();
        list.sort_by(|a, b| a.name().cmp(b.name()));
        self.zone_snapshot.store(Arc::new(list));
    }

    /// True if the player may build at the coordinate: every zone covering
    /// it must permit them. All covering zones are evaluated because a deny
    /// from one zone is not overridden by an allow from another - only an
    /// explicit include in the denying zone itself lifts its deny.
    pub fn check_zones(&self, coord: BlockCoordinate, player: &PlayerProfile) -> bool {
        self.zone_snapshot
            .load()
            .iter()
            .filter(|z| z.contains(coord))
            .all(|z| z.can_build(player))
    }

    /// The first zone (in name order) that covers the coordinate and denies
    /// the player, for the "you may not build in zone X" message.
    pub fn find_denied_zone(
        &self,
        coord: BlockCoordinate,
        player: &PlayerProfile,
    ) -> Option<Arc<Zone>> {
        self.zone_snapshot
            .load()
            .iter()
            .find(|z| z.contains(coord) && !z.can_build(player))
            .cloned()
    }

    /// Full verdict for one coordinate: all covering zones, split by whether
    /// they permit the player.
    pub fn test_zones(&self, coord: BlockCoordinate, player: &PlayerProfile) -> ZoneTest {
        let mut result = ZoneTest::default();
        for zone in self.zone_snapshot.load().iter() {
            if !zone.contains(coord) {
                continue;
            }
            if zone.can_build(player) {
                result.allowed.push(zone.clone());
            } else {
                result.denied.push(zone.clone());
            }
        }
        result
    }

    pub fn metadata(&self, key: &str) -> Option<String> {
        self.metadata.lock().get(key).cloned()
    }

    /// Sets a metadata entry, returning the previous value if any.
    pub fn set_metadata(&self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let prev = self.metadata.lock().insert(key.into(), value.into());
        self.bump_dirty(1);
        prev
    }

    pub fn remove_metadata(&self, key: &str) -> Option<String> {
        let prev = self.metadata.lock().remove(key);
        if prev.is_some() {
            self.bump_dirty(1);
        }
        prev
    }

    pub(crate) fn metadata_entries(&self) -> Vec<(String, String)> {
        let mut entries: Vec<_> = self
            .metadata
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort();
        entries
    }

    /// Copy of the raw block bytes, for serialization and exports. At most
    /// one tick stale if updates are still draining.
    pub fn blocks_snapshot(&self) -> Vec<u8> {
        self.blocks.read().to_vec()
    }

    pub fn changes_since_save(&self) -> u64 {
        self.changes_since_save.load(Ordering::Relaxed)
    }
    pub fn changes_since_backup(&self) -> u64 {
        self.changes_since_backup.load(Ordering::Relaxed)
    }
    pub(crate) fn mark_saved(&self) {
        self.changes_since_save.store(0, Ordering::Relaxed);
    }
    pub(crate) fn mark_backed_up(&self) {
        self.changes_since_backup.store(0, Ordering::Relaxed);
    }

    fn bump_dirty(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.changes_since_save.fetch_add(count, Ordering::Relaxed);
        self.changes_since_backup.fetch_add(count, Ordering::Relaxed);
    }
}
