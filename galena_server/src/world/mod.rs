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

pub mod format;
pub mod map;
pub mod ranks;
pub mod settings;
pub mod zone;

#[cfg(test)]
mod tests;

use std::num::NonZeroU64;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use galena_core::block_id::BlockId;
use galena_core::coordinates::{BlockCoordinate, MapDimensions};
use galena_core::geometry::BoundingBox;
use log::{error, info, warn};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use self::map::{BlockUpdate, Map};
use self::ranks::{PlayerProfile, RankResolver};
use self::settings::WorldSettings;
use self::zone::Zone;

const BROADCAST_CHANNEL_SIZE: usize = 8192;

/// Where a world is in its load/unload life.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    Unloaded,
    Loading,
    Loaded,
}

/// An observer of this world: a joined session, as far as the map core is
/// concerned. Connection state lives with the network layer.
#[derive(Debug)]
pub struct PlayerHandle {
    id: NonZeroU64,
    profile: PlayerProfile,
}
impl PlayerHandle {
    /// Session id, unique within this world's lifetime. Broadcast receivers
    /// compare it against [BlockUpdate::origin] to skip their own echoes.
    pub fn id(&self) -> NonZeroU64 {
        self.id
    }
    pub fn profile(&self) -> &PlayerProfile {
        &self.profile
    }
    pub fn name(&self) -> &str {
        &self.profile.name
    }
}

/// Outcome of a build attempt, decided before anything is enqueued.
#[derive(Debug)]
pub enum BuildOutcome {
    /// Permission checks passed; the update is queued and will be applied by
    /// a later tick.
    Queued,
    /// A zone covering the coordinate denies this player. The chat layer
    /// names the zone in its message.
    Denied(Arc<Zone>),
    /// The coordinate is outside the grid; nothing was queued.
    OutOfBounds,
}

/// Hosts one map: owns its lifecycle, its observers, the drain tick, and the
/// save/backup policy.
///
/// The map loads lazily on the first join and unloads after the last leave,
/// once the update queue has fully drained - never mid-drain. All drains and
/// unloads happen on the single tick context ([World::process_updates]);
/// every other thread only enqueues, queries zones, or reads blocks.
pub struct World {
    name: String,
    map_path: PathBuf,
    settings: WorldSettings,
    ranks: Arc<dyn RankResolver>,
    // Lock order: state, then map, then players. Never acquire in reverse.
    state: Mutex<LifecycleState>,
    map: RwLock<Option<Arc<Map>>>,
    players: Mutex<FxHashMap<NonZeroU64, Arc<PlayerHandle>>>,
    next_session_id: AtomicU64,
    unload_pending: AtomicBool,
    locked: AtomicBool,
    block_update_sender: broadcast::Sender<BlockUpdate>,
    shutdown: CancellationToken,
    tick_handle: Mutex<Option<JoinHandle<Result<()>>>>,
    maintenance_handle: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl World {
    pub fn new(
        name: impl Into<String>,
        map_path: PathBuf,
        settings: WorldSettings,
        ranks: Arc<dyn RankResolver>,
    ) -> Arc<World> {
        let (block_update_sender, _) = broadcast::channel(BROADCAST_CHANNEL_SIZE);
        Arc::new(World {
            name: name.into(),
            map_path,
            settings,
            ranks,
            state: Mutex::new(LifecycleState::Unloaded),
            map: RwLock::new(None),
            players: Mutex::new(FxHashMap::default()),
            next_session_id: AtomicU64::new(1),
            unload_pending: AtomicBool::new(false),
            locked: AtomicBool::new(false),
            block_update_sender,
            shutdown: CancellationToken::new(),
            tick_handle: Mutex::new(None),
            maintenance_handle: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn settings(&self) -> &WorldSettings {
        &self.settings
    }
    pub fn lifecycle(&self) -> LifecycleState {
        *self.state.lock()
    }
    /// The loaded map, if any. The Arc stays valid even if the world unloads
    /// underneath the caller; it just stops being the live map.
    pub fn map(&self) -> Option<Arc<Map>> {
        self.map.read().clone()
    }
    pub fn observer_count(&self) -> usize {
        self.players.lock().len()
    }
    pub fn players(&self) -> Vec<Arc<PlayerHandle>> {
        self.players.lock().values().cloned().collect()
    }

    /// Freezes the world: ticks drain nothing while locked (a pending unload
    /// still completes). Build attempts keep queueing; they apply on unlock.
    pub fn set_locked(&self, locked: bool) {
        self.locked.store(locked, Ordering::Relaxed);
    }
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    /// Joins a player, loading (or creating) the map if this is the first
    /// observer. Returns the session handle plus the broadcast stream of
    /// applied block updates. A failed load leaves the world Unloaded and is
    /// reported to this caller only.
    pub fn join(
        &self,
        profile: PlayerProfile,
    ) -> Result<(Arc<PlayerHandle>, broadcast::Receiver<BlockUpdate>)> {
        let mut state = self.state.lock();
        if *state == LifecycleState::Unloaded {
            *state = LifecycleState::Loading;
            match self.load_or_create() {
                Ok(map) => {
                    *self.map.write() = Some(Arc::new(map));
                    *state = LifecycleState::Loaded;
                    info!("World {} loaded", self.name);
                }
                Err(e) => {
                    *state = LifecycleState::Unloaded;
                    return Err(e.context(format!("Loading world {}", self.name)));
                }
            }
        }
        // Registering the observer while the state lock is held keeps the
        // tick thread from completing an unload in between.
        // fetch_add returns the previous value, which starts at 1.
        let id = NonZeroU64::new(self.next_session_id.fetch_add(1, Ordering::Relaxed)).unwrap();
        let handle = Arc::new(PlayerHandle { id, profile });
        self.players.lock().insert(id, handle.clone());
        self.unload_pending.store(false, Ordering::Relaxed);
        Ok((handle, self.block_update_sender.subscribe()))
    }

    /// Removes an observer. When the last one leaves (and the world is not
    /// configured to stay loaded), an unload is scheduled; it completes on a
    /// later tick whose drain comes up empty.
    pub fn leave(&self, handle: &PlayerHandle) -> bool {
        let mut players = self.players.lock();
        if players.remove(&handle.id).is_none() {
            return false;
        }
        if players.is_empty() && !self.settings.keep_loaded {
            self.unload_pending.store(true, Ordering::Relaxed);
            info!("World {} is empty; unload scheduled", self.name);
        }
        true
    }

    fn load_or_create(&self) -> Result<Map> {
        if self.map_path.exists() {
            return format::load_map(
                &self.map_path,
                self.settings.unknown_block_policy(),
                self.ranks.as_ref(),
            );
        }
        let (width_x, width_y, height) = self.settings.default_dimensions;
        info!(
            "No map file at {}; creating a flat {}x{}x{} world",
            self.map_path.display(),
            width_x,
            width_y,
            height
        );
        let dims = MapDimensions::try_new(width_x, width_y, height)
            .context("Invalid default dimensions in settings")?;
        let map = Map::empty(dims);
        // Flat ground (dirt capped with grass) makes the world usable
        // without a terrain generator: the lower half is solid.
        let ground_top = height as i32 / 2 - 1;
        let origin = BlockCoordinate::new(0, 0, 0);
        if ground_top > 0 {
            map.fill(
                &BoundingBox::from_origin_size(origin, width_x as i32, width_y as i32, ground_top),
                BlockId::DIRT,
            );
        }
        map.fill(
            &BoundingBox::from_corners(
                BlockCoordinate::new(0, 0, ground_top),
                BlockCoordinate::new(width_x as i32 - 1, width_y as i32 - 1, ground_top),
            ),
            BlockId::GRASS,
        );
        // A brand-new map is not dirty relative to "never existed"; still,
        // save it once so the file appears on disk.
        Ok(map)
    }

    /// Checks permissions and enqueues a player's block change. The zone
    /// consultation happens here, before the update enters the queue; the
    /// drain applies updates unconditionally.
    pub fn try_build(
        &self,
        player: &PlayerHandle,
        coord: BlockCoordinate,
        block: BlockId,
    ) -> Result<BuildOutcome> {
        let map = self.map().context("World is not loaded")?;
        if !map.dimensions().contains(coord) {
            return Ok(BuildOutcome::OutOfBounds);
        }
        if let Some(zone) = map.find_denied_zone(coord, &player.profile) {
            return Ok(BuildOutcome::Denied(zone));
        }
        map.queue_update(BlockUpdate {
            origin: Some(player.id),
            coord,
            new_block: block,
        });
        Ok(BuildOutcome::Queued)
    }

    /// Enqueues a server-originated change (draw commands, physics).
    /// Bypasses zone checks; observers receive it with no origin.
    pub fn queue_system_update(&self, coord: BlockCoordinate, block: BlockId) -> Result<()> {
        let map = self.map().context("World is not loaded")?;
        map.queue_update(BlockUpdate {
            origin: None,
            coord,
            new_block: block,
        });
        Ok(())
    }

    /// One tick: drain up to the budget, broadcast what was applied, and
    /// complete a pending unload if the drain came up empty. Must be called
    /// from a single context (the tick loop); see [Map::drain_updates].
    pub fn process_updates(&self) {
        if self.locked.load(Ordering::Relaxed) {
            // A frozen world drains nothing, which counts as an empty drain
            // for unload purposes.
            self.maybe_finish_unload();
            return;
        }
        let Some(map) = self.map() else {
            return;
        };
        let applied = map.drain_updates(self.update_budget());
        for update in &applied {
            // The only send error is "no receivers"; an empty world still
            // has to drain so it can unload.
            let _ = self.block_update_sender.send(*update);
        }
        if applied.is_empty() {
            self.maybe_finish_unload();
        }
    }

    /// Per-tick drain budget: the aggregate budget split across observers,
    /// floored so a crowded world keeps making progress. More observers
    /// means more outbound packets per applied update, so the per-tick
    /// apply count shrinks to bound total traffic.
    pub fn update_budget(&self) -> usize {
        let observers = self.players.lock().len().max(1);
        (self.settings.max_updates_per_tick / observers).max(self.settings.min_updates_per_tick)
    }

    fn maybe_finish_unload(&self) {
        if !self.unload_pending.load(Ordering::Relaxed) {
            return;
        }
        let mut state = self.state.lock();
        let mut map_slot = self.map.write();
        if !self.players.lock().is_empty() {
            // Someone joined since the unload was scheduled.
            self.unload_pending.store(false, Ordering::Relaxed);
            return;
        }
        let Some(map) = map_slot.as_ref() else {
            self.unload_pending.store(false, Ordering::Relaxed);
            return;
        };
        if map.pending_updates() > 0 {
            // Updates arrived after the last leave; stay loaded until a
            // drain comes up empty again.
            return;
        }
        if map.changes_since_save() > 0 || !self.map_path.exists() {
            if let Err(e) = format::save_map(map, self.ranks.as_ref(), &self.map_path) {
                // Keep the map in memory rather than dropping unsaved
                // changes; the next tick retries.
                error!("Saving world {} for unload failed: {e:#}", self.name);
                return;
            }
            map.mark_saved();
        }
        *map_slot = None;
        *state = LifecycleState::Unloaded;
        self.unload_pending.store(false, Ordering::Relaxed);
        info!("World {} unloaded", self.name);
    }

    /// Saves the map if it has unsaved changes. Returns whether a save
    /// happened. Driven by the maintenance loop, and safe to call from
    /// anywhere: the drain and the serializer synchronize on the block
    /// array lock, so the snapshot written out is always coherent.
    pub fn save_if_dirty(&self) -> Result<bool> {
        let Some(map) = self.map() else {
            return Ok(false);
        };
        if map.changes_since_save() == 0 && self.map_path.exists() {
            return Ok(false);
        }
        format::save_map(&map, self.ranks.as_ref(), &self.map_path)?;
        map.mark_saved();
        info!("Saved world {} to {}", self.name, self.map_path.display());
        Ok(true)
    }

    /// Writes a timestamped backup copy once enough changes accumulate.
    /// Returns whether a backup happened.
    pub fn backup_if_needed(&self) -> Result<bool> {
        if self.settings.backup_after_changes == 0 {
            return Ok(false);
        }
        let Some(map) = self.map() else {
            return Ok(false);
        };
        if map.changes_since_backup() < self.settings.backup_after_changes {
            return Ok(false);
        }
        let dir = self
            .map_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("backups");
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Creating backup directory {}", dir.display()))?;
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let backup_path = dir.join(format!("{}_{}.glm", self.name, stamp));
        format::save_map(&map, self.ranks.as_ref(), &backup_path)?;
        map.mark_backed_up();
        info!(
            "Backed up world {} to {}",
            self.name,
            backup_path.display()
        );
        Ok(true)
    }

    /// Starts the periodic drain tick on the current tokio runtime.
    pub fn spawn_tick_loop(self: &Arc<Self>) -> Result<()> {
        let mut ticker = WorldTicker {
            world: self.clone(),
            cancellation: self.shutdown.clone(),
        };
        let handle = crate::spawn_async(&format!("world_tick_{}", self.name), async move {
            ticker.run_loop().await
        })?;
        *self.tick_handle.lock() = Some(handle);
        Ok(())
    }

    /// Starts the periodic save/backup sweep on the current tokio runtime.
    pub fn spawn_maintenance_loop(self: &Arc<Self>) -> Result<()> {
        let mut maintenance = WorldMaintenance {
            world: self.clone(),
            cancellation: self.shutdown.clone(),
        };
        let handle = crate::spawn_async(&format!("world_maint_{}", self.name), async move {
            maintenance.run_loop().await
        })?;
        *self.maintenance_handle.lock() = Some(handle);
        Ok(())
    }

    pub fn request_shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Waits for the background loops to exit, then flushes the map.
    pub async fn await_shutdown(&self) -> Result<()> {
        let tick_handle = self.tick_handle.lock().take();
        if let Some(handle) = tick_handle {
            handle.await??;
        }
        let maintenance_handle = self.maintenance_handle.lock().take();
        if let Some(handle) = maintenance_handle {
            handle.await??;
        }
        self.save_if_dirty()?;
        Ok(())
    }
}

impl Drop for World {
    fn drop(&mut self) {
        if let Err(e) = self.save_if_dirty() {
            error!("Save of world {} on drop failed: {e:#}", self.name);
        }
    }
}

struct WorldTicker {
    world: Arc<World>,
    cancellation: CancellationToken,
}
impl WorldTicker {
    async fn run_loop(&mut self) -> Result<()> {
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.world.settings.tick_interval_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        while !self.cancellation.is_cancelled() {
            tokio::select! {
                _ = interval.tick() => {
                    tokio::task::block_in_place(|| self.world.process_updates());
                }
                _ = self.cancellation.cancelled() => {
                    info!("World {} tick loop shutting down", self.world.name);
                    break;
                }
            }
        }
        Ok(())
    }
}

struct WorldMaintenance {
    world: Arc<World>,
    cancellation: CancellationToken,
}
impl WorldMaintenance {
    async fn run_loop(&mut self) -> Result<()> {
        let mut interval = tokio::time::interval(Duration::from_secs(
            self.world.settings.maintenance_interval_secs,
        ));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        while !self.cancellation.is_cancelled() {
            tokio::select! {
                _ = interval.tick() => {
                    tokio::task::block_in_place(|| self.sweep());
                }
                _ = self.cancellation.cancelled() => {
                    info!("World {} maintenance loop shutting down", self.world.name);
                    break;
                }
            }
        }
        Ok(())
    }

    fn sweep(&self) {
        // A failed sweep must not kill the loop; the map stays dirty and the
        // next interval retries.
        if let Err(e) = self.world.save_if_dirty() {
            error!("Periodic save of world {} failed: {e:#}", self.world.name);
        }
        if let Err(e) = self.world.backup_if_needed() {
            warn!("Backup of world {} failed: {e:#}", self.world.name);
        }
    }
}
