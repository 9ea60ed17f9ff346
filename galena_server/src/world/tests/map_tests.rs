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

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use galena_core::block_id::BlockId;
use galena_core::coordinates::{BlockCoordinate, MapDimensions};
use galena_core::geometry::BoundingBox;
use tokio::runtime::Runtime;

use crate::world::map::{BlockUpdate, Map};
use crate::world::ranks::{PlayerProfile, RankResolver, StaticRankList};
use crate::world::settings::WorldSettings;
use crate::world::zone::Zone;
use crate::world::{BuildOutcome, LifecycleState, World};

#[ctor::ctor]
fn init() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

fn ladder() -> Arc<StaticRankList> {
    Arc::new(StaticRankList::new(["guest", "builder", "op"]).unwrap())
}

fn small_settings() -> WorldSettings {
    let mut settings = WorldSettings::default();
    settings.default_dimensions = (16, 16, 16);
    settings
}

fn test_world(dir: &Path, name: &str, settings: WorldSettings) -> Arc<World> {
    World::new(
        name,
        dir.join(format!("{name}.glm")),
        settings,
        ladder(),
    )
}

fn guest(ranks: &StaticRankList, name: &str) -> PlayerProfile {
    PlayerProfile::new(name, ranks.by_name("guest").unwrap())
}

#[test]
fn zone_permissions_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let ranks = ladder();
    let world = test_world(dir.path(), "vip_world", small_settings());

    let (bob, _updates) = world.join(guest(&ranks, "Bob")).unwrap();
    let map = world.map().unwrap();
    assert!(map.add_zone(Zone::new(
        "vip",
        BoundingBox::from_corners(BlockCoordinate::new(0, 0, 0), BlockCoordinate::new(7, 7, 7)),
        ranks.by_name("builder").unwrap(),
    )));

    let inside = BlockCoordinate::new(3, 3, 3);
    match world.try_build(&bob, inside, BlockId::STONE).unwrap() {
        BuildOutcome::Denied(zone) => assert_eq!(zone.name(), "vip"),
        other => panic!("Expected a zone denial, got {other:?}"),
    }
    // Outside the zone, a guest may build.
    assert!(matches!(
        world
            .try_build(&bob, BlockCoordinate::new(12, 12, 12), BlockId::STONE)
            .unwrap(),
        BuildOutcome::Queued
    ));

    assert!(map.update_zone("vip", |z| {
        z.include("Bob");
    }));
    assert!(matches!(
        world.try_build(&bob, inside, BlockId::STONE).unwrap(),
        BuildOutcome::Queued
    ));
    world.process_updates();
    assert_eq!(map.get_block(inside), BlockId::STONE);
}

#[test]
fn updates_apply_in_fifo_order_across_threads() {
    let map = Arc::new(Map::empty(MapDimensions::try_new(16, 16, 16).unwrap()));
    let cell = BlockCoordinate::new(1, 2, 3);
    let mut producers = Vec::new();
    for tag in 1..=4u8 {
        let map = map.clone();
        producers.push(std::thread::spawn(move || {
            for _ in 0..50 {
                map.queue_update(BlockUpdate {
                    origin: None,
                    coord: cell,
                    new_block: BlockId(tag),
                });
            }
        }));
    }
    for producer in producers {
        producer.join().unwrap();
    }
    // This enqueue strictly follows every producer's, so FIFO application
    // means it must be the final state of the cell.
    map.queue_update(BlockUpdate {
        origin: None,
        coord: cell,
        new_block: BlockId(49),
    });

    let applied = map.drain_updates(usize::MAX);
    assert_eq!(applied.len(), 201);
    assert_eq!(applied.last().unwrap().new_block, BlockId(49));
    assert_eq!(map.get_block(cell), BlockId(49));
}

#[test]
fn budget_splits_across_observers() {
    let dir = tempfile::tempdir().unwrap();
    let ranks = ladder();
    let mut settings = small_settings();
    settings.max_updates_per_tick = 100;
    settings.min_updates_per_tick = 10;
    let world = test_world(dir.path(), "crowded", settings);

    let mut handles = Vec::new();
    for i in 0..4 {
        let (handle, _rx) = world.join(guest(&ranks, &format!("p{i}"))).unwrap();
        handles.push(handle);
    }
    assert_eq!(world.update_budget(), 25);

    for i in 4..20 {
        let (handle, _rx) = world.join(guest(&ranks, &format!("p{i}"))).unwrap();
        handles.push(handle);
    }
    // 100 / 20 would be 5; the floor keeps the world draining.
    assert_eq!(world.update_budget(), 10);
}

#[test]
fn drain_respects_tick_budget() {
    let dir = tempfile::tempdir().unwrap();
    let ranks = ladder();
    let mut settings = small_settings();
    settings.max_updates_per_tick = 30;
    settings.min_updates_per_tick = 1;
    let world = test_world(dir.path(), "budgeted", settings);

    let (alice, _rx) = world.join(guest(&ranks, "Alice")).unwrap();
    for i in 0..100 {
        let coord = BlockCoordinate::new(i % 16, i / 16, 12);
        assert!(matches!(
            world.try_build(&alice, coord, BlockId::STONE).unwrap(),
            BuildOutcome::Queued
        ));
    }
    world.process_updates();
    let map = world.map().unwrap();
    assert_eq!(map.pending_updates(), 70);
    world.process_updates();
    assert_eq!(map.pending_updates(), 40);
}

#[test]
fn unload_waits_for_queue_to_drain() {
    let dir = tempfile::tempdir().unwrap();
    let ranks = ladder();
    let world = test_world(dir.path(), "transient", small_settings());
    let map_path = dir.path().join("transient.glm");

    let (bob, _rx) = world.join(guest(&ranks, "Bob")).unwrap();
    assert_eq!(world.lifecycle(), LifecycleState::Loaded);
    assert!(matches!(
        world
            .try_build(&bob, BlockCoordinate::new(5, 5, 12), BlockId::STONE)
            .unwrap(),
        BuildOutcome::Queued
    ));
    assert!(world.leave(&bob));

    // Zero observers but a non-empty queue: the drain applies work, so the
    // world must stay loaded.
    world.process_updates();
    assert_eq!(world.lifecycle(), LifecycleState::Loaded);

    // The next drain comes up empty; now the unload completes, saving first.
    world.process_updates();
    assert_eq!(world.lifecycle(), LifecycleState::Unloaded);
    assert!(world.map().is_none());
    assert!(map_path.exists());
}

#[test]
fn rejoin_cancels_pending_unload() {
    let dir = tempfile::tempdir().unwrap();
    let ranks = ladder();
    let world = test_world(dir.path(), "revolving", small_settings());

    let (bob, _rx) = world.join(guest(&ranks, "Bob")).unwrap();
    assert!(world.leave(&bob));
    let (_alice, _rx) = world.join(guest(&ranks, "Alice")).unwrap();
    world.process_updates();
    assert_eq!(world.lifecycle(), LifecycleState::Loaded);
}

#[test]
fn locked_world_skips_drains_but_still_unloads() {
    let dir = tempfile::tempdir().unwrap();
    let ranks = ladder();
    let world = test_world(dir.path(), "frozen", small_settings());

    let (bob, _rx) = world.join(guest(&ranks, "Bob")).unwrap();
    let coord = BlockCoordinate::new(2, 2, 12);
    assert!(matches!(
        world.try_build(&bob, coord, BlockId::STONE).unwrap(),
        BuildOutcome::Queued
    ));

    world.set_locked(true);
    world.process_updates();
    let map = world.map().unwrap();
    assert_eq!(map.pending_updates(), 1);
    assert_eq!(map.get_block(coord), BlockId::AIR);

    world.set_locked(false);
    world.process_updates();
    assert_eq!(map.get_block(coord), BlockId::STONE);

    // A frozen world still completes a pending unload once the queue is
    // empty.
    world.set_locked(true);
    assert!(world.leave(&bob));
    world.process_updates();
    assert_eq!(world.lifecycle(), LifecycleState::Unloaded);
}

#[test]
fn applied_updates_reach_observers_with_origin() {
    let dir = tempfile::tempdir().unwrap();
    let ranks = ladder();
    let world = test_world(dir.path(), "observed", small_settings());

    let (alice, mut alice_rx) = world.join(guest(&ranks, "Alice")).unwrap();
    let (_bob, mut bob_rx) = world.join(guest(&ranks, "Bob")).unwrap();

    let coord = BlockCoordinate::new(9, 9, 12);
    assert!(matches!(
        world.try_build(&alice, coord, BlockId::DIRT).unwrap(),
        BuildOutcome::Queued
    ));
    world.process_updates();

    let seen = bob_rx.try_recv().unwrap();
    assert_eq!(seen.coord, coord);
    assert_eq!(seen.new_block, BlockId::DIRT);
    assert_eq!(seen.origin, Some(alice.id()));
    // The originator's receiver also gets the update; the session layer
    // filters on origin to avoid echoing it back.
    assert_eq!(alice_rx.try_recv().unwrap().origin, Some(alice.id()));
}

#[test]
fn failed_load_reports_and_stays_unloaded() {
    let dir = tempfile::tempdir().unwrap();
    let ranks = ladder();
    let path = dir.path().join("corrupt.glm");
    std::fs::write(&path, b"definitely not a map file").unwrap();
    let world = World::new("corrupt", path.clone(), small_settings(), ladder());

    assert!(world.join(guest(&ranks, "Bob")).is_err());
    assert_eq!(world.lifecycle(), LifecycleState::Unloaded);
    assert_eq!(world.observer_count(), 0);
    assert!(world.map().is_none());

    // Once the bad file is gone, the same world recovers by creating a
    // fresh map.
    std::fs::remove_file(&path).unwrap();
    assert!(world.join(guest(&ranks, "Bob")).is_ok());
    assert_eq!(world.lifecycle(), LifecycleState::Loaded);
}

#[test]
fn world_round_trips_map_through_unload() {
    let dir = tempfile::tempdir().unwrap();
    let ranks = ladder();
    let coord = BlockCoordinate::new(4, 4, 12);
    {
        let world = test_world(dir.path(), "persistent", small_settings());
        let (bob, _rx) = world.join(guest(&ranks, "Bob")).unwrap();
        world.try_build(&bob, coord, BlockId::STONE).unwrap();
        let map = world.map().unwrap();
        map.add_zone(Zone::new(
            "vip",
            BoundingBox::from_corners(
                BlockCoordinate::new(0, 0, 0),
                BlockCoordinate::new(7, 7, 7),
            ),
            ranks.by_name("builder").unwrap(),
        ));
        map.set_metadata("builtBy", "round trip test");
        world.leave(&bob);
        world.process_updates();
        world.process_updates();
        assert_eq!(world.lifecycle(), LifecycleState::Unloaded);
    }

    let world = test_world(dir.path(), "persistent", small_settings());
    let (_bob, _rx) = world.join(guest(&ranks, "Bob")).unwrap();
    let map = world.map().unwrap();
    assert_eq!(map.get_block(coord), BlockId::STONE);
    let zone = map.zone("vip").unwrap();
    assert_eq!(zone.min_build_rank(), ranks.by_name("builder").unwrap());
    assert_eq!(
        map.metadata("builtBy").as_deref(),
        Some("round trip test")
    );
}

#[test]
fn tick_and_maintenance_loops_drive_the_world() {
    let dir = tempfile::tempdir().unwrap();
    let ranks = ladder();
    let rt = Runtime::new().unwrap();
    let _guard = rt.enter();

    let mut settings = small_settings();
    settings.tick_interval_ms = 10;
    let world = test_world(dir.path(), "ticking", settings);
    world.spawn_tick_loop().unwrap();
    world.spawn_maintenance_loop().unwrap();

    let (bob, _rx) = world.join(guest(&ranks, "Bob")).unwrap();
    let coord = BlockCoordinate::new(8, 8, 12);
    assert!(matches!(
        world.try_build(&bob, coord, BlockId::GRASS).unwrap(),
        BuildOutcome::Queued
    ));

    rt.block_on(tokio::time::sleep(Duration::from_millis(300)));
    assert_eq!(world.map().unwrap().get_block(coord), BlockId::GRASS);

    world.request_shutdown();
    rt.block_on(world.await_shutdown()).unwrap();
    assert!(dir.path().join("ticking.glm").exists());
}
