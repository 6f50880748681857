//! Integration tests for the worldgen engine using the `TestWorld` harness.
//!
//! These spin up a headless Bevy App with `WorldgenPlugin` and check behavior
//! that spans several plugins: persisted placements feeding the road network,
//! and the save/load round trip through the post-load rebuild.

use std::collections::BTreeMap;

use bevy::math::{IVec2, IVec3};
use bevy::prelude::*;

use crate::activity::RegionActivity;
use crate::footprints::{FootprintRegistry, RoadAnchors};
use crate::geometry::road_region_key;
use crate::host::Block;
use crate::post_load_rebuild::{PostLoadRebuildPending, RebuildSummary};
use crate::region_decision::{DecisionStatus, RegionDecision, RegionDecisionTable};
use crate::roads::{EdgeKey, EdgeStatus, RoadNetworkState};
use crate::scheduler::{PendingPlacement, PendingPlacements, PlacementScheduler};
use crate::test_harness::{solid_box_template, TestWorld};
use crate::{SaveableRegistry, TickCounter};

fn record(job_key: u64, dimension: &str, x: i32, z: i32) -> PendingPlacement {
    PendingPlacement {
        job_key,
        dimension: dimension.into(),
        origin: [x, 0, z],
        template_id: "hut".into(),
        include_transparent: false,
        obey_pause: true,
        region_key: road_region_key(x, z),
    }
}

fn hut_world() -> TestWorld {
    TestWorld::new().with_template(solid_box_template("hut", 8, 4, 8))
}

fn save(world: &TestWorld) -> BTreeMap<String, Vec<u8>> {
    world
        .resource::<SaveableRegistry>()
        .save_all(world.world())
}

/// Load `extensions` into a fresh world the way the save plugin does.
fn load(world: &mut TestWorld, extensions: &BTreeMap<String, Vec<u8>>) {
    world
        .world_mut()
        .resource_scope(|w, registry: Mut<SaveableRegistry>| {
            registry.reset_all(w);
            registry.load_all(w, extensions);
        });
    world.world_mut().insert_resource(PostLoadRebuildPending);
}

// ===========================================================================
// 1. Placements feed the road network
// ===========================================================================

#[test]
fn two_placements_get_connected_by_a_road() {
    let mut world = hut_world();
    world.submit_persisted(record(1, "overworld", 0, 0)).expect("queued");
    world.submit_persisted(record(2, "overworld", 60, 0)).expect("queued");
    let region = road_region_key(0, 0);

    let built = world.tick_until(3000, |w| {
        w.resource::<RoadNetworkState>().count(EdgeStatus::Built) == 1
    });
    assert!(built.is_some(), "road never finished");
    assert_eq!(world.log().succeeded.len(), 2);

    let anchors: Vec<IVec3> = world
        .resource::<RoadAnchors>()
        .in_region(region)
        .iter()
        .map(|a| a.position())
        .collect();
    assert_eq!(anchors.len(), 2);
    let edge = EdgeKey::new(anchors[0], anchors[1]);
    assert_eq!(
        world.resource::<RoadNetworkState>().status(edge),
        Some(EdgeStatus::Built)
    );

    // Somewhere between the two huts the road surface exists.
    let host = world.host();
    let paved = (-3..=1)
        .any(|z| (58..=68).any(|y| host.peek(IVec3::new(30, y, z)) == Block::DirtPath));
    assert!(paved, "no road surface at x=30");
    // Neither hut was cut into.
    assert_eq!(host.peek(IVec3::new(4, 66, 4)), Block::StoneBricks);
    assert_eq!(host.peek(IVec3::new(64, 66, 4)), Block::StoneBricks);
    assert_eq!(host.ticket_count(), 0);
}

#[test]
fn roads_in_other_regions_stay_apart() {
    let mut world = hut_world();
    world.submit_persisted(record(1, "overworld", 0, 0)).expect("queued");
    world.submit_persisted(record(2, "overworld", 1100, 0)).expect("queued");

    world.tick_until_outcomes(2, 500).expect("both placed");
    world.tick(50);
    assert!(world.resource::<RoadNetworkState>().edges.is_empty());
    assert_eq!(world.resource::<RoadAnchors>().count(road_region_key(0, 0)), 1);
    assert_eq!(world.resource::<RoadAnchors>().count(road_region_key(1100, 0)), 1);
}

// ===========================================================================
// 2. Save / load
// ===========================================================================

#[test]
fn interrupted_job_resumes_after_load() {
    let mut before = hut_world();
    before.submit_persisted(record(7, "overworld", 0, 0)).expect("queued");
    before.tick(1);
    assert_eq!(before.resource::<PlacementScheduler>().len(), 1);
    let extensions = save(&before);
    let ticks = before.resource::<TickCounter>().0;

    let mut after = hut_world();
    load(&mut after, &extensions);
    assert_eq!(after.resource::<TickCounter>().0, ticks);
    assert_eq!(after.resource::<PendingPlacements>().len(), 1);

    after.tick(1);
    assert!(!after.world().contains_resource::<PostLoadRebuildPending>());
    let summary = after.resource::<RebuildSummary>().clone();
    assert_eq!(summary.resubmitted, 1);
    assert_eq!(summary.dropped, 0);
    assert_eq!(after.resource::<RegionActivity>().count(road_region_key(0, 0)), 1);

    after.tick_until_outcomes(1, 300).expect("job completes");
    assert!(after.log().succeeded[0].base_y.is_some());
    assert_eq!(after.host().peek(IVec3::new(4, 65, 4)), Block::StoneBricks);
    assert!(after.resource::<PendingPlacements>().is_empty());
    assert_eq!(after.resource::<RoadAnchors>().count(road_region_key(0, 0)), 1);
    assert!(after.resource::<RegionActivity>().is_idle(road_region_key(0, 0)));
}

#[test]
fn job_with_missing_template_is_dropped_on_load() {
    let mut before = hut_world();
    before.submit_persisted(record(7, "overworld", 0, 0)).expect("queued");
    let extensions = save(&before);

    let mut after = TestWorld::new();
    load(&mut after, &extensions);
    after.tick(1);

    assert_eq!(after.resource::<RebuildSummary>().dropped, 1);
    assert!(after.resource::<PendingPlacements>().is_empty());
    assert!(after.resource::<FootprintRegistry>().get(7).is_none());
    assert!(after.resource::<RegionActivity>().is_idle(road_region_key(0, 0)));
    assert!(after.resource::<PlacementScheduler>().is_empty());
}

#[test]
fn other_dimension_jobs_wait_for_their_host() {
    let mut world = hut_world();
    world
        .resource_mut::<PendingPlacements>()
        .insert(record(9, "nether", 0, 0));
    world.world_mut().insert_resource(PostLoadRebuildPending);

    world.tick(20);
    assert_eq!(world.resource::<RebuildSummary>().other_dimension, 1);
    assert_eq!(world.resource::<PendingPlacements>().len(), 1);
    assert!(world.resource::<PlacementScheduler>().is_empty());
    assert_eq!(world.host().writes, 0);
}

#[test]
fn placing_region_without_record_goes_back_to_pending() {
    let mut world = hut_world();
    let region = IVec2::new(5, 5);
    let mut entry = RegionDecision::new(region);
    entry.status = DecisionStatus::WinPlacing;
    entry.next_retry_tick = 500;
    let key = entry.key();
    {
        let mut table = world.resource_mut::<RegionDecisionTable>();
        table.entries.insert(key, entry);
    }
    world.world_mut().insert_resource(PostLoadRebuildPending);

    world.tick(1);
    assert_eq!(world.resource::<RebuildSummary>().requeued_regions, 1);
    let table = world.resource::<RegionDecisionTable>();
    let entry = table.get(region).expect("entry kept");
    assert_eq!(entry.status, DecisionStatus::WinPending);
    assert_eq!(entry.next_retry_tick, 0);
    // No participants yet, so it waits on the queue.
    assert!(table.queue.contains(&key));
}

#[test]
fn interrupted_road_is_rebuilt_after_load() {
    let mut world = hut_world();
    let (a, b) = (IVec3::new(0, 64, -1), IVec3::new(40, 64, -1));
    let region = road_region_key(0, 0);
    {
        let mut anchors = world.resource_mut::<RoadAnchors>();
        anchors.add(region, 1, a);
        anchors.add(region, 2, b);
    }
    {
        let mut state = world.resource_mut::<RoadNetworkState>();
        state.insert_planned(region, a, b);
        state.set_status(EdgeKey::new(a, b), EdgeStatus::Building);
        state.planned_with.insert(region, 2);
    }
    world.world_mut().insert_resource(PostLoadRebuildPending);

    world.tick(1);
    assert_eq!(world.resource::<RebuildSummary>().roads_reset, 1);

    let built = world.tick_until(2000, |w| {
        w.resource::<RoadNetworkState>().status(EdgeKey::new(a, b)) == Some(EdgeStatus::Built)
    });
    assert!(built.is_some(), "edge never rebuilt");
    assert_eq!(world.host().peek(IVec3::new(20, 64, -1)), Block::DirtPath);
}

#[test]
fn load_without_pending_work_is_quiet() {
    let mut world = hut_world();
    let extensions = save(&world);
    load(&mut world, &extensions);

    world.tick(3);
    assert_eq!(world.resource::<RebuildSummary>().clone(), RebuildSummary::default());
    assert!(world.log().succeeded.is_empty() && world.log().failed.is_empty());
}
