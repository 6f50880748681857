use bevy::math::IVec3;
use bevy::prelude::*;

use super::*;
use crate::activity::RegionActivity;
use crate::error::{FailureReason, SiteRejectReason};
use crate::footprints::{FootprintRegistry, RoadAnchors};
use crate::geometry::{road_region_key, ChunkPos};
use crate::host::Block;
use crate::placement::{JobKey, PlacementRequest};
use crate::test_harness::{solid_box_template, MemoryVoxelHost, TestWorld};

fn boxed(world: TestWorld) -> TestWorld {
    world.with_template(solid_box_template("box", 8, 4, 8))
}

fn record(job_key: u64, x: i32, z: i32) -> PendingPlacement {
    PendingPlacement {
        job_key,
        dimension: "overworld".into(),
        origin: [x, 0, z],
        template_id: "box".into(),
        include_transparent: false,
        obey_pause: true,
        region_key: road_region_key(x, z),
    }
}

#[derive(Resource, Default)]
struct CallbackHits(Vec<bool>);

#[test]
fn test_transient_placement_completes() {
    let mut world = boxed(TestWorld::new());
    let template = world.template("box");
    world
        .submit(PlacementRequest::new(IVec3::new(0, 0, 0), template))
        .expect("queued");

    assert!(world.tick_until_outcomes(1, 200).is_some());
    let report = &world.log().succeeded[0];
    assert_eq!(report.base_y, Some(63));
    assert_eq!(world.host().peek(IVec3::new(4, 65, 4)), Block::StoneBricks);
    assert!(world.resource::<PlacementScheduler>().is_empty());
    assert_eq!(world.host().ticket_count(), 0);
    assert_eq!(world.resource::<ChunkResidency>().total(), 0);
}

#[test]
fn test_duplicate_job_key_is_rejected() {
    let mut world = boxed(TestWorld::new());
    let template = world.template("box");
    let first = PlacementRequest::new(IVec3::ZERO, template.clone()).job_key(JobKey(5));
    let second = PlacementRequest::new(IVec3::new(100, 0, 0), template.clone()).job_key(JobKey(5));

    world.submit(first).expect("first is queued");
    assert_eq!(world.submit(second), Err(SubmitError::DuplicateJob(5)));
    assert!(world.resource::<PlacementScheduler>().is_in_flight(JobKey(5)));

    // The key frees up once the first job ends.
    world.tick_until_outcomes(1, 200).expect("first job ends");
    let again = PlacementRequest::new(IVec3::new(100, 0, 0), template).job_key(JobKey(5));
    assert!(world.submit(again).is_ok());
}

#[test]
fn test_unknown_template_is_rejected() {
    let mut world = TestWorld::new();
    assert_eq!(
        world.submit_persisted(record(1, 0, 0)),
        Err(SubmitError::UnknownTemplate("box".into()))
    );
    assert!(world.resource::<PendingPlacements>().is_empty());
    assert!(world.resource::<FootprintRegistry>().get(1).is_none());
}

#[test]
fn test_callbacks_run_for_their_outcome() {
    let mut world = boxed(TestWorld::with_host(
        MemoryVoxelHost::flat(60).with_water_level(63),
    ));
    world.world_mut().init_resource::<CallbackHits>();
    let template = world.template("box");
    let request = PlacementRequest::new(IVec3::ZERO, template)
        .on_success(|w, _| w.resource_mut::<CallbackHits>().0.push(true))
        .on_failure(|w, report| {
            assert!(!report.succeeded());
            w.resource_mut::<CallbackHits>().0.push(false);
        });
    world.submit(request).expect("queued");

    world.tick_until_outcomes(1, 100).expect("ends");
    assert_eq!(world.resource::<CallbackHits>().0, vec![false]);
}

#[test]
fn test_persisted_failure_releases_footprint() {
    let mut world = boxed(TestWorld::with_host(
        MemoryVoxelHost::flat(60).with_water_level(63),
    ));
    let rec = record(11, 0, 0);
    let region = rec.region_key;
    world.submit_persisted(rec).expect("queued");

    assert!(world.resource::<FootprintRegistry>().get(11).is_some());
    assert_eq!(world.resource::<RegionActivity>().count(region), 1);
    assert_eq!(world.resource::<PendingPlacements>().len(), 1);

    world.tick_until_outcomes(1, 100).expect("ends");
    assert_eq!(
        world.log().failed[0].outcome,
        Err(FailureReason::SiteRejected(SiteRejectReason::SurfaceWater))
    );
    assert!(world.resource::<FootprintRegistry>().get(11).is_none());
    assert!(world.resource::<RegionActivity>().is_idle(region));
    assert!(world.resource::<PendingPlacements>().is_empty());
    assert_eq!(world.host().writes, 0);
}

#[test]
fn test_persisted_success_publishes_anchor() {
    let mut world = boxed(TestWorld::new());
    let rec = record(12, 40, 40);
    let region = rec.region_key;
    world.submit_persisted(rec).expect("queued");

    world.tick_until_outcomes(1, 200).expect("ends");
    assert_eq!(world.log().succeeded.len(), 1);
    // Footprint stays reserved after success.
    assert!(world.resource::<FootprintRegistry>().get(12).is_some());
    let anchors = world.resource::<RoadAnchors>().in_region(region);
    assert_eq!(anchors.len(), 1);
    assert_eq!(anchors[0].position(), IVec3::new(39, 63, 39));
    assert!(world.resource::<RegionActivity>().is_idle(region));
}

#[test]
fn test_pause_holds_obedient_tasks_only() {
    let mut world = boxed(TestWorld::new());
    world.resource_mut::<PlacementPause>().set_paused(true);
    let template = world.template("box");
    world
        .submit(PlacementRequest::new(IVec3::ZERO, template.clone()))
        .expect("queued");
    world
        .submit(PlacementRequest::new(IVec3::new(200, 0, 0), template).obey_pause(false))
        .expect("queued");

    world.tick(100);
    let log = world.log();
    assert_eq!(log.succeeded.len(), 1);
    assert_eq!(log.succeeded[0].origin, IVec3::new(200, 0, 0));
    assert_eq!(world.host().peek(IVec3::new(4, 65, 4)), Block::Air);

    world.resource_mut::<PlacementPause>().set_paused(false);
    world.tick_until_outcomes(2, 200).expect("resumes");
    assert_eq!(world.host().peek(IVec3::new(4, 65, 4)), Block::StoneBricks);
}

#[test]
fn test_heavy_lane_bounds_writes_per_tick() {
    let mut params = crate::params::WorldgenParams::default();
    params.scheduler.heavy_edits_per_tick = 64;
    let mut world = boxed(TestWorld::new()).with_params(params);
    let template = world.template("box");
    for i in 0..3 {
        world
            .submit(PlacementRequest::new(IVec3::new(i * 100, 0, 0), template.clone()))
            .expect("queued");
    }

    let mut last = world.host().writes;
    for _ in 0..500 {
        world.tick(1);
        let writes = world.host().writes;
        // One grading column can overshoot the cap by a few cells.
        assert!(writes - last <= 72, "{} writes in one tick", writes - last);
        last = writes;
        if world.log().succeeded.len() == 3 {
            break;
        }
    }
    assert_eq!(world.log().succeeded.len(), 3);
}

#[test]
fn test_stalled_task_releases_tickets() {
    let mut params = crate::params::WorldgenParams::default();
    params.scheduler.stall_timeout_ticks = 3;
    let mut host = MemoryVoxelHost::flat(64);
    host.block_chunk(ChunkPos::new(0, 0));
    let mut world = boxed(TestWorld::with_host(host)).with_params(params);
    let template = world.template("box");
    world
        .submit(PlacementRequest::new(IVec3::ZERO, template))
        .expect("queued");

    world.tick_until_outcomes(1, 50).expect("stalls out");
    assert!(matches!(
        world.log().failed[0].outcome,
        Err(FailureReason::Stalled { chunk, .. }) if chunk == ChunkPos::new(0, 0)
    ));
    assert_eq!(world.host().ticket_count(), 0);
    assert_eq!(world.host().writes, 0);
}

#[test]
fn test_tasks_starved_by_reservation_cap_stall_out() {
    // Each task needs 16 chunks; together they deadlock under a cap of 20
    // until one of them times out and frees its share.
    let mut params = crate::params::WorldgenParams::default();
    params.scheduler.max_reservations = 20;
    params.scheduler.stall_timeout_ticks = 50;
    let mut world = boxed(TestWorld::new()).with_params(params);
    let template = world.template("box");
    world
        .submit(PlacementRequest::new(IVec3::ZERO, template.clone()))
        .expect("queued");
    world
        .submit(PlacementRequest::new(IVec3::new(1000, 0, 0), template))
        .expect("queued");

    world.tick_until_outcomes(2, 1000).expect("both tasks end");
    let log = world.log();
    assert!(!log.failed.is_empty());
    assert!(log
        .failed
        .iter()
        .all(|r| matches!(r.outcome, Err(FailureReason::Stalled { .. }))));
    assert!(world.resource::<PlacementScheduler>().is_empty());
    assert_eq!(world.resource::<ChunkResidency>().total(), 0);
    assert_eq!(world.host().ticket_count(), 0);
}

#[test]
fn test_shutdown_abandons_without_releasing() {
    let mut world = boxed(TestWorld::new());
    let template = world.template("box");
    world
        .submit(PlacementRequest::new(IVec3::ZERO, template))
        .expect("queued");
    world.tick(1);
    let held = world.host().ticket_count();
    assert!(held > 0);

    world.shutdown();
    assert!(world.resource::<PlacementScheduler>().is_empty());
    assert_eq!(world.resource::<ChunkResidency>().total(), 0);
    // The host tears its tickets down itself on exit.
    assert_eq!(world.host().ticket_count(), held);
    assert!(world.log().failed.is_empty());
}

#[test]
fn test_pause_is_saved_only_when_set() {
    use crate::Saveable;

    assert!(PlacementPause::default().save_to_bytes().is_none());
    let bytes = PlacementPause { paused: true }.save_to_bytes().expect("saved");
    assert!(PlacementPause::load_from_bytes(&bytes).is_paused());
}
