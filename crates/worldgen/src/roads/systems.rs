use bevy::math::IVec3;
use bevy::prelude::*;

use crate::activity::RegionActivity;
use crate::error::FailureReason;
use crate::footprints::{FootprintRect, FootprintRegistry, RoadAnchors};
use crate::hashing::hash_words;
use crate::host::HostWorld;
use crate::params::WorldgenParams;
use crate::placement::TickBudget;
use crate::residency::ChunkResidency;
use crate::scheduler::PlacementPause;

use super::builder::{RoadContext, RoadJob, RoadStep};
use super::planner::plan_network;
use super::state::{EdgeStatus, RoadBuilder, RoadEdgeFinished, RoadNetworkState};

/// Re-plan every idle road region whose anchor count changed since it was
/// last planned. Known edges keep their status.
pub fn plan_road_networks(
    anchors: Res<RoadAnchors>,
    activity: Res<RegionActivity>,
    host: Res<HostWorld>,
    params: Res<WorldgenParams>,
    mut state: ResMut<RoadNetworkState>,
) {
    if !anchors.is_changed() && !activity.is_changed() {
        return;
    }
    let world_seed = host.0.seed();
    for (&region_key, list) in &anchors.regions {
        let count = list.len() as u32;
        if count < 2 || !activity.is_idle(region_key) {
            continue;
        }
        if state.planned_with.get(&region_key) == Some(&count) {
            continue;
        }
        let points: Vec<IVec3> = list.iter().map(|a| a.position()).collect();
        let seed = hash_words(world_seed, &[region_key]);
        let mut added = 0;
        for (i, j) in plan_network(&points, seed, &params.roads) {
            if state.insert_planned(region_key, points[i], points[j]) {
                added += 1;
            }
        }
        state.planned_with.insert(region_key, count);
        info!(
            "Road region {:#x}: planned {} new edges over {} anchors",
            region_key, added, count
        );
    }
}

fn start_next_job(world: &mut World) {
    let next = {
        let activity = world.resource::<RegionActivity>();
        let anchors = world.resource::<RoadAnchors>();
        world
            .resource::<RoadNetworkState>()
            .next_buildable(|r| activity.is_idle(r) && anchors.count(r) >= 2)
            .map(|(key, e)| (key, e.region_key, e.from_pos(), e.to_pos()))
    };
    let Some((edge, region_key, from, to)) = next else {
        return;
    };
    let token = world.resource_mut::<ChunkResidency>().new_token();
    world
        .resource_mut::<RoadNetworkState>()
        .set_status(edge, EdgeStatus::Building);
    info!("Road {:?}: building {} -> {}", edge, from, to);
    world.resource_mut::<RoadBuilder>().job = Some(RoadJob::new(edge, region_key, from, to, token));
}

fn finish_job(world: &mut World, job: RoadJob) {
    world.resource_scope(|world, mut residency: Mut<ChunkResidency>| {
        let mut host = world.resource_mut::<HostWorld>();
        residency.release_all(&mut *host.0, job.token);
    });

    let built = job.failure.is_none();
    let status = if built {
        EdgeStatus::Built
    } else {
        EdgeStatus::Failed
    };
    world.resource_mut::<RoadNetworkState>().set_status(job.edge, status);
    match &job.failure {
        None => info!(
            "Road {:?} built: {} cells, {} edits, {} lamps{}",
            job.edge,
            job.path.len(),
            job.edits,
            job.lamps,
            if job.fallback { " (fallback route)" } else { "" }
        ),
        Some(reason) => warn!("Road {:?} failed: {}", job.edge, reason),
    }
    world.send_event(RoadEdgeFinished {
        edge: job.edge,
        region_key: job.region_key,
        built,
        cells: job.path.len(),
        edits: job.edits,
    });
}

/// Advance the single active road job, starting the next buildable edge
/// when idle.
pub fn run_road_builder(world: &mut World) {
    if world.resource::<PlacementPause>().is_paused() {
        return;
    }
    if world.resource::<RoadBuilder>().is_idle() {
        start_next_job(world);
    }
    let Some(mut job) = world.resource_mut::<RoadBuilder>().job.take() else {
        return;
    };

    let params = world.resource::<WorldgenParams>().clone();
    let (blocked, protected): (Vec<FootprintRect>, Vec<FootprintRect>) = {
        let footprints = world.resource::<FootprintRegistry>();
        (
            footprints.blocking_rects(params.pathfinder.footprint_margin),
            footprints.all().map(|f| f.rect).collect(),
        )
    };

    let result = world.resource_scope(|world, mut residency: Mut<ChunkResidency>| {
        let mut host = world.resource_mut::<HostWorld>();
        let mut ctx = RoadContext {
            host: &mut *host.0,
            residency: &mut residency,
            params: &params,
            blocked: &blocked,
            protected: &protected,
        };
        let mut budget = TickBudget::new(params.scheduler.heavy_budget_ns, params.roads.edits_per_tick);
        job.step(&mut ctx, &mut budget)
    });

    match result {
        Ok(RoadStep::Working) => world.resource_mut::<RoadBuilder>().job = Some(job),
        Ok(RoadStep::Finished) => finish_job(world, job),
        Err(e) => {
            error!("Road {:?}: host error at cell {}: {}", job.edge, job.cursor, e);
            job.fail(FailureReason::Exception(e.to_string()));
            finish_job(world, job);
        }
    }
}
