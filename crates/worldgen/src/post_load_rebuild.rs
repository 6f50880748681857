//! Rebuild in-flight state after a save is loaded.
//!
//! Only durable records survive a load: pending placements, footprints,
//! decisions and road edges. Tasks, road jobs and chunk reservations are
//! transient, so a one-shot system in [`WorldgenSet::Restore`] drops what is
//! left of them and re-derives them from the records before any new decision
//! is processed.

use std::collections::BTreeMap;

use bevy::prelude::*;

use crate::activity::RegionActivity;
use crate::footprints::{FootprintRect, FootprintRegistry};
use crate::host::HostWorld;
use crate::region_decision::{DecisionStatus, RegionDecisionTable};
use crate::residency::ChunkResidency;
use crate::roads::{RoadBuilder, RoadNetworkState};
use crate::scheduler::{PendingPlacements, PlacementScheduler};
use crate::template::TemplateLibrary;
use crate::WorldgenSet;

/// Marker inserted when a load completes. The rebuild runs on the next tick
/// and removes it.
#[derive(Resource, Default)]
pub struct PostLoadRebuildPending;

/// Counts from one rebuild, for logging and tests.
#[derive(Resource, Default, Debug, Clone, PartialEq, Eq)]
pub struct RebuildSummary {
    pub resubmitted: usize,
    pub dropped: usize,
    pub other_dimension: usize,
    pub requeued_regions: usize,
    pub roads_reset: usize,
}

pub struct PostLoadRebuildPlugin;

impl Plugin for PostLoadRebuildPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<RebuildSummary>().add_systems(
            FixedUpdate,
            rebuild_after_load
                .run_if(resource_exists::<PostLoadRebuildPending>)
                .run_if(resource_exists::<HostWorld>)
                .in_set(WorldgenSet::Restore),
        );
    }
}

pub fn rebuild_after_load(world: &mut World) {
    let mut summary = RebuildSummary::default();

    // Transient work from before the load no longer matches the world.
    world.resource_scope(|world, mut residency: Mut<ChunkResidency>| {
        {
            let mut host = world.resource_mut::<HostWorld>();
            residency.release_everything(&mut *host.0);
        }
        world
            .resource_mut::<PlacementScheduler>()
            .abandon(&mut residency);
    });
    world.resource_mut::<RoadBuilder>().job = None;
    summary.roads_reset = world.resource_mut::<RoadNetworkState>().reset_building();

    resubmit_pending(world, &mut summary);
    summary.requeued_regions = requeue_decisions(world);

    info!(
        "Post-load rebuild: {} jobs resubmitted, {} dropped, {} in other dimensions, \
         {} regions requeued, {} road edges reset",
        summary.resubmitted,
        summary.dropped,
        summary.other_dimension,
        summary.requeued_regions,
        summary.roads_reset
    );
    world.insert_resource(summary);
    world.remove_resource::<PostLoadRebuildPending>();
}

/// Re-enqueue every persisted job of the current dimension. Footprints are
/// re-reserved idempotently and activity counters are recomputed from the
/// surviving records, so a job is never counted twice.
fn resubmit_pending(world: &mut World, summary: &mut RebuildSummary) {
    let (seed, dimension) = {
        let host = &world.resource::<HostWorld>().0;
        (host.seed(), host.dimension_id().to_string())
    };
    let records: Vec<_> = world
        .resource::<PendingPlacements>()
        .records
        .values()
        .cloned()
        .collect();

    for record in records {
        if record.dimension != dimension {
            summary.other_dimension += 1;
            continue;
        }
        let Some(template) = world.resource::<TemplateLibrary>().get(&record.template_id) else {
            warn!(
                "Persisted job {:#x}: template '{}' is gone, dropping it",
                record.job_key, record.template_id
            );
            world.resource_mut::<PendingPlacements>().take(record.job_key);
            world.resource_mut::<FootprintRegistry>().release(record.job_key);
            summary.dropped += 1;
            continue;
        };

        let (size_x, size_z) = template.footprint_size();
        let rect = FootprintRect::from_origin(record.origin(), size_x, size_z);
        world
            .resource_mut::<FootprintRegistry>()
            .reserve(record.region_key, record.job_key, rect);

        let submitted = world.resource_scope(|world, mut scheduler: Mut<PlacementScheduler>| {
            let mut residency = world.resource_mut::<ChunkResidency>();
            scheduler.submit(record.request(template), &mut residency, seed)
        });
        match submitted {
            Ok(_) => summary.resubmitted += 1,
            Err(e) => warn!("Persisted job {:#x} not resubmitted: {}", record.job_key, e),
        }
    }

    let mut counters: BTreeMap<u64, u32> = BTreeMap::new();
    for region_key in world.resource::<PendingPlacements>().job_regions.values() {
        *counters.entry(*region_key).or_insert(0) += 1;
    }
    world.resource_mut::<RegionActivity>().counters = counters;
}

/// Queue undecided and pending regions again. A region that was placing
/// but lost its job record goes back to pending.
fn requeue_decisions(world: &mut World) -> usize {
    let placing: Vec<u64> = world
        .resource::<PendingPlacements>()
        .records
        .keys()
        .copied()
        .collect();
    let mut table = world.resource_mut::<RegionDecisionTable>();
    let mut keys = Vec::new();
    for (key, entry) in table.entries.iter_mut() {
        match entry.status {
            DecisionStatus::Unknown | DecisionStatus::WinPending => keys.push(*key),
            DecisionStatus::WinPlacing if placing.binary_search(key).is_err() => {
                entry.status = DecisionStatus::WinPending;
                entry.next_retry_tick = 0;
                keys.push(*key);
            }
            _ => {}
        }
    }
    for key in &keys {
        table.enqueue(*key);
    }
    keys.len()
}
