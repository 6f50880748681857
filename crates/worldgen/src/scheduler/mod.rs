//! Cooperative placement scheduling.
//!
//! [`PlacementScheduler`] owns every in-flight [`PlacementTask`] and runs
//! them from one exclusive system per tick. Persisted jobs add durable
//! records on top (see [`persisted`]).
//!
//! [`PlacementTask`]: crate::placement::PlacementTask

pub mod persisted;
mod queue;

#[cfg(test)]
mod tests;

pub use persisted::{
    handle_persisted_outcomes, submit_persisted, PendingPlacement, PendingPlacements,
    PlacementPause,
};
pub use queue::{FinishedPlacement, PlacementScheduler};

use bevy::prelude::*;

use crate::error::SubmitError;
use crate::host::HostWorld;
use crate::params::WorldgenParams;
use crate::placement::{
    PlacementFailed, PlacementRequest, PlacementSucceeded, SiteRejectStats, StepContext, TaskId,
};
use crate::residency::ChunkResidency;
use crate::WorldgenSet;

/// Queue a transient placement. The grading seed comes from the host.
pub fn submit_placement(world: &mut World, request: PlacementRequest) -> Result<TaskId, SubmitError> {
    let seed = world.get_resource::<HostWorld>().map_or(0, |h| h.0.seed());
    world.resource_scope(|world, mut scheduler: Mut<PlacementScheduler>| {
        let mut residency = world.resource_mut::<ChunkResidency>();
        scheduler.submit(request, &mut residency, seed)
    })
}

/// Advance the scheduler one tick, then run callbacks and publish outcome
/// events for every task that ended.
pub fn run_placement_scheduler(world: &mut World) {
    if world.resource::<PlacementScheduler>().is_empty() {
        return;
    }
    let paused = world.resource::<PlacementPause>().is_paused();
    let params = world.resource::<WorldgenParams>().clone();

    let finished = world.resource_scope(|world, mut scheduler: Mut<PlacementScheduler>| {
        world.resource_scope(|world, mut residency: Mut<ChunkResidency>| {
            world.resource_scope(|world, mut stats: Mut<SiteRejectStats>| {
                let mut host = world.resource_mut::<HostWorld>();
                let mut ctx = StepContext {
                    host: &mut *host.0,
                    residency: &mut residency,
                    params: &params,
                    stats: &mut stats,
                };
                scheduler.tick(&mut ctx, paused)
            })
        })
    });

    for done in finished {
        if let Some(callback) = done.callback {
            callback(world, &done.report);
        }
        if done.report.succeeded() {
            world.send_event(PlacementSucceeded(done.report));
        } else {
            world.send_event(PlacementFailed(done.report));
        }
    }
}

pub struct SchedulerPlugin;

impl Plugin for SchedulerPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<PlacementScheduler>()
            .init_resource::<ChunkResidency>()
            .init_resource::<SiteRejectStats>()
            .init_resource::<PendingPlacements>()
            .init_resource::<PlacementPause>()
            .add_event::<PlacementSucceeded>()
            .add_event::<PlacementFailed>()
            .add_systems(
                FixedUpdate,
                run_placement_scheduler
                    .run_if(resource_exists::<HostWorld>)
                    .in_set(WorldgenSet::Place),
            )
            .add_systems(
                FixedUpdate,
                handle_persisted_outcomes.in_set(WorldgenSet::Complete),
            );

        app.init_resource::<crate::SaveableRegistry>();
        let mut registry = app.world_mut().resource_mut::<crate::SaveableRegistry>();
        registry.register::<PendingPlacements>();
        registry.register::<PlacementPause>();
    }
}
