//! # TestWorld: headless harness for the worldgen engine
//!
//! Wraps `bevy::app::App` + `MinimalPlugins` + [`WorldgenPlugin`] with an
//! in-memory host so tests can submit work, run ticks and inspect the voxels
//! the engine wrote.

mod memory_host;
mod templates;

pub use memory_host::MemoryVoxelHost;
pub use templates::{solid_box_template, TemplateBuilder};

use std::sync::Arc;

use bevy::app::App;
use bevy::prelude::*;

use crate::error::SubmitError;
use crate::host::HostWorld;
use crate::params::WorldgenParams;
use crate::placement::{PlacementFailed, PlacementReport, PlacementRequest, PlacementSucceeded, TaskId};
use crate::scheduler::{self, PendingPlacement};
use crate::template::{StructureTemplate, TemplateLibrary};
use crate::{WorldgenPlugin, WorldgenSet};

/// Every placement outcome seen so far, in completion order.
#[derive(Resource, Default, Debug)]
pub struct PlacementLog {
    pub succeeded: Vec<PlacementReport>,
    pub failed: Vec<PlacementReport>,
}

fn record_placements(
    mut log: ResMut<PlacementLog>,
    mut ok: EventReader<PlacementSucceeded>,
    mut failed: EventReader<PlacementFailed>,
) {
    log.succeeded.extend(ok.read().map(|e| e.0.clone()));
    log.failed.extend(failed.read().map(|e| e.0.clone()));
}

pub struct TestWorld {
    app: App,
}

impl Default for TestWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl TestWorld {
    // -----------------------------------------------------------------------
    // Constructors
    // -----------------------------------------------------------------------

    /// Flat grass at y=64, every chunk loaded, no participants.
    pub fn new() -> Self {
        Self::with_host(MemoryVoxelHost::flat(64))
    }

    pub fn with_host(host: MemoryVoxelHost) -> Self {
        let mut app = App::new();
        app.add_plugins(MinimalPlugins);
        app.add_plugins(WorldgenPlugin);
        app.insert_resource(HostWorld::new(host));
        app.init_resource::<PlacementLog>();
        app.add_systems(
            FixedUpdate,
            record_placements.after(WorldgenSet::Complete).before(WorldgenSet::Roads),
        );
        // Run Startup once.
        app.update();
        Self { app }
    }

    pub fn with_params(mut self, params: WorldgenParams) -> Self {
        self.app.world_mut().insert_resource(params);
        self
    }

    pub fn with_template(mut self, template: StructureTemplate) -> Self {
        self.app
            .world_mut()
            .resource_mut::<TemplateLibrary>()
            .insert(template);
        self
    }

    // -----------------------------------------------------------------------
    // Simulation
    // -----------------------------------------------------------------------

    /// Run `n` fixed ticks by executing `FixedUpdate` directly.
    pub fn tick(&mut self, n: u32) {
        for _ in 0..n {
            self.app.world_mut().run_schedule(FixedUpdate);
        }
    }

    /// Tick until `done` holds, at most `max` ticks. Returns the number of
    /// ticks run, or `None` if the condition never held.
    pub fn tick_until(&mut self, max: u32, mut done: impl FnMut(&mut World) -> bool) -> Option<u32> {
        for n in 0..max {
            if done(self.app.world_mut()) {
                return Some(n);
            }
            self.tick(1);
        }
        done(self.app.world_mut()).then_some(max)
    }

    /// Tick until the placement log holds `n` outcomes in total.
    pub fn tick_until_outcomes(&mut self, n: usize, max: u32) -> Option<u32> {
        self.tick_until(max, |w| {
            let log = w.resource::<PlacementLog>();
            log.succeeded.len() + log.failed.len() >= n
        })
    }

    /// Send `AppExit` and run the `Last` schedule, as on host shutdown.
    pub fn shutdown(&mut self) {
        self.app.world_mut().send_event(AppExit::Success);
        self.app.world_mut().run_schedule(Last);
    }

    // -----------------------------------------------------------------------
    // Submission
    // -----------------------------------------------------------------------

    pub fn template(&self, id: &str) -> Arc<StructureTemplate> {
        self.app
            .world()
            .resource::<TemplateLibrary>()
            .get(id)
            .unwrap_or_else(|| panic!("template '{id}' not registered"))
    }

    pub fn submit(&mut self, request: PlacementRequest) -> Result<TaskId, SubmitError> {
        scheduler::submit_placement(self.app.world_mut(), request)
    }

    pub fn submit_persisted(&mut self, record: PendingPlacement) -> Result<TaskId, SubmitError> {
        scheduler::submit_persisted(self.app.world_mut(), record)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn world(&self) -> &World {
        self.app.world()
    }

    /// The underlying app, for tests that add plugins of their own.
    pub fn app_mut(&mut self) -> &mut App {
        &mut self.app
    }

    pub fn world_mut(&mut self) -> &mut World {
        self.app.world_mut()
    }

    pub fn resource<T: Resource>(&self) -> &T {
        self.app.world().resource::<T>()
    }

    pub fn resource_mut<T: Resource>(&mut self) -> Mut<'_, T> {
        self.app.world_mut().resource_mut::<T>()
    }

    pub fn host(&self) -> &MemoryVoxelHost {
        self.app
            .world()
            .resource::<HostWorld>()
            .downcast_ref::<MemoryVoxelHost>()
            .expect("TestWorld host is a MemoryVoxelHost")
    }

    pub fn host_mut(&mut self) -> Mut<'_, HostWorld> {
        self.app.world_mut().resource_mut::<HostWorld>()
    }

    /// Mutate the in-memory host.
    pub fn with_host_mut<R>(&mut self, f: impl FnOnce(&mut MemoryVoxelHost) -> R) -> R {
        let mut host = self.host_mut();
        let memory = host
            .downcast_mut::<MemoryVoxelHost>()
            .expect("TestWorld host is a MemoryVoxelHost");
        f(memory)
    }

    pub fn log(&self) -> &PlacementLog {
        self.resource::<PlacementLog>()
    }
}
