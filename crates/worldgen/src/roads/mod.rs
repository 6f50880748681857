//! Road networks between placed structures.
//!
//! Anchors published by finished placements are connected per road region
//! by a spanning network ([`planner`]). Each planned edge is routed with a
//! turn-constrained A* ([`pathfinder`]), straightened ([`simplify`]) and
//! built cell by cell under the tick budget ([`builder`]). Building only
//! starts in a region with no placement in flight.

pub mod builder;
pub mod pathfinder;
pub mod planner;
pub mod simplify;
mod state;
mod systems;


pub use builder::{plan_road, RoadJob, RoadPhase, RoadStep, RoutePlanner};
pub use pathfinder::{find_path, ColumnProbe, PathRequest, RoadPath};
pub use planner::plan_network;
pub use state::{
    EdgeKey, EdgeStatus, RoadBuilder, RoadEdgeFinished, RoadEdgeRecord, RoadNetworkState,
};
pub use systems::{plan_road_networks, run_road_builder};

use bevy::prelude::*;

use crate::host::HostWorld;
use crate::WorldgenSet;

pub struct RoadsPlugin;

impl Plugin for RoadsPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<RoadNetworkState>()
            .init_resource::<RoadBuilder>()
            .add_event::<RoadEdgeFinished>()
            .add_systems(
                FixedUpdate,
                (plan_road_networks, run_road_builder)
                    .chain()
                    .run_if(resource_exists::<HostWorld>)
                    .in_set(WorldgenSet::Roads),
            );

        app.init_resource::<crate::SaveableRegistry>();
        app.world_mut()
            .resource_mut::<crate::SaveableRegistry>()
            .register::<RoadNetworkState>();
    }
}
