//! Jobs that survive a save/load cycle.
//!
//! A persisted job carries enough to be re-enqueued from scratch: the
//! template id, origin, dimension and the road region it reserves a
//! footprint in. The record lives until the job reports an outcome.

use std::collections::BTreeMap;

use bevy::math::IVec3;
use bevy::prelude::*;
use bitcode::{Decode, Encode};

use crate::activity::RegionActivity;
use crate::error::SubmitError;
use crate::footprints::{anchors_for_placement, FootprintRect, FootprintRegistry, RoadAnchors};
use crate::placement::{JobKey, PlacementFailed, PlacementRequest, PlacementSucceeded, TaskId};
use crate::template::{StructureTemplate, TemplateLibrary};

use super::submit_placement;

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct PendingPlacement {
    pub job_key: u64,
    pub dimension: String,
    pub origin: [i32; 3],
    pub template_id: String,
    pub include_transparent: bool,
    pub obey_pause: bool,
    pub region_key: u64,
}

impl PendingPlacement {
    pub fn origin(&self) -> IVec3 {
        IVec3::from_array(self.origin)
    }

    pub fn request(&self, template: std::sync::Arc<StructureTemplate>) -> PlacementRequest {
        PlacementRequest::new(self.origin(), template)
            .include_transparent(self.include_transparent)
            .obey_pause(self.obey_pause)
            .job_key(JobKey(self.job_key))
    }
}

/// Persisted job records plus the job to road-region map used to settle
/// footprints and activity counters when a job ends.
#[derive(Resource, Default, Debug, Clone, PartialEq, Encode, Decode)]
pub struct PendingPlacements {
    pub records: BTreeMap<u64, PendingPlacement>,
    pub job_regions: BTreeMap<u64, u64>,
}

impl PendingPlacements {
    pub fn insert(&mut self, record: PendingPlacement) {
        self.job_regions.insert(record.job_key, record.region_key);
        self.records.insert(record.job_key, record);
    }

    pub fn take(&mut self, job_key: u64) -> Option<PendingPlacement> {
        self.job_regions.remove(&job_key);
        self.records.remove(&job_key)
    }

    pub fn get(&self, job_key: u64) -> Option<&PendingPlacement> {
        self.records.get(&job_key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl crate::Saveable for PendingPlacements {
    const SAVE_KEY: &'static str = "pending_placements";

    fn save_to_bytes(&self) -> Option<Vec<u8>> {
        if self.records.is_empty() {
            return None;
        }
        Some(bitcode::encode(self))
    }

    fn load_from_bytes(bytes: &[u8]) -> Self {
        crate::decode_or_warn(Self::SAVE_KEY, bytes)
    }
}

/// Global pause switch. Tasks that obey it make no progress while set.
#[derive(Resource, Default, Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct PlacementPause {
    pub paused: bool,
}

impl PlacementPause {
    pub fn set_paused(&mut self, paused: bool) {
        if self.paused != paused {
            info!("Placement {}", if paused { "paused" } else { "resumed" });
        }
        self.paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }
}

impl crate::Saveable for PlacementPause {
    const SAVE_KEY: &'static str = "placement_pause";

    fn save_to_bytes(&self) -> Option<Vec<u8>> {
        if !self.paused {
            return None;
        }
        Some(bitcode::encode(self))
    }

    fn load_from_bytes(bytes: &[u8]) -> Self {
        crate::decode_or_warn(Self::SAVE_KEY, bytes)
    }
}

/// Submit a persisted job: reserve its footprint, mark its road region
/// active and keep the record until the job ends.
pub fn submit_persisted(world: &mut World, record: PendingPlacement) -> Result<TaskId, SubmitError> {
    let template = world
        .resource::<TemplateLibrary>()
        .get(&record.template_id)
        .ok_or_else(|| SubmitError::UnknownTemplate(record.template_id.clone()))?;
    let (size_x, size_z) = template.footprint_size();
    let rect = FootprintRect::from_origin(record.origin(), size_x, size_z);

    let id = submit_placement(world, record.request(template))?;

    world
        .resource_mut::<FootprintRegistry>()
        .reserve(record.region_key, record.job_key, rect);
    world.resource_mut::<RegionActivity>().begin(record.region_key);
    debug!(
        "Persisted job {:#x} of '{}' reserved in road region {:#x}",
        record.job_key, record.template_id, record.region_key
    );
    world.resource_mut::<PendingPlacements>().insert(record);
    Ok(id)
}

/// Settle persisted jobs: a success publishes road anchors and keeps the
/// footprint, a failure releases it. Both end the region's activity.
pub fn handle_persisted_outcomes(
    mut succeeded: EventReader<PlacementSucceeded>,
    mut failed: EventReader<PlacementFailed>,
    mut pending: ResMut<PendingPlacements>,
    mut footprints: ResMut<FootprintRegistry>,
    mut anchors: ResMut<RoadAnchors>,
    mut activity: ResMut<RegionActivity>,
) {
    for PlacementSucceeded(report) in succeeded.read() {
        let Some(key) = report.job_key else {
            continue;
        };
        let Some(record) = pending.take(key.0) else {
            continue;
        };
        let base_y = report.base_y.unwrap_or(record.origin[1]);
        let mut added = 0;
        for pos in anchors_for_placement(&report.footprint, &report.connectors, base_y) {
            if anchors.add(record.region_key, key.0, pos) {
                added += 1;
            }
        }
        activity.end(record.region_key);
        info!(
            "Persisted job {:#x} placed; {} road anchors in region {:#x}",
            key.0, added, record.region_key
        );
    }

    for PlacementFailed(report) in failed.read() {
        let Some(key) = report.job_key else {
            continue;
        };
        let Some(record) = pending.take(key.0) else {
            continue;
        };
        footprints.release(key.0);
        activity.end(record.region_key);
        info!(
            "Persisted job {:#x} failed; footprint released in region {:#x}",
            key.0, record.region_key
        );
    }
}
