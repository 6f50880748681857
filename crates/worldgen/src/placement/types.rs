use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bevy::math::IVec3;
use bevy::prelude::*;

use crate::error::{FailureReason, SiteRejectReason};
use crate::footprints::FootprintRect;
use crate::geometry::ChunkPos;
use crate::template::StructureTemplate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

/// External identity of a job. At most one task per key is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobKey(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AcquireChunks,
    CheckSite,
    GradeTerrain,
    PlaceBlueprint,
    Done,
}

impl Phase {
    /// Heavy phases edit the world and run one task at a time.
    pub fn is_heavy(self) -> bool {
        matches!(self, Phase::GradeTerrain | Phase::PlaceBlueprint)
    }
}

/// Outcome of one bounded slice of grading or blueprint work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Done,
    /// Budget ran out; call again next tick.
    Yield,
    Waiting(ChunkPos),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    NeedsMore,
    ReadyForHeavy,
    Finished,
}

/// Per-tick allowance: a wall-clock deadline plus a block-write cap.
#[derive(Debug, Clone, Copy)]
pub struct TickBudget {
    deadline: Instant,
    edits_left: u32,
}

impl TickBudget {
    pub fn new(nanos: u64, edits: u32) -> Self {
        Self {
            deadline: Instant::now() + Duration::from_nanos(nanos),
            edits_left: edits,
        }
    }

    pub fn edits_left(&self) -> u32 {
        self.edits_left
    }

    pub fn spend(&mut self, edits: u32) {
        self.edits_left = self.edits_left.saturating_sub(edits);
    }

    pub fn exhausted(&self) -> bool {
        self.edits_left == 0 || Instant::now() >= self.deadline
    }
}

/// Called with the world once the task reaches a terminal outcome.
pub type PlacementCallback = Box<dyn FnOnce(&mut World, &PlacementReport) + Send + Sync>;

/// Everything known about a task when it ends.
#[derive(Debug, Clone)]
pub struct PlacementReport {
    pub task: TaskId,
    pub job_key: Option<JobKey>,
    pub template_id: String,
    pub origin: IVec3,
    pub footprint: FootprintRect,
    /// Chosen base elevation, once the site check accepted.
    pub base_y: Option<i32>,
    /// World positions of connector markers written by the blueprint.
    pub connectors: Vec<IVec3>,
    pub edits: u64,
    pub sections_decoded: u32,
    pub outcome: Result<(), FailureReason>,
}

impl PlacementReport {
    pub fn succeeded(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// A placement submission. Built fluently:
///
/// ```ignore
/// PlacementRequest::new(origin, template)
///     .job_key(JobKey(7))
///     .on_success(|world, report| { /* ... */ });
/// ```
pub struct PlacementRequest {
    pub origin: IVec3,
    pub template: Arc<StructureTemplate>,
    pub include_transparent: bool,
    pub obey_pause: bool,
    pub job_key: Option<JobKey>,
    pub on_success: Option<PlacementCallback>,
    pub on_failure: Option<PlacementCallback>,
}

impl PlacementRequest {
    pub fn new(origin: IVec3, template: Arc<StructureTemplate>) -> Self {
        Self {
            origin,
            template,
            include_transparent: false,
            obey_pause: true,
            job_key: None,
            on_success: None,
            on_failure: None,
        }
    }

    pub fn include_transparent(mut self, include: bool) -> Self {
        self.include_transparent = include;
        self
    }

    pub fn obey_pause(mut self, obey: bool) -> Self {
        self.obey_pause = obey;
        self
    }

    pub fn job_key(mut self, key: JobKey) -> Self {
        self.job_key = Some(key);
        self
    }

    pub fn on_success(
        mut self,
        f: impl FnOnce(&mut World, &PlacementReport) + Send + Sync + 'static,
    ) -> Self {
        self.on_success = Some(Box::new(f));
        self
    }

    pub fn on_failure(
        mut self,
        f: impl FnOnce(&mut World, &PlacementReport) + Send + Sync + 'static,
    ) -> Self {
        self.on_failure = Some(Box::new(f));
        self
    }
}

/// Site rejection counters, logged as they change.
#[derive(Resource, Default, Debug, Clone)]
pub struct SiteRejectStats {
    pub accepted: u64,
    pub rejected: HashMap<SiteRejectReason, u64>,
}

impl SiteRejectStats {
    pub fn record_accept(&mut self) {
        self.accepted += 1;
    }

    pub fn record_reject(&mut self, reason: SiteRejectReason) {
        let n = self.rejected.entry(reason).or_insert(0);
        *n += 1;
        info!(
            "Site rejected ({}): {} so far, {} sites accepted",
            reason, n, self.accepted
        );
    }

    pub fn rejected_total(&self) -> u64 {
        self.rejected.values().sum()
    }
}

#[derive(Event, Debug, Clone)]
pub struct PlacementSucceeded(pub PlacementReport);

#[derive(Event, Debug, Clone)]
pub struct PlacementFailed(pub PlacementReport);
