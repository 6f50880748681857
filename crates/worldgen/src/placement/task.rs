use std::sync::Arc;

use bevy::math::IVec3;
use bevy::prelude::*;

use crate::error::{FailureReason, PlacementError};
use crate::footprints::FootprintRect;
use crate::geometry::ChunkPos;
use crate::hashing::hash_words;
use crate::host::{TicketToken, VoxelHost};
use crate::params::WorldgenParams;
use crate::residency::ChunkResidency;
use crate::template::StructureTemplate;

use super::blueprint::{place_step, BlueprintCursor, BlueprintTarget};
use super::grading::{grade_step, GradingCursor};
use super::site::{check_site, SiteVerdict};
use super::types::{
    JobKey, Phase, PlacementCallback, PlacementReport, PlacementRequest, Progress, SiteRejectStats,
    StepResult, TaskId, TickBudget,
};

/// Borrowed engine state a task step works against.
pub struct StepContext<'a> {
    pub host: &'a mut dyn VoxelHost,
    pub residency: &'a mut ChunkResidency,
    pub params: &'a WorldgenParams,
    pub stats: &'a mut SiteRejectStats,
}

/// Consecutive ticks spent waiting on one chunk.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StallTracker {
    pub chunk: Option<ChunkPos>,
    pub ticks: u32,
}

impl StallTracker {
    /// Count one more tick of waiting on `chunk`. A different chunk restarts
    /// the count. Returns the failure once `timeout` is exceeded.
    pub fn wait(&mut self, chunk: ChunkPos, timeout: u32) -> Option<FailureReason> {
        if self.chunk != Some(chunk) {
            self.chunk = Some(chunk);
            self.ticks = 0;
        }
        self.ticks += 1;
        (self.ticks > timeout).then_some(FailureReason::Stalled {
            chunk,
            ticks: self.ticks,
        })
    }

    pub fn clear(&mut self) {
        self.chunk = None;
        self.ticks = 0;
    }
}

/// One structure placement, advanced cooperatively across ticks.
pub struct PlacementTask {
    pub id: TaskId,
    pub job_key: Option<JobKey>,
    pub template: Arc<StructureTemplate>,
    pub origin: IVec3,
    pub include_transparent: bool,
    pub obey_pause: bool,
    pub phase: Phase,
    pub footprint: FootprintRect,
    pub token: TicketToken,
    pub base_y: Option<i32>,
    pub stall: StallTracker,
    pub connectors: Vec<IVec3>,
    pub edits: u64,
    pub failure: Option<FailureReason>,
    chunks: Vec<ChunkPos>,
    chunks_requested: usize,
    grading: GradingCursor,
    blueprint: BlueprintCursor,
    on_success: Option<PlacementCallback>,
    on_failure: Option<PlacementCallback>,
}

impl PlacementTask {
    pub fn new(id: TaskId, token: TicketToken, request: PlacementRequest, seed: u64) -> Self {
        let (size_x, size_z) = request.template.footprint_size();
        let footprint = FootprintRect::from_origin(request.origin, size_x, size_z);
        let grade_seed = hash_words(
            seed,
            &[
                request.origin.x as u32 as u64,
                request.origin.z as u32 as u64,
            ],
        );
        Self {
            id,
            job_key: request.job_key,
            template: request.template,
            origin: request.origin,
            include_transparent: request.include_transparent,
            obey_pause: request.obey_pause,
            phase: Phase::AcquireChunks,
            footprint,
            token,
            base_y: None,
            stall: StallTracker::default(),
            connectors: Vec::new(),
            edits: 0,
            failure: None,
            chunks: Vec::new(),
            chunks_requested: 0,
            grading: GradingCursor::new(grade_seed),
            blueprint: BlueprintCursor::default(),
            on_success: request.on_success,
            on_failure: request.on_failure,
        }
    }

    /// Advance the task within `budget`. Terminal failures set
    /// [`Self::failure`] and return `Finished`; `Err` is reserved for
    /// unexpected errors.
    pub fn step(
        &mut self,
        ctx: &mut StepContext<'_>,
        budget: &mut TickBudget,
    ) -> Result<StepResult, PlacementError> {
        loop {
            match self.phase {
                Phase::AcquireChunks => {
                    if !self.acquire_chunks(ctx)? {
                        return Ok(self.result_after_wait());
                    }
                    self.phase = Phase::CheckSite;
                }
                Phase::CheckSite => {
                    let verdict = check_site(&*ctx.host, &self.footprint, &ctx.params.site)?;
                    match verdict {
                        SiteVerdict::Accepted { base_y } => {
                            ctx.stats.record_accept();
                            self.base_y = Some(base_y);
                            self.phase = Phase::GradeTerrain;
                            return Ok(StepResult::ReadyForHeavy);
                        }
                        SiteVerdict::Rejected(reason) => {
                            ctx.stats.record_reject(reason);
                            self.fail(FailureReason::SiteRejected(reason));
                            return Ok(StepResult::Finished);
                        }
                    }
                }
                Phase::GradeTerrain => {
                    let base_y = self.require_base()?;
                    let progress = grade_step(
                        &mut self.grading,
                        ctx.host,
                        &self.footprint,
                        base_y,
                        &ctx.params.grading,
                        budget,
                        &mut self.edits,
                    )?;
                    match self.handle_progress(progress, ctx) {
                        Some(result) => return Ok(result),
                        None => self.phase = Phase::PlaceBlueprint,
                    }
                }
                Phase::PlaceBlueprint => {
                    let base_y = self.require_base()?;
                    let target = BlueprintTarget {
                        template: &self.template,
                        origin: self.origin,
                        vertical_shift: base_y - self.template.origin_elevation,
                        include_transparent: self.include_transparent,
                    };
                    let progress = place_step(
                        &mut self.blueprint,
                        ctx.host,
                        &target,
                        budget,
                        &mut self.edits,
                        &mut self.connectors,
                    )?;
                    match self.handle_progress(progress, ctx) {
                        Some(result) => return Ok(result),
                        None => {
                            self.phase = Phase::Done;
                            return Ok(StepResult::Finished);
                        }
                    }
                }
                Phase::Done => return Ok(StepResult::Finished),
            }
        }
    }

    fn require_base(&self) -> Result<i32, PlacementError> {
        self.base_y
            .ok_or(PlacementError::InvalidOrigin(self.origin))
    }

    /// `None` when the slice of work completed and the phase may advance.
    fn handle_progress(&mut self, progress: Progress, ctx: &StepContext<'_>) -> Option<StepResult> {
        match progress {
            Progress::Done => {
                self.stall.clear();
                None
            }
            Progress::Yield => {
                self.stall.clear();
                Some(StepResult::NeedsMore)
            }
            Progress::Waiting(chunk) => {
                let timeout = ctx.params.scheduler.stall_timeout_ticks;
                if let Some(reason) = self.stall.wait(chunk, timeout) {
                    warn!(
                        "Placement task {:?} stalled on chunk ({}, {})",
                        self.id, chunk.x, chunk.z
                    );
                    self.fail(reason);
                    return Some(StepResult::Finished);
                }
                Some(StepResult::NeedsMore)
            }
        }
    }

    fn result_after_wait(&self) -> StepResult {
        if self.failure.is_some() {
            StepResult::Finished
        } else {
            StepResult::NeedsMore
        }
    }

    /// Request residency for the padded area a few chunks per tick. Returns
    /// `true` once every chunk is resident.
    fn acquire_chunks(&mut self, ctx: &mut StepContext<'_>) -> Result<bool, PlacementError> {
        let sched = &ctx.params.scheduler;
        if self.chunks.is_empty() {
            let area = self
                .footprint
                .expand(ctx.params.grading.padding.max(0) + sched.chunk_padding.max(0));
            self.chunks = ChunkPos::covering(area.min_x, area.min_z, area.max_x, area.max_z);
        }

        let mut issued = 0;
        let mut capped = None;
        while self.chunks_requested < self.chunks.len() && issued < sched.chunk_requests_per_tick {
            let chunk = self.chunks[self.chunks_requested];
            if !ctx
                .residency
                .acquire(ctx.host, self.token, chunk, sched.max_reservations)
            {
                capped = Some(chunk);
                break;
            }
            if !ctx.host.is_chunk_loaded(chunk) {
                ctx.host.request_chunk(chunk);
            }
            self.chunks_requested += 1;
            issued += 1;
        }

        // Waiting on the reservation cap counts toward the stall timeout like
        // waiting on an absent chunk.
        let missing = self.chunks[..self.chunks_requested]
            .iter()
            .copied()
            .find(|c| !ctx.host.is_chunk_loaded(*c))
            .or(capped);
        match missing {
            Some(chunk) => {
                if let Some(reason) = self.stall.wait(chunk, sched.stall_timeout_ticks) {
                    warn!(
                        "Placement task {:?} stalled acquiring chunk ({}, {})",
                        self.id, chunk.x, chunk.z
                    );
                    self.fail(reason);
                }
                Ok(false)
            }
            None if self.chunks_requested < self.chunks.len() => {
                self.stall.clear();
                Ok(false)
            }
            None => {
                self.stall.clear();
                debug!(
                    "Placement task {:?}: {} chunks resident",
                    self.id,
                    self.chunks.len()
                );
                Ok(true)
            }
        }
    }

    pub fn fail(&mut self, reason: FailureReason) {
        self.failure = Some(reason);
        self.phase = Phase::Done;
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// Consume the task into its report and the callback matching its outcome.
    pub fn into_report(self) -> (PlacementReport, Option<PlacementCallback>) {
        let outcome = match &self.failure {
            Some(reason) => Err(reason.clone()),
            None => Ok(()),
        };
        let callback = if outcome.is_ok() {
            self.on_success
        } else {
            self.on_failure
        };
        let report = PlacementReport {
            task: self.id,
            job_key: self.job_key,
            template_id: self.template.id.clone(),
            origin: self.origin,
            footprint: self.footprint,
            base_y: self.base_y,
            connectors: self.connectors,
            edits: self.edits,
            sections_decoded: self.blueprint.sections_decoded,
            outcome,
        };
        (report, callback)
    }
}
