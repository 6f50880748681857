use std::collections::{HashMap, VecDeque};

use bevy::prelude::*;

use crate::error::{FailureReason, SubmitError};
use crate::placement::{
    JobKey, PlacementCallback, PlacementReport, PlacementRequest, PlacementTask, StepContext,
    StepResult, TaskId, TickBudget,
};
use crate::residency::ChunkResidency;

/// A task that reached a terminal outcome this tick.
pub struct FinishedPlacement {
    pub report: PlacementReport,
    pub callback: Option<PlacementCallback>,
}

/// Two-lane cooperative scheduler.
///
/// The preflight lane steps many tasks per tick (residency, site check). The
/// heavy lane steps exactly one task per tick (grading, blueprint), which
/// bounds the peak number of block writes per tick.
#[derive(Resource, Default)]
pub struct PlacementScheduler {
    next_id: u64,
    tasks: HashMap<TaskId, PlacementTask>,
    preflight: VecDeque<TaskId>,
    heavy: VecDeque<TaskId>,
    in_flight: HashMap<JobKey, TaskId>,
}

impl PlacementScheduler {
    /// Queue a task. A second job with an in-flight key is rejected.
    pub fn submit(
        &mut self,
        request: PlacementRequest,
        residency: &mut ChunkResidency,
        seed: u64,
    ) -> Result<TaskId, SubmitError> {
        if let Some(key) = request.job_key {
            if self.in_flight.contains_key(&key) {
                return Err(SubmitError::DuplicateJob(key.0));
            }
        }

        self.next_id += 1;
        let id = TaskId(self.next_id);
        let token = residency.new_token();
        let task = PlacementTask::new(id, token, request, seed);
        debug!(
            "Queued placement {:?} of '{}' at {}",
            id, task.template.id, task.origin
        );
        if let Some(key) = task.job_key {
            self.in_flight.insert(key, id);
        }
        self.tasks.insert(id, task);
        self.preflight.push_back(id);
        Ok(id)
    }

    /// Run one scheduler tick. Returns every task that ended.
    pub fn tick(&mut self, ctx: &mut StepContext<'_>, paused: bool) -> Vec<FinishedPlacement> {
        let sched = ctx.params.scheduler.clone();
        let mut finished = Vec::new();

        // Preflight lane: many tasks, short budget, no edits.
        let mut budget = TickBudget::new(sched.preflight_budget_ns, u32::MAX);
        let mut steps = 0;
        for _ in 0..self.preflight.len() {
            if steps >= sched.max_preflight_steps || budget.exhausted() {
                break;
            }
            let Some(id) = self.preflight.pop_front() else {
                break;
            };
            let Some(task) = self.tasks.get_mut(&id) else {
                continue;
            };
            if paused && task.obey_pause {
                self.preflight.push_back(id);
                continue;
            }
            steps += 1;
            match Self::run_step(task, ctx, &mut budget) {
                StepResult::NeedsMore => self.preflight.push_back(id),
                StepResult::ReadyForHeavy => self.heavy.push_back(id),
                StepResult::Finished => finished.extend(self.finish(id, ctx)),
            }
        }

        // Heavy lane: the first runnable task only.
        let mut budget = TickBudget::new(sched.heavy_budget_ns, sched.heavy_edits_per_tick);
        for _ in 0..self.heavy.len() {
            let Some(&id) = self.heavy.front() else {
                break;
            };
            let Some(task) = self.tasks.get_mut(&id) else {
                self.heavy.pop_front();
                continue;
            };
            if paused && task.obey_pause {
                self.heavy.rotate_left(1);
                continue;
            }
            if Self::run_step(task, ctx, &mut budget) == StepResult::Finished {
                self.heavy.pop_front();
                finished.extend(self.finish(id, ctx));
            }
            break;
        }

        finished
    }

    fn run_step(
        task: &mut PlacementTask,
        ctx: &mut StepContext<'_>,
        budget: &mut TickBudget,
    ) -> StepResult {
        match task.step(ctx, budget) {
            Ok(result) => result,
            Err(e) => {
                error!(
                    "Placement task {:?} ('{}' at {}) failed in {:?}: {}",
                    task.id, task.template.id, task.origin, task.phase, e
                );
                task.fail(FailureReason::Exception(e.to_string()));
                StepResult::Finished
            }
        }
    }

    fn finish(&mut self, id: TaskId, ctx: &mut StepContext<'_>) -> Option<FinishedPlacement> {
        let task = self.tasks.remove(&id)?;
        ctx.residency.release_all(ctx.host, task.token);
        if let Some(key) = task.job_key {
            self.in_flight.remove(&key);
        }
        let (report, callback) = task.into_report();
        match &report.outcome {
            Ok(()) => info!(
                "Placed '{}' at {} (base {:?}, {} edits, {} sections)",
                report.template_id,
                report.origin,
                report.base_y,
                report.edits,
                report.sections_decoded
            ),
            Err(reason) => warn!(
                "Placement of '{}' at {} failed: {}",
                report.template_id, report.origin, reason
            ),
        }
        Some(FinishedPlacement { report, callback })
    }

    /// Shutdown path: drop every task and forget residency bookkeeping
    /// without calling the host's release API.
    pub fn abandon(&mut self, residency: &mut ChunkResidency) {
        if !self.tasks.is_empty() {
            info!("Abandoning {} placement tasks on shutdown", self.tasks.len());
        }
        self.tasks.clear();
        self.preflight.clear();
        self.heavy.clear();
        self.in_flight.clear();
        residency.forget_all();
    }

    pub fn is_in_flight(&self, key: JobKey) -> bool {
        self.in_flight.contains_key(&key)
    }

    pub fn task(&self, id: TaskId) -> Option<&PlacementTask> {
        self.tasks.get(&id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn preflight_len(&self) -> usize {
        self.preflight.len()
    }

    pub fn heavy_len(&self) -> usize {
        self.heavy.len()
    }
}
