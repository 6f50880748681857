//! Per-structure placement task: ACQUIRE_CHUNKS -> CHECK_SITE ->
//! GRADE_TERRAIN -> PLACE_BLUEPRINT.
//!
//! A task never blocks. Each call to [`PlacementTask::step`] does as much as
//! its [`TickBudget`] allows and keeps every cursor on the task itself.

pub mod blueprint;
pub mod grading;
pub mod site;
mod task;
mod types;

#[cfg(test)]
mod tests;

pub use site::{check_site, SiteVerdict};
pub use task::{PlacementTask, StallTracker, StepContext};
pub use types::{
    JobKey, Phase, PlacementCallback, PlacementFailed, PlacementReport, PlacementRequest,
    PlacementSucceeded, Progress, SiteRejectStats, StepResult, TaskId, TickBudget,
};
