use std::collections::HashMap;
use std::sync::Arc;

use bevy::math::IVec3;

use super::blueprint::{place_step, BlueprintCursor, BlueprintTarget};
use super::*;
use crate::config::CONNECTOR_DESCRIPTOR;
use crate::error::{FailureReason, PlacementError, SiteRejectReason};
use crate::geometry::ChunkPos;
use crate::host::{Block, TicketToken};
use crate::params::WorldgenParams;
use crate::residency::ChunkResidency;
use crate::template::{encode_section, SectionDims, StructureTemplate, TemplateMeta};
use crate::test_harness::{solid_box_template, MemoryVoxelHost, TemplateBuilder};

/// Drive a task to completion. Returns the task, the stats and the number of
/// ticks it took.
fn run_task(
    host: &mut MemoryVoxelHost,
    template: StructureTemplate,
    origin: IVec3,
    params: &WorldgenParams,
) -> (PlacementTask, SiteRejectStats, u32) {
    let mut residency = ChunkResidency::default();
    let mut stats = SiteRejectStats::default();
    let token = residency.new_token();
    let request = PlacementRequest::new(origin, Arc::new(template));
    let mut task = PlacementTask::new(TaskId(1), token, request, 42);

    for tick in 1..=10_000 {
        let mut ctx = StepContext {
            host: &mut *host,
            residency: &mut residency,
            params,
            stats: &mut stats,
        };
        let mut budget = TickBudget::new(1_000_000_000, params.scheduler.heavy_edits_per_tick);
        let result = task.step(&mut ctx, &mut budget).expect("no unexpected error");
        if result == StepResult::Finished {
            residency.release_all(&mut *host, task.token);
            return (task, stats, tick);
        }
    }
    panic!("task never finished");
}

#[test]
fn test_flat_site_places_box_on_buried_base() {
    let mut host = MemoryVoxelHost::flat(64);
    host.plant_tree(3, 3, 4);
    let params = WorldgenParams::default();
    let (task, stats, _) = run_task(
        &mut host,
        solid_box_template("box", 8, 4, 8),
        IVec3::new(0, 0, 0),
        &params,
    );

    assert!(task.failure.is_none(), "{:?}", task.failure);
    assert_eq!(task.base_y, Some(63));
    assert_eq!(stats.accepted, 1);
    assert_eq!(host.peek(IVec3::new(3, 63, 3)), Block::StoneBricks);
    assert_eq!(host.peek(IVec3::new(3, 66, 3)), Block::StoneBricks);
    assert_eq!(host.peek(IVec3::new(3, 67, 3)), Block::Air);
    // The tree standing on the site is gone.
    assert_eq!(host.peek(IVec3::new(3, 68, 3)), Block::Air);
    assert_eq!(host.peek(IVec3::new(2, 69, 2)), Block::Air);
    assert_eq!(host.ticket_count(), 0);

    let (report, _) = task.into_report();
    assert!(report.succeeded());
    assert_eq!(report.sections_decoded, 1);
}

#[test]
fn test_water_site_is_rejected_without_edits() {
    let mut host = MemoryVoxelHost::flat(60).with_water_level(63);
    let params = WorldgenParams::default();
    let (task, stats, _) = run_task(
        &mut host,
        solid_box_template("box", 8, 4, 8),
        IVec3::new(0, 0, 0),
        &params,
    );

    assert_eq!(
        task.failure,
        Some(FailureReason::SiteRejected(SiteRejectReason::SurfaceWater))
    );
    assert_eq!(host.writes, 0);
    assert_eq!(stats.rejected_total(), 1);
    assert_eq!(stats.rejected.get(&SiteRejectReason::SurfaceWater), Some(&1));
}

#[test]
fn test_cliff_site_is_rejected_for_fill() {
    let mut host =
        MemoryVoxelHost::flat(64).with_terrain(|x, _| if x < 4 { 64 } else { 90 });
    let params = WorldgenParams::default();
    let (task, _, _) = run_task(
        &mut host,
        solid_box_template("box", 8, 4, 8),
        IVec3::new(0, 0, 0),
        &params,
    );

    assert_eq!(
        task.failure,
        Some(FailureReason::SiteRejected(SiteRejectReason::ExcessFill))
    );
    assert_eq!(host.writes, 0);
}

#[test]
fn test_edit_budget_spreads_heavy_work() {
    let mut params = WorldgenParams::default();
    let (_, _, unbounded) = run_task(
        &mut MemoryVoxelHost::flat(64),
        solid_box_template("box", 8, 4, 8),
        IVec3::ZERO,
        &params,
    );

    params.scheduler.heavy_edits_per_tick = 16;
    let mut host = MemoryVoxelHost::flat(64);
    let (task, _, bounded) = run_task(
        &mut host,
        solid_box_template("box", 8, 4, 8),
        IVec3::ZERO,
        &params,
    );

    assert!(task.failure.is_none());
    assert!(bounded > unbounded + 10, "{bounded} vs {unbounded}");
    assert_eq!(host.peek(IVec3::new(7, 66, 7)), Block::StoneBricks);
}

#[test]
fn test_absent_chunk_stalls_task() {
    let mut host = MemoryVoxelHost::flat(64);
    host.block_chunk(ChunkPos::new(0, 0));
    let mut params = WorldgenParams::default();
    params.scheduler.stall_timeout_ticks = 3;
    let (task, _, ticks) = run_task(
        &mut host,
        solid_box_template("box", 8, 4, 8),
        IVec3::ZERO,
        &params,
    );

    match task.failure {
        Some(FailureReason::Stalled { chunk, ticks: waited }) => {
            assert_eq!(chunk, ChunkPos::new(0, 0));
            assert_eq!(waited, 4);
        }
        other => panic!("expected a stall, got {other:?}"),
    }
    assert!(ticks < 20);
    assert_eq!(host.writes, 0);
    assert_eq!(host.ticket_count(), 0);
}

#[test]
fn test_connectors_become_path_and_are_reported() {
    let template = TemplateBuilder::new("gate", 8, [1, 1, 1])
        .fill(IVec3::ZERO, IVec3::new(7, 0, 7), "minecraft:cobblestone")
        .set(IVec3::new(4, 1, 0), CONNECTOR_DESCRIPTOR)
        .build();
    let mut host = MemoryVoxelHost::flat(64);
    let (task, _, _) = run_task(&mut host, template, IVec3::ZERO, &WorldgenParams::default());

    assert!(task.failure.is_none());
    assert_eq!(task.connectors, vec![IVec3::new(4, 64, 0)]);
    assert_eq!(host.peek(IVec3::new(4, 64, 0)), Block::DirtPath);
    assert_eq!(host.peek(IVec3::new(4, 63, 0)), Block::Cobblestone);
}

#[test]
fn test_transparent_cells_only_written_on_request() {
    let template = TemplateBuilder::new("post", 8, [1, 1, 1])
        .set(IVec3::ZERO, "minecraft:oak_planks")
        .build();

    for (include, expected) in [(false, 1), (true, 320)] {
        let mut host = MemoryVoxelHost::flat(64);
        let mut cursor = BlueprintCursor::default();
        let target = BlueprintTarget {
            template: &template,
            origin: IVec3::new(0, 60, 0),
            vertical_shift: 0,
            include_transparent: include,
        };
        let mut budget = TickBudget::new(1_000_000_000, u32::MAX);
        let (mut edits, mut connectors) = (0, Vec::new());
        let progress = place_step(
            &mut cursor,
            &mut host,
            &target,
            &mut budget,
            &mut edits,
            &mut connectors,
        )
        .expect("placed");

        assert_eq!(progress, Progress::Done);
        assert_eq!(edits, expected, "include_transparent={include}");
        assert_eq!(host.peek(IVec3::new(0, 60, 0)), Block::Planks);
        let cleared = host.peek(IVec3::new(1, 63, 1));
        assert_eq!(cleared == Block::Air, include);
    }
}

#[test]
fn test_blueprint_resumes_where_it_yielded() {
    let template = solid_box_template("box", 8, 2, 8);
    let mut host = MemoryVoxelHost::flat(40);
    let mut cursor = BlueprintCursor::default();
    let target = BlueprintTarget {
        template: &template,
        origin: IVec3::new(0, 50, 0),
        vertical_shift: 0,
        include_transparent: false,
    };
    let (mut edits, mut connectors) = (0, Vec::new());

    let mut slices = 0;
    loop {
        slices += 1;
        let mut budget = TickBudget::new(1_000_000_000, 10);
        let progress = place_step(
            &mut cursor,
            &mut host,
            &target,
            &mut budget,
            &mut edits,
            &mut connectors,
        )
        .expect("placed");
        if progress == Progress::Done {
            break;
        }
        assert_eq!(progress, Progress::Yield);
    }

    assert_eq!(edits, 128);
    assert_eq!(host.writes, 128);
    assert_eq!(slices, 13);
    assert_eq!(cursor.sections_decoded, 1);
}

#[test]
fn test_missing_section_is_an_error() {
    let meta = TemplateMeta {
        section_edge: 4,
        sections: [1, 1, 1],
        size: None,
        transparent_index: 0,
        palette: vec!["minecraft:air".into(), "minecraft:stone".into()],
        origin_elevation: 0,
        kind: None,
    };
    let template = StructureTemplate::from_parts("hollow", meta, HashMap::new(), |_| Block::Air)
        .expect("valid metadata");
    let mut host = MemoryVoxelHost::flat(64);
    let mut cursor = BlueprintCursor::default();
    let target = BlueprintTarget {
        template: &template,
        origin: IVec3::new(0, 64, 0),
        vertical_shift: 0,
        include_transparent: false,
    };
    let mut budget = TickBudget::new(1_000_000_000, u32::MAX);
    let err = place_step(
        &mut cursor,
        &mut host,
        &target,
        &mut budget,
        &mut 0,
        &mut Vec::new(),
    )
    .unwrap_err();

    assert!(matches!(
        err,
        PlacementError::MissingSection { section: [0, 0, 0], .. }
    ));
    assert_eq!(host.writes, 0);
}

#[test]
fn test_out_of_range_palette_index_is_an_error() {
    let meta = TemplateMeta {
        section_edge: 2,
        sections: [1, 1, 1],
        size: None,
        transparent_index: 0,
        palette: vec!["minecraft:air".into(), "minecraft:stone".into()],
        origin_elevation: 0,
        kind: None,
    };
    let blob = encode_section(SectionDims::cube(2), &[1, 1, 7, 1, 1, 1, 1, 1], 2);
    let sections = HashMap::from([([0, 0, 0], blob)]);
    let template = StructureTemplate::from_parts("corrupt", meta, sections, |_| Block::Air)
        .expect("valid metadata");
    let mut host = MemoryVoxelHost::flat(64);
    let mut cursor = BlueprintCursor::default();
    let target = BlueprintTarget {
        template: &template,
        origin: IVec3::new(0, 70, 0),
        vertical_shift: 0,
        include_transparent: false,
    };
    let mut budget = TickBudget::new(1_000_000_000, u32::MAX);
    let err = place_step(
        &mut cursor,
        &mut host,
        &target,
        &mut budget,
        &mut 0,
        &mut Vec::new(),
    )
    .unwrap_err();

    assert!(matches!(
        err,
        PlacementError::BadPaletteIndex { section: [0, 0, 0], index: 7, .. }
    ));
    // The two cells before the bad one were written.
    assert_eq!(host.writes, 2);
    assert_eq!(cursor.cell, 2);
}

#[test]
fn test_stall_tracker_restarts_on_new_chunk() {
    let mut stall = StallTracker::default();
    let (a, b) = (ChunkPos::new(0, 0), ChunkPos::new(1, 0));
    assert!(stall.wait(a, 2).is_none());
    assert!(stall.wait(a, 2).is_none());
    assert!(stall.wait(b, 2).is_none());
    assert_eq!(stall.ticks, 1);
    assert!(stall.wait(b, 2).is_none());
    assert_eq!(
        stall.wait(b, 2),
        Some(FailureReason::Stalled { chunk: b, ticks: 3 })
    );
    stall.clear();
    assert_eq!(stall, StallTracker::default());
}

#[test]
fn test_report_carries_callback_for_outcome() {
    let template = Arc::new(solid_box_template("box", 8, 4, 8));
    let request = PlacementRequest::new(IVec3::ZERO, template)
        .on_success(|_, _| {})
        .job_key(JobKey(7));
    let mut task = PlacementTask::new(TaskId(3), TicketToken(1), request, 0);
    task.fail(FailureReason::Exception("boom".into()));

    let (report, callback) = task.into_report();
    assert!(!report.succeeded());
    assert_eq!(report.job_key, Some(JobKey(7)));
    assert!(callback.is_none(), "failure has no callback registered");
}
