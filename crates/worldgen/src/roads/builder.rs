//! Incremental construction of one planned road edge.
//!
//! A [`RoadJob`] acquires residency for the corridor between its two
//! anchors, plans the path with its waypoint re-searches spread over ticks,
//! then turns each path cell into a short list of block writes that drain
//! under the per-tick edit budget.

use std::collections::{BTreeSet, VecDeque};

use bevy::math::{IVec2, IVec3};
use bevy::prelude::*;

use crate::error::FailureReason;
use crate::footprints::FootprintRect;
use crate::geometry::{xz, ChunkPos, Direction};
use crate::host::{write_if_changed, Block, HostError, TicketToken, VoxelHost};
use crate::params::{RoadBuilderParams, WorldgenParams};
use crate::placement::{StallTracker, TickBudget};
use crate::residency::ChunkResidency;

use super::pathfinder::{find_path_with, trailing_run, ColumnProbe, PathRequest, RoadPath};
use super::simplify::simplify;
use super::state::EdgeKey;

/// Borrowed engine state a road step works against.
pub struct RoadContext<'a> {
    pub host: &'a mut dyn VoxelHost,
    pub residency: &'a mut ChunkResidency,
    pub params: &'a WorldgenParams,
    /// Footprints shrunk by the pathfinder margin; the search avoids them.
    pub blocked: &'a [FootprintRect],
    /// Full footprints; side cells of the road never write inside them.
    pub protected: &'a [FootprintRect],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoadPhase {
    AcquireCorridor,
    Plan,
    Build,
    Done,
}

// ---------------------------------------------------------------------------
// Path planning
// ---------------------------------------------------------------------------

/// Full search, line-of-sight simplification, then a re-search between
/// consecutive waypoints. The turn state carries across waypoints so the
/// straight-run rule holds over the whole road.
pub fn plan_road(
    host: &dyn VoxelHost,
    from: IVec3,
    to: IVec3,
    blocked: &[FootprintRect],
    params: &WorldgenParams,
) -> RoadPath {
    let mut planner = RoutePlanner::start(host, from, to, blocked, params);
    planner.advance(host, blocked, params, None);
    planner.finish()
}

/// [`plan_road`] split so the waypoint re-searches can spread over ticks.
pub struct RoutePlanner {
    full: RoadPath,
    waypoints: Vec<usize>,
    segment: usize,
    cells: Vec<IVec3>,
    expanded: u32,
}

impl RoutePlanner {
    /// Runs the full search and the simplification.
    pub fn start(
        host: &dyn VoxelHost,
        from: IVec3,
        to: IVec3,
        blocked: &[FootprintRect],
        params: &WorldgenParams,
    ) -> Self {
        let probe = ColumnProbe::new(host);
        let start_y = probe.column(from.x, from.z).map_or(from.y, |c| c.ground);
        let start = IVec3::new(from.x, start_y, from.z);
        let full = find_path_with(
            &probe,
            &PathRequest {
                start,
                goal: to,
                blocked,
                entry: None,
            },
            &params.pathfinder,
        );
        let waypoints = if full.fallback || full.cells.len() < 3 {
            Vec::new()
        } else {
            simplify(&probe, &full.cells, blocked)
        };
        let cells = full.cells.first().copied().into_iter().collect();
        let expanded = full.expanded;
        Self {
            full,
            waypoints,
            segment: 0,
            cells,
            expanded,
        }
    }

    pub fn is_done(&self) -> bool {
        self.segment + 1 >= self.waypoints.len()
    }

    /// Re-searches waypoint segments until done or `budget` runs out. At
    /// least one segment is searched per call.
    pub fn advance(
        &mut self,
        host: &dyn VoxelHost,
        blocked: &[FootprintRect],
        params: &WorldgenParams,
        budget: Option<&TickBudget>,
    ) {
        let probe = ColumnProbe::new(host);
        while !self.is_done() {
            let (a, b) = (self.waypoints[self.segment], self.waypoints[self.segment + 1]);
            let start = self.cells.last().copied().unwrap_or(self.full.cells[a]);
            let segment = find_path_with(
                &probe,
                &PathRequest {
                    start,
                    goal: self.full.cells[b],
                    blocked,
                    entry: trailing_run(&self.cells),
                },
                &params.pathfinder,
            );
            self.expanded += segment.expanded;
            if segment.fallback {
                self.cells.extend_from_slice(&self.full.cells[a + 1..=b]);
            } else {
                self.cells.extend_from_slice(&segment.cells[1..]);
            }
            self.segment += 1;
            if budget.is_some_and(|b| b.exhausted()) {
                return;
            }
        }
    }

    pub fn finish(self) -> RoadPath {
        if self.waypoints.is_empty() {
            return self.full;
        }
        RoadPath {
            cells: self.cells,
            fallback: false,
            expanded: self.expanded,
        }
    }
}

// ---------------------------------------------------------------------------
// Per-cell construction
// ---------------------------------------------------------------------------

/// Travel direction at path index `i`.
pub fn forward_at(path: &[IVec3], i: usize) -> Direction {
    let step = if i + 1 < path.len() {
        xz(path[i + 1]) - xz(path[i])
    } else if i > 0 {
        xz(path[i]) - xz(path[i - 1])
    } else {
        IVec2::ZERO
    };
    Direction::from_step(step).unwrap_or(Direction::North)
}

/// Water at the deck, or an air gap at least `bridge_gap_depth` deep under
/// the whole 3-wide cross-section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Underside {
    pub water: bool,
    pub gap: bool,
}

pub fn underside(
    host: &dyn VoxelHost,
    path: &[IVec3],
    i: usize,
    params: &RoadBuilderParams,
) -> Result<Underside, HostError> {
    let p = path[i];
    let right = forward_at(path, i).right().offset();
    let mut water = false;
    let mut gap = true;
    for s in -1..=1 {
        let c = xz(p) + right * s;
        let deck = host.block(IVec3::new(c.x, p.y, c.y))?;
        let below = host.block(IVec3::new(c.x, p.y - 1, c.y))?;
        water |= deck.is_liquid() || below.is_liquid();
        for d in 1..=params.bridge_gap_depth.max(1) {
            let b = host.block(IVec3::new(c.x, p.y - d, c.y))?;
            if !b.is_air() {
                gap = false;
                break;
            }
        }
    }
    Ok(Underside { water, gap })
}

/// Writes for one path cell.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CellPlan {
    pub writes: Vec<(IVec3, Block)>,
    pub stairs: bool,
    pub lamp: bool,
}

pub struct CellInput<'a> {
    pub path: &'a [IVec3],
    pub index: usize,
    pub bridge: bool,
    pub protected: &'a [FootprintRect],
    pub params: &'a RoadBuilderParams,
}

pub fn plan_cell(host: &dyn VoxelHost, input: &CellInput<'_>) -> Result<CellPlan, HostError> {
    let path = input.path;
    let i = input.index;
    let params = input.params;
    let p = path[i];
    let dir = forward_at(path, i);
    let right = dir.right().offset();
    let protected = |c: IVec2| input.protected.iter().any(|r| r.contains(c.x, c.y));
    let mut plan = CellPlan::default();

    // Stairs sit on the lower of two cells one block apart.
    let stair_dir = if i + 1 < path.len() && path[i + 1].y == p.y + 1 {
        Some(dir)
    } else if i > 0 && path[i - 1].y == p.y + 1 {
        Direction::from_step(xz(path[i - 1]) - xz(p))
    } else {
        None
    };

    let deck_block = if input.bridge {
        Block::Planks
    } else {
        Block::DirtPath
    };

    let skip_y = stair_dir.map(|_| p.y + 1);
    for s in -1..=1 {
        let c = xz(p) + right * s;
        if s != 0 && protected(c) {
            continue;
        }
        clear_corridor(host, &mut plan, c, p.y, params.corridor_height, skip_y)?;
        plan.writes.push((IVec3::new(c.x, p.y, c.y), deck_block));
        if input.bridge {
            if s == 0 && i % params.bridge_pillar_spacing.max(1) == 0 {
                support(host, &mut plan, c, p.y, params.max_support_depth, 0, true)?;
            }
        } else {
            support(
                host,
                &mut plan,
                c,
                p.y,
                params.max_support_depth,
                params.dirt_fill_depth,
                false,
            )?;
        }
        if let Some(facing) = stair_dir {
            plan.writes.push((IVec3::new(c.x, p.y + 1, c.y), Block::Stairs(facing)));
            plan.stairs = true;
        }
    }

    let prev_dir = (i > 0).then(|| forward_at(path, i - 1));
    let straight = prev_dir.map_or(true, |d| d == dir);

    if input.bridge && straight {
        for s in [-2, 2] {
            let c = xz(p) + right * s;
            if protected(c) {
                continue;
            }
            plan.writes.push((IVec3::new(c.x, p.y, c.y), Block::Planks));
            plan.writes.push((IVec3::new(c.x, p.y + 1, c.y), Block::Fence));
        }
    }

    // Landing pad where a turn meets a slope change.
    let turning = prev_dir.is_some_and(|d| d != dir) && i + 1 < path.len();
    let slope_change = (i > 0 && path[i - 1].y != p.y) || (i + 1 < path.len() && path[i + 1].y != p.y);
    if turning && slope_change && !input.bridge {
        for dz in -2..=2 {
            for dx in -2..=2 {
                let c = xz(p) + IVec2::new(dx, dz);
                // The cross-section is already laid, stairs included.
                let on_deck = (-1..=1).any(|s| right * s == c - xz(p));
                if on_deck || protected(c) {
                    continue;
                }
                clear_corridor(host, &mut plan, c, p.y, params.corridor_height, None)?;
                plan.writes.push((IVec3::new(c.x, p.y, c.y), Block::DirtPath));
                support(host, &mut plan, c, p.y, params.max_support_depth, params.dirt_fill_depth, false)?;
            }
        }
    }

    let interval = params.lamp_interval.max(1);
    if i > 0 && i % interval == 0 && !plan.stairs && !input.bridge {
        let side = if (i / interval) % 2 == 0 { 2 } else { -2 };
        let c = xz(p) + right * side;
        if !protected(c) {
            let base = IVec3::new(c.x, p.y, c.y);
            if !host.block(base)?.is_solid() {
                plan.writes.push((base, Block::Cobblestone));
            }
            plan.writes.push((base + IVec3::Y, Block::Fence));
            plan.writes.push((base + IVec3::Y * 2, Block::Fence));
            plan.writes.push((base + IVec3::Y * 3, Block::Lantern));
            plan.lamp = true;
        }
    }

    Ok(plan)
}

fn clear_corridor(
    host: &dyn VoxelHost,
    plan: &mut CellPlan,
    c: IVec2,
    deck_y: i32,
    height: i32,
    skip_y: Option<i32>,
) -> Result<(), HostError> {
    for y in deck_y + 1..=deck_y + height {
        if Some(y) == skip_y {
            continue;
        }
        let pos = IVec3::new(c.x, y, c.y);
        if !host.block(pos)?.is_air() {
            plan.writes.push((pos, Block::Air));
        }
    }
    Ok(())
}

/// Fill the gap under the deck. Off-bridge the first `dirt_depth` blocks are
/// dirt and deeper ones cobblestone; bridge pillars run through water too.
fn support(
    host: &dyn VoxelHost,
    plan: &mut CellPlan,
    c: IVec2,
    deck_y: i32,
    max_depth: i32,
    dirt_depth: i32,
    pillar: bool,
) -> Result<(), HostError> {
    for d in 1..=max_depth {
        let pos = IVec3::new(c.x, deck_y - d, c.y);
        let b = host.block(pos)?;
        let open = b.is_air() || b.is_foliage() || (pillar && b.is_liquid());
        if !open {
            break;
        }
        let fill = if pillar {
            Block::StoneBricks
        } else if d <= dirt_depth {
            Block::Dirt
        } else {
            Block::Cobblestone
        };
        plan.writes.push((pos, fill));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoadStep {
    Working,
    Finished,
}

pub struct RoadJob {
    pub edge: EdgeKey,
    pub region_key: u64,
    pub from: IVec3,
    pub to: IVec3,
    pub token: TicketToken,
    pub phase: RoadPhase,
    pub path: Vec<IVec3>,
    pub fallback: bool,
    pub cursor: usize,
    pub edits: u64,
    pub lamps: u32,
    pub stall: StallTracker,
    pub failure: Option<FailureReason>,
    planner: Option<RoutePlanner>,
    corridor: Vec<ChunkPos>,
    corridor_requested: usize,
    window: BTreeSet<ChunkPos>,
    pending: VecDeque<(IVec3, Block)>,
    bridge_prev: bool,
}

impl RoadJob {
    pub fn new(edge: EdgeKey, region_key: u64, from: IVec3, to: IVec3, token: TicketToken) -> Self {
        Self {
            edge,
            region_key,
            from,
            to,
            token,
            phase: RoadPhase::AcquireCorridor,
            path: Vec::new(),
            fallback: false,
            cursor: 0,
            edits: 0,
            lamps: 0,
            stall: StallTracker::default(),
            failure: None,
            planner: None,
            corridor: Vec::new(),
            corridor_requested: 0,
            window: BTreeSet::new(),
            pending: VecDeque::new(),
            bridge_prev: false,
        }
    }

    pub fn is_done(&self) -> bool {
        self.phase == RoadPhase::Done
    }

    pub fn fail(&mut self, reason: FailureReason) {
        self.failure = Some(reason);
        self.phase = RoadPhase::Done;
    }

    pub fn step(
        &mut self,
        ctx: &mut RoadContext<'_>,
        budget: &mut TickBudget,
    ) -> Result<RoadStep, HostError> {
        loop {
            match self.phase {
                RoadPhase::AcquireCorridor => {
                    if !self.acquire_corridor(ctx) {
                        return Ok(self.after_wait());
                    }
                    self.phase = RoadPhase::Plan;
                }
                RoadPhase::Plan => {
                    match self.planner.as_mut() {
                        Some(planner) => {
                            planner.advance(&*ctx.host, ctx.blocked, ctx.params, Some(&*budget))
                        }
                        None => {
                            self.planner = Some(RoutePlanner::start(
                                &*ctx.host,
                                self.from,
                                self.to,
                                ctx.blocked,
                                ctx.params,
                            ))
                        }
                    }
                    if !self.planner.as_ref().is_some_and(RoutePlanner::is_done) {
                        return Ok(RoadStep::Working);
                    }
                    let Some(route) = self.planner.take().map(RoutePlanner::finish) else {
                        return Ok(RoadStep::Working);
                    };
                    let reaches = route.cells.last().is_some_and(|c| xz(*c) == xz(self.to));
                    if !reaches {
                        warn!("Road {:?}: no route avoids the blocked footprints", self.edge);
                        self.fail(FailureReason::Exception("no road route".to_string()));
                        return Ok(RoadStep::Finished);
                    }
                    info!(
                        "Road {:?}: {} cells planned ({} nodes expanded{})",
                        self.edge,
                        route.cells.len(),
                        route.expanded,
                        if route.fallback { ", straight-line fallback" } else { "" }
                    );
                    self.path = route.cells;
                    self.fallback = route.fallback;
                    self.phase = RoadPhase::Build;
                    return Ok(RoadStep::Working);
                }
                RoadPhase::Build => return self.build(ctx, budget),
                RoadPhase::Done => return Ok(RoadStep::Finished),
            }
        }
    }

    fn after_wait(&self) -> RoadStep {
        if self.failure.is_some() {
            RoadStep::Finished
        } else {
            RoadStep::Working
        }
    }

    /// Reserve the corridor a few chunks per tick. Hitting the global
    /// reservation cap ends acquisition early; the search then treats the
    /// rest as unloaded.
    fn acquire_corridor(&mut self, ctx: &mut RoadContext<'_>) -> bool {
        let sched = &ctx.params.scheduler;
        if self.corridor.is_empty() {
            let area = FootprintRect::new(self.from.x, self.from.z, self.to.x, self.to.z)
                .expand(ctx.params.pathfinder.search_padding.max(0));
            self.corridor = ChunkPos::covering(area.min_x, area.min_z, area.max_x, area.max_z);
        }

        let mut issued = 0;
        while self.corridor_requested < self.corridor.len() && issued < sched.chunk_requests_per_tick {
            let chunk = self.corridor[self.corridor_requested];
            if !ctx
                .residency
                .acquire(ctx.host, self.token, chunk, sched.max_reservations)
            {
                debug!(
                    "Road {:?}: reservation cap reached after {} corridor chunks",
                    self.edge, self.corridor_requested
                );
                self.corridor.truncate(self.corridor_requested);
                break;
            }
            if !ctx.host.is_chunk_loaded(chunk) {
                ctx.host.request_chunk(chunk);
            }
            self.corridor_requested += 1;
            issued += 1;
        }

        let missing = self.corridor[..self.corridor_requested]
            .iter()
            .copied()
            .find(|c| !ctx.host.is_chunk_loaded(*c));
        match missing {
            Some(chunk) => {
                self.wait_on(chunk, ctx.params.scheduler.stall_timeout_ticks);
                false
            }
            None => {
                self.stall.clear();
                self.corridor_requested >= self.corridor.len()
            }
        }
    }

    fn wait_on(&mut self, chunk: ChunkPos, timeout: u32) {
        if let Some(reason) = self.stall.wait(chunk, timeout) {
            warn!(
                "Road {:?} stalled on chunk ({}, {})",
                self.edge, chunk.x, chunk.z
            );
            self.fail(reason);
        }
    }

    /// Keep the chunks under the next `window_cells` path cells resident.
    /// Returns the first one that is not loaded yet.
    fn ensure_window(&mut self, ctx: &mut RoadContext<'_>) -> Option<ChunkPos> {
        let end = (self.cursor + ctx.params.roads.window_cells.max(1)).min(self.path.len());
        let mut missing = None;
        for p in &self.path[self.cursor..end] {
            for chunk in ChunkPos::covering(p.x - 2, p.z - 2, p.x + 2, p.z + 2) {
                if self.window.insert(chunk) {
                    ctx.residency.acquire(
                        ctx.host,
                        self.token,
                        chunk,
                        ctx.params.scheduler.max_reservations,
                    );
                    if !ctx.host.is_chunk_loaded(chunk) {
                        ctx.host.request_chunk(chunk);
                    }
                }
            }
        }
        let p = self.path[self.cursor];
        for chunk in ChunkPos::covering(p.x - 2, p.z - 2, p.x + 2, p.z + 2) {
            if !ctx.host.is_chunk_loaded(chunk) {
                missing = Some(chunk);
                break;
            }
        }
        missing
    }

    fn is_bridge(&self, host: &dyn VoxelHost, params: &RoadBuilderParams) -> Result<bool, HostError> {
        let here = underside(host, &self.path, self.cursor, params)?;
        if here.water {
            return Ok(true);
        }
        if !here.gap {
            return Ok(false);
        }
        if self.bridge_prev {
            return Ok(true);
        }
        let end = (self.cursor + params.bridge_min_run.max(1)).min(self.path.len());
        for i in self.cursor + 1..end {
            if !underside(host, &self.path, i, params)?.gap {
                return Ok(false);
            }
        }
        Ok(end - self.cursor >= params.bridge_min_run.max(1))
    }

    fn build(
        &mut self,
        ctx: &mut RoadContext<'_>,
        budget: &mut TickBudget,
    ) -> Result<RoadStep, HostError> {
        while !budget.exhausted() {
            if let Some(&(pos, block)) = self.pending.front() {
                match write_if_changed(ctx.host, pos, block) {
                    Ok(changed) => {
                        if changed {
                            self.edits += 1;
                            budget.spend(1);
                        }
                        self.pending.pop_front();
                    }
                    Err(HostError::ChunkNotLoaded(chunk)) => {
                        ctx.host.request_chunk(chunk);
                        self.wait_on(chunk, ctx.params.scheduler.stall_timeout_ticks);
                        return Ok(self.after_wait());
                    }
                    Err(HostError::OutOfWorld(_)) => {
                        self.pending.pop_front();
                    }
                    Err(e @ HostError::Rejected { .. }) => {
                        debug!("Road {:?}: skipped write ({})", self.edge, e);
                        self.pending.pop_front();
                    }
                }
                continue;
            }

            if self.cursor >= self.path.len() {
                self.phase = RoadPhase::Done;
                return Ok(RoadStep::Finished);
            }

            if let Some(chunk) = self.ensure_window(ctx) {
                self.wait_on(chunk, ctx.params.scheduler.stall_timeout_ticks);
                return Ok(self.after_wait());
            }

            let params = &ctx.params.roads;
            let cell = self
                .is_bridge(&*ctx.host, params)
                .and_then(|bridge| {
                    plan_cell(
                        &*ctx.host,
                        &CellInput {
                            path: &self.path,
                            index: self.cursor,
                            bridge,
                            protected: ctx.protected,
                            params,
                        },
                    )
                    .map(|plan| (bridge, plan))
                });
            match cell {
                Ok((bridge, plan)) => {
                    self.bridge_prev = bridge;
                    if plan.lamp {
                        self.lamps += 1;
                    }
                    self.pending.extend(plan.writes);
                    self.cursor += 1;
                    self.stall.clear();
                }
                Err(HostError::ChunkNotLoaded(chunk)) => {
                    ctx.host.request_chunk(chunk);
                    self.wait_on(chunk, ctx.params.scheduler.stall_timeout_ticks);
                    return Ok(self.after_wait());
                }
                Err(e) => return Err(e),
            }
        }
        Ok(RoadStep::Working)
    }
}
