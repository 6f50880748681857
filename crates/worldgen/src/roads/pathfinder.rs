//! Turn-constrained, graded A* between two road anchors.
//!
//! A node is a column plus the state the cost model needs: the deck height
//! reached, the last travel direction, the steps taken since the last turn
//! and the sign of the last vertical step. Costs are integers in
//! [`COST_SCALE`] units so the scaled Manhattan heuristic stays admissible.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use bevy::math::{IVec2, IVec3};
use pathfinding::prelude::astar;

use crate::config::COST_SCALE;
use crate::footprints::FootprintRect;
use crate::geometry::{xz, Direction};
use crate::host::VoxelHost;
use crate::params::PathfinderParams;

/// Deepest run of road material walked through when measuring the ground.
const MAX_ROAD_DEPTH: i32 = 8;

/// Ground under a column, ignoring road material already placed there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub ground: i32,
    pub water: bool,
}

/// Cached column queries against the host. Unloaded columns read as `None`.
pub struct ColumnProbe<'a> {
    host: &'a dyn VoxelHost,
    cache: RefCell<HashMap<IVec2, Option<Column>>>,
}

impl<'a> ColumnProbe<'a> {
    pub fn new(host: &'a dyn VoxelHost) -> Self {
        Self {
            host,
            cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn host(&self) -> &'a dyn VoxelHost {
        self.host
    }

    pub fn column(&self, x: i32, z: i32) -> Option<Column> {
        let key = IVec2::new(x, z);
        if let Some(c) = self.cache.borrow().get(&key) {
            return *c;
        }
        let c = self.measure(x, z);
        self.cache.borrow_mut().insert(key, c);
        c
    }

    fn measure(&self, x: i32, z: i32) -> Option<Column> {
        let surface = self.host.surface_height(x, z).ok()?;
        let mut y = surface;
        let mut descended = false;
        for _ in 0..MAX_ROAD_DEPTH {
            match self.host.block(IVec3::new(x, y, z)) {
                Ok(b) if b.is_road_material() => {
                    y -= 1;
                    descended = true;
                }
                _ => break,
            }
        }
        // A road deck replaces the ground block, so the deck level is the
        // ground level.
        let ground = if descended { y + 1 } else { y };
        let water = self
            .host
            .block(IVec3::new(x, ground, z))
            .is_ok_and(|b| b.is_liquid());
        Some(Column { ground, water })
    }

    /// Solid, non-road blocks in `lo..=hi` of the column.
    pub fn solid_count(&self, x: i32, z: i32, lo: i32, hi: i32) -> u32 {
        (lo..=hi)
            .filter(|&y| {
                self.host
                    .block(IVec3::new(x, y, z))
                    .is_ok_and(|b| b.is_solid() && !b.is_road_material())
            })
            .count() as u32
    }
}

pub struct PathRequest<'a> {
    pub start: IVec3,
    pub goal: IVec3,
    /// Impassable rectangles, already shrunk by the footprint margin.
    pub blocked: &'a [FootprintRect],
    /// Direction and straight-run length carried in from a previous segment.
    pub entry: Option<(Direction, u8)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoadPath {
    /// Deck positions from start to goal.
    pub cells: Vec<IVec3>,
    /// The search failed and the stepped straight-line route was used.
    pub fallback: bool,
    pub expanded: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Node {
    x: i32,
    z: i32,
    y: i32,
    dir: Option<Direction>,
    straight: u8,
    slope: i8,
}

pub fn find_path(host: &dyn VoxelHost, req: &PathRequest<'_>, params: &PathfinderParams) -> RoadPath {
    let probe = ColumnProbe::new(host);
    find_path_with(&probe, req, params)
}

pub fn find_path_with(
    probe: &ColumnProbe<'_>,
    req: &PathRequest<'_>,
    params: &PathfinderParams,
) -> RoadPath {
    let goal = xz(req.goal);
    let bounds = FootprintRect::new(req.start.x, req.start.z, req.goal.x, req.goal.z)
        .expand(params.search_padding.max(0));
    let min_straight = params.min_straight_steps.max(1);
    let cap = min_straight.saturating_mul(2);

    let (dir, straight) = match req.entry {
        Some((d, s)) => (Some(d), s.min(cap)),
        None => (None, 0),
    };
    let start = Node {
        x: req.start.x,
        z: req.start.z,
        y: req.start.y,
        dir,
        straight,
        slope: 0,
    };

    let expanded = Cell::new(0u32);
    let blocked = |x: i32, z: i32| req.blocked.iter().any(|r| r.contains(x, z));

    let successors = |n: &Node| -> Vec<(Node, u32)> {
        expanded.set(expanded.get() + 1);
        if expanded.get() > params.max_iterations {
            return Vec::new();
        }
        let mut out = Vec::with_capacity(4);
        for d in Direction::ALL {
            let turning = match n.dir {
                None => false,
                Some(prev) if prev == d => false,
                Some(prev) if prev == d.opposite() => continue,
                Some(_) if n.straight < min_straight => continue,
                Some(_) => true,
            };
            let step = d.offset();
            let (nx, nz) = (n.x + step.x, n.z + step.y);
            if !bounds.contains(nx, nz) {
                continue;
            }
            let is_goal = nx == goal.x && nz == goal.y;
            if !is_goal && blocked(nx, nz) {
                continue;
            }
            let Some(col) = probe.column(nx, nz) else {
                continue;
            };

            let ny = col.ground.clamp(n.y - 1, n.y + 1);
            let dy = ny - n.y;
            let slope = dy.signum() as i8;

            let mut cost = COST_SCALE + params.grade_penalty * dy.unsigned_abs();
            if dy > 0 {
                cost += params.uphill_penalty;
            }
            if turning {
                cost += params.turn_penalty;
                if n.straight < cap {
                    cost += params.axis_alternation_penalty;
                }
            }
            if slope != 0 && n.slope != 0 && slope != n.slope {
                cost += params.slope_change_penalty;
            }
            let tunnel = probe.solid_count(nx, nz, ny + 1, ny + params.clearance);
            cost += params.tunnel_penalty * tunnel;
            if col.ground > ny {
                cost += params.tunnel_penalty;
            }
            if col.ground < ny {
                cost += params.deck_penalty * (ny - col.ground) as u32;
            }
            if col.water {
                cost += params.water_penalty;
            }

            let straight = if n.dir == Some(d) {
                n.straight.saturating_add(1).min(cap)
            } else {
                1
            };
            out.push((
                Node {
                    x: nx,
                    z: nz,
                    y: ny,
                    dir: Some(d),
                    straight,
                    slope,
                },
                cost,
            ));
        }
        out
    };

    let heuristic = |n: &Node| {
        ((n.x - goal.x).unsigned_abs() + (n.z - goal.y).unsigned_abs()) * COST_SCALE
    };

    let result = astar(&start, successors, heuristic, |n| {
        n.x == goal.x && n.z == goal.y
    });
    match result {
        Some((nodes, _cost)) => RoadPath {
            cells: nodes.iter().map(|n| IVec3::new(n.x, n.y, n.z)).collect(),
            fallback: false,
            expanded: expanded.get(),
        },
        None => RoadPath {
            cells: fallback_route(probe, req).unwrap_or_default(),
            fallback: true,
            expanded: expanded.get(),
        },
    }
}

/// Axis-by-axis route from start to goal that side-steps single blocked
/// cells. Heights follow the ground, clamped to one block per step.
///
/// Returns `None` when a blocked cell cannot be stepped around or the goal
/// is not reached; the route never enters a blocked cell.
pub fn fallback_route(probe: &ColumnProbe<'_>, req: &PathRequest<'_>) -> Option<Vec<IVec3>> {
    let goal = xz(req.goal);
    let blocked = |c: IVec2| c != goal && req.blocked.iter().any(|r| r.contains(c.x, c.y));

    let mut cur = xz(req.start);
    let mut y = req.start.y;
    let mut cells = vec![req.start];
    let mut guard = (cur - goal).abs().element_sum() * 3 + 16;
    while cur != goal && guard > 0 {
        guard -= 1;
        let toward = if cur.x != goal.x {
            IVec2::new((goal.x - cur.x).signum(), 0)
        } else {
            IVec2::new(0, (goal.y - cur.y).signum())
        };
        let mut next = cur + toward;
        if blocked(next) {
            let side = IVec2::new(toward.y, toward.x);
            next = [cur + side, cur - side].into_iter().find(|c| !blocked(*c))?;
        }
        if let Some(col) = probe.column(next.x, next.y) {
            y = col.ground.clamp(y - 1, y + 1);
        }
        cells.push(IVec3::new(next.x, y, next.y));
        cur = next;
    }
    (cur == goal).then_some(cells)
}

/// Direction of the last step and how many trailing steps share it.
pub fn trailing_run(cells: &[IVec3]) -> Option<(Direction, u8)> {
    let n = cells.len();
    if n < 2 {
        return None;
    }
    let last = Direction::from_step(xz(cells[n - 1]) - xz(cells[n - 2]))?;
    let run = cells
        .windows(2)
        .rev()
        .take_while(|w| Direction::from_step(xz(w[1]) - xz(w[0])) == Some(last))
        .count();
    Some((last, run.min(u8::MAX as usize) as u8))
}

/// Lengths of the straight runs of a path, in order.
pub fn straight_runs(cells: &[IVec3]) -> Vec<usize> {
    let mut runs = Vec::new();
    let mut current: Option<(Direction, usize)> = None;
    for w in cells.windows(2) {
        let Some(d) = Direction::from_step(xz(w[1]) - xz(w[0])) else {
            continue;
        };
        current = match current {
            Some((prev, len)) if prev == d => Some((prev, len + 1)),
            Some((_, len)) => {
                runs.push(len);
                Some((d, 1))
            }
            None => Some((d, 1)),
        };
    }
    if let Some((_, len)) = current {
        runs.push(len);
    }
    runs
}
