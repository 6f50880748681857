//! Line-of-sight waypoint reduction of a searched path.

use bevy::math::{IVec2, IVec3};

use crate::footprints::FootprintRect;
use crate::geometry::xz;

use super::pathfinder::ColumnProbe;

/// 4-connected cells from `a` to `b`, both included. Steps along the
/// dominant axis first whenever the error term allows.
pub fn line_cells(a: IVec2, b: IVec2) -> Vec<IVec2> {
    let d = b - a;
    let (nx, nz) = (d.x.abs(), d.y.abs());
    let (sx, sz) = (d.x.signum(), d.y.signum());
    let mut cells = Vec::with_capacity((nx + nz + 1) as usize);
    let mut p = a;
    cells.push(p);
    let (mut ix, mut iz) = (0, 0);
    while ix < nx || iz < nz {
        // Compare (ix + 0.5) / nx against (iz + 0.5) / nz without floats.
        if iz >= nz || (ix < nx && (1 + 2 * ix) * nz < (1 + 2 * iz) * nx) {
            p.x += sx;
            ix += 1;
        } else {
            p.y += sz;
            iz += 1;
        }
        cells.push(p);
    }
    cells
}

/// Whether the straight line between two deck positions is clear: no
/// blocked cell except the end, every column loaded and no ground step
/// taller than one block.
pub fn line_clear(probe: &ColumnProbe<'_>, a: IVec3, b: IVec3, blocked: &[FootprintRect]) -> bool {
    let end = xz(b);
    let mut prev = a.y;
    for c in line_cells(xz(a), end).into_iter().skip(1) {
        if c != end && blocked.iter().any(|r| r.contains(c.x, c.y)) {
            return false;
        }
        let Some(col) = probe.column(c.x, c.y) else {
            return false;
        };
        if (col.ground - prev).abs() > 1 {
            return false;
        }
        prev = col.ground;
    }
    true
}

/// Indices of the waypoints kept from `path`: the first cell, then each
/// furthest cell still in line of sight of the previous waypoint.
pub fn simplify(probe: &ColumnProbe<'_>, path: &[IVec3], blocked: &[FootprintRect]) -> Vec<usize> {
    if path.is_empty() {
        return Vec::new();
    }
    let mut waypoints = vec![0];
    let mut i = 0;
    while i + 1 < path.len() {
        let mut k = i + 1;
        while k + 1 < path.len() && line_clear(probe, path[i], path[k + 1], blocked) {
            k += 1;
        }
        waypoints.push(k);
        i = k;
    }
    waypoints
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_harness::MemoryVoxelHost;

    #[test]
    fn test_line_cells_are_four_connected() {
        for b in [IVec2::new(7, 3), IVec2::new(-4, 9), IVec2::new(0, -5), IVec2::new(6, 0)] {
            let cells = line_cells(IVec2::ZERO, b);
            assert_eq!(cells.first(), Some(&IVec2::ZERO));
            assert_eq!(cells.last(), Some(&b));
            assert_eq!(cells.len() as i32, b.x.abs() + b.y.abs() + 1);
            for w in cells.windows(2) {
                assert_eq!((w[1] - w[0]).abs().element_sum(), 1);
            }
        }
    }

    #[test]
    fn test_simplify_straight_path_to_endpoints() {
        let host = MemoryVoxelHost::flat(64);
        let probe = ColumnProbe::new(&host);
        let path: Vec<IVec3> = (0..20).map(|x| IVec3::new(x, 64, 5)).collect();
        assert_eq!(simplify(&probe, &path, &[]), vec![0, 19]);
    }

    #[test]
    fn test_simplify_keeps_corner_around_obstacle() {
        let host = MemoryVoxelHost::flat(64);
        let probe = ColumnProbe::new(&host);
        // L-shaped path around a rectangle covering the diagonal.
        let mut path: Vec<IVec3> = (0..=10).map(|x| IVec3::new(x, 64, 0)).collect();
        path.extend((1..=10).map(|z| IVec3::new(10, 64, z)));
        let blocked = [FootprintRect::new(2, 2, 8, 8)];
        let waypoints = simplify(&probe, &path, &blocked);
        assert_eq!(waypoints.first(), Some(&0));
        assert_eq!(waypoints.last(), Some(&(path.len() - 1)));
        assert!(waypoints.len() >= 3, "the corner must survive: {waypoints:?}");
    }

    #[test]
    fn test_cliff_breaks_line_of_sight() {
        let host = MemoryVoxelHost::flat(64).with_terrain(|x, _| if x >= 10 { 70 } else { 64 });
        let probe = ColumnProbe::new(&host);
        assert!(!line_clear(&probe, IVec3::new(0, 64, 0), IVec3::new(15, 70, 0), &[]));
        assert!(line_clear(&probe, IVec3::new(0, 64, 0), IVec3::new(9, 64, 0), &[]));
    }
}
