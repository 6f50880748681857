//! Persisted "no-road" rectangles and road connection points, keyed by road
//! region.

use std::collections::BTreeMap;

use bevy::math::{IVec2, IVec3};
use bevy::prelude::*;
use bitcode::{Decode, Encode};

use crate::geometry::xz;

// ---------------------------------------------------------------------------
// Rectangles
// ---------------------------------------------------------------------------

/// Inclusive block rectangle on the XZ plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Encode, Decode)]
pub struct FootprintRect {
    pub min_x: i32,
    pub min_z: i32,
    pub max_x: i32,
    pub max_z: i32,
}

impl FootprintRect {
    pub fn new(min_x: i32, min_z: i32, max_x: i32, max_z: i32) -> Self {
        Self {
            min_x: min_x.min(max_x),
            min_z: min_z.min(max_z),
            max_x: min_x.max(max_x),
            max_z: min_z.max(max_z),
        }
    }

    /// Rectangle covering `size_x * size_z` blocks from `origin`.
    pub fn from_origin(origin: IVec3, size_x: i32, size_z: i32) -> Self {
        Self::new(
            origin.x,
            origin.z,
            origin.x + size_x.max(1) - 1,
            origin.z + size_z.max(1) - 1,
        )
    }

    pub fn contains(&self, x: i32, z: i32) -> bool {
        x >= self.min_x && x <= self.max_x && z >= self.min_z && z <= self.max_z
    }

    /// Shrink on every side. `None` once nothing is left.
    pub fn shrink(&self, margin: i32) -> Option<Self> {
        let r = Self {
            min_x: self.min_x + margin,
            min_z: self.min_z + margin,
            max_x: self.max_x - margin,
            max_z: self.max_z - margin,
        };
        (r.min_x <= r.max_x && r.min_z <= r.max_z).then_some(r)
    }

    pub fn expand(&self, margin: i32) -> Self {
        Self {
            min_x: self.min_x - margin,
            min_z: self.min_z - margin,
            max_x: self.max_x + margin,
            max_z: self.max_z + margin,
        }
    }

    pub fn intersects(&self, other: &FootprintRect) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_z <= other.max_z
            && other.min_z <= self.max_z
    }

    /// Chebyshev distance from the rectangle to a column; 0 inside.
    pub fn distance_outside(&self, x: i32, z: i32) -> i32 {
        let dx = (self.min_x - x).max(x - self.max_x).max(0);
        let dz = (self.min_z - z).max(z - self.max_z).max(0);
        dx.max(dz)
    }

    /// Move a point that lies inside (or on) the rectangle to the nearest
    /// column just outside it.
    pub fn push_outside(&self, p: IVec2) -> IVec2 {
        if !self.contains(p.x, p.y) {
            return p;
        }
        let candidates = [
            (p.x - self.min_x, IVec2::new(self.min_x - 1, p.y)),
            (self.max_x - p.x, IVec2::new(self.max_x + 1, p.y)),
            (p.y - self.min_z, IVec2::new(p.x, self.min_z - 1)),
            (self.max_z - p.y, IVec2::new(p.x, self.max_z + 1)),
        ];
        candidates
            .iter()
            .min_by_key(|(d, _)| *d)
            .map(|(_, q)| *q)
            .unwrap_or(p)
    }

    pub fn width(&self) -> i32 {
        self.max_x - self.min_x + 1
    }

    pub fn depth(&self) -> i32 {
        self.max_z - self.min_z + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct ReservedFootprint {
    pub job_key: u64,
    pub rect: FootprintRect,
}

/// Footprint rectangles per road region. A rectangle is added when a
/// persisted job is reserved, removed if the job fails and kept forever once
/// it succeeds.
#[derive(Resource, Default, Debug, Clone, PartialEq, Encode, Decode)]
pub struct FootprintRegistry {
    pub regions: BTreeMap<u64, Vec<ReservedFootprint>>,
}

impl FootprintRegistry {
    pub fn reserve(&mut self, region_key: u64, job_key: u64, rect: FootprintRect) {
        let list = self.regions.entry(region_key).or_default();
        list.retain(|f| f.job_key != job_key);
        list.push(ReservedFootprint { job_key, rect });
    }

    /// Remove the rectangle reserved for `job_key`, wherever it is.
    pub fn release(&mut self, job_key: u64) -> Option<FootprintRect> {
        let mut removed = None;
        for list in self.regions.values_mut() {
            if let Some(pos) = list.iter().position(|f| f.job_key == job_key) {
                removed = Some(list.remove(pos).rect);
                break;
            }
        }
        self.regions.retain(|_, list| !list.is_empty());
        removed
    }

    pub fn get(&self, job_key: u64) -> Option<FootprintRect> {
        self.regions
            .values()
            .flatten()
            .find(|f| f.job_key == job_key)
            .map(|f| f.rect)
    }

    pub fn in_region(&self, region_key: u64) -> &[ReservedFootprint] {
        self.regions.get(&region_key).map_or(&[], Vec::as_slice)
    }

    pub fn all(&self) -> impl Iterator<Item = &ReservedFootprint> {
        self.regions.values().flatten()
    }

    /// Rectangles shrunk by `margin`, ready for road blocking checks.
    pub fn blocking_rects(&self, margin: i32) -> Vec<FootprintRect> {
        self.all().filter_map(|f| f.rect.shrink(margin)).collect()
    }
}

impl crate::Saveable for FootprintRegistry {
    const SAVE_KEY: &'static str = "footprints";

    fn save_to_bytes(&self) -> Option<Vec<u8>> {
        if self.regions.is_empty() {
            return None;
        }
        Some(bitcode::encode(self))
    }

    fn load_from_bytes(bytes: &[u8]) -> Self {
        crate::decode_or_warn(Self::SAVE_KEY, bytes)
    }
}

// ---------------------------------------------------------------------------
// Anchors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct RoadAnchor {
    pub pos: [i32; 3],
    pub job_key: u64,
}

impl RoadAnchor {
    pub fn position(&self) -> IVec3 {
        IVec3::from_array(self.pos)
    }
}

#[derive(Resource, Default, Debug, Clone, PartialEq, Encode, Decode)]
pub struct RoadAnchors {
    pub regions: BTreeMap<u64, Vec<RoadAnchor>>,
}

impl RoadAnchors {
    /// Add an anchor unless one already sits on the same column.
    pub fn add(&mut self, region_key: u64, job_key: u64, pos: IVec3) -> bool {
        let list = self.regions.entry(region_key).or_default();
        if list.iter().any(|a| xz(a.position()) == xz(pos)) {
            return false;
        }
        list.push(RoadAnchor {
            pos: pos.to_array(),
            job_key,
        });
        true
    }

    pub fn in_region(&self, region_key: u64) -> &[RoadAnchor] {
        self.regions.get(&region_key).map_or(&[], Vec::as_slice)
    }

    pub fn count(&self, region_key: u64) -> usize {
        self.in_region(region_key).len()
    }
}

impl crate::Saveable for RoadAnchors {
    const SAVE_KEY: &'static str = "road_anchors";

    fn save_to_bytes(&self) -> Option<Vec<u8>> {
        if self.regions.is_empty() {
            return None;
        }
        Some(bitcode::encode(self))
    }

    fn load_from_bytes(bytes: &[u8]) -> Self {
        crate::decode_or_warn(Self::SAVE_KEY, bytes)
    }
}

/// Anchor positions for a finished placement: each connector pushed just
/// outside the footprint, or one fallback corner when there are none.
pub fn anchors_for_placement(rect: &FootprintRect, connectors: &[IVec3], base_y: i32) -> Vec<IVec3> {
    if connectors.is_empty() {
        return vec![IVec3::new(rect.min_x - 1, base_y, rect.min_z - 1)];
    }
    let mut out: Vec<IVec3> = Vec::with_capacity(connectors.len());
    for c in connectors {
        let p = rect.push_outside(xz(*c));
        let anchor = IVec3::new(p.x, c.y, p.y);
        if !out.iter().any(|a| xz(*a) == p) {
            out.push(anchor);
        }
    }
    out
}

pub struct FootprintsPlugin;

impl Plugin for FootprintsPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<FootprintRegistry>()
            .init_resource::<RoadAnchors>();

        app.init_resource::<crate::SaveableRegistry>();
        let mut registry = app.world_mut().resource_mut::<crate::SaveableRegistry>();
        registry.register::<FootprintRegistry>();
        registry.register::<RoadAnchors>();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Saveable;

    #[test]
    fn test_reserve_and_release_by_job_key() {
        let mut reg = FootprintRegistry::default();
        let rect = FootprintRect::new(100, 100, 120, 120);
        reg.reserve(7, 0xABC, rect);
        assert_eq!(reg.get(0xABC), Some(rect));
        assert_eq!(reg.release(0xABC), Some(rect));
        assert_eq!(reg.get(0xABC), None);
        assert!(reg.regions.is_empty());
        assert_eq!(reg.release(0xABC), None);
    }

    #[test]
    fn test_reserve_same_job_replaces() {
        let mut reg = FootprintRegistry::default();
        reg.reserve(1, 5, FootprintRect::new(0, 0, 3, 3));
        reg.reserve(1, 5, FootprintRect::new(10, 10, 13, 13));
        assert_eq!(reg.in_region(1).len(), 1);
        assert_eq!(reg.get(5), Some(FootprintRect::new(10, 10, 13, 13)));
    }

    #[test]
    fn test_shrink_and_distance() {
        let r = FootprintRect::new(0, 0, 9, 9);
        assert_eq!(r.shrink(1), Some(FootprintRect::new(1, 1, 8, 8)));
        assert_eq!(r.shrink(5), None);
        assert_eq!(r.distance_outside(5, 5), 0);
        assert_eq!(r.distance_outside(12, 4), 3);
        assert_eq!(r.distance_outside(-2, -4), 4);
    }

    #[test]
    fn test_push_outside_picks_nearest_edge() {
        let r = FootprintRect::new(0, 0, 9, 9);
        assert_eq!(r.push_outside(IVec2::new(1, 5)), IVec2::new(-1, 5));
        assert_eq!(r.push_outside(IVec2::new(5, 9)), IVec2::new(5, 10));
        assert_eq!(r.push_outside(IVec2::new(20, 5)), IVec2::new(20, 5));
    }

    #[test]
    fn test_anchors_fallback_corner() {
        let r = FootprintRect::new(10, 20, 19, 29);
        assert_eq!(
            anchors_for_placement(&r, &[], 64),
            vec![IVec3::new(9, 64, 19)]
        );
        let anchors = anchors_for_placement(&r, &[IVec3::new(15, 66, 29), IVec3::new(15, 66, 29)], 64);
        assert_eq!(anchors, vec![IVec3::new(15, 66, 30)]);
    }

    #[test]
    fn test_anchor_dedup_by_column() {
        let mut anchors = RoadAnchors::default();
        assert!(anchors.add(3, 1, IVec3::new(0, 64, 0)));
        assert!(!anchors.add(3, 2, IVec3::new(0, 70, 0)));
        assert_eq!(anchors.count(3), 1);
    }

    #[test]
    fn test_saveable_skips_empty_and_roundtrips() {
        let mut reg = FootprintRegistry::default();
        assert!(reg.save_to_bytes().is_none());
        reg.reserve(2, 9, FootprintRect::new(-5, -5, 5, 5));
        let restored = FootprintRegistry::load_from_bytes(&reg.save_to_bytes().expect("non-empty"));
        assert_eq!(restored, reg);
    }
}
