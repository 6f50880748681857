//! Coordinate helpers shared by placement and roads: chunk positions,
//! region keys and cardinal directions.

use bevy::math::{IVec2, IVec3};
use bitcode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::config::{CHUNK_SIZE, REGION_SIZE, ROAD_REGION_SIZE};

// ---------------------------------------------------------------------------
// Chunks
// ---------------------------------------------------------------------------

/// Column-chunk coordinate (x, z) in chunk units.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Encode, Decode, Serialize, Deserialize,
)]
pub struct ChunkPos {
    pub x: i32,
    pub z: i32,
}

impl ChunkPos {
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Chunk containing the block column (x, z).
    pub fn containing(x: i32, z: i32) -> Self {
        Self {
            x: x.div_euclid(CHUNK_SIZE),
            z: z.div_euclid(CHUNK_SIZE),
        }
    }

    pub fn of_block(pos: IVec3) -> Self {
        Self::containing(pos.x, pos.z)
    }

    /// Every chunk overlapping the inclusive block rectangle, row-major (x fastest).
    pub fn covering(min_x: i32, min_z: i32, max_x: i32, max_z: i32) -> Vec<ChunkPos> {
        let lo = Self::containing(min_x, min_z);
        let hi = Self::containing(max_x, max_z);
        let mut out = Vec::with_capacity(((hi.x - lo.x + 1) * (hi.z - lo.z + 1)).max(0) as usize);
        for cz in lo.z..=hi.z {
            for cx in lo.x..=hi.x {
                out.push(ChunkPos::new(cx, cz));
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Region keys
// ---------------------------------------------------------------------------

/// Pack a signed 2D cell coordinate into a stable 64-bit key.
pub fn pack_key(x: i32, z: i32) -> u64 {
    ((x as u32 as u64) << 32) | (z as u32 as u64)
}

/// Inverse of [`pack_key`].
pub fn unpack_key(key: u64) -> IVec2 {
    IVec2::new((key >> 32) as u32 as i32, key as u32 as i32)
}

/// Decision region containing the block column (x, z).
pub fn region_of(x: i32, z: i32) -> IVec2 {
    IVec2::new(x.div_euclid(REGION_SIZE), z.div_euclid(REGION_SIZE))
}

/// Minimum block corner of a decision region.
pub fn region_min_block(region: IVec2) -> IVec2 {
    region * REGION_SIZE
}

/// Road region containing the block column (x, z).
pub fn road_region_of(x: i32, z: i32) -> IVec2 {
    IVec2::new(
        x.div_euclid(ROAD_REGION_SIZE),
        z.div_euclid(ROAD_REGION_SIZE),
    )
}

/// Packed key of the road region containing the block column (x, z).
pub fn road_region_key(x: i32, z: i32) -> u64 {
    let r = road_region_of(x, z);
    pack_key(r.x, r.y)
}

// ---------------------------------------------------------------------------
// Directions
// ---------------------------------------------------------------------------

/// Horizontal travel/facing direction. North is -Z, east is +X.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Encode, Decode, Serialize, Deserialize,
)]
pub enum Direction {
    North,
    South,
    East,
    West,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::North,
        Direction::East,
        Direction::South,
        Direction::West,
    ];

    pub fn offset(self) -> IVec2 {
        match self {
            Direction::North => IVec2::new(0, -1),
            Direction::South => IVec2::new(0, 1),
            Direction::East => IVec2::new(1, 0),
            Direction::West => IVec2::new(-1, 0),
        }
    }

    pub fn opposite(self) -> Direction {
        match self {
            Direction::North => Direction::South,
            Direction::South => Direction::North,
            Direction::East => Direction::West,
            Direction::West => Direction::East,
        }
    }

    /// Direction 90 degrees clockwise when viewed from above.
    pub fn right(self) -> Direction {
        match self {
            Direction::North => Direction::East,
            Direction::East => Direction::South,
            Direction::South => Direction::West,
            Direction::West => Direction::North,
        }
    }

    pub fn is_x_axis(self) -> bool {
        matches!(self, Direction::East | Direction::West)
    }

    /// Cardinal direction of a unit step, `None` for anything else.
    pub fn from_step(delta: IVec2) -> Option<Direction> {
        match (delta.x, delta.y) {
            (0, -1) => Some(Direction::North),
            (0, 1) => Some(Direction::South),
            (1, 0) => Some(Direction::East),
            (-1, 0) => Some(Direction::West),
            _ => None,
        }
    }
}

/// Horizontal part of a block position.
pub fn xz(pos: IVec3) -> IVec2 {
    IVec2::new(pos.x, pos.z)
}

/// Hermite smoothstep on an already-normalized `t`.
pub fn smoothstep(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}
