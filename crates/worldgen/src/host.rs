//! Contract with the host voxel world.
//!
//! The engine never owns chunks. Everything it reads or writes goes through
//! [`VoxelHost`], stored type-erased in the [`HostWorld`] resource.

use std::any::Any;
use std::fmt;

use bevy::math::IVec3;
use bevy::prelude::*;
use bitcode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::config::{DEFAULT_DIMENSION, WORLD_MAX_Y, WORLD_MIN_Y};
use crate::geometry::{ChunkPos, Direction};

// ---------------------------------------------------------------------------
// Blocks
// ---------------------------------------------------------------------------

/// Block types the engine reasons about. Anything else a template names is
/// interned as `Custom` and written through untouched.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Encode, Decode, Serialize, Deserialize,
)]
pub enum Block {
    #[default]
    Air,
    Water,
    Lava,
    Grass,
    Dirt,
    CoarseDirt,
    Stone,
    Sand,
    Sandstone,
    Gravel,
    Snow,
    Ice,
    Clay,
    Log,
    Leaves,
    Plant,
    DirtPath,
    Planks,
    Cobblestone,
    StoneBricks,
    Fence,
    Lantern,
    /// Stair block whose high side faces the given direction.
    Stairs(Direction),
    Custom(u32),
}

impl Block {
    pub fn is_air(self) -> bool {
        self == Block::Air
    }

    pub fn is_liquid(self) -> bool {
        matches!(self, Block::Water | Block::Lava)
    }

    /// Trees and plants. Never counted as surface.
    pub fn is_foliage(self) -> bool {
        matches!(self, Block::Log | Block::Leaves | Block::Plant)
    }

    pub fn is_natural_terrain(self) -> bool {
        matches!(
            self,
            Block::Grass
                | Block::Dirt
                | Block::CoarseDirt
                | Block::Stone
                | Block::Sand
                | Block::Sandstone
                | Block::Gravel
                | Block::Snow
                | Block::Ice
                | Block::Clay
        )
    }

    /// Can stand on it and it blocks a corridor.
    pub fn is_solid(self) -> bool {
        !self.is_air() && !self.is_liquid() && !self.is_foliage()
    }

    /// Player- or structure-built material. Grading never cuts these outside
    /// the strict footprint.
    pub fn is_constructed(self) -> bool {
        self.is_solid() && !self.is_natural_terrain()
    }

    /// Material the road builder lays down.
    pub fn is_road_material(self) -> bool {
        matches!(
            self,
            Block::DirtPath
                | Block::Planks
                | Block::Cobblestone
                | Block::Fence
                | Block::Lantern
                | Block::Stairs(_)
        )
    }

    /// Parse a host block descriptor such as `minecraft:oak_planks[axis=y]`.
    /// Unknown names return `None`.
    pub fn from_descriptor(descriptor: &str) -> Option<Block> {
        let name = descriptor.split('[').next().unwrap_or(descriptor).trim();
        let name = name.rsplit(':').next().unwrap_or(name);
        let block = match name {
            "air" | "cave_air" | "void_air" => Block::Air,
            "water" => Block::Water,
            "lava" => Block::Lava,
            "grass_block" | "grass" => Block::Grass,
            "dirt" => Block::Dirt,
            "coarse_dirt" => Block::CoarseDirt,
            "stone" => Block::Stone,
            "sand" => Block::Sand,
            "sandstone" => Block::Sandstone,
            "gravel" => Block::Gravel,
            "snow_block" | "snow" => Block::Snow,
            "ice" | "packed_ice" => Block::Ice,
            "clay" => Block::Clay,
            "dirt_path" | "grass_path" => Block::DirtPath,
            "cobblestone" => Block::Cobblestone,
            "stone_bricks" => Block::StoneBricks,
            "lantern" => Block::Lantern,
            n if n.ends_with("_log") || n.ends_with("_wood") => Block::Log,
            n if n.ends_with("_leaves") => Block::Leaves,
            "short_grass" | "tall_grass" | "fern" | "large_fern" | "dandelion" | "poppy"
            | "dead_bush" => Block::Plant,
            n if n.ends_with("_planks") => Block::Planks,
            n if n.ends_with("_fence") => Block::Fence,
            _ => return None,
        };
        Some(block)
    }
}

// ---------------------------------------------------------------------------
// Host queries
// ---------------------------------------------------------------------------

/// Coarse biome class at a column. Drives grading materials and placement
/// eligibility.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Encode, Decode, Serialize, Deserialize,
)]
pub enum BiomeClass {
    #[default]
    Plains,
    Forest,
    Desert,
    Snowy,
    Mountain,
    Swamp,
    Ocean,
    River,
}

/// Anyone whose proximity makes regions eligible for a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Participant {
    pub id: u64,
    pub position: IVec3,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    ChunkNotLoaded(ChunkPos),
    OutOfWorld(IVec3),
    Rejected { pos: IVec3, reason: String },
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostError::ChunkNotLoaded(c) => write!(f, "chunk ({}, {}) is not loaded", c.x, c.z),
            HostError::OutOfWorld(p) => write!(f, "position {} is outside the world", p),
            HostError::Rejected { pos, reason } => {
                write!(f, "host rejected write at {}: {}", pos, reason)
            }
        }
    }
}

impl std::error::Error for HostError {}

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

/// Identifies one holder of chunk reservations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TicketToken(pub u64);

/// "Keep loaded" reservations on column chunks, in chunk coordinates.
pub trait ChunkTickets {
    fn acquire(&mut self, x: i32, z: i32, token: TicketToken);
    fn release(&mut self, x: i32, z: i32, token: TicketToken);
}

/// Voxel read/write and world queries supplied by the host.
pub trait VoxelHost: ChunkTickets + Send + Sync + 'static {
    fn block(&self, pos: IVec3) -> Result<Block, HostError>;

    fn set_block(&mut self, pos: IVec3, block: Block) -> Result<(), HostError>;

    /// Y of the topmost non-air, non-foliage block in the column. Liquids
    /// count as surface.
    fn surface_height(&self, x: i32, z: i32) -> Result<i32, HostError>;

    fn is_chunk_loaded(&self, chunk: ChunkPos) -> bool;

    /// Ask the host to start loading a chunk. Loading may complete on a later tick.
    fn request_chunk(&mut self, chunk: ChunkPos);

    fn seed(&self) -> u64;

    fn participants(&self) -> Vec<Participant>;

    fn biome_class(&self, x: i32, z: i32) -> BiomeClass;

    fn dimension_id(&self) -> &str {
        DEFAULT_DIMENSION
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// The host world the engine operates on.
#[derive(Resource)]
pub struct HostWorld(pub Box<dyn VoxelHost>);

impl HostWorld {
    pub fn new(host: impl VoxelHost) -> Self {
        Self(Box::new(host))
    }

    pub fn downcast_ref<T: VoxelHost>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: VoxelHost>(&mut self) -> Option<&mut T> {
        self.0.as_any_mut().downcast_mut::<T>()
    }
}

/// Write `block` unless the cell already holds it. Returns whether a write
/// happened.
pub fn write_if_changed(
    host: &mut dyn VoxelHost,
    pos: IVec3,
    block: Block,
) -> Result<bool, HostError> {
    if host.block(pos)? == block {
        return Ok(false);
    }
    host.set_block(pos, block)?;
    Ok(true)
}

/// Inclusive Y range clamped to the buildable world.
pub fn world_y_range(lo: i32, hi: i32) -> std::ops::RangeInclusive<i32> {
    lo.max(WORLD_MIN_Y)..=hi.min(WORLD_MAX_Y)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_world_y_range_clamps() {
        assert_eq!(world_y_range(-100, 400), WORLD_MIN_Y..=WORLD_MAX_Y);
        assert!(world_y_range(10, 5).is_empty());
    }

    #[test]
    fn test_descriptor_strips_namespace_and_state() {
        assert_eq!(Block::from_descriptor("minecraft:stone"), Some(Block::Stone));
        assert_eq!(
            Block::from_descriptor("minecraft:oak_planks[axis=y]"),
            Some(Block::Planks)
        );
        assert_eq!(Block::from_descriptor("spruce_log"), Some(Block::Log));
        assert_eq!(Block::from_descriptor("minecraft:oak_fence"), Some(Block::Fence));
        assert_eq!(Block::from_descriptor("minecraft:beacon"), None);
    }

    #[test]
    fn test_block_classification() {
        assert!(Block::Leaves.is_foliage());
        assert!(!Block::Leaves.is_solid());
        assert!(Block::Water.is_liquid());
        assert!(Block::Cobblestone.is_constructed());
        assert!(!Block::Dirt.is_constructed());
        assert!(Block::Stairs(Direction::North).is_road_material());
        assert!(Block::Custom(3).is_constructed());
    }
}
