//! Terrain grading around a footprint.
//!
//! Two vegetation passes clear trees and then plants over the padded area.
//! A shape pass then visits every padded column once and cuts or fills it to
//! a target elevation that blends from the flat interior toward the original
//! surface at the padded boundary. Noise warps the boundary distance so the
//! graded edge is organic, and adds a small jitter that fades out at both
//! ends of the blend.

use bevy::math::IVec3;
use fastnoise_lite::{FastNoiseLite, NoiseType};

use crate::error::PlacementError;
use crate::footprints::FootprintRect;
use crate::geometry::{smoothstep, ChunkPos};
use crate::hashing::{hash_words, noise_seed};
use crate::host::{world_y_range, write_if_changed, BiomeClass, Block, VoxelHost};
use crate::params::GradingParams;

use super::types::{Progress, TickBudget};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradePass {
    Trees,
    Plants,
    Shape,
}

struct GradeNoise {
    warp: FastNoiseLite,
    jitter: FastNoiseLite,
}

impl GradeNoise {
    fn new(seed: u64, params: &GradingParams) -> Self {
        let mut warp = FastNoiseLite::with_seed(noise_seed(seed));
        warp.set_noise_type(Some(NoiseType::OpenSimplex2));
        warp.set_frequency(Some(params.boundary_warp_frequency));

        let mut jitter = FastNoiseLite::with_seed(noise_seed(hash_words(seed, &[1])));
        jitter.set_noise_type(Some(NoiseType::OpenSimplex2));
        jitter.set_frequency(Some(params.jitter_frequency));

        Self { warp, jitter }
    }
}

/// Resumable grading progress of one task.
pub struct GradingCursor {
    pub pass: GradePass,
    pub column: usize,
    seed: u64,
    noise: Option<GradeNoise>,
}

impl GradingCursor {
    /// `seed` should be derived from the world seed and the task origin so
    /// the graded shape is reproducible.
    pub fn new(seed: u64) -> Self {
        Self {
            pass: GradePass::Trees,
            column: 0,
            seed,
            noise: None,
        }
    }
}

/// Cap and shallow-fill materials for a biome.
pub fn surface_materials(biome: BiomeClass) -> (Block, Block) {
    match biome {
        BiomeClass::Desert => (Block::Sand, Block::Sand),
        BiomeClass::Snowy => (Block::Snow, Block::Dirt),
        _ => (Block::Grass, Block::Dirt),
    }
}

/// Target elevation of a column at Chebyshev distance `d` outside the
/// footprint.
fn target_height(
    d: i32,
    base_y: i32,
    surface: i32,
    warp: f32,
    jitter: f32,
    params: &GradingParams,
) -> i32 {
    if d == 0 {
        return base_y;
    }
    let padding = params.padding.max(1) as f32;
    let d_eff = (d as f32 + warp * params.boundary_warp_amplitude).clamp(0.0, padding);
    let s = smoothstep(d_eff / padding);
    let blended = base_y as f32 + (surface - base_y) as f32 * s;
    let wobble = jitter * params.jitter_amplitude * 4.0 * s * (1.0 - s);
    let lo = base_y.min(surface);
    let hi = base_y.max(surface);
    ((blended + wobble).round() as i32).clamp(lo, hi)
}

fn clear_vegetation(
    host: &mut dyn VoxelHost,
    x: i32,
    z: i32,
    pass: GradePass,
    params: &GradingParams,
) -> Result<u32, PlacementError> {
    let surface = host.surface_height(x, z)?;
    let mut edits = 0;
    for y in world_y_range(
        surface - params.vegetation_band_below,
        surface + params.vegetation_band_above,
    ) {
        let pos = IVec3::new(x, y, z);
        let b = host.block(pos)?;
        let hit = match pass {
            GradePass::Trees => matches!(b, Block::Log | Block::Leaves),
            _ => b == Block::Plant,
        };
        if hit {
            host.set_block(pos, Block::Air)?;
            edits += 1;
        }
    }
    Ok(edits)
}

fn shape_column(
    host: &mut dyn VoxelHost,
    x: i32,
    z: i32,
    footprint: &FootprintRect,
    base_y: i32,
    noise: &GradeNoise,
    params: &GradingParams,
) -> Result<u32, PlacementError> {
    let d = footprint.distance_outside(x, z);
    let inside = d == 0;
    let surface = host.surface_height(x, z)?;
    let (fx, fz) = (x as f32, z as f32);
    let target = target_height(
        d,
        base_y,
        surface,
        noise.warp.get_noise_2d(fx, fz),
        noise.jitter.get_noise_2d(fx, fz),
        params,
    );
    let (cap, shallow_fill) = surface_materials(host.biome_class(x, z));
    let mut edits = 0;

    // Cut down to target. Built material outside the strict footprint stays.
    for y in world_y_range(target + 1, surface) {
        let pos = IVec3::new(x, y, z);
        let b = host.block(pos)?;
        if b.is_air() || (!inside && b.is_constructed()) {
            continue;
        }
        host.set_block(pos, Block::Air)?;
        edits += 1;
    }

    // Canopy above whatever is left.
    for y in world_y_range(surface.max(target) + 1, target + params.canopy_clear_height) {
        let pos = IVec3::new(x, y, z);
        if host.block(pos)?.is_foliage() {
            host.set_block(pos, Block::Air)?;
            edits += 1;
        }
    }

    // Fill up to target.
    for y in world_y_range(surface + 1, target) {
        let pos = IVec3::new(x, y, z);
        if host.block(pos)?.is_solid() {
            continue;
        }
        let material = if target - y >= params.stone_depth {
            Block::Stone
        } else {
            shallow_fill
        };
        host.set_block(pos, material)?;
        edits += 1;
    }

    // Cap, unless the top is unsupported, foliage or not natural ground.
    let top_pos = IVec3::new(x, target, z);
    let top = host.block(top_pos)?;
    let below = host.block(top_pos - IVec3::Y)?;
    if below.is_solid() && top.is_natural_terrain() && write_if_changed(host, top_pos, cap)? {
        edits += 1;
    }

    Ok(edits)
}

/// Advance grading until done, out of budget or blocked on a chunk.
pub fn grade_step(
    cursor: &mut GradingCursor,
    host: &mut dyn VoxelHost,
    footprint: &FootprintRect,
    base_y: i32,
    params: &GradingParams,
    budget: &mut TickBudget,
    edits: &mut u64,
) -> Result<Progress, PlacementError> {
    let area = footprint.expand(params.padding.max(0));
    let width = area.width() as usize;
    let columns = width * area.depth() as usize;
    let noise = cursor
        .noise
        .get_or_insert_with(|| GradeNoise::new(cursor.seed, params));

    loop {
        if cursor.column >= columns {
            match cursor.pass {
                GradePass::Trees => cursor.pass = GradePass::Plants,
                GradePass::Plants => cursor.pass = GradePass::Shape,
                GradePass::Shape => return Ok(Progress::Done),
            }
            cursor.column = 0;
            continue;
        }
        if budget.exhausted() {
            return Ok(Progress::Yield);
        }

        let x = area.min_x + (cursor.column % width) as i32;
        let z = area.min_z + (cursor.column / width) as i32;
        let chunk = ChunkPos::containing(x, z);
        if !host.is_chunk_loaded(chunk) {
            return Ok(Progress::Waiting(chunk));
        }

        let column_edits = match cursor.pass {
            GradePass::Trees | GradePass::Plants => {
                clear_vegetation(host, x, z, cursor.pass, params)?
            }
            GradePass::Shape => shape_column(host, x, z, footprint, base_y, noise, params)?,
        };
        budget.spend(column_edits);
        *edits += column_edits as u64;
        cursor.column += 1;
    }
}
