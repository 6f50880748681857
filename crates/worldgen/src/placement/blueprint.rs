//! Streams template sections into the world.

use bevy::math::IVec3;

use crate::error::PlacementError;
use crate::geometry::ChunkPos;
use crate::host::{write_if_changed, Block, VoxelHost};
use crate::template::{DecodedSection, StructureTemplate};

use super::types::{Progress, TickBudget};

/// Cells between wall-clock checks.
const DEADLINE_CHECK_INTERVAL: usize = 64;

/// Resumable position inside the template. Only ever moves forward, so each
/// section is decoded at most once.
#[derive(Debug, Default)]
pub struct BlueprintCursor {
    pub section: usize,
    pub cell: usize,
    pub sections_decoded: u32,
    decoded: Option<DecodedSection>,
}

pub struct BlueprintTarget<'a> {
    pub template: &'a StructureTemplate,
    pub origin: IVec3,
    /// Chosen base elevation minus the template's authored origin elevation.
    pub vertical_shift: i32,
    pub include_transparent: bool,
}

pub fn place_step(
    cursor: &mut BlueprintCursor,
    host: &mut dyn VoxelHost,
    target: &BlueprintTarget<'_>,
    budget: &mut TickBudget,
    edits: &mut u64,
    connectors: &mut Vec<IVec3>,
) -> Result<Progress, PlacementError> {
    let template = target.template;
    let shift = IVec3::new(0, target.vertical_shift, 0);
    let mut since_check = 0usize;

    while cursor.section < template.section_count() {
        let coord = template.section_coord(cursor.section);
        if cursor.decoded.is_none() {
            let decoded = template
                .decode(coord)
                .ok_or_else(|| PlacementError::MissingSection {
                    template: template.id.clone(),
                    section: coord,
                })?;
            cursor.decoded = Some(decoded);
            cursor.sections_decoded += 1;
        }
        let Some(section) = cursor.decoded.as_ref() else {
            break;
        };
        let section_origin = target.origin + template.section_offset(coord) + shift;

        while cursor.cell < section.len() {
            since_check += 1;
            if budget.edits_left() == 0
                || (since_check % DEADLINE_CHECK_INTERVAL == 0 && budget.exhausted())
            {
                return Ok(Progress::Yield);
            }

            let index = section.indices[cursor.cell];
            if index == template.transparent_index && !target.include_transparent {
                cursor.cell += 1;
                continue;
            }
            let resolved = template
                .block_for(index)
                .ok_or_else(|| PlacementError::BadPaletteIndex {
                    template: template.id.clone(),
                    section: coord,
                    index,
                })?;

            let (lx, ly, lz) = section.dims.cell(cursor.cell);
            let pos = section_origin + IVec3::new(lx as i32, ly as i32, lz as i32);
            let chunk = ChunkPos::of_block(pos);
            if !host.is_chunk_loaded(chunk) {
                return Ok(Progress::Waiting(chunk));
            }

            let block = if Some(index) == template.connector_index {
                connectors.push(pos);
                Block::DirtPath
            } else {
                resolved
            };
            if write_if_changed(host, pos, block)? {
                budget.spend(1);
                *edits += 1;
            }
            cursor.cell += 1;
        }

        cursor.section += 1;
        cursor.cell = 0;
        cursor.decoded = None;
    }

    Ok(Progress::Done)
}
