use std::collections::HashMap;

use bevy::math::{IVec3, UVec3};
use serde::{Deserialize, Serialize};

use crate::config::CONNECTOR_DESCRIPTOR;
use crate::error::TemplateError;
use crate::host::Block;

use super::section::{decode_section, DecodedSection};

/// Template metadata document as authored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemplateMeta {
    pub section_edge: u32,
    /// Section-grid counts along x, y, z.
    pub sections: [u32; 3],
    /// Overall block size. Defaults to `sections * section_edge`.
    #[serde(default)]
    pub size: Option<[u32; 3]>,
    pub transparent_index: u16,
    pub palette: Vec<String>,
    /// World Y the template was captured at.
    #[serde(default)]
    pub origin_elevation: i32,
    /// Structures of one kind keep their spacing from each other.
    #[serde(default)]
    pub kind: Option<String>,
}

/// Immutable, decoded template shared by every task that places it.
#[derive(Debug, Clone)]
pub struct StructureTemplate {
    pub id: String,
    pub section_edge: u32,
    pub sections: UVec3,
    pub size: UVec3,
    pub transparent_index: u16,
    pub palette: Vec<String>,
    pub blocks: Vec<Block>,
    pub connector_index: Option<u16>,
    pub origin_elevation: i32,
    pub kind: String,
    section_data: HashMap<[u32; 3], Vec<u8>>,
}

impl StructureTemplate {
    /// Build a template from metadata and raw section blobs. `resolve` maps
    /// palette descriptors the engine does not know to host block ids.
    pub fn from_parts(
        id: impl Into<String>,
        meta: TemplateMeta,
        section_data: HashMap<[u32; 3], Vec<u8>>,
        mut resolve: impl FnMut(&str) -> Block,
    ) -> Result<Self, TemplateError> {
        let id = id.into();
        if meta.section_edge == 0 || meta.section_edge > 255 {
            return Err(TemplateError::EdgeOutOfRange(meta.section_edge));
        }
        if meta.sections.iter().any(|&n| n == 0) {
            return Err(TemplateError::EmptyGrid);
        }
        if meta.palette.len() > u16::MAX as usize + 1 {
            return Err(TemplateError::PaletteTooLarge(meta.palette.len()));
        }
        if meta.transparent_index as usize >= meta.palette.len() {
            return Err(TemplateError::TransparentIndexOutOfRange {
                index: meta.transparent_index,
                palette_len: meta.palette.len(),
            });
        }

        let sections = UVec3::from_array(meta.sections);
        let size = meta
            .size
            .map(UVec3::from_array)
            .unwrap_or(sections * meta.section_edge);

        let connector_index = meta
            .palette
            .iter()
            .position(|d| d == CONNECTOR_DESCRIPTOR)
            .map(|i| i as u16);
        let blocks = meta
            .palette
            .iter()
            .map(|d| Block::from_descriptor(d).unwrap_or_else(|| resolve(d)))
            .collect();

        Ok(Self {
            id: id.clone(),
            section_edge: meta.section_edge,
            sections,
            size,
            transparent_index: meta.transparent_index,
            palette: meta.palette,
            blocks,
            connector_index,
            origin_elevation: meta.origin_elevation,
            kind: meta.kind.unwrap_or(id),
            section_data,
        })
    }

    pub fn section_count(&self) -> usize {
        (self.sections.x * self.sections.y * self.sections.z) as usize
    }

    /// Section-grid coordinate of the `index`-th section in row-major order
    /// (x fastest, then z, then y).
    pub fn section_coord(&self, index: usize) -> [u32; 3] {
        let i = index as u32;
        let sx = i % self.sections.x;
        let sz = (i / self.sections.x) % self.sections.z;
        let sy = i / (self.sections.x * self.sections.z);
        [sx, sy, sz]
    }

    /// Block offset of a section's minimum corner inside the template.
    pub fn section_offset(&self, coord: [u32; 3]) -> IVec3 {
        IVec3::new(coord[0] as i32, coord[1] as i32, coord[2] as i32) * self.section_edge as i32
    }

    pub fn section_blob(&self, coord: [u32; 3]) -> Option<&[u8]> {
        self.section_data.get(&coord).map(Vec::as_slice)
    }

    pub fn decode(&self, coord: [u32; 3]) -> Option<DecodedSection> {
        self.section_blob(coord)
            .map(|blob| decode_section(blob, self.section_edge, self.transparent_index))
    }

    /// Resolved block for a palette index, `None` if out of range.
    pub fn block_for(&self, index: u16) -> Option<Block> {
        self.blocks.get(index as usize).copied()
    }

    /// Horizontal footprint extent in blocks.
    pub fn footprint_size(&self) -> (i32, i32) {
        (self.size.x as i32, self.size.z as i32)
    }
}
