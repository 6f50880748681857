//! Fluent construction of in-memory structure templates.

use std::collections::HashMap;

use bevy::math::IVec3;

use crate::template::{encode_section, BlockRegistry, SectionDims, StructureTemplate, TemplateMeta};

pub struct TemplateBuilder {
    id: String,
    edge: u32,
    sections: [u32; 3],
    size: Option<[u32; 3]>,
    palette: Vec<String>,
    origin_elevation: i32,
    kind: Option<String>,
    cells: HashMap<IVec3, u16>,
}

impl TemplateBuilder {
    /// Empty template; palette index 0 is transparent air.
    pub fn new(id: &str, edge: u32, sections: [u32; 3]) -> Self {
        Self {
            id: id.to_string(),
            edge,
            sections,
            size: None,
            palette: vec!["minecraft:air".to_string()],
            origin_elevation: 0,
            kind: None,
            cells: HashMap::new(),
        }
    }

    fn index_of(&mut self, descriptor: &str) -> u16 {
        match self.palette.iter().position(|d| d == descriptor) {
            Some(i) => i as u16,
            None => {
                self.palette.push(descriptor.to_string());
                (self.palette.len() - 1) as u16
            }
        }
    }

    pub fn set(mut self, pos: IVec3, descriptor: &str) -> Self {
        let i = self.index_of(descriptor);
        self.cells.insert(pos, i);
        self
    }

    pub fn fill(mut self, min: IVec3, max: IVec3, descriptor: &str) -> Self {
        let i = self.index_of(descriptor);
        for y in min.y..=max.y {
            for z in min.z..=max.z {
                for x in min.x..=max.x {
                    self.cells.insert(IVec3::new(x, y, z), i);
                }
            }
        }
        self
    }

    /// Write a raw palette index, even one outside the palette.
    pub fn raw(mut self, pos: IVec3, index: u16) -> Self {
        self.cells.insert(pos, index);
        self
    }

    pub fn size(mut self, size: [u32; 3]) -> Self {
        self.size = Some(size);
        self
    }

    pub fn origin_elevation(mut self, y: i32) -> Self {
        self.origin_elevation = y;
        self
    }

    pub fn kind(mut self, kind: &str) -> Self {
        self.kind = Some(kind.to_string());
        self
    }

    pub fn build(self) -> StructureTemplate {
        let dims = SectionDims::cube(self.edge);
        let edge = self.edge as i32;
        let mut blobs = HashMap::new();
        for sy in 0..self.sections[1] {
            for sz in 0..self.sections[2] {
                for sx in 0..self.sections[0] {
                    let offset = IVec3::new(sx as i32, sy as i32, sz as i32) * edge;
                    let mut indices = vec![0u16; dims.volume()];
                    for (i, slot) in indices.iter_mut().enumerate() {
                        let (x, y, z) = dims.cell(i);
                        let pos = offset + IVec3::new(x as i32, y as i32, z as i32);
                        if let Some(&idx) = self.cells.get(&pos) {
                            *slot = idx;
                        }
                    }
                    blobs.insert([sx, sy, sz], encode_section(dims, &indices, self.edge));
                }
            }
        }

        let meta = TemplateMeta {
            section_edge: self.edge,
            sections: self.sections,
            size: self.size,
            transparent_index: 0,
            palette: self.palette,
            origin_elevation: self.origin_elevation,
            kind: self.kind,
        };
        let mut registry = BlockRegistry::default();
        StructureTemplate::from_parts(self.id, meta, blobs, |d| registry.intern(d))
            .expect("TemplateBuilder produces valid metadata")
    }
}

/// A solid stone-brick box of the given size.
pub fn solid_box_template(id: &str, size_x: u32, size_y: u32, size_z: u32) -> StructureTemplate {
    let edge = 8;
    let sections = [
        size_x.div_ceil(edge),
        size_y.div_ceil(edge),
        size_z.div_ceil(edge),
    ];
    TemplateBuilder::new(id, edge, sections)
        .size([size_x, size_y, size_z])
        .fill(
            IVec3::ZERO,
            IVec3::new(size_x as i32 - 1, size_y as i32 - 1, size_z as i32 - 1),
            "minecraft:stone_bricks",
        )
        .build()
}
