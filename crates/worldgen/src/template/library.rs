use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use bevy::prelude::*;

use crate::error::TemplateError;
use crate::host::Block;

use super::types::{StructureTemplate, TemplateMeta};

/// Interns palette descriptors the engine has no named block for.
#[derive(Debug, Default, Clone)]
pub struct BlockRegistry {
    ids: HashMap<String, u32>,
    names: Vec<String>,
}

impl BlockRegistry {
    pub fn intern(&mut self, descriptor: &str) -> Block {
        if let Some(&id) = self.ids.get(descriptor) {
            return Block::Custom(id);
        }
        let id = self.names.len() as u32;
        self.ids.insert(descriptor.to_string(), id);
        self.names.push(descriptor.to_string());
        Block::Custom(id)
    }

    pub fn descriptor(&self, id: u32) -> Option<&str> {
        self.names.get(id as usize).map(String::as_str)
    }
}

/// Every template the engine may place, in registration order. Decisions
/// pick templates by index, so the order must be stable across restarts.
#[derive(Resource, Default)]
pub struct TemplateLibrary {
    templates: HashMap<String, Arc<StructureTemplate>>,
    order: Vec<String>,
    pub registry: BlockRegistry,
}

impl TemplateLibrary {
    /// Parse metadata JSON plus section blobs and register the result.
    pub fn load(
        &mut self,
        id: &str,
        meta_json: &str,
        sections: HashMap<[u32; 3], Vec<u8>>,
    ) -> Result<Arc<StructureTemplate>, TemplateError> {
        let meta: TemplateMeta = serde_json::from_str(meta_json)?;
        let registry = &mut self.registry;
        let template = StructureTemplate::from_parts(id, meta, sections, |d| registry.intern(d))?;
        Ok(self.insert(template))
    }

    /// Load every `<root>/<id>/meta.json` with its `s_<x>_<y>_<z>.bin` section
    /// files. Directories are visited in name order.
    pub fn load_dir(&mut self, root: &Path) -> Result<usize, TemplateError> {
        let mut dirs: Vec<_> = std::fs::read_dir(root)?
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.join("meta.json").is_file())
            .collect();
        dirs.sort();

        let mut loaded = 0;
        for dir in dirs {
            let Some(id) = dir.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            let meta_json = std::fs::read_to_string(dir.join("meta.json"))?;
            let mut sections = HashMap::new();
            for entry in std::fs::read_dir(&dir)? {
                let path = entry?.path();
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if !name.ends_with(".bin") {
                    continue;
                }
                let coord = parse_section_name(name)?;
                sections.insert(coord, std::fs::read(&path)?);
            }
            self.load(&id, &meta_json, sections)?;
            info!("Loaded structure template '{}'", id);
            loaded += 1;
        }
        Ok(loaded)
    }

    /// Register an already-built template. Re-registering an id replaces it in place.
    pub fn insert(&mut self, template: StructureTemplate) -> Arc<StructureTemplate> {
        let id = template.id.clone();
        let template = Arc::new(template);
        if self.templates.insert(id.clone(), template.clone()).is_none() {
            self.order.push(id);
        }
        template
    }

    pub fn get(&self, id: &str) -> Option<Arc<StructureTemplate>> {
        self.templates.get(id).cloned()
    }

    pub fn by_index(&self, index: usize) -> Option<Arc<StructureTemplate>> {
        self.order.get(index).and_then(|id| self.get(id))
    }

    pub fn ids(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

fn parse_section_name(name: &str) -> Result<[u32; 3], TemplateError> {
    let bad = || TemplateError::BadSectionName(name.to_string());
    let stem = name
        .strip_prefix("s_")
        .and_then(|s| s.strip_suffix(".bin"))
        .ok_or_else(bad)?;
    let mut parts = stem.split('_').map(|p| p.parse::<u32>().map_err(|_| bad()));
    let coord = [
        parts.next().ok_or_else(bad)??,
        parts.next().ok_or_else(bad)??,
        parts.next().ok_or_else(bad)??,
    ];
    if parts.next().is_some() {
        return Err(bad());
    }
    Ok(coord)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_section_name() {
        assert_eq!(parse_section_name("s_1_0_2.bin").expect("valid"), [1, 0, 2]);
        assert!(parse_section_name("s_1_0.bin").is_err());
        assert!(parse_section_name("s_1_0_2_3.bin").is_err());
        assert!(parse_section_name("x_1_0_2.bin").is_err());
    }

    #[test]
    fn test_registry_interns_once() {
        let mut reg = BlockRegistry::default();
        let a = reg.intern("mod:widget");
        let b = reg.intern("mod:gadget");
        assert_eq!(reg.intern("mod:widget"), a);
        assert_ne!(a, b);
        assert_eq!(reg.descriptor(1), Some("mod:gadget"));
    }
}
