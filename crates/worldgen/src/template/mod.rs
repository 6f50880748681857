//! Prefabricated structure templates: JSON metadata, a palette and a grid of
//! binary sections.

mod library;
pub mod section;
mod types;


pub use library::{BlockRegistry, TemplateLibrary};
pub use section::{decode_section, encode_section, DecodedSection, SectionDims};
pub use types::{StructureTemplate, TemplateMeta};

use bevy::prelude::*;

pub struct TemplatePlugin;

impl Plugin for TemplatePlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<TemplateLibrary>();
    }
}
