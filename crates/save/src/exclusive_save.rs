use std::path::Path;

use bevy::prelude::*;
use worldgen::SaveableRegistry;

use crate::atomic_write::atomic_write;
use crate::file_header::{wrap_with_header, wrap_with_header_compressed};
use crate::save_error::SaveError;
use crate::save_plugin::{PendingSave, SaveLoadFinished, SaveLoadOp, SaveSettings};
use crate::save_types::WorldgenSave;

/// Snapshot every registered saveable into header-wrapped file bytes.
pub fn encode_world(world: &World, compress: bool) -> Result<Vec<u8>, SaveError> {
    let registry = world
        .get_resource::<SaveableRegistry>()
        .ok_or_else(|| SaveError::MissingResource("SaveableRegistry".to_string()))?;
    let save = WorldgenSave::new(registry.save_all(world));
    let encoded = save.encode();
    debug!(
        "Encoded {} saveables into {} bytes",
        save.extensions.len(),
        encoded.len()
    );

    Ok(if compress {
        wrap_with_header_compressed(&encoded)
    } else {
        wrap_with_header(&encoded)
    })
}

/// Encode the world and write it to `path` atomically. Returns the number of
/// bytes written.
pub fn save_world_to(world: &World, path: &Path, compress: bool) -> Result<usize, SaveError> {
    let bytes = encode_world(world, compress)?;
    atomic_write(path, &bytes)?;
    Ok(bytes.len())
}

/// Exclusive system that performs a requested save with full world access.
pub(crate) fn exclusive_save(world: &mut World) {
    let Some(path) = world.resource_mut::<PendingSave>().0.take() else {
        return;
    };
    let compress = world
        .get_resource::<SaveSettings>()
        .map_or(true, |s| s.compress);

    let result = save_world_to(world, &path, compress);
    match &result {
        Ok(len) => info!("Saved worldgen state ({len} bytes) to {}", path.display()),
        Err(e) => error!("Save to {} failed: {e}", path.display()),
    }
    world.send_event(SaveLoadFinished {
        op: SaveLoadOp::Save,
        path,
        result: result.map(|_| ()),
    });
}
