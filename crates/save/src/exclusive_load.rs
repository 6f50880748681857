use bevy::prelude::*;
use worldgen::post_load_rebuild::PostLoadRebuildPending;
use worldgen::SaveableRegistry;

use crate::file_header::read_payload;
use crate::save_error::SaveError;
use crate::save_migrate::{migrate_save, MigrationReport};
use crate::save_plugin::{PendingLoadBytes, SaveLoadFinished, SaveLoadOp};
use crate::save_types::WorldgenSave;

/// Replace every registered saveable with the contents of `bytes`.
///
/// Validation (header, checksum, decode, migration) completes before the
/// world is touched, so a rejected file leaves the current state in place.
/// On success the post-load rebuild is scheduled for the next tick.
pub fn restore_world(world: &mut World, bytes: &[u8]) -> Result<MigrationReport, SaveError> {
    let payload = read_payload(bytes)?;
    let mut save = WorldgenSave::decode(&payload)?;
    let report = migrate_save(&mut save)?;

    if report.steps_applied > 0 {
        info!(
            "Migrated worldgen save from v{} to v{} ({} steps applied)",
            report.original_version, report.final_version, report.steps_applied,
        );
        for desc in &report.step_descriptions {
            info!("  - {desc}");
        }
    }

    let registry = world
        .remove_resource::<SaveableRegistry>()
        .ok_or_else(|| SaveError::MissingResource("SaveableRegistry".to_string()))?;
    for key in save.extensions.keys() {
        if !registry.keys().any(|k| k == key.as_str()) {
            warn!("Save contains unknown extension '{key}', ignoring it");
        }
    }
    registry.reset_all(world);
    registry.load_all(world, &save.extensions);
    world.insert_resource(registry);

    world.insert_resource(PostLoadRebuildPending);
    Ok(report)
}

/// Exclusive system that applies bytes read by the load detector.
pub(crate) fn exclusive_load(world: &mut World) {
    let Some(request) = world.resource_mut::<PendingLoadBytes>().0.take() else {
        return;
    };

    let result = restore_world(world, &request.bytes);
    match &result {
        Ok(_) => info!("Loaded worldgen state from {}", request.path.display()),
        Err(e) => error!("Load from {} failed: {e}", request.path.display()),
    }
    world.send_event(SaveLoadFinished {
        op: SaveLoadOp::Load,
        path: request.path,
        result: result.map(|_| ()),
    });
}
