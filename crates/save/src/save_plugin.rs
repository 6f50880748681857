use std::path::PathBuf;

use bevy::prelude::*;
use worldgen::SaveableRegistry;

use crate::save_error::SaveError;

// ---------------------------------------------------------------------------
// Buffer resources
// ---------------------------------------------------------------------------

/// Destination of a save requested this frame.
#[derive(Resource, Default)]
pub(crate) struct PendingSave(pub(crate) Option<PathBuf>);

pub(crate) struct LoadRequest {
    pub(crate) path: PathBuf,
    pub(crate) bytes: Vec<u8>,
}

/// Raw bytes read from disk that the exclusive load system will parse and
/// restore.
#[derive(Resource, Default)]
pub(crate) struct PendingLoadBytes(pub(crate) Option<LoadRequest>);

/// Save file options.
#[derive(Resource, Debug, Clone)]
pub struct SaveSettings {
    /// lz4-compress the payload.
    pub compress: bool,
}

impl Default for SaveSettings {
    fn default() -> Self {
        Self { compress: true }
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Event, Debug, Clone)]
pub struct SaveWorldgenEvent {
    pub path: PathBuf,
}

#[derive(Event, Debug, Clone)]
pub struct LoadWorldgenEvent {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveLoadOp {
    Save,
    Load,
}

/// Sent once per handled save or load request.
#[derive(Event, Debug)]
pub struct SaveLoadFinished {
    pub op: SaveLoadOp,
    pub path: PathBuf,
    pub result: Result<(), SaveError>,
}

// ---------------------------------------------------------------------------
// Plugin
// ---------------------------------------------------------------------------

pub struct SavePlugin;

impl Plugin for SavePlugin {
    fn build(&self, app: &mut App) {
        app.add_event::<SaveWorldgenEvent>()
            .add_event::<LoadWorldgenEvent>()
            .add_event::<SaveLoadFinished>()
            .init_resource::<SaveableRegistry>()
            .init_resource::<SaveSettings>()
            .init_resource::<PendingSave>()
            .init_resource::<PendingLoadBytes>();

        // Detection is lightweight; the exclusive systems do the work only
        // when a request is buffered. A save requested in the same frame as a
        // load captures the state from before the load.
        app.add_systems(
            Update,
            (
                detect_save_event,
                detect_load_event,
                crate::exclusive_save::exclusive_save
                    .run_if(|pending: Res<PendingSave>| pending.0.is_some()),
                crate::exclusive_load::exclusive_load
                    .run_if(|pending: Res<PendingLoadBytes>| pending.0.is_some()),
            )
                .chain(),
        );
    }
}

// ---------------------------------------------------------------------------
// Event detection systems
// ---------------------------------------------------------------------------

/// Buffers the most recent `SaveWorldgenEvent` of the frame.
fn detect_save_event(mut events: EventReader<SaveWorldgenEvent>, mut pending: ResMut<PendingSave>) {
    if let Some(event) = events.read().last() {
        pending.0 = Some(event.path.clone());
    }
}

/// Reads the requested file into `PendingLoadBytes`. I/O errors are reported
/// through `SaveLoadFinished` instead of being swallowed.
fn detect_load_event(
    mut events: EventReader<LoadWorldgenEvent>,
    mut pending: ResMut<PendingLoadBytes>,
    mut finished: EventWriter<SaveLoadFinished>,
) {
    let Some(event) = events.read().last() else {
        return;
    };
    match std::fs::read(&event.path) {
        Ok(bytes) => {
            pending.0 = Some(LoadRequest {
                path: event.path.clone(),
                bytes,
            });
        }
        Err(e) => {
            let err = SaveError::from(e);
            error!("Load from {} failed: {err}", event.path.display());
            finished.send(SaveLoadFinished {
                op: SaveLoadOp::Load,
                path: event.path.clone(),
                result: Err(err),
            });
        }
    }
}
