//! Save files for the worldgen engine.
//!
//! Every `Saveable` resource registered in the engine's `SaveableRegistry`
//! is snapshotted into a [`WorldgenSave`] extension map, bitcode-encoded,
//! optionally lz4-compressed and written behind a checksummed header. Loads
//! run the migration chain, replace the registered resources and schedule
//! the engine's post-load rebuild.

mod atomic_write;
mod exclusive_load;
mod exclusive_save;
pub mod file_header;
mod save_error;
mod save_migrate;
mod save_migrate_registry;
mod save_plugin;
mod save_types;
pub mod saveable_ext;


pub use atomic_write::atomic_write;
pub use exclusive_load::restore_world;
pub use exclusive_save::{encode_world, save_world_to};
pub use save_error::SaveError;
pub use save_migrate::{migrate_save, MigrationReport};
pub use save_plugin::{
    LoadWorldgenEvent, SaveLoadFinished, SaveLoadOp, SavePlugin, SaveSettings, SaveWorldgenEvent,
};
pub use save_types::{WorldgenSave, CURRENT_SAVE_VERSION};
pub use saveable_ext::SaveableAppExt;
