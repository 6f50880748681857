use bevy::prelude::*;
use std::collections::BTreeMap;

pub mod activity;
pub mod config;
pub mod error;
pub mod footprints;
pub mod geometry;
pub mod hashing;
pub mod host;
pub mod params;
pub mod placement;
pub mod post_load_rebuild;
pub mod region_decision;
pub mod residency;
pub mod roads;
pub mod scheduler;
pub mod template;

#[cfg(test)]
mod integration_tests;
#[cfg(any(test, feature = "bench"))]
pub mod test_harness;

// ---------------------------------------------------------------------------
// Saveable trait + registry for the extension map save pattern
// ---------------------------------------------------------------------------

/// Trait for resources that can be saved/loaded via the extension map.
///
/// Each implementing resource provides its own serialization logic, so a new
/// persisted resource only needs to be registered by the plugin that owns it.
pub trait Saveable: Resource + Default + Send + Sync + 'static {
    /// Unique key for this resource in the save file's extension map.
    /// Must be stable across versions; renames go through a migration step.
    const SAVE_KEY: &'static str;

    /// Serialize this resource to bytes.
    /// Return `None` to skip saving (e.g. when the resource is at its default state).
    fn save_to_bytes(&self) -> Option<Vec<u8>>;

    /// Deserialize from bytes, returning the restored resource.
    fn load_from_bytes(bytes: &[u8]) -> Self;
}

/// Decode bytes via `bitcode::decode`, logging a warning and returning `Default` on failure.
pub fn decode_or_warn<T: bitcode::DecodeOwned + Default>(key: &str, bytes: &[u8]) -> T {
    match bitcode::decode(bytes) {
        Ok(v) => v,
        Err(e) => {
            warn!(
                "Saveable {}: failed to decode {} bytes, falling back to default: {}",
                key,
                bytes.len(),
                e
            );
            T::default()
        }
    }
}

/// Type alias for the save function stored in a `SaveableEntry`.
pub type SaveFn = Box<dyn Fn(&World) -> Option<Vec<u8>> + Send + Sync>;
/// Type alias for the load function stored in a `SaveableEntry`.
pub type LoadFn = Box<dyn Fn(&mut World, &[u8]) + Send + Sync>;
/// Type alias for the reset function stored in a `SaveableEntry`.
pub type ResetFn = Box<dyn Fn(&mut World) + Send + Sync>;

/// Type-erased save/load/reset operations for a single registered resource.
pub struct SaveableEntry {
    pub key: String,
    pub save_fn: SaveFn,
    pub load_fn: LoadFn,
    pub reset_fn: ResetFn,
}

/// Registry of all saveable resources, populated during plugin setup.
#[derive(Resource, Default)]
pub struct SaveableRegistry {
    pub entries: Vec<SaveableEntry>,
}

impl SaveableRegistry {
    /// Register a resource type that implements `Saveable`.
    ///
    /// Panics in debug builds if a resource with the same `SAVE_KEY` is already
    /// registered.
    pub fn register<T: Saveable>(&mut self) {
        let key = T::SAVE_KEY.to_string();
        if self.entries.iter().any(|e| e.key == key) {
            warn!(
                "SaveableRegistry: duplicate key '{}', ignoring second registration",
                key
            );
            debug_assert!(false, "SaveableRegistry: duplicate key '{}'", key);
            return;
        }
        self.entries.push(SaveableEntry {
            key,
            save_fn: Box::new(|world: &World| {
                world.get_resource::<T>().and_then(|r| r.save_to_bytes())
            }),
            load_fn: Box::new(|world: &mut World, bytes: &[u8]| {
                let value = T::load_from_bytes(bytes);
                world.insert_resource(value);
            }),
            reset_fn: Box::new(|world: &mut World| {
                world.insert_resource(T::default());
            }),
        });
    }

    /// Save all registered resources into an extension map.
    pub fn save_all(&self, world: &World) -> BTreeMap<String, Vec<u8>> {
        let mut extensions = BTreeMap::new();
        for entry in &self.entries {
            if let Some(bytes) = (entry.save_fn)(world) {
                extensions.insert(entry.key.clone(), bytes);
            }
        }
        extensions
    }

    /// Load registered resources from an extension map.
    /// Resources whose key is absent are left unchanged.
    pub fn load_all(&self, world: &mut World, extensions: &BTreeMap<String, Vec<u8>>) {
        for entry in &self.entries {
            if let Some(bytes) = extensions.get(&entry.key) {
                (entry.load_fn)(world, bytes);
            }
        }
    }

    /// Reset all registered resources to their defaults.
    pub fn reset_all(&self, world: &mut World) {
        for entry in &self.entries {
            (entry.reset_fn)(world);
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.key.as_str())
    }
}

// ---------------------------------------------------------------------------
// Core resources
// ---------------------------------------------------------------------------

/// Global tick counter incremented each FixedUpdate. Retry backoff is
/// measured against it, so it is persisted with the world.
#[derive(Resource, Default, Debug, Clone, Copy, PartialEq, Eq, bitcode::Encode, bitcode::Decode)]
pub struct TickCounter(pub u64);

impl Saveable for TickCounter {
    const SAVE_KEY: &'static str = "tick_counter";

    fn save_to_bytes(&self) -> Option<Vec<u8>> {
        if self.0 == 0 {
            return None;
        }
        Some(bitcode::encode(self))
    }

    fn load_from_bytes(bytes: &[u8]) -> Self {
        decode_or_warn(Self::SAVE_KEY, bytes)
    }
}

pub fn advance_tick_counter(mut tick: ResMut<TickCounter>) {
    tick.0 = tick.0.wrapping_add(1);
}

/// Per-tick ordering of the engine's systems.
#[derive(SystemSet, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorldgenSet {
    /// Rebuild transient state after a load.
    Restore,
    /// Region win/lose decisions and job submission.
    Decide,
    /// Advance the placement scheduler.
    Place,
    /// React to finished placements.
    Complete,
    /// Plan and build roads.
    Roads,
}

/// Drop in-flight work on shutdown. Residency bookkeeping is forgotten
/// rather than released.
pub fn abandon_on_exit(
    mut exit: EventReader<AppExit>,
    mut scheduler: ResMut<scheduler::PlacementScheduler>,
    mut builder: ResMut<roads::RoadBuilder>,
    mut residency: ResMut<residency::ChunkResidency>,
) {
    if exit.read().next().is_none() {
        return;
    }
    scheduler.abandon(&mut residency);
    builder.abandon();
    residency.forget_all();
}

pub struct WorldgenPlugin;

impl Plugin for WorldgenPlugin {
    fn build(&self, app: &mut App) {
        app.insert_resource(Time::<Fixed>::from_duration(config::TICK_DURATION))
            .init_resource::<TickCounter>()
            .configure_sets(
                FixedUpdate,
                (
                    WorldgenSet::Restore,
                    WorldgenSet::Decide,
                    WorldgenSet::Place,
                    WorldgenSet::Complete,
                    WorldgenSet::Roads,
                )
                    .chain(),
            )
            .add_systems(
                FixedUpdate,
                advance_tick_counter.before(WorldgenSet::Restore),
            );

        app.add_plugins((
            params::ParamsPlugin,
            template::TemplatePlugin,
            footprints::FootprintsPlugin,
            activity::ActivityPlugin,
            scheduler::SchedulerPlugin,
            region_decision::RegionDecisionPlugin,
            roads::RoadsPlugin,
            post_load_rebuild::PostLoadRebuildPlugin,
        ));

        app.add_systems(Last, abandon_on_exit);

        app.init_resource::<SaveableRegistry>();
        app.world_mut()
            .resource_mut::<SaveableRegistry>()
            .register::<TickCounter>();
    }
}

#[cfg(test)]
mod saveable_tests {
    use super::*;

    #[derive(Resource, Default, Debug, PartialEq)]
    struct TestCounter {
        value: u32,
    }

    impl Saveable for TestCounter {
        const SAVE_KEY: &'static str = "test_counter";

        fn save_to_bytes(&self) -> Option<Vec<u8>> {
            if self.value == 0 {
                None
            } else {
                Some(self.value.to_le_bytes().to_vec())
            }
        }

        fn load_from_bytes(bytes: &[u8]) -> Self {
            let value = u32::from_le_bytes(bytes.try_into().unwrap_or([0; 4]));
            TestCounter { value }
        }
    }

    #[test]
    fn test_registry_register_and_save() {
        let mut world = World::new();
        world.insert_resource(TestCounter { value: 42 });

        let mut registry = SaveableRegistry::default();
        registry.register::<TestCounter>();

        let extensions = registry.save_all(&world);
        assert_eq!(extensions.len(), 1);
        assert_eq!(extensions["test_counter"], 42u32.to_le_bytes().to_vec());
    }

    #[test]
    fn test_registry_save_skips_default() {
        let mut world = World::new();
        world.insert_resource(TestCounter { value: 0 });

        let mut registry = SaveableRegistry::default();
        registry.register::<TestCounter>();

        assert!(registry.save_all(&world).is_empty());
    }

    #[test]
    fn test_registry_load_and_reset() {
        let mut world = World::new();
        world.insert_resource(TestCounter::default());

        let mut registry = SaveableRegistry::default();
        registry.register::<TestCounter>();

        let mut extensions = BTreeMap::new();
        extensions.insert("test_counter".to_string(), 99u32.to_le_bytes().to_vec());
        extensions.insert("unknown_feature".to_string(), vec![0xFF]);
        registry.load_all(&mut world, &extensions);
        assert_eq!(world.resource::<TestCounter>().value, 99);

        registry.reset_all(&mut world);
        assert_eq!(world.resource::<TestCounter>().value, 0);
    }

    #[test]
    #[should_panic(expected = "duplicate key")]
    fn test_registry_duplicate_key_panics_in_debug() {
        let mut registry = SaveableRegistry::default();
        registry.register::<TestCounter>();
        registry.register::<TestCounter>();
    }

    #[test]
    fn test_plugin_registers_every_persisted_resource() {
        let mut app = App::new();
        app.add_plugins(MinimalPlugins).add_plugins(WorldgenPlugin);
        let registry = app.world().resource::<SaveableRegistry>();
        let keys: Vec<&str> = registry.keys().collect();
        for key in [
            "worldgen_params",
            "footprints",
            "road_anchors",
            "region_activity",
            "pending_placements",
            "placement_pause",
            "region_decisions",
            "road_network_state",
            "tick_counter",
        ] {
            assert!(keys.contains(&key), "missing saveable '{key}'");
        }
    }
}
