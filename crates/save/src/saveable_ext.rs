// ---------------------------------------------------------------------------
// App extension for registering Saveable resources
// ---------------------------------------------------------------------------

use bevy::prelude::*;
use worldgen::{Saveable, SaveableRegistry};

/// Extension trait on `App` for one-line saveable registration.
///
/// ```ignore
/// use save::SaveableAppExt;
///
/// fn build(&self, app: &mut App) {
///     app.init_resource::<VillageNames>()
///        .register_saveable::<VillageNames>();
/// }
/// ```
pub trait SaveableAppExt {
    fn register_saveable<T: Saveable>(&mut self) -> &mut Self;
}

impl SaveableAppExt for App {
    fn register_saveable<T: Saveable>(&mut self) -> &mut Self {
        self.init_resource::<SaveableRegistry>();
        self.world_mut()
            .resource_mut::<SaveableRegistry>()
            .register::<T>();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Resource, Default)]
    struct VillageNames(Vec<String>);

    impl Saveable for VillageNames {
        const SAVE_KEY: &'static str = "village_names";

        fn save_to_bytes(&self) -> Option<Vec<u8>> {
            (!self.0.is_empty()).then(|| bitcode::encode(&self.0))
        }

        fn load_from_bytes(bytes: &[u8]) -> Self {
            Self(worldgen::decode_or_warn(Self::SAVE_KEY, bytes))
        }
    }

    #[test]
    fn test_register_creates_registry_on_demand() {
        let mut app = App::new();
        app.init_resource::<VillageNames>()
            .register_saveable::<VillageNames>();

        let registry = app.world().resource::<SaveableRegistry>();
        assert_eq!(registry.keys().collect::<Vec<_>>(), vec!["village_names"]);
    }
}
