//! Per road-region counters of in-flight placement jobs. Road building in a
//! region only starts while its counter is zero.

use std::collections::BTreeMap;

use bevy::prelude::*;
use bitcode::{Decode, Encode};

#[derive(Resource, Default, Debug, Clone, PartialEq, Encode, Decode)]
pub struct RegionActivity {
    pub counters: BTreeMap<u64, u32>,
}

impl RegionActivity {
    pub fn begin(&mut self, region_key: u64) {
        *self.counters.entry(region_key).or_insert(0) += 1;
    }

    pub fn end(&mut self, region_key: u64) {
        match self.counters.get_mut(&region_key) {
            Some(n) if *n > 1 => *n -= 1,
            Some(_) => {
                self.counters.remove(&region_key);
            }
            None => warn!(
                "RegionActivity: end() for idle region {:#x}, ignoring",
                region_key
            ),
        }
    }

    pub fn count(&self, region_key: u64) -> u32 {
        self.counters.get(&region_key).copied().unwrap_or(0)
    }

    pub fn is_idle(&self, region_key: u64) -> bool {
        self.count(region_key) == 0
    }
}

impl crate::Saveable for RegionActivity {
    const SAVE_KEY: &'static str = "region_activity";

    fn save_to_bytes(&self) -> Option<Vec<u8>> {
        if self.counters.is_empty() {
            return None;
        }
        Some(bitcode::encode(self))
    }

    fn load_from_bytes(bytes: &[u8]) -> Self {
        crate::decode_or_warn(Self::SAVE_KEY, bytes)
    }
}

pub struct ActivityPlugin;

impl Plugin for ActivityPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<RegionActivity>();

        app.init_resource::<crate::SaveableRegistry>();
        app.world_mut()
            .resource_mut::<crate::SaveableRegistry>()
            .register::<RegionActivity>();
    }
}
