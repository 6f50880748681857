//! Runtime tunables for the whole engine.
//!
//! Every budget, threshold and noise constant lives in one [`WorldgenParams`]
//! resource. Hosts override any subset from JSON; the resource is persisted so
//! a world keeps the parameters it was generated with.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::host::BiomeClass;

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Per-tick cost caps of the placement scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bitcode::Encode, bitcode::Decode)]
#[serde(default)]
pub struct SchedulerParams {
    /// Wall-clock budget for the preflight lane, in nanoseconds.
    pub preflight_budget_ns: u64,
    /// Wall-clock budget for the heavy lane, in nanoseconds.
    pub heavy_budget_ns: u64,
    /// Upper bound on preflight task steps per tick.
    pub max_preflight_steps: u32,
    /// Block writes the heavy task may perform per tick.
    pub heavy_edits_per_tick: u32,
    /// Residency requests a single task may issue per tick.
    pub chunk_requests_per_tick: u32,
    /// Consecutive ticks a task may wait on one absent chunk before failing.
    pub stall_timeout_ticks: u32,
    /// Global cap on outstanding chunk reservations.
    pub max_reservations: usize,
    /// Extra blocks of residency around the graded area.
    pub chunk_padding: i32,
}

impl Default for SchedulerParams {
    fn default() -> Self {
        Self {
            preflight_budget_ns: 2_000_000,
            heavy_budget_ns: 8_000_000,
            max_preflight_steps: 16,
            heavy_edits_per_tick: 4096,
            chunk_requests_per_tick: 8,
            stall_timeout_ticks: 600,
            max_reservations: 1024,
            chunk_padding: 16,
        }
    }
}

// ---------------------------------------------------------------------------
// Site check
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bitcode::Encode, bitcode::Decode)]
#[serde(default)]
pub struct SiteParams {
    /// Spacing of the coarse sample grid, in blocks.
    pub sample_step: i32,
    /// Largest cut below a sample's surface that still counts as good.
    pub max_cut: i32,
    /// Largest fill above a sample's surface that still counts as good.
    pub max_fill: i32,
    /// Fraction of bad samples above which the site is rejected.
    pub allowed_bad_fraction: f32,
    /// Blocks the structure sinks below the chosen base.
    pub foundation_bury: i32,
    /// The median may move at most this far toward the extremes.
    pub median_clamp_depth: i32,
}

impl Default for SiteParams {
    fn default() -> Self {
        Self {
            sample_step: 4,
            max_cut: 6,
            max_fill: 5,
            allowed_bad_fraction: 0.30,
            foundation_bury: 1,
            median_clamp_depth: 4,
        }
    }
}

// ---------------------------------------------------------------------------
// Grading
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bitcode::Encode, bitcode::Decode)]
#[serde(default)]
pub struct GradingParams {
    /// Width of the blended margin around the footprint.
    pub padding: i32,
    pub vegetation_band_below: i32,
    pub vegetation_band_above: i32,
    /// Foliage is cleared this far above the graded target.
    pub canopy_clear_height: i32,
    /// Fill deeper than this below the target is stone.
    pub stone_depth: i32,
    pub boundary_warp_amplitude: f32,
    pub boundary_warp_frequency: f32,
    pub jitter_amplitude: f32,
    pub jitter_frequency: f32,
}

impl Default for GradingParams {
    fn default() -> Self {
        Self {
            padding: 8,
            vegetation_band_below: 4,
            vegetation_band_above: 32,
            canopy_clear_height: 24,
            stone_depth: 4,
            boundary_warp_amplitude: 3.0,
            boundary_warp_frequency: 0.08,
            jitter_amplitude: 1.5,
            jitter_frequency: 0.15,
        }
    }
}

// ---------------------------------------------------------------------------
// Region decisions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bitcode::Encode, bitcode::Decode)]
#[serde(default)]
pub struct DecisionParams {
    /// One region in `rarity` wins.
    pub rarity: u32,
    /// Regions within this many blocks of a participant get decided.
    pub observe_padding: i32,
    pub min_participant_distance: i32,
    pub max_participant_distance: i32,
    /// Minimum distance between planned origins of the same template kind.
    pub min_spacing: i32,
    pub allowed_biomes: Vec<BiomeClass>,
    pub decisions_per_tick: u32,
    pub backoff_base_ticks: u64,
    pub backoff_max_ticks: u64,
    /// Attempts after which each re-plan also rotates the template choice.
    pub force_template_after: u32,
    /// Attempts after which a region gives up and becomes a loser.
    pub max_attempts: u32,
}

impl Default for DecisionParams {
    fn default() -> Self {
        Self {
            rarity: 8,
            observe_padding: 256,
            min_participant_distance: 96,
            max_participant_distance: 1024,
            min_spacing: 320,
            allowed_biomes: vec![
                BiomeClass::Plains,
                BiomeClass::Forest,
                BiomeClass::Desert,
                BiomeClass::Snowy,
            ],
            decisions_per_tick: 8,
            backoff_base_ticks: 20,
            backoff_max_ticks: 2400,
            force_template_after: 3,
            max_attempts: 12,
        }
    }
}

// ---------------------------------------------------------------------------
// Roads
// ---------------------------------------------------------------------------

/// A* search limits and edge costs. Costs are in `COST_SCALE` units: a flat
/// straight step costs exactly `COST_SCALE`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bitcode::Encode, bitcode::Decode)]
#[serde(default)]
pub struct PathfinderParams {
    pub min_straight_steps: u8,
    /// Height of the band above the deck checked for solid material.
    pub clearance: i32,
    /// Footprints shrink by this margin before they block the search.
    pub footprint_margin: i32,
    /// Search rectangle padding around the two endpoints.
    pub search_padding: i32,
    pub max_iterations: u32,
    pub grade_penalty: u32,
    pub uphill_penalty: u32,
    pub turn_penalty: u32,
    pub tunnel_penalty: u32,
    pub deck_penalty: u32,
    pub slope_change_penalty: u32,
    pub axis_alternation_penalty: u32,
    pub water_penalty: u32,
}

impl Default for PathfinderParams {
    fn default() -> Self {
        Self {
            min_straight_steps: 3,
            clearance: 4,
            footprint_margin: 1,
            search_padding: 48,
            max_iterations: 60_000,
            grade_penalty: 6,
            uphill_penalty: 4,
            turn_penalty: 8,
            tunnel_penalty: 12,
            deck_penalty: 20,
            slope_change_penalty: 10,
            axis_alternation_penalty: 6,
            water_penalty: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bitcode::Encode, bitcode::Decode)]
#[serde(default)]
pub struct RoadBuilderParams {
    /// Air cleared above the deck.
    pub corridor_height: i32,
    pub edits_per_tick: u32,
    /// Path cells between lamp posts.
    pub lamp_interval: usize,
    /// Air below the deck that counts as a gap.
    pub bridge_gap_depth: i32,
    /// Consecutive gap cells needed before a bridge starts.
    pub bridge_min_run: usize,
    /// Gaps up to this deep are filled with dirt only.
    pub dirt_fill_depth: i32,
    /// Deepest support column built off-bridge.
    pub max_support_depth: i32,
    pub bridge_pillar_spacing: usize,
    /// Weight of |dy| against squared XZ distance when planning the network.
    pub planner_vertical_penalty: i64,
    /// One extra edge per this many anchors.
    pub extra_edge_divisor: usize,
    /// Path cells ahead of the cursor kept resident.
    pub window_cells: usize,
}

impl Default for RoadBuilderParams {
    fn default() -> Self {
        Self {
            corridor_height: 4,
            edits_per_tick: 2048,
            lamp_interval: 12,
            bridge_gap_depth: 3,
            bridge_min_run: 2,
            dirt_fill_depth: 3,
            max_support_depth: 24,
            bridge_pillar_spacing: 6,
            planner_vertical_penalty: 64,
            extra_edge_divisor: 6,
            window_cells: 32,
        }
    }
}

// ---------------------------------------------------------------------------
// Top-level resource
// ---------------------------------------------------------------------------

#[derive(
    Resource,
    Debug,
    Clone,
    PartialEq,
    Default,
    Serialize,
    Deserialize,
    bitcode::Encode,
    bitcode::Decode,
)]
#[serde(default)]
pub struct WorldgenParams {
    pub scheduler: SchedulerParams,
    pub site: SiteParams,
    pub grading: GradingParams,
    pub decision: DecisionParams,
    pub pathfinder: PathfinderParams,
    pub roads: RoadBuilderParams,
}

impl WorldgenParams {
    /// Defaults overlaid with whatever fields the JSON document names.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl crate::Saveable for WorldgenParams {
    const SAVE_KEY: &'static str = "worldgen_params";

    fn save_to_bytes(&self) -> Option<Vec<u8>> {
        // Always saved so a world keeps its overrides.
        Some(bitcode::encode(self))
    }

    fn load_from_bytes(bytes: &[u8]) -> Self {
        crate::decode_or_warn(Self::SAVE_KEY, bytes)
    }
}

pub struct ParamsPlugin;

impl Plugin for ParamsPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<WorldgenParams>();

        app.init_resource::<crate::SaveableRegistry>();
        app.world_mut()
            .resource_mut::<crate::SaveableRegistry>()
            .register::<WorldgenParams>();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Saveable;

    #[test]
    fn test_defaults() {
        let params = WorldgenParams::default();
        assert!((params.site.allowed_bad_fraction - 0.30).abs() < f32::EPSILON);
        assert_eq!(params.pathfinder.min_straight_steps, 3);
        assert_eq!(params.scheduler.stall_timeout_ticks, 600);
        assert_eq!(params.roads.lamp_interval, 12);
    }

    #[test]
    fn test_partial_json_override_keeps_other_defaults() {
        let json = r#"{ "site": { "allowed_bad_fraction": 0.5 }, "decision": { "rarity": 2 } }"#;
        let params = WorldgenParams::from_json_str(json).expect("valid json");
        assert!((params.site.allowed_bad_fraction - 0.5).abs() < f32::EPSILON);
        assert_eq!(params.site.max_cut, SiteParams::default().max_cut);
        assert_eq!(params.decision.rarity, 2);
        assert_eq!(params.decision.max_attempts, 12);
        assert_eq!(params.grading, GradingParams::default());
    }

    #[test]
    fn test_json_rejects_wrong_types() {
        assert!(WorldgenParams::from_json_str(r#"{ "decision": { "rarity": "often" } }"#).is_err());
    }

    #[test]
    fn test_saveable_roundtrip() {
        let mut params = WorldgenParams::default();
        params.grading.jitter_amplitude = 0.0;
        params.decision.allowed_biomes = vec![BiomeClass::Desert];

        let bytes = params.save_to_bytes().expect("always saved");
        let restored = WorldgenParams::load_from_bytes(&bytes);
        assert_eq!(restored, params);
    }

    #[test]
    fn test_json_roundtrip_via_string() {
        let params = WorldgenParams::default();
        let json = params.to_json_string().expect("serializable");
        assert_eq!(WorldgenParams::from_json_str(&json).expect("parses"), params);
    }
}
