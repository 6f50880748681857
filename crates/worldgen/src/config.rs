use std::time::Duration;

/// Horizontal edge length of a host chunk, in blocks.
pub const CHUNK_SIZE: i32 = 16;

/// Lowest and highest buildable Y in the host world.
pub const WORLD_MIN_Y: i32 = -64;
pub const WORLD_MAX_Y: i32 = 319;

/// Edge length of a decision region. Each region hosts at most one structure.
pub const REGION_SIZE: i32 = 256;

/// A road region groups `ROAD_REGION_SPAN x ROAD_REGION_SPAN` decision regions.
/// Footprints, anchors and activity counters are keyed by road region.
pub const ROAD_REGION_SPAN: i32 = 4;
pub const ROAD_REGION_SIZE: i32 = REGION_SIZE * ROAD_REGION_SPAN;

/// Host simulation rate. One `FixedUpdate` run is one tick.
pub const TICKS_PER_SECOND: u32 = 20;
pub const TICK_DURATION: Duration = Duration::from_millis(1000 / TICKS_PER_SECOND as u64);

/// Fixed-point scale of road search costs. A flat straight step costs exactly
/// `COST_SCALE`, so the Manhattan heuristic scaled by it stays admissible.
pub const COST_SCALE: u32 = 10;

/// Palette descriptor that marks road connection points inside a template.
pub const CONNECTOR_DESCRIPTOR: &str = "worldgen:road_connector";

/// Bumped whenever the region hash formulas change. Undecided entries saved
/// under another version are re-derived on load.
pub const DECISION_SCHEMA_VERSION: u32 = 1;

/// Dimension id recorded for persisted jobs when the host does not name one.
pub const DEFAULT_DIMENSION: &str = "overworld";

/// Planned origins stay this far inside their region's edges.
pub const PLAN_MARGIN: i32 = 24;
