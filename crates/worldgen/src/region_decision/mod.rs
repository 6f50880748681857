//! Persisted "one structure (or none) per region" decisions.
//!
//! A region is decided once from `hash(seed, region)`. Winners get a planned
//! origin and template from `hash(seed, region, salt)`; every soft rejection
//! bumps the salt, so the sequence of plans for a region is itself a pure
//! function of the seed.

mod systems;


pub use systems::{handle_decision_outcomes, observe_participants, process_decisions};

use std::collections::{BTreeMap, VecDeque};

use bevy::math::IVec2;
use bevy::prelude::*;
use bitcode::{Decode, Encode};

use crate::config::{DECISION_SCHEMA_VERSION, PLAN_MARGIN, REGION_SIZE};
use crate::error::SoftReject;
use crate::geometry::{pack_key, region_min_block};
use crate::hashing::{hash_cell, hash_words};
use crate::host::HostWorld;
use crate::params::DecisionParams;
use crate::WorldgenSet;

const STREAM_PLAN_X: u64 = 1;
const STREAM_PLAN_Z: u64 = 2;
const STREAM_TEMPLATE: u64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Encode, Decode)]
pub enum DecisionStatus {
    Unknown,
    Lose,
    WinPending,
    WinPlacing,
    WinSpawned,
}

impl DecisionStatus {
    /// Lose and WinSpawned never change again.
    pub fn is_final(self) -> bool {
        matches!(self, DecisionStatus::Lose | DecisionStatus::WinSpawned)
    }

    /// Undecided entries are re-derived when the hash formulas change.
    pub fn is_rederivable(self) -> bool {
        matches!(self, DecisionStatus::Unknown | DecisionStatus::WinPending)
    }
}

/// Pure win test for a region.
pub fn decide(seed: u64, region: IVec2, rarity: u32) -> bool {
    if rarity == 0 {
        return false;
    }
    hash_cell(seed, region.x, region.y, 0) % u64::from(rarity) == 0
}

/// Deterministic origin column and template choice for a winning region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionPlan {
    pub origin: IVec2,
    pub template_index: usize,
}

/// Plan for `region` under `salt`. The origin stays `PLAN_MARGIN` blocks
/// inside the region; `forced_offset` rotates the template choice.
pub fn plan(
    seed: u64,
    region: IVec2,
    salt: u32,
    template_count: usize,
    forced_offset: u32,
) -> RegionPlan {
    let words = |stream: u64| {
        hash_words(
            seed,
            &[
                region.x as u32 as u64,
                region.y as u32 as u64,
                u64::from(salt),
                stream,
            ],
        )
    };
    let span = (REGION_SIZE - 2 * PLAN_MARGIN).max(1) as u64;
    let min = region_min_block(region);
    let origin = IVec2::new(
        min.x + PLAN_MARGIN + (words(STREAM_PLAN_X) % span) as i32,
        min.y + PLAN_MARGIN + (words(STREAM_PLAN_Z) % span) as i32,
    );
    let template_index = if template_count == 0 {
        0
    } else {
        ((words(STREAM_TEMPLATE) + u64::from(forced_offset)) % template_count as u64) as usize
    };
    RegionPlan {
        origin,
        template_index,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct RegionDecision {
    pub region: [i32; 2],
    pub status: DecisionStatus,
    pub salt: u32,
    pub attempts: u32,
    /// Placement tasks that failed after submission.
    pub task_failures: u32,
    pub next_retry_tick: u64,
    pub forced_offset: u32,
    pub template_id: Option<String>,
    pub template_kind: Option<String>,
    /// Planned origin column (x, z).
    pub origin: Option<[i32; 2]>,
}

impl RegionDecision {
    pub fn new(region: IVec2) -> Self {
        Self {
            region: region.to_array(),
            status: DecisionStatus::Unknown,
            salt: 0,
            attempts: 0,
            task_failures: 0,
            next_retry_tick: 0,
            forced_offset: 0,
            template_id: None,
            template_kind: None,
            origin: None,
        }
    }

    pub fn region(&self) -> IVec2 {
        IVec2::from_array(self.region)
    }

    pub fn key(&self) -> u64 {
        pack_key(self.region[0], self.region[1])
    }

    pub fn planned_origin(&self) -> Option<IVec2> {
        self.origin.map(IVec2::from_array)
    }

    /// Record a soft rejection: bump salt and attempts, back off, and past
    /// the threshold rotate the template. Only failed placement tasks count
    /// toward `max_attempts`; validation rejections re-plan indefinitely
    /// under the capped backoff. Returns `true` if the region gave up and
    /// became a loser.
    pub fn soft_reject(&mut self, reason: SoftReject, tick: u64, params: &DecisionParams) -> bool {
        self.salt = self.salt.wrapping_add(1);
        self.attempts = self.attempts.saturating_add(1);
        if reason == SoftReject::TaskFailed {
            self.task_failures += 1;
        }
        if self.task_failures >= params.max_attempts {
            self.status = DecisionStatus::Lose;
            self.template_id = None;
            self.template_kind = None;
            self.origin = None;
            info!(
                "Region ({}, {}) gave up after {} failed placements (last: {})",
                self.region[0], self.region[1], self.task_failures, reason
            );
            return true;
        }
        let shift = (self.attempts - 1).min(62);
        let backoff = params
            .backoff_base_ticks
            .saturating_mul(1u64 << shift)
            .min(params.backoff_max_ticks);
        self.next_retry_tick = tick + backoff;
        if self.attempts >= params.force_template_after {
            self.forced_offset += 1;
        }
        self.status = DecisionStatus::WinPending;
        debug!(
            "Region ({}, {}) soft-rejected ({}), attempt {}, retry at tick {}",
            self.region[0], self.region[1], reason, self.attempts, self.next_retry_tick
        );
        false
    }
}

/// Decision entries keyed by packed region coordinate, plus the queue of
/// regions awaiting processing.
#[derive(Resource, Debug, Clone, PartialEq, Encode, Decode)]
pub struct RegionDecisionTable {
    pub schema_version: u32,
    pub entries: BTreeMap<u64, RegionDecision>,
    pub queue: VecDeque<u64>,
}

impl Default for RegionDecisionTable {
    fn default() -> Self {
        Self {
            schema_version: DECISION_SCHEMA_VERSION,
            entries: BTreeMap::new(),
            queue: VecDeque::new(),
        }
    }
}

impl RegionDecisionTable {
    /// Create an Unknown entry and queue it, unless the region is known.
    pub fn observe(&mut self, region: IVec2) -> bool {
        let key = pack_key(region.x, region.y);
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(key, RegionDecision::new(region));
        self.queue.push_back(key);
        true
    }

    pub fn get(&self, region: IVec2) -> Option<&RegionDecision> {
        self.entries.get(&pack_key(region.x, region.y))
    }

    pub fn by_key(&self, key: u64) -> Option<&RegionDecision> {
        self.entries.get(&key)
    }

    pub fn by_key_mut(&mut self, key: u64) -> Option<&mut RegionDecision> {
        self.entries.get_mut(&key)
    }

    /// Queue `key` unless it is already queued.
    pub fn enqueue(&mut self, key: u64) {
        if !self.queue.contains(&key) {
            self.queue.push_back(key);
        }
    }

    pub fn count(&self, status: DecisionStatus) -> usize {
        self.entries.values().filter(|e| e.status == status).count()
    }

    /// Drop entries that must be re-derived under the current schema.
    fn migrate_schema(&mut self) {
        if self.schema_version == DECISION_SCHEMA_VERSION {
            return;
        }
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.status.is_rederivable());
        let entries = &self.entries;
        self.queue.retain(|k| entries.contains_key(k));
        warn!(
            "Region decision schema {} != {}: discarded {} undecided entries",
            self.schema_version,
            DECISION_SCHEMA_VERSION,
            before - self.entries.len()
        );
        self.schema_version = DECISION_SCHEMA_VERSION;
    }
}

impl crate::Saveable for RegionDecisionTable {
    const SAVE_KEY: &'static str = "region_decisions";

    fn save_to_bytes(&self) -> Option<Vec<u8>> {
        if self.entries.is_empty() {
            return None;
        }
        Some(bitcode::encode(self))
    }

    fn load_from_bytes(bytes: &[u8]) -> Self {
        let mut table: Self = crate::decode_or_warn(Self::SAVE_KEY, bytes);
        table.migrate_schema();
        table
    }
}

pub struct RegionDecisionPlugin;

impl Plugin for RegionDecisionPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<RegionDecisionTable>().add_systems(
            FixedUpdate,
            (
                (observe_participants, process_decisions)
                    .chain()
                    .run_if(resource_exists::<HostWorld>)
                    .in_set(WorldgenSet::Decide),
                handle_decision_outcomes.in_set(WorldgenSet::Complete),
            ),
        );

        app.init_resource::<crate::SaveableRegistry>();
        app.world_mut()
            .resource_mut::<crate::SaveableRegistry>()
            .register::<RegionDecisionTable>();
    }
}
