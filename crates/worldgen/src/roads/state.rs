use std::collections::BTreeMap;

use bevy::math::IVec3;
use bevy::prelude::*;
use bitcode::{Decode, Encode};

use crate::geometry::{pack_key, xz};

use super::builder::RoadJob;

/// Unordered pair of anchor columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Encode, Decode)]
pub struct EdgeKey {
    pub a: u64,
    pub b: u64,
}

impl EdgeKey {
    pub fn new(from: IVec3, to: IVec3) -> Self {
        let (p, q) = (xz(from), xz(to));
        let (ka, kb) = (pack_key(p.x, p.y), pack_key(q.x, q.y));
        Self {
            a: ka.min(kb),
            b: ka.max(kb),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Encode, Decode)]
pub enum EdgeStatus {
    Planned,
    Building,
    Built,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct RoadEdgeRecord {
    pub region_key: u64,
    pub from: [i32; 3],
    pub to: [i32; 3],
    pub status: EdgeStatus,
}

impl RoadEdgeRecord {
    pub fn from_pos(&self) -> IVec3 {
        IVec3::from_array(self.from)
    }

    pub fn to_pos(&self) -> IVec3 {
        IVec3::from_array(self.to)
    }
}

/// Every planned road edge with its build status, plus the anchor count each
/// road region was last planned with.
#[derive(Resource, Default, Debug, Clone, PartialEq, Encode, Decode)]
pub struct RoadNetworkState {
    pub edges: BTreeMap<EdgeKey, RoadEdgeRecord>,
    pub planned_with: BTreeMap<u64, u32>,
}

impl RoadNetworkState {
    /// Record a newly planned edge. An edge that is already known keeps its
    /// status. Returns whether the edge was new.
    pub fn insert_planned(&mut self, region_key: u64, from: IVec3, to: IVec3) -> bool {
        let key = EdgeKey::new(from, to);
        if self.edges.contains_key(&key) {
            return false;
        }
        self.edges.insert(
            key,
            RoadEdgeRecord {
                region_key,
                from: from.to_array(),
                to: to.to_array(),
                status: EdgeStatus::Planned,
            },
        );
        true
    }

    pub fn set_status(&mut self, key: EdgeKey, status: EdgeStatus) {
        if let Some(edge) = self.edges.get_mut(&key) {
            edge.status = status;
        }
    }

    pub fn status(&self, key: EdgeKey) -> Option<EdgeStatus> {
        self.edges.get(&key).map(|e| e.status)
    }

    /// First planned edge whose region passes `ready`.
    pub fn next_buildable(&self, ready: impl Fn(u64) -> bool) -> Option<(EdgeKey, &RoadEdgeRecord)> {
        self.edges
            .iter()
            .find(|(_, e)| e.status == EdgeStatus::Planned && ready(e.region_key))
            .map(|(k, e)| (*k, e))
    }

    pub fn count(&self, status: EdgeStatus) -> usize {
        self.edges.values().filter(|e| e.status == status).count()
    }

    /// Edges interrupted mid-build go back to `Planned`. Returns how many.
    pub fn reset_building(&mut self) -> usize {
        let mut n = 0;
        for edge in self.edges.values_mut() {
            if edge.status == EdgeStatus::Building {
                edge.status = EdgeStatus::Planned;
                n += 1;
            }
        }
        n
    }
}

impl crate::Saveable for RoadNetworkState {
    const SAVE_KEY: &'static str = "road_network_state";

    fn save_to_bytes(&self) -> Option<Vec<u8>> {
        if self.edges.is_empty() && self.planned_with.is_empty() {
            return None;
        }
        Some(bitcode::encode(self))
    }

    fn load_from_bytes(bytes: &[u8]) -> Self {
        let mut state: Self = crate::decode_or_warn(Self::SAVE_KEY, bytes);
        state.reset_building();
        state
    }
}

/// The road job currently being built, if any. Never persisted.
#[derive(Resource, Default)]
pub struct RoadBuilder {
    pub job: Option<RoadJob>,
}

impl RoadBuilder {
    pub fn is_idle(&self) -> bool {
        self.job.is_none()
    }

    /// Drop the job without releasing residency, as on shutdown.
    pub fn abandon(&mut self) {
        if let Some(job) = self.job.take() {
            debug!("Road {:?} abandoned at cell {}", job.edge, job.cursor);
        }
    }
}

#[derive(Event, Debug, Clone)]
pub struct RoadEdgeFinished {
    pub edge: EdgeKey,
    pub region_key: u64,
    pub built: bool,
    pub cells: usize,
    pub edits: u64,
}
