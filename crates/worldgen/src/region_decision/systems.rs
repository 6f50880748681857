use bevy::math::IVec2;
use bevy::prelude::*;

use crate::error::{SoftReject, SubmitError};
use crate::geometry::{region_of, road_region_key};
use crate::host::{HostWorld, Participant};
use crate::params::{DecisionParams, WorldgenParams};
use crate::placement::{PlacementFailed, PlacementSucceeded};
use crate::scheduler::{submit_persisted, PendingPlacement};
use crate::template::TemplateLibrary;
use crate::TickCounter;

use super::{decide, plan, DecisionStatus, RegionDecision, RegionDecisionTable};

/// Queue every region within the observe padding of a participant.
pub fn observe_participants(
    host: Res<HostWorld>,
    params: Res<WorldgenParams>,
    mut table: ResMut<RegionDecisionTable>,
) {
    let pad = params.decision.observe_padding.max(0);
    let mut added = 0;
    for p in host.0.participants() {
        let lo = region_of(p.position.x - pad, p.position.z - pad);
        let hi = region_of(p.position.x + pad, p.position.z + pad);
        for rz in lo.y..=hi.y {
            for rx in lo.x..=hi.x {
                if table.observe(IVec2::new(rx, rz)) {
                    added += 1;
                }
            }
        }
    }
    if added > 0 {
        debug!("Observed {} new regions near participants", added);
    }
}

/// Process a bounded number of queued regions: decide Unknown entries and
/// try to place due WinPending ones.
pub fn process_decisions(world: &mut World) {
    let params = world.resource::<WorldgenParams>().decision.clone();
    let tick = world.resource::<TickCounter>().0;
    let (seed, participants) = {
        let host = &world.resource::<HostWorld>().0;
        (host.seed(), host.participants())
    };

    let mut budget = params.decisions_per_tick;
    let queued = world.resource::<RegionDecisionTable>().queue.len();
    for _ in 0..queued {
        if budget == 0 {
            break;
        }
        let Some(key) = world
            .resource_mut::<RegionDecisionTable>()
            .queue
            .pop_front()
        else {
            break;
        };
        let Some(mut entry) = world.resource::<RegionDecisionTable>().by_key(key).cloned() else {
            continue;
        };

        let requeue = match entry.status {
            DecisionStatus::Unknown => {
                budget -= 1;
                decide_entry(world, &mut entry, seed, &params);
                entry.status == DecisionStatus::WinPending
            }
            DecisionStatus::WinPending if tick < entry.next_retry_tick => true,
            DecisionStatus::WinPending => {
                budget -= 1;
                attempt_placement(world, &mut entry, seed, tick, &participants, &params)
            }
            _ => false,
        };

        let mut table = world.resource_mut::<RegionDecisionTable>();
        if let Some(slot) = table.by_key_mut(key) {
            *slot = entry;
        }
        if requeue {
            table.queue.push_back(key);
        }
    }
}

fn decide_entry(world: &World, entry: &mut RegionDecision, seed: u64, params: &DecisionParams) {
    if !decide(seed, entry.region(), params.rarity) {
        entry.status = DecisionStatus::Lose;
        return;
    }
    entry.status = DecisionStatus::WinPending;
    apply_plan(world.resource::<TemplateLibrary>(), entry, seed);
    info!(
        "Region ({}, {}) won; planned {:?} at {:?}",
        entry.region[0], entry.region[1], entry.template_id, entry.origin
    );
}

/// Fill in the plan for the entry's current salt and template offset.
fn apply_plan(library: &TemplateLibrary, entry: &mut RegionDecision, seed: u64) {
    let p = plan(
        seed,
        entry.region(),
        entry.salt,
        library.len(),
        entry.forced_offset,
    );
    entry.origin = Some(p.origin.to_array());
    match library.by_index(p.template_index) {
        Some(template) => {
            entry.template_id = Some(template.id.clone());
            entry.template_kind = Some(template.kind.clone());
        }
        None => {
            entry.template_id = None;
            entry.template_kind = None;
        }
    }
}

/// Returns whether the entry goes back on the queue.
fn attempt_placement(
    world: &mut World,
    entry: &mut RegionDecision,
    seed: u64,
    tick: u64,
    participants: &[Participant],
    params: &DecisionParams,
) -> bool {
    apply_plan(world.resource::<TemplateLibrary>(), entry, seed);
    if participants.is_empty() {
        // Nobody to measure against; wait without spending an attempt.
        return true;
    }

    let record = match validate(world, entry, participants, params) {
        Ok(record) => record,
        Err(reason) => return !entry.soft_reject(reason, tick, params),
    };
    match submit_persisted(world, record) {
        Ok(_) | Err(SubmitError::DuplicateJob(_)) => {
            entry.status = DecisionStatus::WinPlacing;
            info!(
                "Region ({}, {}) placing {:?} at {:?}",
                entry.region[0], entry.region[1], entry.template_id, entry.origin
            );
            false
        }
        Err(SubmitError::UnknownTemplate(_)) => {
            !entry.soft_reject(SoftReject::TemplateUnavailable, tick, params)
        }
    }
}

fn validate(
    world: &World,
    entry: &RegionDecision,
    participants: &[Participant],
    params: &DecisionParams,
) -> Result<PendingPlacement, SoftReject> {
    let origin = entry
        .planned_origin()
        .ok_or(SoftReject::TemplateUnavailable)?;
    let template = entry
        .template_id
        .as_deref()
        .and_then(|id| world.resource::<TemplateLibrary>().get(id))
        .ok_or(SoftReject::TemplateUnavailable)?;

    let dist2 = |a: IVec2, b: IVec2| {
        let dx = i64::from(a.x - b.x);
        let dz = i64::from(a.y - b.y);
        dx * dx + dz * dz
    };
    let min2 = i64::from(params.min_participant_distance).pow(2);
    let max2 = i64::from(params.max_participant_distance).pow(2);
    let columns = participants
        .iter()
        .map(|p| IVec2::new(p.position.x, p.position.z));
    if columns.clone().any(|c| dist2(c, origin) < min2) {
        return Err(SoftReject::TooCloseToParticipant);
    }
    if columns.clone().any(|c| dist2(c, origin) > max2) {
        return Err(SoftReject::TooFarFromParticipants);
    }

    let host = &world.resource::<HostWorld>().0;
    let (size_x, size_z) = template.footprint_size();
    let biome = host.biome_class(origin.x + size_x / 2, origin.y + size_z / 2);
    if !params.allowed_biomes.contains(&biome) {
        return Err(SoftReject::DisallowedBiome(biome));
    }

    let spacing2 = i64::from(params.min_spacing).pow(2);
    let key = entry.key();
    let crowded = world
        .resource::<RegionDecisionTable>()
        .entries
        .values()
        .filter(|other| other.key() != key)
        .filter(|other| {
            matches!(
                other.status,
                DecisionStatus::WinPlacing | DecisionStatus::WinSpawned
            )
        })
        .filter(|other| other.template_kind.as_deref() == Some(template.kind.as_str()))
        .filter_map(RegionDecision::planned_origin)
        .any(|o| dist2(o, origin) < spacing2);
    if crowded {
        return Err(SoftReject::TooCloseToStructure);
    }

    Ok(PendingPlacement {
        job_key: key,
        dimension: host.dimension_id().to_string(),
        origin: [origin.x, template.origin_elevation, origin.y],
        template_id: template.id.clone(),
        include_transparent: false,
        obey_pause: true,
        region_key: road_region_key(origin.x, origin.y),
    })
}

/// Winning placements become WinSpawned; failed ones re-plan with backoff.
pub fn handle_decision_outcomes(
    mut succeeded: EventReader<PlacementSucceeded>,
    mut failed: EventReader<PlacementFailed>,
    mut table: ResMut<RegionDecisionTable>,
    params: Res<WorldgenParams>,
    tick: Res<TickCounter>,
) {
    for PlacementSucceeded(report) in succeeded.read() {
        let Some(key) = report.job_key else {
            continue;
        };
        if let Some(entry) = table.by_key_mut(key.0) {
            if entry.status == DecisionStatus::WinPlacing {
                entry.status = DecisionStatus::WinSpawned;
                info!(
                    "Region ({}, {}) spawned '{}'",
                    entry.region[0], entry.region[1], report.template_id
                );
            }
        }
    }

    for PlacementFailed(report) in failed.read() {
        let Some(key) = report.job_key else {
            continue;
        };
        let Some(entry) = table.by_key_mut(key.0) else {
            continue;
        };
        if entry.status != DecisionStatus::WinPlacing {
            continue;
        }
        if !entry.soft_reject(SoftReject::TaskFailed, tick.0, &params.decision) {
            table.enqueue(key.0);
        }
    }
}
