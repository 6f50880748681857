// ---------------------------------------------------------------------------
// Save migration logic
// ---------------------------------------------------------------------------
//
// Concrete migration steps, assembled by `build_migration_registry()` which
// validates that every version transition up to CURRENT_SAVE_VERSION is
// covered.

use std::collections::{BTreeMap, VecDeque};

use bitcode::{Decode, Encode};
use worldgen::region_decision::{DecisionStatus, RegionDecision, RegionDecisionTable};

use crate::save_error::SaveError;
pub use crate::save_migrate_registry::MigrationReport;
use crate::save_migrate_registry::{MigrationRegistry, MigrationStep};
use crate::save_types::{WorldgenSave, CURRENT_SAVE_VERSION};

const REGION_DECISIONS_KEY: &str = "region_decisions";

/// Region decision entry as v1 saves stored it.
#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct V1RegionDecision {
    pub region: [i32; 2],
    pub status: DecisionStatus,
    pub salt: u32,
    pub attempts: u32,
    pub next_retry_tick: u64,
    pub forced_offset: u32,
    pub template_id: Option<String>,
    pub template_kind: Option<String>,
    pub origin: Option<[i32; 2]>,
}

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct V1RegionDecisionTable {
    pub schema_version: u32,
    pub entries: BTreeMap<u64, V1RegionDecision>,
    pub queue: VecDeque<u64>,
}

/// v1 -> v2: re-encode the decision table with `task_failures` set to zero.
/// Earlier failures were folded into `attempts` and cannot be told apart.
fn add_task_failures(save: &mut WorldgenSave) -> Result<(), SaveError> {
    let Some(bytes) = save.extensions.get(REGION_DECISIONS_KEY) else {
        return Ok(());
    };
    let old: V1RegionDecisionTable = bitcode::decode(bytes).map_err(|e| {
        SaveError::MigrationFailed(format!(
            "'{REGION_DECISIONS_KEY}' is not a v1 decision table: {e}"
        ))
    })?;
    let entries = old
        .entries
        .into_iter()
        .map(|(key, e)| {
            let entry = RegionDecision {
                region: e.region,
                status: e.status,
                salt: e.salt,
                attempts: e.attempts,
                task_failures: 0,
                next_retry_tick: e.next_retry_tick,
                forced_offset: e.forced_offset,
                template_id: e.template_id,
                template_kind: e.template_kind,
                origin: e.origin,
            };
            (key, entry)
        })
        .collect();
    let table = RegionDecisionTable {
        schema_version: old.schema_version,
        entries,
        queue: old.queue,
    };
    save.extensions
        .insert(REGION_DECISIONS_KEY.to_string(), bitcode::encode(&table));
    Ok(())
}

pub(crate) fn build_migration_registry() -> MigrationRegistry {
    let steps = vec![
        // v0 -> v1: headerless saves from before versioning.
        MigrationStep {
            from_version: 0,
            description: "Unversioned save -> v1 baseline",
            migrate_fn: |_save| Ok(()),
        },
        MigrationStep {
            from_version: 1,
            description: "Add task_failures to region decisions",
            migrate_fn: add_task_failures,
        },
    ];

    MigrationRegistry::new(steps, CURRENT_SAVE_VERSION)
}

/// Migrate `save` in place to the current version and report what ran.
pub fn migrate_save(save: &mut WorldgenSave) -> Result<MigrationReport, SaveError> {
    build_migration_registry().migrate(save)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v1_decision(region: [i32; 2], status: DecisionStatus) -> V1RegionDecision {
        V1RegionDecision {
            region,
            status,
            salt: 3,
            attempts: 3,
            next_retry_tick: 400,
            forced_offset: 1,
            template_id: Some("hut".into()),
            template_kind: Some("hut".into()),
            origin: Some([40, 50]),
        }
    }

    fn v1_with(extensions: &[(&str, Vec<u8>)]) -> WorldgenSave {
        WorldgenSave {
            version: 1,
            extensions: extensions
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }

    #[test]
    fn test_v1_decisions_gain_task_failures() {
        let old = V1RegionDecisionTable {
            schema_version: 1,
            entries: BTreeMap::from([
                (7, v1_decision([0, 0], DecisionStatus::WinPending)),
                (9, v1_decision([1, 0], DecisionStatus::WinSpawned)),
            ]),
            queue: VecDeque::from([7]),
        };
        let mut save = v1_with(&[
            ("region_decisions", bitcode::encode(&old)),
            ("footprints", vec![1, 2]),
        ]);
        let report = migrate_save(&mut save).expect("migrates");

        assert_eq!(report.steps_applied, 1);
        assert_eq!(save.version, CURRENT_SAVE_VERSION);
        assert_eq!(save.extensions["footprints"], vec![1, 2]);
        let table: RegionDecisionTable =
            bitcode::decode(&save.extensions["region_decisions"]).expect("v2 layout");
        assert_eq!(table.entries.len(), 2);
        assert_eq!(table.queue, VecDeque::from([7]));
        let entry = &table.entries[&7];
        assert_eq!(entry.status, DecisionStatus::WinPending);
        assert_eq!((entry.attempts, entry.task_failures), (3, 0));
        assert_eq!(entry.next_retry_tick, 400);
        assert_eq!(entry.origin, Some([40, 50]));
        assert_eq!(table.entries[&9].status, DecisionStatus::WinSpawned);
    }

    #[test]
    fn test_save_without_decisions_migrates_cleanly() {
        let mut save = v1_with(&[("tick_counter", vec![1, 2])]);
        migrate_save(&mut save).expect("migrates");
        assert_eq!(save.extensions.len(), 1);
        assert_eq!(save.extensions["tick_counter"], vec![1, 2]);
    }

    #[test]
    fn test_undecodable_v1_decisions_fail() {
        let mut save = v1_with(&[("region_decisions", Vec::new())]);
        assert!(matches!(
            migrate_save(&mut save),
            Err(SaveError::MigrationFailed(_))
        ));
    }
}
