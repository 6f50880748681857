// ---------------------------------------------------------------------------
// Save migration registry: structured, validated migration chain
// ---------------------------------------------------------------------------
//
// Each migration step transforms a save from version N to version N+1. The
// registry validates at construction time that the chain is contiguous (no
// gaps, no duplicates).

use crate::save_error::SaveError;
use crate::save_types::WorldgenSave;

/// A single migration step: transforms a save from `from_version` to `from_version + 1`.
pub(crate) struct MigrationStep {
    pub from_version: u32,
    pub description: &'static str,
    pub migrate_fn: fn(&mut WorldgenSave) -> Result<(), SaveError>,
}

/// Result of running the migration chain on a save file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub original_version: u32,
    pub final_version: u32,
    pub steps_applied: u32,
    /// Descriptions of each step that was applied, in order.
    pub step_descriptions: Vec<&'static str>,
}

/// Registry holding an ordered, validated chain of migration steps.
pub(crate) struct MigrationRegistry {
    steps: Vec<MigrationStep>,
    current_version: u32,
}

impl MigrationRegistry {
    /// Build a registry from a list of migration steps.
    ///
    /// # Panics
    ///
    /// Panics if the chain has duplicate source versions or does not cover
    /// every version from 0 to `current_version - 1`.
    pub fn new(mut steps: Vec<MigrationStep>, current_version: u32) -> Self {
        let mut seen = std::collections::HashSet::new();
        for step in &steps {
            assert!(
                seen.insert(step.from_version),
                "Duplicate migration step for version {}",
                step.from_version
            );
        }

        for v in 0..current_version {
            assert!(
                seen.contains(&v),
                "Missing migration step from v{} to v{}. The migration chain must be \
                 contiguous from v0 to v{}.",
                v,
                v + 1,
                current_version.saturating_sub(1)
            );
        }

        steps.sort_by_key(|s| s.from_version);
        Self {
            steps,
            current_version,
        }
    }

    /// Bring `save` up to the current version.
    ///
    /// # Errors
    ///
    /// `VersionMismatch` if the save is from a future version; whatever a
    /// failing step returns otherwise. On error `save.version` is left at the
    /// last version that applied cleanly.
    pub fn migrate(&self, save: &mut WorldgenSave) -> Result<MigrationReport, SaveError> {
        let original_version = save.version;

        if save.version > self.current_version {
            return Err(SaveError::VersionMismatch {
                expected_max: self.current_version,
                found: save.version,
            });
        }

        let mut report = MigrationReport {
            original_version,
            ..Default::default()
        };

        for step in &self.steps {
            if save.version >= self.current_version {
                break;
            }
            if step.from_version == save.version {
                (step.migrate_fn)(save)?;
                save.version = step.from_version + 1;
                report.steps_applied += 1;
                report.step_descriptions.push(step.description);
            }
        }

        debug_assert_eq!(save.version, self.current_version);
        report.final_version = save.version;
        Ok(report)
    }

    #[cfg(test)]
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    #[cfg(test)]
    pub fn current_version(&self) -> u32 {
        self.current_version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::save_migrate::build_migration_registry;
    use crate::save_types::CURRENT_SAVE_VERSION;

    fn save_at(version: u32) -> WorldgenSave {
        WorldgenSave {
            version,
            ..Default::default()
        }
    }

    #[test]
    fn test_registry_covers_every_version() {
        let registry = build_migration_registry();
        assert_eq!(registry.step_count() as u32, CURRENT_SAVE_VERSION);
        assert_eq!(registry.current_version(), CURRENT_SAVE_VERSION);
    }

    #[test]
    fn test_registry_rejects_future_version() {
        let registry = build_migration_registry();
        let mut save = save_at(CURRENT_SAVE_VERSION + 1);
        assert!(matches!(
            registry.migrate(&mut save),
            Err(SaveError::VersionMismatch { found, .. }) if found == CURRENT_SAVE_VERSION + 1
        ));
    }

    #[test]
    fn test_registry_noop_for_current_version() {
        let registry = build_migration_registry();
        let mut save = save_at(CURRENT_SAVE_VERSION);
        let report = registry.migrate(&mut save).expect("migrates");
        assert_eq!(report.original_version, CURRENT_SAVE_VERSION);
        assert_eq!(report.final_version, CURRENT_SAVE_VERSION);
        assert_eq!(report.steps_applied, 0);
        assert!(report.step_descriptions.is_empty());
    }

    #[test]
    fn test_registry_migrates_from_v0() {
        let registry = build_migration_registry();
        let mut save = save_at(0);
        let report = registry.migrate(&mut save).expect("migrates");
        assert_eq!(report.final_version, CURRENT_SAVE_VERSION);
        assert_eq!(report.steps_applied, CURRENT_SAVE_VERSION);
        assert_eq!(report.step_descriptions.len(), CURRENT_SAVE_VERSION as usize);
    }

    #[test]
    fn test_failing_step_stops_the_chain() {
        let registry = MigrationRegistry::new(
            vec![
                MigrationStep {
                    from_version: 0,
                    description: "ok",
                    migrate_fn: |_| Ok(()),
                },
                MigrationStep {
                    from_version: 1,
                    description: "broken",
                    migrate_fn: |_| Err(SaveError::MigrationFailed("broken".into())),
                },
            ],
            2,
        );
        let mut save = save_at(0);
        assert!(matches!(
            registry.migrate(&mut save),
            Err(SaveError::MigrationFailed(_))
        ));
        assert_eq!(save.version, 1);
    }

    #[test]
    #[should_panic(expected = "Duplicate migration step")]
    fn test_registry_rejects_duplicate_steps() {
        let steps = vec![
            MigrationStep {
                from_version: 0,
                description: "first",
                migrate_fn: |_| Ok(()),
            },
            MigrationStep {
                from_version: 0,
                description: "duplicate",
                migrate_fn: |_| Ok(()),
            },
        ];
        MigrationRegistry::new(steps, 1);
    }

    #[test]
    #[should_panic(expected = "Missing migration step")]
    fn test_registry_rejects_gaps() {
        let steps = vec![
            MigrationStep {
                from_version: 0,
                description: "v0->v1",
                migrate_fn: |_| Ok(()),
            },
            MigrationStep {
                from_version: 2,
                description: "v2->v3",
                migrate_fn: |_| Ok(()),
            },
        ];
        MigrationRegistry::new(steps, 3);
    }
}
