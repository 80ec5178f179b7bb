use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::migration::alias::AliasTable;
use crate::migration::definition::{MigrationDefinition, SlotMatch};
use crate::migration::entity::{BackstorySlot, EntitySnapshot, PostProcessOutcome, SlotReplacement};
use crate::migration::error::MigrationError;
use crate::migration::state::LoadSummary;
use crate::primitives::DefinitionCatalog;

/// Bookkeeping for a single load attempt.
///
/// Created by `pre_load`, consumed by `post_load` or dropped by `abort_load`. Nothing in here
/// outlives the load.
#[derive(Debug)]
pub struct ActiveSession {
    started_at: DateTime<Utc>,
    active: Vec<Arc<MigrationDefinition>>,
    processed: HashSet<String>,
    claimed_slots: HashSet<(String, BackstorySlot)>,
    regeneration_order: Vec<String>,
    regeneration_triggers: HashMap<String, HashSet<String>>,
    summary: LoadSummary,
}

/// An entity queued for regeneration, with the packages whose rules queued it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedRegeneration {
    pub entity_id: String,
    pub packages: HashSet<String>,
}

impl ActiveSession {
    /// Starts a session over `active`, which must be in registration order.
    #[must_use]
    pub fn new(active: Vec<Arc<MigrationDefinition>>, started_at: DateTime<Utc>) -> Self {
        let summary = LoadSummary {
            active_migrations: u32::try_from(active.len()).unwrap_or(u32::MAX),
            ..LoadSummary::default()
        };
        Self {
            started_at,
            active,
            processed: HashSet::new(),
            claimed_slots: HashSet::new(),
            regeneration_order: Vec::new(),
            regeneration_triggers: HashMap::new(),
            summary,
        }
    }

    #[must_use]
    pub fn active(&self) -> &[Arc<MigrationDefinition>] {
        &self.active
    }

    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// First active replacement for `old_identifier` whose target exists in `catalog`.
    ///
    /// Targets missing from the catalog are logged and counted, and the scan moves on to the
    /// next definition.
    pub fn rename(
        &mut self,
        category: &str,
        old_identifier: &str,
        catalog: &dyn DefinitionCatalog,
        log_rewrites: bool,
    ) -> Option<String> {
        let mut resolved = None;
        for definition in &self.active {
            let Some(new_identifier) = definition.replacement_for(category, old_identifier) else {
                continue;
            };
            if catalog.contains(category.to_string(), new_identifier.to_string()) {
                if log_rewrites {
                    crate::info!(
                        "identifier.renamed category={} from={} to={} migration={}/{}",
                        category,
                        old_identifier,
                        new_identifier,
                        definition.owning_package_id(),
                        definition.id()
                    );
                }
                resolved = Some(new_identifier.to_string());
                break;
            }
            self.summary.unresolved_references += 1;
            log_unresolved(category, new_identifier, definition);
        }

        if resolved.is_some() {
            self.summary.renamed_identifiers += 1;
        }
        resolved
    }

    /// Applies the first matching paired-field rule to `slot` of `entity_id`.
    ///
    /// `replaceMissing` is tried before `replaceOpposing` within each definition. At most one
    /// replacement is produced per target slot per entity; later matches for a claimed slot
    /// are ignored.
    pub fn replace_backstory(
        &mut self,
        entity_id: &str,
        slot: BackstorySlot,
        slot_value: &str,
        counterpart_value: Option<&str>,
        catalog: &dyn DefinitionCatalog,
        log_rewrites: bool,
    ) -> Option<SlotReplacement> {
        let mut found: Option<(SlotReplacement, String)> = None;
        for definition in &self.active {
            let Some(paired) = definition.paired() else {
                continue;
            };
            let (target_slot, value) = match paired.match_slot(slot_value) {
                Some(SlotMatch::Missing(value)) => (slot, value),
                Some(SlotMatch::Opposing(value)) => (slot.counterpart(), value),
                None => continue,
            };

            if target_slot != slot && counterpart_value == Some(value) {
                crate::debug!(
                    "backstory.already_set entity={} slot={:?} value={}",
                    entity_id,
                    target_slot,
                    value
                );
                continue;
            }
            if !catalog.has_backstory(value.to_string()) {
                self.summary.unresolved_references += 1;
                log_unresolved("BackstoryDef", value, definition);
                continue;
            }
            found = Some((
                SlotReplacement {
                    target_slot,
                    value: value.to_string(),
                },
                definition.owning_package_id().to_string(),
            ));
            break;
        }

        let (replacement, package_id) = found?;
        if !self
            .claimed_slots
            .insert((entity_id.to_string(), replacement.target_slot))
        {
            crate::debug!(
                "backstory.slot_already_replaced entity={} slot={:?}",
                entity_id,
                replacement.target_slot
            );
            return None;
        }
        if self.processed.contains(entity_id) {
            crate::warn!(
                "backstory.late_resolution entity={} slot={:?}",
                entity_id,
                replacement.target_slot
            );
        }

        if log_rewrites {
            crate::info!(
                "backstory.replaced entity={} resolved={:?} from={} target={:?} to={} package={}",
                entity_id,
                slot,
                slot_value,
                replacement.target_slot,
                replacement.value,
                package_id
            );
        }
        self.summary.replaced_slots += 1;
        self.schedule_regeneration(entity_id, &package_id);
        Some(replacement)
    }

    /// Runs the per-entity post-construction step once per entity.
    pub fn post_process(
        &mut self,
        snapshot: &EntitySnapshot,
        aliases: &AliasTable,
    ) -> PostProcessOutcome {
        if !self.processed.insert(snapshot.entity_id.clone()) {
            return PostProcessOutcome {
                already_processed: true,
                ..PostProcessOutcome::default()
            };
        }

        let corrected_category = snapshot.stale_category().map(str::to_string);
        if let Some(category) = &corrected_category {
            self.summary.corrected_categories += 1;
            crate::info!(
                "entity.category_corrected entity={} from={} to={}",
                snapshot.entity_id,
                snapshot.recorded_category.as_deref().unwrap_or_default(),
                category
            );
            match snapshot
                .canonical_entity_id
                .as_deref()
                .filter(|id| *id != snapshot.entity_id)
            {
                Some(canonical_id) => {
                    aliases.add_alias(snapshot.entity_id.clone(), canonical_id.to_string());
                }
                None => {
                    crate::warn!("entity.alias_missing entity={}", snapshot.entity_id);
                }
            }
        }

        let forced_by = self.active.iter().find_map(|definition| {
            let paired = definition.paired()?;
            snapshot
                .slot_values()
                .any(|value| paired.forces_regeneration(value))
                .then(|| definition.owning_package_id().to_string())
        });
        if let Some(package_id) = forced_by {
            self.schedule_regeneration(&snapshot.entity_id, &package_id);
        }

        PostProcessOutcome {
            already_processed: false,
            corrected_category,
            regeneration_scheduled: self
                .regeneration_triggers
                .contains_key(&snapshot.entity_id),
        }
    }

    /// Queues `entity_id` for regeneration on behalf of `package_id`.
    pub fn schedule_regeneration(&mut self, entity_id: &str, package_id: &str) {
        if !self.regeneration_triggers.contains_key(entity_id) {
            self.regeneration_order.push(entity_id.to_string());
        }
        self.regeneration_triggers
            .entry(entity_id.to_string())
            .or_default()
            .insert(package_id.to_string());
    }

    /// Drains the regeneration queue in the order entities were first queued.
    pub fn take_regenerations(&mut self) -> Vec<QueuedRegeneration> {
        let mut triggers = std::mem::take(&mut self.regeneration_triggers);
        std::mem::take(&mut self.regeneration_order)
            .into_iter()
            .map(|entity_id| QueuedRegeneration {
                packages: triggers.remove(&entity_id).unwrap_or_default(),
                entity_id,
            })
            .collect()
    }

    pub fn summary_mut(&mut self) -> &mut LoadSummary {
        &mut self.summary
    }

    /// Finishes the session and returns its counters.
    #[must_use]
    pub fn into_summary(self) -> LoadSummary {
        self.summary
    }
}

fn log_unresolved(category: &str, identifier: &str, definition: &MigrationDefinition) {
    let err = MigrationError::UnresolvedReference {
        category: category.to_string(),
        identifier: identifier.to_string(),
    };
    crate::warn!(
        "reference.unresolved error_code={} error={} migration={}/{}",
        err.code(),
        err,
        definition.owning_package_id(),
        definition.id()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Catalog;

    impl DefinitionCatalog for Catalog {
        fn has_category(&self, _category: String) -> bool {
            true
        }

        fn contains(&self, _category: String, identifier: String) -> bool {
            identifier != "Missing"
        }

        fn has_backstory(&self, identifier: String) -> bool {
            identifier != "Missing"
        }
    }

    fn definition(json: &str) -> Arc<MigrationDefinition> {
        Arc::new(MigrationDefinition::from_json(json, None, &[]).unwrap())
    }

    fn session(definitions: &[&str]) -> ActiveSession {
        ActiveSession::new(
            definitions.iter().map(|json| definition(json)).collect(),
            Utc::now(),
        )
    }

    const PAIRED: &str = r#"{
        "id": "b1", "owningPackageId": "modA",
        "backstory": {
            "update": ["Refugee"],
            "replaceMissing": { "C1": "C2" },
            "replaceOpposing": { "A1": "A2", "C1": "C3" }
        }
    }"#;

    #[test]
    fn test_first_definition_wins_and_missing_targets_are_skipped() {
        let mut session = session(&[
            r#"{ "id": "m1", "owningPackageId": "modA",
                 "renames": [{ "category": "ThingDef", "replacements": { "Foo": "Missing" } }] }"#,
            r#"{ "id": "m2", "owningPackageId": "modA",
                 "renames": [{ "category": "ThingDef", "replacements": { "Foo": "Bar" } }] }"#,
            r#"{ "id": "m3", "owningPackageId": "modA",
                 "renames": [{ "category": "ThingDef", "replacements": { "Foo": "Baz" } }] }"#,
        ]);
        assert_eq!(
            session.rename("ThingDef", "Foo", &Catalog, false),
            Some("Bar".to_string())
        );
        assert_eq!(session.rename("PawnKindDef", "Foo", &Catalog, false), None);

        let summary = session.into_summary();
        assert_eq!(summary.renamed_identifiers, 1);
        assert_eq!(summary.unresolved_references, 1);
        assert_eq!(summary.active_migrations, 3);
    }

    #[test]
    fn test_replace_missing_takes_precedence() {
        let mut session = session(&[PAIRED]);
        let replacement =
            session.replace_backstory("Human_1", BackstorySlot::Childhood, "C1", Some("A1"), &Catalog, false);
        assert_eq!(
            replacement,
            Some(SlotReplacement {
                target_slot: BackstorySlot::Childhood,
                value: "C2".to_string(),
            })
        );
    }

    #[test]
    fn test_opposing_rule_targets_counterpart_and_queues_regeneration() {
        let mut session = session(&[PAIRED]);
        let replacement =
            session.replace_backstory("Human_1", BackstorySlot::Childhood, "A1", None, &Catalog, false);
        assert_eq!(
            replacement,
            Some(SlotReplacement {
                target_slot: BackstorySlot::Adulthood,
                value: "A2".to_string(),
            })
        );

        let queued = session.take_regenerations();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].entity_id, "Human_1");
        assert!(queued[0].packages.contains("modA"));
    }

    #[test]
    fn test_one_replacement_per_slot() {
        let mut session = session(&[PAIRED]);
        assert!(session
            .replace_backstory("Human_1", BackstorySlot::Childhood, "A1", None, &Catalog, false)
            .is_some());
        // Adulthood already received A2; a second write into it is refused.
        assert_eq!(
            session.replace_backstory("Human_1", BackstorySlot::Childhood, "A1", None, &Catalog, false),
            None
        );
        assert!(session
            .replace_backstory("Human_2", BackstorySlot::Childhood, "A1", None, &Catalog, false)
            .is_some());
    }

    #[test]
    fn test_opposing_rule_is_skipped_when_counterpart_already_holds_value() {
        let mut session = session(&[PAIRED]);
        assert_eq!(
            session.replace_backstory("Human_1", BackstorySlot::Adulthood, "A1", Some("A2"), &Catalog, false),
            None
        );
        assert!(session.take_regenerations().is_empty());
    }

    #[test]
    fn test_counterpart_match_falls_through_to_later_definition() {
        let mut session = session(&[
            r#"{ "id": "b1", "owningPackageId": "modA",
                 "backstory": { "replaceOpposing": { "X": "Y" } } }"#,
            r#"{ "id": "b2", "owningPackageId": "modA",
                 "backstory": { "replaceMissing": { "X": "Z" } } }"#,
        ]);
        assert_eq!(
            session.replace_backstory("Human_1", BackstorySlot::Childhood, "X", Some("Y"), &Catalog, false),
            Some(SlotReplacement {
                target_slot: BackstorySlot::Childhood,
                value: "Z".to_string(),
            })
        );
    }

    #[test]
    fn test_alias_requires_category_correction() {
        let mut session = session(&[PAIRED]);
        let aliases = AliasTable::default();

        let current = EntitySnapshot {
            entity_id: "Human_1".to_string(),
            recorded_category: Some("Human".to_string()),
            canonical_category: Some("Human".to_string()),
            canonical_entity_id: Some("Human_1b".to_string()),
            ..EntitySnapshot::default()
        };
        let outcome = session.post_process(&current, &aliases);
        assert_eq!(outcome.corrected_category, None);
        assert!(aliases.is_empty());
        assert_eq!(aliases.resolve("Human_1".to_string()), "Human_1");

        let stale_without_canonical_id = EntitySnapshot {
            entity_id: "Human_2".to_string(),
            recorded_category: Some("Animal".to_string()),
            canonical_category: Some("Human".to_string()),
            ..EntitySnapshot::default()
        };
        let outcome = session.post_process(&stale_without_canonical_id, &aliases);
        assert_eq!(outcome.corrected_category.as_deref(), Some("Human"));
        assert!(aliases.is_empty());
    }

    #[test]
    fn test_post_process_runs_once_per_entity() {
        let mut session = session(&[PAIRED]);
        let aliases = AliasTable::default();
        let snapshot = EntitySnapshot {
            entity_id: "Human_1".to_string(),
            recorded_category: Some("Animal".to_string()),
            canonical_category: Some("Human".to_string()),
            canonical_entity_id: Some("Human_1b".to_string()),
            childhood: Some("Refugee".to_string()),
            adulthood: None,
        };

        let first = session.post_process(&snapshot, &aliases);
        assert!(!first.already_processed);
        assert_eq!(first.corrected_category.as_deref(), Some("Human"));
        assert!(first.regeneration_scheduled);
        assert_eq!(aliases.resolve("Human_1".to_string()), "Human_1b");

        let second = session.post_process(&snapshot, &aliases);
        assert!(second.already_processed);
        assert_eq!(second.corrected_category, None);

        assert_eq!(session.take_regenerations().len(), 1);
        assert_eq!(session.into_summary().corrected_categories, 1);
    }
}
