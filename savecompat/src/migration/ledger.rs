use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::migration::error::{MigrationError, MigrationResult};
use crate::primitives::current_config;
use crate::savecompat_export;

/// Name of the section of the host's save document that holds the ledger.
pub const LEDGER_SECTION_KEY: &str = "saveCompatibility";

/// Migrations already applied for one package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, uniffi::Record)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    /// Owning package id.
    pub package_id: String,
    /// Applied migration ids, in the order they were applied.
    pub migration_ids: Vec<String>,
}

/// Persisted layout of the ledger section.
///
/// `checksum` is the lowercase hex BLAKE3 hash of the serialized `entries`; it is how hand
/// edits and truncated writes are told apart from a genuine ledger.
#[derive(Debug, Serialize, Deserialize)]
struct LedgerSection {
    entries: Vec<LedgerEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    checksum: Option<String>,
}

impl LedgerSection {
    fn seal(entries: Vec<LedgerEntry>) -> MigrationResult<Self> {
        let checksum = Some(checksum_hex(&entries)?);
        Ok(Self { entries, checksum })
    }

    fn verify(&self, require_checksum: bool) -> MigrationResult<()> {
        match &self.checksum {
            Some(expected) => {
                let computed = checksum_hex(&self.entries)?;
                if computed.eq_ignore_ascii_case(expected) {
                    Ok(())
                } else {
                    Err(MigrationError::LedgerCorrupted {
                        reason: format!("checksum mismatch (stored {expected}, computed {computed})"),
                    })
                }
            }
            None if require_checksum => Err(MigrationError::LedgerCorrupted {
                reason: "missing checksum".to_string(),
            }),
            None => {
                crate::warn!("ledger.unsealed_section entries={}", self.entries.len());
                Ok(())
            }
        }
    }
}

fn checksum_hex(entries: &[LedgerEntry]) -> MigrationResult<String> {
    let serialized = serde_json::to_vec(entries)?;
    Ok(hex::encode(blake3::hash(&serialized).as_bytes()))
}

/// Per-save record of which migrations already ran for which package.
///
/// Loaded with the save, appended to when a load finalizes, pruned right before the save is
/// written. An applied migration never becomes unapplied except when its whole package
/// entry is pruned.
#[derive(Debug, Default, uniffi::Object)]
pub struct MigrationLedger {
    entries: Mutex<Vec<LedgerEntry>>,
}

#[savecompat_export]
impl MigrationLedger {
    /// Creates an empty ledger (the state of a new game).
    #[uniffi::constructor]
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Restores a ledger from its persisted section. `None` (section absent) is an empty
    /// ledger.
    ///
    /// # Errors
    /// - `MigrationError::JsonError` if the section is not valid JSON.
    /// - `MigrationError::LedgerCorrupted` if the checksum does not match.
    #[uniffi::constructor]
    pub fn from_section_json(section_json: Option<String>) -> Result<Arc<Self>, MigrationError> {
        let ledger = Self::default();
        ledger.restore_section(section_json)?;
        Ok(Arc::new(ledger))
    }

    /// Whether `migration_id` has been applied for `package_id`.
    #[must_use]
    pub fn has_applied(&self, package_id: String, migration_id: String) -> bool {
        self.is_applied(&package_id, &migration_id)
    }

    /// Records `migration_id` as applied for `package_id`. Idempotent.
    ///
    /// Returns `true` if the migration was not recorded before.
    pub fn mark_applied(&self, package_id: String, migration_id: String) -> bool {
        let mut entries = self.lock();
        match entries.iter_mut().find(|entry| entry.package_id == package_id) {
            Some(entry) if entry.migration_ids.contains(&migration_id) => false,
            Some(entry) => {
                entry.migration_ids.push(migration_id);
                true
            }
            None => {
                entries.push(LedgerEntry {
                    package_id,
                    migration_ids: vec![migration_id],
                });
                true
            }
        }
    }

    /// Drops package entries that are no longer relevant to this save lineage.
    ///
    /// An entry is removed when its migration set is empty or its package is not in
    /// `present_package_ids`. Entries for present packages are never touched. Returns the
    /// removed package ids.
    ///
    /// Call immediately before serialization, never during a load.
    pub fn prune(&self, present_package_ids: Vec<String>) -> Vec<String> {
        let present: HashSet<String> = present_package_ids.into_iter().collect();
        self.prune_with(&present)
    }

    /// Snapshot of every entry, in persisted order.
    #[must_use]
    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.lock().clone()
    }

    /// Serializes the ledger as a sealed section for the host's save document.
    ///
    /// # Errors
    /// Returns `MigrationError::JsonError` if serialization fails.
    pub fn to_section_json(&self) -> Result<String, MigrationError> {
        let section = LedgerSection::seal(self.entries())?;
        Ok(serde_json::to_string(&section)?)
    }

    /// Replaces the contents with a persisted section. `None` empties the ledger.
    ///
    /// On any error the ledger is left empty, so pending migrations re-run rather than
    /// being silently skipped on the strength of a ledger that cannot be trusted.
    ///
    /// # Errors
    /// - `MigrationError::JsonError` if the section is not valid JSON.
    /// - `MigrationError::LedgerCorrupted` if the checksum does not match.
    pub fn restore_section(&self, section_json: Option<String>) -> Result<(), MigrationError> {
        let mut entries = self.lock();
        entries.clear();

        let Some(json) = section_json.filter(|json| !json.trim().is_empty()) else {
            return Ok(());
        };

        let section: LedgerSection = serde_json::from_str(&json)?;
        section.verify(current_config().require_ledger_checksum)?;
        *entries = merge_entries(section.entries);
        Ok(())
    }

    /// Empties the ledger (new game).
    pub fn reset(&self) {
        self.lock().clear();
    }

    /// Whether no migration is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl MigrationLedger {
    /// Borrowing form of [`MigrationLedger::has_applied`].
    #[must_use]
    pub fn is_applied(&self, package_id: &str, migration_id: &str) -> bool {
        self.lock().iter().any(|entry| {
            entry.package_id == package_id && entry.migration_ids.iter().any(|id| id == migration_id)
        })
    }

    /// Package ids that currently have an entry.
    #[must_use]
    pub fn package_ids(&self) -> HashSet<String> {
        self.lock()
            .iter()
            .map(|entry| entry.package_id.clone())
            .collect()
    }

    /// Borrowing form of [`MigrationLedger::prune`].
    pub fn prune_with(&self, present_package_ids: &HashSet<String>) -> Vec<String> {
        let mut removed = Vec::new();
        self.lock().retain(|entry| {
            let keep = !entry.migration_ids.is_empty()
                && present_package_ids.contains(&entry.package_id);
            if !keep {
                crate::info!(
                    "ledger.pruned package={} migrations={}",
                    entry.package_id,
                    entry.migration_ids.len()
                );
                removed.push(entry.package_id.clone());
            }
            keep
        });
        removed
    }

    fn lock(&self) -> MutexGuard<'_, Vec<LedgerEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Folds repeated package entries together and drops repeated migration ids, keeping
/// first-seen order.
fn merge_entries(raw: Vec<LedgerEntry>) -> Vec<LedgerEntry> {
    let mut merged: Vec<LedgerEntry> = Vec::with_capacity(raw.len());
    for entry in raw {
        let target = match merged.iter().position(|m| m.package_id == entry.package_id) {
            Some(index) => &mut merged[index],
            None => {
                merged.push(LedgerEntry {
                    package_id: entry.package_id,
                    migration_ids: Vec::new(),
                });
                let last = merged.len() - 1;
                &mut merged[last]
            }
        };
        for id in entry.migration_ids {
            if !target.migration_ids.contains(&id) {
                target.migration_ids.push(id);
            }
        }
    }
    merged
}

/// Name of the save-document section that holds the ledger.
#[uniffi::export]
#[must_use]
pub fn ledger_section_key() -> String {
    LEDGER_SECTION_KEY.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_applied_is_idempotent() {
        let ledger = MigrationLedger::new();
        assert!(ledger.mark_applied("modA".to_string(), "m1".to_string()));
        assert!(!ledger.mark_applied("modA".to_string(), "m1".to_string()));
        assert!(ledger.has_applied("modA".to_string(), "m1".to_string()));
        assert!(!ledger.has_applied("modA".to_string(), "m2".to_string()));
        assert!(!ledger.has_applied("modB".to_string(), "m1".to_string()));
        assert_eq!(
            ledger.entries(),
            vec![LedgerEntry {
                package_id: "modA".to_string(),
                migration_ids: vec!["m1".to_string()],
            }]
        );
    }

    #[test]
    fn test_section_roundtrip_preserves_order() {
        let ledger = MigrationLedger::new();
        ledger.mark_applied("modB".to_string(), "x2".to_string());
        ledger.mark_applied("modA".to_string(), "m1".to_string());
        ledger.mark_applied("modB".to_string(), "x1".to_string());

        let json = ledger.to_section_json().unwrap();
        let restored = MigrationLedger::from_section_json(Some(json)).unwrap();
        assert_eq!(restored.entries(), ledger.entries());
        assert_eq!(restored.entries()[0].migration_ids, vec!["x2", "x1"]);
    }

    #[test]
    fn test_absent_section_is_empty_ledger() {
        let ledger = MigrationLedger::from_section_json(None).unwrap();
        assert!(ledger.is_empty());
        let ledger = MigrationLedger::from_section_json(Some("   ".to_string())).unwrap();
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_tampered_section_is_rejected_and_ledger_left_empty() {
        let ledger = MigrationLedger::new();
        ledger.mark_applied("modA".to_string(), "m1".to_string());
        let json = ledger.to_section_json().unwrap();
        let tampered = json.replace("m1", "m9");

        let target = MigrationLedger::new();
        target.mark_applied("modZ".to_string(), "z1".to_string());
        let result = target.restore_section(Some(tampered));
        assert!(matches!(result, Err(MigrationError::LedgerCorrupted { .. })));
        assert!(target.is_empty());
    }

    #[test]
    fn test_garbage_section_is_json_error() {
        let result = MigrationLedger::from_section_json(Some("{\"entries\": [".to_string()));
        assert!(matches!(result, Err(MigrationError::JsonError { .. })));
    }

    #[test]
    fn test_unsealed_section_is_accepted_by_default() {
        let json = r#"{"entries":[{"packageId":"modA","migrationIds":["m1","m1"]},{"packageId":"modA","migrationIds":["m2"]}]}"#;
        let ledger = MigrationLedger::from_section_json(Some(json.to_string())).unwrap();
        assert_eq!(
            ledger.entries(),
            vec![LedgerEntry {
                package_id: "modA".to_string(),
                migration_ids: vec!["m1".to_string(), "m2".to_string()],
            }]
        );
    }

    #[test]
    fn test_prune_keeps_present_package() {
        let ledger = MigrationLedger::new();
        ledger.mark_applied("modA".to_string(), "gone".to_string());
        let removed = ledger.prune(vec!["modA".to_string()]);
        assert!(removed.is_empty());
        assert!(ledger.has_applied("modA".to_string(), "gone".to_string()));
    }

    #[test]
    fn test_prune_removes_absent_package() {
        let ledger = MigrationLedger::new();
        ledger.mark_applied("modB".to_string(), "mX".to_string());
        ledger.mark_applied("modA".to_string(), "m1".to_string());
        let removed = ledger.prune(vec!["modA".to_string()]);
        assert_eq!(removed, vec!["modB"]);
        assert!(!ledger.has_applied("modB".to_string(), "mX".to_string()));
        assert!(ledger.has_applied("modA".to_string(), "m1".to_string()));
    }

    #[test]
    fn test_prune_removes_empty_entries() {
        let json = r#"{"entries":[{"packageId":"modA","migrationIds":[]}]}"#;
        let ledger = MigrationLedger::from_section_json(Some(json.to_string())).unwrap();
        let removed = ledger.prune(vec!["modA".to_string()]);
        assert_eq!(removed, vec!["modA"]);
        assert!(ledger.is_empty());
    }
}
