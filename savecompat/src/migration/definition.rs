use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer};

use crate::migration::error::{MigrationError, MigrationResult};
use crate::primitives::{normalize_package_id, DefinitionCatalog};

/// Declarative form of a migration, as shipped by a content package.
///
/// JSON layout:
///
/// ```json
/// {
///   "id": "RenameOldGuns",
///   "owningPackageId": "author.weapons",
///   "renames": [
///     { "category": "ThingDef", "replacements": { "Gun_Old": "Gun_New" } }
///   ],
///   "backstory": {
///     "update": ["Soldier22"],
///     "replaceMissing": { "Cadet10": "Cadet11" },
///     "replaceOpposing": { "Veteran3": "Recruit7" }
///   }
/// }
/// ```
///
/// A key that appears twice inside one table is rejected rather than silently overwritten.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, uniffi::Record)]
#[serde(rename_all = "camelCase")]
pub struct DefinitionSource {
    /// Migration id, unique within the owning package.
    #[serde(default)]
    pub id: Option<String>,
    /// Package that ships (and owns) the migration.
    #[serde(default)]
    pub owning_package_id: Option<String>,
    /// Category-scoped rename tables.
    #[serde(default)]
    pub renames: Vec<RenameTableSource>,
    /// Optional paired formative-period (backstory) block.
    #[serde(default)]
    pub backstory: Option<PairedFieldSource>,
}

/// One `(category, {old: new})` rename table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, uniffi::Record)]
#[serde(rename_all = "camelCase")]
pub struct RenameTableSource {
    /// Value category the table applies to (e.g. `ThingDef`).
    pub category: String,
    /// Obsolete identifier to replacement identifier.
    #[serde(default, deserialize_with = "deserialize_unique_map")]
    pub replacements: HashMap<String, String>,
}

/// The paired-field block of a definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, uniffi::Record)]
#[serde(rename_all = "camelCase")]
pub struct PairedFieldSource {
    /// Values that always force regeneration of the owning entity.
    #[serde(default)]
    pub update: Vec<String>,
    /// If a slot holds the key, the slot itself becomes the value.
    #[serde(default, deserialize_with = "deserialize_unique_map")]
    pub replace_missing: HashMap<String, String>,
    /// If a slot holds the key, the counterpart slot becomes the value.
    #[serde(default, deserialize_with = "deserialize_unique_map")]
    pub replace_opposing: HashMap<String, String>,
}

fn deserialize_unique_map<'de, D>(deserializer: D) -> Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct UniqueMapVisitor;

    impl<'de> Visitor<'de> for UniqueMapVisitor {
        type Value = HashMap<String, String>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a map of identifier replacements")
        }

        fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut map = HashMap::with_capacity(access.size_hint().unwrap_or(0));
            while let Some((key, value)) = access.next_entry::<String, String>()? {
                if map.contains_key(&key) {
                    return Err(de::Error::custom(format_args!(
                        "duplicate identifier '{key}'"
                    )));
                }
                map.insert(key, value);
            }
            Ok(map)
        }
    }

    deserializer.deserialize_map(UniqueMapVisitor)
}

/// Parses a JSON definition document.
///
/// Any parse failure is reported as [`MigrationError::DefinitionInvalid`], carrying the
/// document's `id` when it can still be read.
///
/// # Errors
/// Returns `DefinitionInvalid` if the document is not a valid definition source.
pub fn parse_definition_json(json: &str) -> MigrationResult<DefinitionSource> {
    serde_json::from_str(json).map_err(|e| {
        let definition_id = serde_json::from_str::<serde_json::Value>(json)
            .ok()
            .and_then(|value| value.get("id")?.as_str().map(ToString::to_string))
            .unwrap_or_default();
        MigrationError::DefinitionInvalid {
            definition_id,
            reason: format!("unparseable definition: {e}"),
        }
    })
}

/// Category-scoped table mapping obsolete identifiers to their replacements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierRule {
    category: String,
    replacements: HashMap<String, String>,
}

impl IdentifierRule {
    /// Builds a validated rule.
    ///
    /// # Errors
    /// Returns a reason string if the category is blank, an identifier is blank, or an
    /// identifier maps to itself.
    pub fn new(
        category: impl Into<String>,
        replacements: HashMap<String, String>,
    ) -> Result<Self, String> {
        let category = category.into().trim().to_string();
        if category.is_empty() {
            return Err("rename table has an empty category".to_string());
        }
        let replacements = validate_table(&category, replacements, true)?;
        Ok(Self {
            category,
            replacements,
        })
    }

    /// Value category this rule is scoped to.
    #[must_use]
    pub fn category(&self) -> &str {
        &self.category
    }

    /// Replacement for `old_identifier`, if the rule covers it.
    #[must_use]
    pub fn replacement_for(&self, old_identifier: &str) -> Option<&str> {
        self.replacements.get(old_identifier).map(String::as_str)
    }

    /// Number of identifiers the rule rewrites.
    #[must_use]
    pub fn len(&self) -> usize {
        self.replacements.len()
    }

    /// Whether the rule rewrites nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.replacements.is_empty()
    }

    fn merge(&mut self, other: Self) -> Result<(), String> {
        for (old, new) in other.replacements {
            match self.replacements.get(&old) {
                Some(existing) if *existing != new => {
                    return Err(format!(
                        "{} maps '{old}' to both '{existing}' and '{new}'",
                        self.category
                    ));
                }
                _ => {
                    self.replacements.insert(old, new);
                }
            }
        }
        Ok(())
    }
}

/// Outcome of matching a slot value against a [`PairedFieldRule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotMatch<'a> {
    /// The slot itself becomes the given value.
    Missing(&'a str),
    /// The counterpart slot becomes the given value; this slot is left untouched.
    Opposing(&'a str),
}

/// Replacement rule for two mutually-referential slots on the same entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PairedFieldRule {
    update: HashSet<String>,
    replace_missing: HashMap<String, String>,
    replace_opposing: HashMap<String, String>,
}

impl PairedFieldRule {
    /// Builds a validated rule.
    ///
    /// # Errors
    /// Returns a reason string if an identifier is blank, or a `replaceMissing` entry maps a
    /// value to itself.
    pub fn new(
        update: impl IntoIterator<Item = String>,
        replace_missing: HashMap<String, String>,
        replace_opposing: HashMap<String, String>,
    ) -> Result<Self, String> {
        let mut update_set = HashSet::new();
        for identifier in update {
            let identifier = identifier.trim().to_string();
            if identifier.is_empty() {
                return Err("backstory update list contains an empty identifier".to_string());
            }
            update_set.insert(identifier);
        }

        // Opposing X -> X is meaningful: it copies the value into the counterpart slot.
        Ok(Self {
            update: update_set,
            replace_missing: validate_table("replaceMissing", replace_missing, true)?,
            replace_opposing: validate_table("replaceOpposing", replace_opposing, false)?,
        })
    }

    /// Matches `slot_value`, trying `replaceMissing` before `replaceOpposing`.
    #[must_use]
    pub fn match_slot(&self, slot_value: &str) -> Option<SlotMatch<'_>> {
        if let Some(new) = self.replace_missing.get(slot_value) {
            return Some(SlotMatch::Missing(new));
        }
        self.replace_opposing
            .get(slot_value)
            .map(|new| SlotMatch::Opposing(new))
    }

    /// Whether an entity holding `slot_value` must be regenerated regardless of rewrites.
    #[must_use]
    pub fn forces_regeneration(&self, slot_value: &str) -> bool {
        self.update.contains(slot_value)
    }

    /// Whether the rule has nothing to do.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.update.is_empty() && self.replace_missing.is_empty() && self.replace_opposing.is_empty()
    }
}

fn validate_table(
    table: &str,
    replacements: HashMap<String, String>,
    reject_identity: bool,
) -> Result<HashMap<String, String>, String> {
    let mut validated = HashMap::with_capacity(replacements.len());
    for (old, new) in replacements {
        let (old, new) = (old.trim().to_string(), new.trim().to_string());
        if old.is_empty() || new.is_empty() {
            return Err(format!("{table} contains an empty identifier"));
        }
        if reject_identity && old == new {
            return Err(format!("{table} maps '{old}' to itself"));
        }
        if validated.insert(old.clone(), new).is_some() {
            return Err(format!("{table} lists '{old}' more than once"));
        }
    }
    Ok(validated)
}

/// A validated, immutable migration definition.
///
/// Created once from a [`DefinitionSource`] when content is loaded, then shared (behind an
/// `Arc`) by the registry and every load session for the rest of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationDefinition {
    id: String,
    owning_package_id: String,
    rules: HashMap<String, IdentifierRule>,
    paired: Option<PairedFieldRule>,
}

impl MigrationDefinition {
    /// Validates a declarative source.
    ///
    /// When a catalog is supplied, every rename category must be known to it.
    /// `package_suffixes` are stripped from the owning package id so that it compares equal
    /// to normalized manifest ids.
    ///
    /// # Errors
    /// Returns [`MigrationError::DefinitionInvalid`] describing the first problem found.
    pub fn from_source(
        source: DefinitionSource,
        catalog: Option<&dyn DefinitionCatalog>,
        package_suffixes: &[String],
    ) -> MigrationResult<Self> {
        let id = source
            .id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(ToString::to_string);
        let invalid = |reason: String| MigrationError::DefinitionInvalid {
            definition_id: id.clone().unwrap_or_default(),
            reason,
        };

        let Some(definition_id) = id.clone() else {
            return Err(invalid("missing id".to_string()));
        };
        let owning_package_id = source
            .owning_package_id
            .as_deref()
            .and_then(|raw| normalize_package_id(raw, package_suffixes))
            .ok_or_else(|| invalid("missing owningPackageId".to_string()))?;

        let mut rules: HashMap<String, IdentifierRule> = HashMap::new();
        for table in source.renames {
            let rule = IdentifierRule::new(table.category, table.replacements).map_err(invalid)?;
            if let Some(catalog) = catalog {
                if !catalog.has_category(rule.category().to_string()) {
                    return Err(invalid(format!("unknown category '{}'", rule.category())));
                }
            }
            match rules.get_mut(rule.category()) {
                Some(existing) => existing.merge(rule).map_err(invalid)?,
                None => {
                    rules.insert(rule.category().to_string(), rule);
                }
            }
        }

        let paired = match source.backstory {
            Some(block) => {
                let rule =
                    PairedFieldRule::new(block.update, block.replace_missing, block.replace_opposing)
                        .map_err(invalid)?;
                (!rule.is_empty()).then_some(rule)
            }
            None => None,
        };

        Ok(Self {
            id: definition_id,
            owning_package_id,
            rules,
            paired,
        })
    }

    /// Parses and validates a JSON definition document.
    ///
    /// # Errors
    /// Returns [`MigrationError::DefinitionInvalid`] if the document cannot be parsed or
    /// fails validation.
    pub fn from_json(
        json: &str,
        catalog: Option<&dyn DefinitionCatalog>,
        package_suffixes: &[String],
    ) -> MigrationResult<Self> {
        Self::from_source(parse_definition_json(json)?, catalog, package_suffixes)
    }

    /// Migration id, unique within the owning package.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Normalized id of the package that owns this migration.
    #[must_use]
    pub fn owning_package_id(&self) -> &str {
        &self.owning_package_id
    }

    /// Rename rule for `category`, if any.
    #[must_use]
    pub fn rule_for(&self, category: &str) -> Option<&IdentifierRule> {
        self.rules.get(category)
    }

    /// Replacement for `old_identifier` within `category`, if this definition declares one.
    #[must_use]
    pub fn replacement_for(&self, category: &str, old_identifier: &str) -> Option<&str> {
        self.rule_for(category)?.replacement_for(old_identifier)
    }

    /// Paired-field rule, if the definition carries a non-empty one.
    #[must_use]
    pub const fn paired(&self) -> Option<&PairedFieldRule> {
        self.paired.as_ref()
    }

    /// Whether the definition rewrites nothing at all.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.paired.is_none() && self.rules.values().all(IdentifierRule::is_empty)
    }
}
