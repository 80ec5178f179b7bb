use std::sync::{Arc, PoisonError, RwLock};

use crate::migration::definition::{DefinitionSource, MigrationDefinition};
use crate::migration::error::{MigrationError, MigrationResult};
use crate::primitives::{current_config, DefinitionCatalog};
use crate::savecompat_export;

/// Process-lifetime catalog of migration definitions.
///
/// Populated once while content definitions are loaded, read-only afterwards. Definitions
/// are kept in registration order, which is the order rules are tried in: when two
/// definitions of the same package could rewrite the same identifier, the first one wins.
///
/// Malformed definitions never get in, so they can never become active.
#[derive(uniffi::Object)]
pub struct MigrationRegistry {
    definitions: RwLock<Vec<Arc<MigrationDefinition>>>,
    catalog: Option<Arc<dyn DefinitionCatalog>>,
}

#[savecompat_export]
impl MigrationRegistry {
    /// Creates an empty registry that accepts any rename category.
    #[uniffi::constructor]
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            definitions: RwLock::new(Vec::new()),
            catalog: None,
        })
    }

    /// Creates an empty registry that rejects definitions naming categories unknown to
    /// `catalog`.
    #[uniffi::constructor]
    #[must_use]
    pub fn with_catalog(catalog: Arc<dyn DefinitionCatalog>) -> Arc<Self> {
        Arc::new(Self {
            definitions: RwLock::new(Vec::new()),
            catalog: Some(catalog),
        })
    }

    /// Validates and registers a declarative definition.
    ///
    /// # Errors
    /// - `MigrationError::DefinitionInvalid` if the source fails validation.
    /// - `MigrationError::DuplicateRegistration` if `(package, id)` is already registered; the
    ///   earlier registration wins.
    pub fn register_source(&self, source: DefinitionSource) -> Result<(), MigrationError> {
        let config = current_config();
        let definition = MigrationDefinition::from_source(
            source,
            self.catalog.as_deref(),
            &config.package_suffixes,
        )
        .inspect_err(|e| Self::log_rejection(e))?;
        self.register(definition)
    }

    /// Parses, validates and registers a JSON definition document.
    ///
    /// # Errors
    /// Same as [`MigrationRegistry::register_source`].
    pub fn register_json(&self, json: String) -> Result<(), MigrationError> {
        let config = current_config();
        let definition = MigrationDefinition::from_json(
            &json,
            self.catalog.as_deref(),
            &config.package_suffixes,
        )
        .inspect_err(|e| Self::log_rejection(e))?;
        self.register(definition)
    }

    /// Registers every JSON document, skipping (and logging) the ones that are rejected.
    ///
    /// Returns the number of definitions accepted.
    pub fn register_sources(&self, documents: Vec<String>) -> u32 {
        let total = documents.len();
        let accepted = documents
            .into_iter()
            .filter(|json| self.register_json(json.clone()).is_ok())
            .count();

        crate::info!(
            "registry.batch_registered accepted={} rejected={}",
            accepted,
            total - accepted
        );
        u32::try_from(accepted).unwrap_or(u32::MAX)
    }

    /// Ids of the migrations registered for `package_id`, in registration order.
    #[must_use]
    pub fn migration_ids_for(&self, package_id: String) -> Vec<String> {
        self.definitions_for(&package_id)
            .iter()
            .map(|definition| definition.id().to_string())
            .collect()
    }

    /// Distinct owning package ids, in order of first registration.
    #[must_use]
    pub fn package_ids(&self) -> Vec<String> {
        let mut package_ids: Vec<String> = Vec::new();
        for definition in self.read().iter() {
            if !package_ids.iter().any(|p| p == definition.owning_package_id()) {
                package_ids.push(definition.owning_package_id().to_string());
            }
        }
        package_ids
    }

    /// Number of registered definitions.
    #[must_use]
    pub fn len(&self) -> u32 {
        u32::try_from(self.read().len()).unwrap_or(u32::MAX)
    }

    /// Whether nothing has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

impl MigrationRegistry {
    /// Registers an already validated definition.
    ///
    /// # Errors
    /// Returns `MigrationError::DuplicateRegistration` if `(package, id)` is already taken.
    pub fn register(&self, definition: MigrationDefinition) -> MigrationResult<()> {
        let mut definitions = self
            .definitions
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if definitions.iter().any(|existing| {
            existing.owning_package_id() == definition.owning_package_id()
                && existing.id() == definition.id()
        }) {
            let err = MigrationError::DuplicateRegistration {
                package_id: definition.owning_package_id().to_string(),
                migration_id: definition.id().to_string(),
            };
            crate::warn!(
                "registry.rejected error_code={} error={}",
                err.code(),
                err
            );
            return Err(err);
        }

        if definition.is_noop() {
            crate::warn!(
                "registry.noop_definition package={} id={}",
                definition.owning_package_id(),
                definition.id()
            );
        }

        crate::debug!(
            "registry.registered package={} id={}",
            definition.owning_package_id(),
            definition.id()
        );
        definitions.push(Arc::new(definition));
        Ok(())
    }

    /// Definitions owned by `package_id`, in registration order.
    #[must_use]
    pub fn definitions_for(&self, package_id: &str) -> Vec<Arc<MigrationDefinition>> {
        self.read()
            .iter()
            .filter(|definition| definition.owning_package_id() == package_id)
            .cloned()
            .collect()
    }

    /// Every registered definition, in registration order.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<MigrationDefinition>> {
        self.read().clone()
    }

    /// Whether `(package_id, migration_id)` is registered.
    #[must_use]
    pub fn contains(&self, package_id: &str, migration_id: &str) -> bool {
        self.read().iter().any(|definition| {
            definition.owning_package_id() == package_id && definition.id() == migration_id
        })
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Arc<MigrationDefinition>>> {
        self.definitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn log_rejection(err: &MigrationError) {
        crate::error!(
            "registry.rejected error_code={} error={}",
            err.code(),
            err
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition_json(package: &str, id: &str, old: &str, new: &str) -> String {
        format!(
            r#"{{
                "id": "{id}",
                "owningPackageId": "{package}",
                "renames": [{{ "category": "ThingDef", "replacements": {{ "{old}": "{new}" }} }}]
            }}"#
        )
    }

    #[test]
    fn test_definitions_keep_registration_order() {
        let registry = MigrationRegistry::new();
        registry
            .register_json(definition_json("modA", "m2", "A", "B"))
            .unwrap();
        registry
            .register_json(definition_json("modB", "x1", "C", "D"))
            .unwrap();
        registry
            .register_json(definition_json("modA", "m1", "E", "F"))
            .unwrap();

        assert_eq!(registry.migration_ids_for("modA".to_string()), vec!["m2", "m1"]);
        assert_eq!(registry.package_ids(), vec!["modA", "modB"]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_duplicate_registration_keeps_first() {
        let registry = MigrationRegistry::new();
        registry
            .register_json(definition_json("modA", "m1", "Foo", "Bar"))
            .unwrap();

        let result = registry.register_json(definition_json("modA", "m1", "Foo", "Baz"));
        match result {
            Err(MigrationError::DuplicateRegistration {
                package_id,
                migration_id,
            }) => {
                assert_eq!(package_id, "modA");
                assert_eq!(migration_id, "m1");
            }
            other => panic!("Expected DuplicateRegistration, got: {other:?}"),
        }

        let definitions = registry.definitions_for("modA");
        assert_eq!(definitions.len(), 1);
        assert_eq!(definitions[0].replacement_for("ThingDef", "Foo"), Some("Bar"));
    }

    #[test]
    fn test_same_id_in_different_packages_is_allowed() {
        let registry = MigrationRegistry::new();
        registry
            .register_json(definition_json("modA", "m1", "Foo", "Bar"))
            .unwrap();
        registry
            .register_json(definition_json("modB", "m1", "Foo", "Bar"))
            .unwrap();
        assert!(registry.contains("modA", "m1"));
        assert!(registry.contains("modB", "m1"));
        assert!(!registry.contains("modC", "m1"));
    }

    #[test]
    fn test_batch_registration_skips_invalid() {
        let registry = MigrationRegistry::new();
        let accepted = registry.register_sources(vec![
            definition_json("modA", "m1", "Foo", "Bar"),
            "{ not json".to_string(),
            r#"{ "id": "orphan" }"#.to_string(),
            definition_json("modA", "m1", "Foo", "Bar"),
            definition_json("modA", "m2", "Baz", "Qux"),
        ]);
        assert_eq!(accepted, 2);
        assert_eq!(registry.migration_ids_for("modA".to_string()), vec!["m1", "m2"]);
    }

    #[test]
    fn test_register_source_record() {
        let registry = MigrationRegistry::new();
        let source = DefinitionSource {
            id: Some("m1".to_string()),
            owning_package_id: Some("modA".to_string()),
            ..DefinitionSource::default()
        };
        registry.register_source(source).unwrap();
        assert!(registry.contains("modA", "m1"));
        assert!(!registry.is_empty());
    }
}
