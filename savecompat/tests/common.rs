#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use savecompat::migration::{MigrationLedger, MigrationRegistry, MigrationRunner};
use savecompat::primitives::{DefinitionCatalog, EntityRegenerator, HostError, PackageEnvironment};

/// Package environment whose enabled set can be changed between loads.
#[derive(Default)]
pub struct FakeEnvironment {
    enabled: Mutex<Vec<String>>,
}

impl FakeEnvironment {
    pub fn with(enabled: &[&str]) -> Arc<Self> {
        let environment = Self::default();
        environment.set_enabled(enabled);
        Arc::new(environment)
    }

    pub fn set_enabled(&self, enabled: &[&str]) {
        *self.enabled.lock().unwrap() = enabled.iter().map(ToString::to_string).collect();
    }
}

impl PackageEnvironment for FakeEnvironment {
    fn is_enabled(&self, package_id: String) -> bool {
        self.enabled.lock().unwrap().contains(&package_id)
    }

    fn enabled_package_ids(&self) -> Vec<String> {
        self.enabled.lock().unwrap().clone()
    }
}

/// Catalog that knows a fixed set of identifiers and counts lookups.
pub struct FakeCatalog {
    categories: HashSet<String>,
    identifiers: HashSet<(String, String)>,
    backstories: HashSet<String>,
    lookups: AtomicUsize,
}

impl FakeCatalog {
    pub fn new(identifiers: &[(&str, &str)], backstories: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            categories: ["ThingDef", "PawnKindDef", "HediffDef"]
                .iter()
                .map(ToString::to_string)
                .collect(),
            identifiers: identifiers
                .iter()
                .map(|(category, id)| ((*category).to_string(), (*id).to_string()))
                .collect(),
            backstories: backstories.iter().map(ToString::to_string).collect(),
            lookups: AtomicUsize::new(0),
        })
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl DefinitionCatalog for FakeCatalog {
    fn has_category(&self, category: String) -> bool {
        self.categories.contains(&category)
    }

    fn contains(&self, category: String, identifier: String) -> bool {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.identifiers.contains(&(category, identifier))
    }

    fn has_backstory(&self, identifier: String) -> bool {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.backstories.contains(&identifier)
    }
}

/// Regenerator that records every call and fails for a configured set of entities.
#[derive(Default)]
pub struct RecordingRegenerator {
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingRegenerator {
    pub fn fail_for(&self, entity_id: &str) {
        self.failing.lock().unwrap().insert(entity_id.to_string());
    }

    pub fn clear_failures(&self) {
        self.failing.lock().unwrap().clear();
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl EntityRegenerator for RecordingRegenerator {
    fn regenerate(&self, entity_id: String) -> Result<(), HostError> {
        self.calls.lock().unwrap().push(entity_id.clone());
        if self.failing.lock().unwrap().contains(&entity_id) {
            return Err(HostError::RegenerationFailed {
                entity_id,
                reason: "derived state depends on a missing def".to_string(),
            });
        }
        Ok(())
    }
}

/// Everything a test needs to drive loads and saves.
pub struct Harness {
    pub registry: Arc<MigrationRegistry>,
    pub ledger: Arc<MigrationLedger>,
    pub environment: Arc<FakeEnvironment>,
    pub catalog: Arc<FakeCatalog>,
    pub regenerator: Arc<RecordingRegenerator>,
    pub runner: Arc<MigrationRunner>,
}

impl Harness {
    pub fn new(enabled: &[&str], catalog: Arc<FakeCatalog>) -> Self {
        let registry = MigrationRegistry::with_catalog(catalog.clone());
        let ledger = MigrationLedger::new();
        let environment = FakeEnvironment::with(enabled);
        let regenerator = Arc::new(RecordingRegenerator::default());
        let runner = MigrationRunner::new(
            registry.clone(),
            ledger.clone(),
            environment.clone(),
            catalog.clone(),
            regenerator.clone(),
        );
        Self {
            registry,
            ledger,
            environment,
            catalog,
            regenerator,
            runner,
        }
    }

    pub fn register(&self, json: &str) {
        self.registry.register_json(json.to_string()).unwrap();
    }
}

pub fn manifest(packages: &[&str]) -> Vec<String> {
    packages.iter().map(ToString::to_string).collect()
}

pub fn rename_definition(package: &str, id: &str, category: &str, old: &str, new: &str) -> String {
    format!(
        r#"{{
            "id": "{id}",
            "owningPackageId": "{package}",
            "renames": [{{ "category": "{category}", "replacements": {{ "{old}": "{new}" }} }}]
        }}"#
    )
}
